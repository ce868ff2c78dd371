//! End-to-end frame loop scenarios on the simulated device.
//!
//! The simulated device only completes work when the CPU blocks on it, so
//! every slot and image is as busy as it can be and each wait is counted.
//! Scenarios that need a device that keeps up call `SimGpu::retire_all`.

use std::sync::Arc;

use framechain_core::{Extent, FramesConfig};
use framechain_frame::sim::{RecordingPass, SimGpu, SimSurface, SimSurfaceCaps, SimWindow, WindowScript};
use framechain_frame::{
    DrawItem, FrameError, FrameOrchestrator, FrameStatus, LoopControl, MeshId, PoolState,
    StagePasses, StaleSource, StaticScene,
};
use glam::Mat4;

const EXTENT: Extent = Extent::new(320, 240);

fn config(frames: usize, images: u32) -> FramesConfig {
    FramesConfig {
        frames_in_flight: frames,
        preferred_image_count: images,
        min_image_count: 2,
        ..Default::default()
    }
}

fn scene() -> StaticScene {
    StaticScene::new(vec![
        DrawItem::new(MeshId(0), Mat4::IDENTITY),
        DrawItem::new(MeshId(1), Mat4::from_scale(glam::Vec3::splat(0.5))),
    ])
}

struct Harness {
    gpu: Arc<SimGpu>,
    orch: FrameOrchestrator<SimSurface>,
    scene: StaticScene,
    scene_pass: RecordingPass,
    overlay_pass: RecordingPass,
}

impl Harness {
    fn new(frames: usize, images: u32) -> Self {
        let gpu = Arc::new(SimGpu::new());
        Self::with_surface(gpu.clone(), SimSurface::new(&gpu), frames, images)
    }

    fn with_surface(gpu: Arc<SimGpu>, surface: SimSurface, frames: usize, images: u32) -> Self {
        let orch =
            FrameOrchestrator::new(gpu.clone(), surface, &config(frames, images), EXTENT).unwrap();
        Self {
            gpu,
            orch,
            scene: scene(),
            scene_pass: RecordingPass::new(),
            overlay_pass: RecordingPass::new(),
        }
    }

    fn frame(&mut self) -> Result<FrameStatus, FrameError> {
        let mut passes = StagePasses::new(&mut self.scene_pass, &mut self.overlay_pass);
        self.orch.render_frame(&mut self.scene, &mut passes)
    }

    fn recover(&mut self, window: &mut SimWindow) -> bool {
        let mut control = LoopControl::default();
        let mut passes = StagePasses::new(&mut self.scene_pass, &mut self.overlay_pass);
        self.orch.recover(window, &mut control, &mut passes).unwrap()
    }

    /// Renders `count` frames, checking the admission bound after each.
    fn frames(&mut self, count: usize) -> Vec<FrameStatus> {
        (0..count)
            .map(|_| {
                let status = self.frame().unwrap();
                assert!(self.gpu.in_flight_frames() <= self.orch.ring().len());
                status
            })
            .collect()
    }
}

fn hazard_waits(statuses: &[FrameStatus]) -> Vec<bool> {
    statuses
        .iter()
        .map(|s| match s {
            FrameStatus::Presented { hazard_wait, .. } => *hazard_wait,
            FrameStatus::SurfaceStale(_) => false,
        })
        .collect()
}

#[test]
fn test_two_slots_three_images_worst_case() {
    let mut h = Harness::new(2, 3);
    let statuses = h.frames(10);

    let images: Vec<u32> = statuses
        .iter()
        .map(|s| match s {
            FrameStatus::Presented { image, .. } => *image,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(images, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);

    // Re-borrowing a slot always retires the image's previous writer first.
    assert!(hazard_waits(&statuses).iter().all(|w| !w));
    let stats = h.orch.stats();
    assert_eq!(stats.hazard_waits, 0);
    // Every borrow after the first lap finds its slot's last frame queued.
    assert_eq!(stats.slot_waits, 8);
    assert_eq!(stats.frames_presented, 10);
    assert_eq!(stats.submissions, 20);
    assert_eq!(h.gpu.stats().concurrent_writes, 0);
}

#[test]
fn test_two_slots_three_images_with_device_catching_up() {
    let mut h = Harness::new(2, 3);
    let mut waited_on = Vec::new();
    let mut statuses = Vec::new();

    for iteration in 1..=10 {
        let before = h.orch.ring().admission_waits();
        statuses.push(h.frame().unwrap());
        if h.orch.ring().admission_waits() > before {
            waited_on.push(iteration);
        }
        // From the first wrap on, the device finishes each frame before the
        // host comes back for its slot.
        if iteration >= 4 {
            h.gpu.retire_all();
        }
    }

    assert_eq!(waited_on, vec![3, 4]);
    assert!(hazard_waits(&statuses).iter().all(|w| !w));
    let stats = h.orch.stats();
    assert_eq!(stats.slot_waits, 2);
    assert_eq!(stats.hazard_waits, 0);
    assert_eq!(stats.frames_presented, 10);
    assert_eq!(stats.submissions, 20);
    assert_eq!(h.gpu.stats().concurrent_writes, 0);
}

#[test]
fn test_three_slots_two_images() {
    let mut h = Harness::new(3, 2);
    let statuses = h.frames(10);

    assert_eq!(
        hazard_waits(&statuses),
        vec![false, false, true, true, true, true, true, true, true, true]
    );
    let stats = h.orch.stats();
    assert_eq!(stats.hazard_waits, 8);
    // The hazard waits retire each slot before it comes around again.
    assert_eq!(stats.slot_waits, 0);
    assert_eq!(h.gpu.stats().concurrent_writes, 0);
}

#[test]
fn test_single_slot_serializes_frames() {
    let mut h = Harness::new(1, 3);
    h.frames(5);
    assert_eq!(h.orch.stats().slot_waits, 4);
    assert!(h.gpu.in_flight_frames() <= 1);
    assert_eq!(h.gpu.stats().concurrent_writes, 0);
}

#[test]
fn test_stale_acquire_rebuilds_and_resets_tracking() {
    let gpu = Arc::new(SimGpu::new());
    let surface = SimSurface::new(&gpu).stale_on_acquire(5);
    let ledger = surface.ledger();
    let mut h = Harness::with_surface(gpu.clone(), surface, 2, 3);

    h.frames(4);
    assert_eq!(
        h.frame().unwrap(),
        FrameStatus::SurfaceStale(StaleSource::Acquire)
    );
    // Nothing was recorded or submitted for the abandoned frame.
    assert_eq!(gpu.stats().submissions, 8);
    assert_eq!(gpu.stats().signal_only, 1);
    assert_eq!(h.scene_pass.records().len(), 4);
    assert_eq!(h.orch.pool().state(), PoolState::OutOfDate);

    let mut window = SimWindow::new(EXTENT);
    assert!(h.recover(&mut window));
    assert_eq!(window.waits(), 0);
    assert!(h.orch.tracking().is_clear());
    assert_eq!(h.orch.pool().state(), PoolState::Built);
    assert_eq!(h.orch.stats().rebuilds, 1);

    // Every image of the first set was released exactly once.
    for id in ledger.created_images().iter().filter(|id| id.generation == 1) {
        assert_eq!(ledger.drops(*id), 1);
    }
    assert_eq!(ledger.live(), 3);

    let slot_waits = h.orch.stats().slot_waits;
    assert_eq!(
        h.frame().unwrap(),
        FrameStatus::Presented {
            frame: 6,
            slot: 1,
            image: 0,
            hazard_wait: false,
            suboptimal: false,
        }
    );
    // The drain retired every slot.
    assert_eq!(h.orch.stats().slot_waits, slot_waits);
    assert_eq!(h.scene_pass.records().last().unwrap().image.generation, 2);
    assert_eq!(gpu.stats().stale_image_writes, 0);
}

#[test]
fn test_stale_present_recovers() {
    let gpu = Arc::new(SimGpu::new());
    let surface = SimSurface::new(&gpu).stale_on_present(3);
    let mut h = Harness::with_surface(gpu.clone(), surface, 2, 3);

    h.frames(2);
    assert_eq!(
        h.frame().unwrap(),
        FrameStatus::SurfaceStale(StaleSource::Present)
    );
    // The frame was submitted even though it was not displayed.
    assert_eq!(gpu.stats().submissions, 6);
    assert_eq!(gpu.stats().presents, 2);

    let mut window = SimWindow::new(EXTENT);
    assert!(h.recover(&mut window));

    let statuses = h.frames(4);
    assert!(statuses.iter().all(|s| matches!(s, FrameStatus::Presented { .. })));
    assert_eq!(gpu.stats().presents, 6);
    assert_eq!(gpu.stats().concurrent_writes, 0);
}

#[test]
fn test_device_loss_is_fatal() {
    let mut h = Harness::new(2, 3);
    h.frames(2);
    h.gpu.lose_device();

    let err = h.frame().unwrap_err();
    assert!(matches!(err, FrameError::DeviceLost));
    assert!(err.is_fatal());
}

#[test]
fn test_hung_device_times_out_as_device_lost() {
    let gpu = Arc::new(SimGpu::new());
    let config = FramesConfig {
        slot_wait_timeout_ms: Some(5),
        ..config(1, 2)
    };
    let mut orch =
        FrameOrchestrator::new(gpu.clone(), SimSurface::new(&gpu), &config, EXTENT).unwrap();
    let (mut a, mut b) = (RecordingPass::new(), RecordingPass::new());
    let mut scene = scene();
    let mut passes = StagePasses::new(&mut a, &mut b);

    orch.render_frame(&mut scene, &mut passes).unwrap();
    gpu.hang();
    assert!(matches!(
        orch.render_frame(&mut scene, &mut passes),
        Err(FrameError::DeviceLost)
    ));
}

#[test]
fn test_too_few_slots_is_resource_exhausted() {
    let gpu = Arc::new(SimGpu::new());
    gpu.limit_host_signals(1);
    let result = FrameOrchestrator::new(gpu.clone(), SimSurface::new(&gpu), &config(2, 3), EXTENT);

    match result {
        Err(FrameError::ResourceExhausted {
            requested, granted, ..
        }) => {
            assert_eq!(requested, 2);
            assert_eq!(granted, 1);
        }
        Err(other) => panic!("expected ResourceExhausted, got {:?}", other),
        Ok(_) => panic!("expected ResourceExhausted"),
    }
    // Partially created slots were released.
    assert_eq!(gpu.live_host_signals(), 0);
    assert_eq!(gpu.live_device_signals(), 0);
}

#[test]
fn test_too_few_images_is_resource_exhausted() {
    let gpu = Arc::new(SimGpu::new());
    let surface = SimSurface::new(&gpu).with_caps(SimSurfaceCaps {
        min_image_count: 1,
        max_image_count: 1,
    });
    let result = FrameOrchestrator::new(gpu.clone(), surface, &config(2, 3), EXTENT);
    assert!(matches!(
        result,
        Err(FrameError::ResourceExhausted {
            what: "presentation images",
            ..
        })
    ));
}

#[test]
fn test_run_survives_minimize_and_resize() {
    let gpu = Arc::new(SimGpu::new());
    let mut orch =
        FrameOrchestrator::new(gpu.clone(), SimSurface::new(&gpu), &config(2, 3), EXTENT).unwrap();
    let mut window = SimWindow::new(EXTENT)
        .at(3, WindowScript::Resize(Extent::default()))
        .at(5, WindowScript::Resize(Extent::new(128, 96)));
    let (mut a, mut b) = (RecordingPass::new(), RecordingPass::new());
    let mut scene = scene();

    let summary = {
        let mut passes = StagePasses::new(&mut a, &mut b);
        orch.run(&mut window, &mut scene, &mut passes, Some(6)).unwrap()
    };

    assert_eq!(summary.frames_presented, 6);
    assert_eq!(summary.iterations, 6);
    assert_eq!(summary.stats.rebuilds, 1);
    // Two blocking waits while the window had no drawable area.
    assert_eq!(window.waits(), 2);
    assert_eq!(window.pumps(), 9);
    assert_eq!(a.rebuilds(), &[(3, Extent::new(128, 96))]);
    assert_eq!(a.records().last().unwrap().extent, Extent::new(128, 96));
    assert_eq!(orch.ring().outstanding().unwrap(), 0);
    assert_eq!(gpu.stats().concurrent_writes, 0);
}

#[test]
fn test_run_stops_on_close() {
    let gpu = Arc::new(SimGpu::new());
    let mut orch =
        FrameOrchestrator::new(gpu.clone(), SimSurface::new(&gpu), &config(2, 3), EXTENT).unwrap();
    let mut window = SimWindow::new(EXTENT).at(4, WindowScript::Close);
    let (mut a, mut b) = (RecordingPass::new(), RecordingPass::new());
    let mut scene = scene();

    let summary = {
        let mut passes = StagePasses::new(&mut a, &mut b);
        orch.run(&mut window, &mut scene, &mut passes, None).unwrap()
    };

    assert_eq!(summary.frames_presented, 3);
    assert_eq!(gpu.queued(), 0);
}

#[test]
fn test_run_rebuilds_after_stale_acquire() {
    let gpu = Arc::new(SimGpu::new());
    let surface = SimSurface::new(&gpu).stale_on_acquire(3);
    let mut orch = FrameOrchestrator::new(gpu.clone(), surface, &config(2, 3), EXTENT).unwrap();
    let mut window = SimWindow::new(EXTENT);
    let (mut a, mut b) = (RecordingPass::new(), RecordingPass::new());
    let mut scene = scene();

    let summary = {
        let mut passes = StagePasses::new(&mut a, &mut b);
        orch.run(&mut window, &mut scene, &mut passes, Some(5)).unwrap()
    };

    assert_eq!(summary.frames_presented, 5);
    assert_eq!(summary.iterations, 6);
    assert_eq!(summary.stats.stale_frames, 1);
    assert_eq!(summary.stats.rebuilds, 1);
    assert_eq!(orch.pool().generation(), 2);
}

#[test]
fn test_teardown_releases_everything() {
    let gpu = Arc::new(SimGpu::new());
    let surface = SimSurface::new(&gpu);
    let ledger = surface.ledger();
    {
        let mut h = Harness::with_surface(gpu.clone(), surface, 3, 3);
        h.frames(7);
    }
    assert_eq!(gpu.queued(), 0);
    assert_eq!(ledger.live(), 0);
    assert_eq!(gpu.live_device_signals(), 0);
    assert_eq!(gpu.live_host_signals(), 0);
    assert_eq!(gpu.live_batches(), 0);
}
