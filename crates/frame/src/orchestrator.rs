//! The frame loop.
//!
//! [`FrameOrchestrator::render_frame`] runs one iteration of the steady-state
//! loop, [`FrameOrchestrator::recover`] rebuilds the image set after the
//! surface went stale, and [`FrameOrchestrator::run`] drives both from window
//! events until a close request or a frame limit.

use std::sync::Arc;
use std::time::Duration;

use framechain_core::{Extent, FpsCounter, FramesConfig, Timer};
use framechain_platform::{WindowEvents, WindowSystem};
use tracing::{debug, error, info};

use crate::backend::{Acquire, Gpu, Present, Stage, Submission, Surface, SurfaceRequest, Timeout};
use crate::error::{FrameError, FrameResult};
use crate::pass::{PassContext, SceneSource, StagePasses};
use crate::pool::PresentationPool;
use crate::ring::{FrameRing, FrameTicket};
use crate::tracking::InFlightTable;

/// Period of the frame rate log until [`FrameOrchestrator::with_stats_interval`]
/// sets another. Matches the default of `[debug] stats_interval_secs`.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(2);

/// Where a stale surface was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleSource {
    /// Nothing was submitted for the frame.
    Acquire,
    /// The frame was submitted but not displayed.
    Present,
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented {
        frame: u64,
        slot: usize,
        image: u32,
        /// The hazard check had to wait on another slot's frame.
        hazard_wait: bool,
        /// Acquire or present reported the surface suboptimal.
        suboptimal: bool,
    },
    /// The surface must be rebuilt before the next frame.
    SurfaceStale(StaleSource),
}

/// Counters over the orchestrator's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_presented: u64,
    /// Stage submissions, two per submitted frame.
    pub submissions: u64,
    /// Slot borrows that blocked on the slot's previous frame.
    pub slot_waits: u64,
    /// Hazard checks that blocked on another slot's frame.
    pub hazard_waits: u64,
    pub stale_frames: u64,
    pub rebuilds: u64,
}

impl std::fmt::Display for FrameStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "presented={} submissions={} slot_waits={} hazard_waits={} stale={} rebuilds={}",
            self.frames_presented,
            self.submissions,
            self.slot_waits,
            self.hazard_waits,
            self.stale_frames,
            self.rebuilds
        )
    }
}

/// Result of [`FrameOrchestrator::run`].
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    /// Frames presented during this run.
    pub frames_presented: u64,
    /// Calls to `render_frame` during this run.
    pub iterations: u64,
    pub elapsed: Duration,
    /// Lifetime counters at the end of the run.
    pub stats: FrameStats,
}

/// Window event handler owned by the frame loop.
#[derive(Debug, Default)]
pub struct LoopControl {
    close: bool,
    resized: Option<Extent>,
}

impl LoopControl {
    #[inline]
    pub fn should_close(&self) -> bool {
        self.close
    }

    /// Returns the latest size reported since the last call.
    pub fn take_resize(&mut self) -> Option<Extent> {
        self.resized.take()
    }
}

impl WindowEvents for LoopControl {
    fn resized(&mut self, size: Extent) {
        self.resized = Some(size);
    }

    fn close_requested(&mut self) {
        self.close = true;
    }
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    drain_poll: Duration,
    drain_max_polls: u32,
    rebuild_on_suboptimal: bool,
}

/// Drives frames through a [`FrameRing`] and a [`PresentationPool`].
///
/// # Resource Destruction
///
/// Dropping the orchestrator waits for the device to go idle, then drops the
/// images, the surface and finally the frame slots.
pub struct FrameOrchestrator<S: Surface> {
    pool: PresentationPool<S>,
    ring: FrameRing<S::Gpu>,
    tracking: InFlightTable,
    settings: Settings,
    stats: FrameStats,
    stats_interval: Duration,
    /// Slots whose device signals were left armed by a frame that never
    /// reached a present; renewed on rebuild.
    armed_slots: Vec<usize>,
}

impl<S: Surface> FrameOrchestrator<S> {
    /// Creates the frame slots and builds the image set.
    ///
    /// If `extent` is empty (a minimized window) the pool stays unbuilt and
    /// [`FrameOrchestrator::run`] starts with a recovery.
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidConfig`] if `config` does not validate
    /// - [`FrameError::ResourceExhausted`] if the device cannot create every
    ///   slot or the surface grants too few images
    pub fn new(
        gpu: Arc<S::Gpu>,
        surface: S,
        config: &FramesConfig,
        extent: Extent,
    ) -> FrameResult<Self> {
        config
            .validate()
            .map_err(|e| FrameError::InvalidConfig(e.to_string()))?;

        let ring = FrameRing::new(
            gpu,
            config.frames_in_flight,
            Timeout::from_option(config.slot_wait_timeout()),
        )?;

        let mut pool = PresentationPool::new(surface, SurfaceRequest::from_config(config));
        if extent.is_empty() {
            info!("Drawable area is empty, deferring presentation pool build");
        } else {
            pool.build(extent)?;
        }
        let tracking = InFlightTable::new(pool.image_count());

        info!(
            "Frame orchestrator ready: {} frame slot(s), {} presentation image(s)",
            ring.len(),
            pool.image_count()
        );

        Ok(Self {
            pool,
            ring,
            tracking,
            settings: Settings {
                drain_poll: config.drain_poll(),
                drain_max_polls: config.drain_max_polls,
                rebuild_on_suboptimal: config.rebuild_on_suboptimal,
            },
            stats: FrameStats::default(),
            stats_interval: DEFAULT_STATS_INTERVAL,
            armed_slots: Vec::new(),
        })
    }

    /// Sets how often [`FrameOrchestrator::run`] logs frame rate and counters.
    ///
    /// The interval lives in the `[debug]` section rather than in
    /// [`FramesConfig`], so `new` starts from [`DEFAULT_STATS_INTERVAL`].
    /// Pass `DebugConfig::stats_interval()` to honour the config file.
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Renders and presents one frame.
    ///
    /// 1. Borrow the next frame slot (admission control)
    /// 2. Acquire an image; out-of-date releases the slot and returns
    ///    [`StaleSource::Acquire`] with nothing submitted
    /// 3. Hazard check: wait on the image's previous writer if it was another
    ///    slot and has not retired, then record this frame as the writer
    /// 4. Record the scene and overlay stages
    /// 5. Submit scene: wait image-acquired, signal scene-done
    /// 6. Submit overlay: wait scene-done, signal overlay-done and the slot
    /// 7. Present waiting on overlay-done
    ///
    /// # Errors
    ///
    /// Any error abandons the frame. [`FrameError::DeviceLost`] is fatal.
    pub fn render_frame(
        &mut self,
        scene: &mut dyn SceneSource,
        passes: &mut StagePasses<'_, S>,
    ) -> FrameResult<FrameStatus> {
        let ticket = self.ring.next_slot()?;

        let acquired = self
            .ring
            .slot(ticket.slot)
            .and_then(|slot| self.pool.acquire_next(slot.image_acquired()));
        let (image_index, acquire_suboptimal) = match acquired {
            Ok(Acquire::Ready { index, suboptimal }) => (index, suboptimal),
            Ok(Acquire::OutOfDate) => {
                self.ring.release_unused(ticket.slot)?;
                self.stats.stale_frames += 1;
                debug!("Frame {} abandoned: surface out of date on acquire", ticket.serial);
                return Ok(FrameStatus::SurfaceStale(StaleSource::Acquire));
            }
            Err(e) => return Err(self.abandon(ticket, e)),
        };

        let hazard_wait = match self.record_stages(ticket, image_index, scene, passes) {
            Ok(hazard_wait) => hazard_wait,
            Err(e) => {
                // The acquire armed image_acquired and nothing will wait on it.
                self.mark_armed(ticket.slot);
                return Err(self.abandon(ticket, e));
            }
        };

        let slot = self.ring.slot(ticket.slot)?;
        let gpu = self.ring.gpu();
        for stage in Stage::ALL {
            let signals = slot.stage_signals(stage);
            gpu.submit(Submission {
                frame: ticket.serial,
                stage,
                batch: slot.batch(stage),
                wait: signals.wait,
                signal: signals.signal,
                host: signals.host,
            })
            .inspect_err(|e| {
                error!("Submitting {} stage of frame {} failed: {}", stage, ticket.serial, e)
            })?;
            self.stats.submissions += 1;
        }

        match self.pool.present(image_index, slot.stage_done(Stage::Overlay))? {
            Present::Done { suboptimal } => {
                self.stats.frames_presented += 1;
                Ok(FrameStatus::Presented {
                    frame: ticket.serial,
                    slot: ticket.slot,
                    image: image_index,
                    hazard_wait,
                    suboptimal: acquire_suboptimal || suboptimal,
                })
            }
            Present::OutOfDate => {
                debug!("Frame {} not displayed: surface out of date on present", ticket.serial);
                self.mark_armed(ticket.slot);
                self.stats.stale_frames += 1;
                Ok(FrameStatus::SurfaceStale(StaleSource::Present))
            }
        }
    }

    /// Hazard check and recording of both stages into the slot's batches.
    ///
    /// Returns whether the hazard check had to wait.
    fn record_stages(
        &mut self,
        ticket: FrameTicket,
        image_index: u32,
        scene: &mut dyn SceneSource,
        passes: &mut StagePasses<'_, S>,
    ) -> FrameResult<bool> {
        let hazard_wait = match self.tracking.conflict(image_index, ticket)? {
            Some(previous) if !self.ring.is_retired(previous)? => {
                debug!(
                    "Image {} still being written by frame {} in slot {}, waiting",
                    image_index, previous.serial, previous.slot
                );
                self.ring.wait_for(previous)?
            }
            _ => false,
        };
        if hazard_wait {
            self.stats.hazard_waits += 1;
        }
        self.tracking.record(image_index, ticket)?;

        let draw_list = scene.draw_list(ticket.serial);
        let slot = self.ring.slot(ticket.slot)?;
        let image = self.pool.image(image_index)?;
        let extent = self.pool.extent();
        let gpu = self.ring.gpu();

        for stage in Stage::ALL {
            let batch = slot.batch(stage);
            gpu.begin_batch(batch)?;
            passes.record(&PassContext {
                frame: ticket.serial,
                stage,
                slot: ticket.slot,
                image_index,
                image,
                batch,
                extent,
                draw_list: &draw_list,
                signals: slot.stage_signals(stage),
            })?;
            gpu.end_batch(batch)?;
        }
        Ok(hazard_wait)
    }

    /// Gives a borrowed slot back after a failure before its first submission.
    ///
    /// Returns `err` so the caller can propagate it. A failure to release is
    /// logged; the original error wins.
    fn abandon(&self, ticket: FrameTicket, err: FrameError) -> FrameError {
        error!("Frame {} abandoned before submission: {}", ticket.serial, err);
        if let Err(release) = self.ring.release_unused(ticket.slot) {
            error!("Failed to release frame slot {}: {}", ticket.slot, release);
        }
        err
    }

    fn mark_armed(&mut self, slot: usize) {
        if !self.armed_slots.contains(&slot) {
            self.armed_slots.push(slot);
        }
    }

    /// Rebuilds the image set for the window's current size.
    ///
    /// Blocks, pumping events into `control`, until the window has a
    /// non-zero drawable area. Then drains every slot, waits for the device to
    /// go idle, rebuilds the pool, clears the tracking table and notifies the
    /// passes. Frame slots are kept.
    ///
    /// Returns `false` if a close was requested while waiting.
    pub fn recover(
        &mut self,
        window: &mut dyn WindowSystem,
        control: &mut LoopControl,
        passes: &mut StagePasses<'_, S>,
    ) -> FrameResult<bool> {
        let mut extent = window.drawable_size();
        if extent.is_empty() {
            info!("Drawable area is empty, waiting for the window to be restored");
        }
        while extent.is_empty() {
            window.wait_events(control)?;
            if control.should_close() {
                return Ok(false);
            }
            extent = window.drawable_size();
        }

        self.ring
            .drain(self.settings.drain_poll, self.settings.drain_max_polls)?;
        self.ring.gpu().wait_idle()?;

        let image_count = self.pool.rebuild(extent)?;
        self.tracking.reset(image_count);
        for slot in std::mem::take(&mut self.armed_slots) {
            self.ring.renew_device_signals(slot)?;
        }
        passes.surface_rebuilt(image_count, self.pool.extent())?;

        self.stats.rebuilds += 1;
        info!(
            "Surface rebuilt at {} with {} image(s) (rebuild #{})",
            self.pool.extent(),
            image_count,
            self.stats.rebuilds
        );
        Ok(true)
    }

    /// Runs the frame loop.
    ///
    /// Each iteration pumps window events once, then either recovers (after a
    /// stale surface, a resize, or a suboptimal present when configured) or
    /// renders a frame. Stops when the window asks to close or after
    /// `max_frames` presented frames, then drains every slot.
    pub fn run(
        &mut self,
        window: &mut dyn WindowSystem,
        scene: &mut dyn SceneSource,
        passes: &mut StagePasses<'_, S>,
        max_frames: Option<u64>,
    ) -> FrameResult<RunSummary> {
        let timer = Timer::new();
        let mut fps = FpsCounter::new(self.stats_interval);
        let mut control = LoopControl::default();
        let mut rebuild_pending = !self.pool.is_built();
        let mut presented = 0;
        let mut iterations = 0;

        info!("Entering frame loop");

        loop {
            if max_frames.is_some_and(|max| presented >= max) {
                info!("Frame limit of {} reached", presented);
                break;
            }

            window.pump_events(&mut control)?;
            if control.should_close() {
                info!("Close requested, leaving frame loop");
                break;
            }
            if let Some(size) = control.take_resize()
                && size != self.pool.extent()
            {
                debug!("Window resized to {}", size);
                rebuild_pending = true;
            }

            if rebuild_pending {
                if !self.recover(window, &mut control, passes)? {
                    info!("Close requested during recovery, leaving frame loop");
                    break;
                }
                rebuild_pending = false;
                continue;
            }

            iterations += 1;
            match self.render_frame(scene, passes)? {
                FrameStatus::Presented { suboptimal, .. } => {
                    presented += 1;
                    if suboptimal && self.settings.rebuild_on_suboptimal {
                        debug!("Surface suboptimal, scheduling rebuild");
                        rebuild_pending = true;
                    }
                    if let Some(rate) = fps.frame() {
                        info!("{:.1} fps ({})", rate, self.stats());
                    }
                }
                FrameStatus::SurfaceStale(source) => {
                    debug!("Surface stale on {:?}, scheduling rebuild", source);
                    rebuild_pending = true;
                }
            }
        }

        self.ring
            .drain(self.settings.drain_poll, self.settings.drain_max_polls)?;

        let summary = RunSummary {
            frames_presented: presented,
            iterations,
            elapsed: timer.elapsed(),
            stats: self.stats(),
        };
        info!(
            "Frame loop finished: {} frame(s) in {:.2}s ({})",
            summary.frames_presented,
            summary.elapsed.as_secs_f32(),
            summary.stats
        );
        Ok(summary)
    }

    /// Lifetime counters.
    pub fn stats(&self) -> FrameStats {
        FrameStats {
            slot_waits: self.ring.admission_waits(),
            ..self.stats
        }
    }

    #[inline]
    pub fn stats_interval(&self) -> Duration {
        self.stats_interval
    }

    #[inline]
    pub fn pool(&self) -> &PresentationPool<S> {
        &self.pool
    }

    #[inline]
    pub fn ring(&self) -> &FrameRing<S::Gpu> {
        &self.ring
    }

    #[inline]
    pub fn tracking(&self) -> &InFlightTable {
        &self.tracking
    }

    #[inline]
    pub fn gpu(&self) -> &Arc<S::Gpu> {
        self.ring.gpu()
    }

    /// The surface, for backends that need to be poked from outside the loop.
    #[inline]
    pub fn surface_mut(&mut self) -> &mut S {
        self.pool.surface_mut()
    }

    /// Last writer of each image.
    pub fn last_writers(&self) -> impl Iterator<Item = (u32, Option<FrameTicket>)> + '_ {
        self.tracking.iter()
    }
}

impl<S: Surface> Drop for FrameOrchestrator<S> {
    fn drop(&mut self) {
        if let Err(e) = self.ring.gpu().wait_idle() {
            error!("Failed to wait for device idle during teardown: {}", e);
        }
        self.pool.destroy();
        debug!("Frame orchestrator destroyed");
    }
}
