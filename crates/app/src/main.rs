//! framechain - frame pipelining demo.
//!
//! Opens a window and keeps several frames in flight against the swapchain,
//! or, with `--headless`, drives the same frame loop against the simulated
//! device and prints the resulting counters.

mod scene;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use framechain_core::{Config, Extent};
use framechain_frame::sim::{RecordingPass, SimGpu, SimSurface, SimWindow};
use framechain_frame::vulkan::{HudPass, ScenePass, VulkanGpu, VulkanSurface};
use framechain_frame::{FrameOrchestrator, RunSummary, StagePasses};
use framechain_platform::{DesktopWindow, WindowSystem};
use framechain_rhi::device::Device;
use framechain_rhi::instance::Instance;
use framechain_rhi::physical_device::select_physical_device;

use scene::OrbitScene;

/// Frame limit of a headless run when none is given.
const HEADLESS_FRAMES: u64 = 240;

#[derive(Debug, Parser)]
#[command(name = "framechain", version, about = "Frame pipelining demo")]
struct Args {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(short, long, default_value = "framechain.toml")]
    config: PathBuf,

    /// Run against the simulated device instead of opening a window.
    #[arg(long)]
    headless: bool,

    /// Stop after this many presented frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Preferred number of presentation images.
    #[arg(long)]
    images: Option<u32>,

    /// Number of frames that may be in flight.
    #[arg(long)]
    frames_in_flight: Option<usize>,

    /// Make this acquire call report the surface out of date.
    #[arg(long, requires = "headless")]
    stale_at: Option<u64>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(frames) = self.frames_in_flight {
            config.frames.frames_in_flight = frames;
        }
        if let Some(images) = self.images {
            config.frames.preferred_image_count = images;
            config.frames.min_image_count = config.frames.min_image_count.min(images);
        }
    }
}

fn run_headless(config: &Config, frames: u64, stale_at: Option<u64>) -> Result<RunSummary> {
    let extent = Extent::new(config.window.width, config.window.height);
    let gpu = Arc::new(SimGpu::new());
    let mut surface = SimSurface::new(&gpu);
    if let Some(call) = stale_at {
        surface = surface.stale_on_acquire(call);
    }

    let mut orchestrator = FrameOrchestrator::new(gpu.clone(), surface, &config.frames, extent)?
        .with_stats_interval(config.debug.stats_interval());
    let mut window = SimWindow::new(extent);
    let mut scene = OrbitScene::new(4);
    let (mut scene_pass, mut overlay_pass) = (RecordingPass::new(), RecordingPass::new());
    let mut passes = StagePasses::new(&mut scene_pass, &mut overlay_pass);

    let summary = orchestrator.run(&mut window, &mut scene, &mut passes, Some(frames))?;

    let device = gpu.stats();
    info!(
        "Simulated device: {} submission(s), {} blocking wait(s), {} concurrent write(s)",
        device.submissions, device.blocking_waits, device.concurrent_writes
    );
    Ok(summary)
}

fn run_windowed(config: &Config, frames: Option<u64>) -> Result<RunSummary> {
    // Declared first so it outlives every Vulkan object created for it.
    let mut window = DesktopWindow::open(&config.window).context("failed to open window")?;

    let extensions = window.required_extensions()?;
    let instance = Instance::new(config.debug.validation, &extensions)?;
    if config.debug.validation && !instance.has_validation() {
        warn!("Validation requested but the validation layer is not installed");
    }
    let surface = window.create_surface(instance.entry(), instance.handle())?;
    let physical = select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
    info!(
        "Using {} ({})",
        physical.device_name(),
        physical.device_type_name()
    );

    let device = Device::new(instance, &physical)?;
    let gpu = Arc::new(VulkanGpu::new(device.clone())?);
    let surface = VulkanSurface::new(device, surface);

    let mut orchestrator =
        FrameOrchestrator::new(gpu, surface, &config.frames, window.drawable_size())?
            .with_stats_interval(config.debug.stats_interval());

    let mut scene_pass = ScenePass::new(config.render.clear_color);
    let mut hud = HudPass::new(
        config.render.overlay_color,
        config.frames.frames_in_flight,
        orchestrator.pool().image_count(),
    );
    let mut scene = OrbitScene::new(6);
    let mut passes = StagePasses::new(&mut scene_pass, &mut hud);

    Ok(orchestrator.run(&mut window, &mut scene, &mut passes, frames)?)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load_from_path(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    framechain_core::init_logging_with(&config.debug.log_filter);
    args.apply(&mut config);
    config
        .frames
        .validate()
        .context("invalid frame settings")?;

    info!(
        "Starting framechain: {} frame(s) in flight, {} preferred image(s)",
        config.frames.frames_in_flight, config.frames.preferred_image_count
    );

    let summary = if args.headless {
        run_headless(
            &config,
            args.frames.unwrap_or(HEADLESS_FRAMES),
            args.stale_at,
        )?
    } else {
        run_windowed(&config, args.frames)?
    };

    println!(
        "{} frame(s) in {:.2}s: {}",
        summary.frames_presented,
        summary.elapsed.as_secs_f64(),
        summary.stats
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let args = Args::parse_from(["framechain", "--images", "1", "--frames-in-flight", "3"]);
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.frames.frames_in_flight, 3);
        assert_eq!(config.frames.preferred_image_count, 1);
        assert_eq!(config.frames.min_image_count, 1);
        assert!(config.frames.validate().is_ok());
    }

    #[test]
    fn test_stale_at_requires_headless() {
        assert!(Args::try_parse_from(["framechain", "--stale-at", "3"]).is_err());
        assert!(Args::try_parse_from(["framechain", "--headless", "--stale-at", "3"]).is_ok());
    }

    #[test]
    fn test_headless_run_presents_every_frame() {
        let mut config = Config::default();
        config.window.width = 64;
        config.window.height = 48;
        let summary = run_headless(&config, 12, Some(4)).unwrap();
        assert_eq!(summary.frames_presented, 12);
        assert_eq!(summary.stats.rebuilds, 1);
        assert_eq!(summary.stats.stale_frames, 1);
    }
}
