//! The device and surface capabilities the frame engine is written against.
//!
//! - [`Gpu`] supplies the two completion-signal kinds, command batches and
//!   queue submission
//! - [`Surface`] supplies presentation images and the acquire/present protocol
//!
//! Two implementations ship with the crate: [`crate::vulkan`] drives a real
//! device through `framechain-rhi`, and [`crate::sim`] is a deterministic
//! in-process model used by the headless mode and the tests.
//!
//! # Signal semantics
//!
//! A *device signal* is only visible to the device. One submission (or an
//! acquire) signals it and exactly one later submission (or a present) waits on
//! it; the wait consumes the signal. A *host signal* can be signaled by one
//! submission, waited on and polled by the CPU, and must be reset before reuse.

use std::time::Duration;

use framechain_core::{Extent, FramesConfig, PresentModePreference};

use crate::error::FrameResult;

/// Number of chained submission stages per frame.
pub const STAGE_COUNT: usize = 2;

/// A submission stage of one frame, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Primary scene draw. Waits on image acquisition.
    Scene,
    /// Overlay draw. Waits on the scene stage and frees the slot.
    Overlay,
}

impl Stage {
    /// Every stage in submission order.
    pub const ALL: [Stage; STAGE_COUNT] = [Stage::Scene, Stage::Overlay];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Stage::Scene => 0,
            Stage::Overlay => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Scene => "scene",
            Stage::Overlay => "overlay",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How long a host wait may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block until signaled. The normal case.
    Infinite,
    /// Give up after the duration.
    After(Duration),
}

impl Timeout {
    /// `None` means infinite.
    pub fn from_option(duration: Option<Duration>) -> Self {
        duration.map_or(Timeout::Infinite, Timeout::After)
    }

    /// Timeout in nanoseconds as expected by device APIs.
    pub fn as_nanos(self) -> u64 {
        match self {
            Timeout::Infinite => u64::MAX,
            Timeout::After(d) => u64::try_from(d.as_nanos()).unwrap_or(u64::MAX),
        }
    }
}

/// Result of a host wait that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

/// One stage submission: wait on one device signal, run one batch, signal one
/// device signal and optionally one host signal.
pub struct Submission<'a, G: Gpu + ?Sized> {
    /// Serial of the frame this submission belongs to.
    pub frame: u64,
    pub stage: Stage,
    pub batch: &'a G::CommandBatch,
    pub wait: &'a G::DeviceSignal,
    pub signal: &'a G::DeviceSignal,
    pub host: Option<&'a G::HostSignal>,
}

/// Signal and submission capabilities of a device.
///
/// Every method reports a lost device as
/// [`FrameError::DeviceLost`](crate::FrameError::DeviceLost).
pub trait Gpu {
    /// GPU-to-GPU ordering signal with no CPU visibility.
    type DeviceSignal;
    /// Completion signal the CPU can block on, poll and reset.
    type HostSignal;
    /// A re-recordable batch of device commands.
    type CommandBatch;

    fn create_device_signal(&self) -> FrameResult<Self::DeviceSignal>;

    fn create_host_signal(&self, signaled: bool) -> FrameResult<Self::HostSignal>;

    fn create_command_batch(&self) -> FrameResult<Self::CommandBatch>;

    /// Resets the batch and opens it for recording.
    ///
    /// The batch must not be pending execution.
    fn begin_batch(&self, batch: &Self::CommandBatch) -> FrameResult<()>;

    /// Closes the batch so it can be submitted.
    fn end_batch(&self, batch: &Self::CommandBatch) -> FrameResult<()>;

    /// Blocks until the host signal is signaled or the timeout elapses.
    fn wait(&self, host: &Self::HostSignal, timeout: Timeout) -> FrameResult<WaitStatus>;

    /// Polls the host signal without blocking.
    fn is_signaled(&self, host: &Self::HostSignal) -> FrameResult<bool>;

    /// Returns the host signal to the unsignaled state.
    fn reset(&self, host: &Self::HostSignal) -> FrameResult<()>;

    /// Enqueues one stage. Returns once the work is queued, not executed.
    fn submit(&self, submission: Submission<'_, Self>) -> FrameResult<()>;

    /// Enqueues an empty submission whose only effect is signaling `host`.
    fn signal_host(&self, host: &Self::HostSignal) -> FrameResult<()>;

    /// Blocks until all queued work has finished.
    fn wait_idle(&self) -> FrameResult<()>;
}

/// Outcome of asking the compositor for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The image at `index` will be writable once the acquire signal fires.
    Ready { index: u32, suboptimal: bool },
    /// The surface no longer matches the window.
    OutOfDate,
}

/// Outcome of queueing an image for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    Done { suboptimal: bool },
    OutOfDate,
}

/// What the pool asks the surface for on every build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceRequest {
    /// Fewer images than this is [`ResourceExhausted`](crate::FrameError::ResourceExhausted).
    pub min_image_count: u32,
    /// The count asked for; the surface may grant a different one.
    pub preferred_image_count: u32,
    pub present_mode: PresentModePreference,
}

impl SurfaceRequest {
    pub fn from_config(config: &FramesConfig) -> Self {
        Self {
            min_image_count: config.min_image_count,
            preferred_image_count: config.preferred_image_count,
            present_mode: config.present_mode,
        }
    }
}

impl Default for SurfaceRequest {
    fn default() -> Self {
        Self::from_config(&FramesConfig::default())
    }
}

/// What the surface actually granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceGrant {
    pub extent: Extent,
    pub present_mode: PresentModePreference,
}

/// A freshly created image set.
pub struct SurfaceImages<I> {
    pub grant: SurfaceGrant,
    pub images: Vec<I>,
}

/// The presentation side of a display surface.
///
/// Owned exclusively by a [`PresentationPool`](crate::PresentationPool), which
/// guarantees that the previous image set has been dropped before
/// [`create_images`](Surface::create_images) is called again.
pub trait Surface {
    type Gpu: Gpu;
    /// One presentation image with its views and per-stage render targets.
    type Image;

    /// Creates a new image set sized for `extent`.
    fn create_images(
        &mut self,
        request: &SurfaceRequest,
        extent: Extent,
    ) -> FrameResult<SurfaceImages<Self::Image>>;

    /// Requests the next image; `signal` fires once it is writable.
    fn acquire_next_image(
        &mut self,
        signal: &<Self::Gpu as Gpu>::DeviceSignal,
    ) -> FrameResult<Acquire>;

    /// Queues image `index` for display after `wait` fires.
    fn present(
        &mut self,
        index: u32,
        wait: &<Self::Gpu as Gpu>::DeviceSignal,
    ) -> FrameResult<Present>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::ALL, [Stage::Scene, Stage::Overlay]);
        assert_eq!(Stage::Scene.index(), 0);
        assert_eq!(Stage::Overlay.index(), 1);
        assert_eq!(Stage::Overlay.to_string(), "overlay");
    }

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(Timeout::from_option(None), Timeout::Infinite);
        assert_eq!(Timeout::Infinite.as_nanos(), u64::MAX);

        let t = Timeout::from_option(Some(Duration::from_millis(5)));
        assert_eq!(t, Timeout::After(Duration::from_millis(5)));
        assert_eq!(t.as_nanos(), 5_000_000);

        assert_eq!(Timeout::After(Duration::MAX).as_nanos(), u64::MAX);
    }

    #[test]
    fn test_surface_request_from_config() {
        let config = FramesConfig {
            min_image_count: 3,
            preferred_image_count: 4,
            present_mode: PresentModePreference::Fifo,
            ..Default::default()
        };
        let request = SurfaceRequest::from_config(&config);
        assert_eq!(request.min_image_count, 3);
        assert_eq!(request.preferred_image_count, 4);
        assert_eq!(request.present_mode, PresentModePreference::Fifo);
    }
}
