//! A deterministic in-process device, compositor and window.
//!
//! The simulated device models a single queue that never makes progress on its
//! own: queued work only completes when the CPU blocks on it (or the test calls
//! [`SimGpu::retire_all`] / [`SimGpu::advance`]). That is the worst case for
//! the frame engine, since every slot and every image is still busy when it is
//! needed again, and it makes every wait observable and countable.
//!
//! Every protocol rule the engine relies on is checked rather than assumed:
//!
//! - a device signal must have a pending signal operation before anything
//!   waits on it, and is consumed by the wait
//! - a device signal cannot be signaled twice without a wait in between
//! - a host signal cannot be reset, or handed to a second submission, while
//!   a signal operation on it is pending
//! - a command batch cannot be re-recorded while pending
//! - writes to images of a previous surface generation are rejected
//!
//! Violations are returned as [`FrameError::InvalidState`](crate::FrameError::InvalidState).
//! Two in-flight frames writing the same image is counted in
//! [`SimStats::concurrent_writes`].

mod gpu;
mod pass;
mod surface;
mod window;

pub use gpu::{ImageId, SimBatch, SimDeviceSignal, SimGpu, SimHostSignal, SimStats};
pub use pass::{PassRecord, RecordingPass};
pub use surface::{ImageLedger, SimImage, SimSurface, SimSurfaceCaps};
pub use window::{SimWindow, WindowScript};
