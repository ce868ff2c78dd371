//! Frame pipelining and synchronization engine.
//!
//! This crate keeps several frames in flight against a pool of presentable
//! images without ever letting two frames write the same image at once:
//! - [`ring`]: the fixed set of frame slots and their signals
//! - [`pool`]: the presentation image set and its rebuild state machine
//! - [`tracking`]: which frame slot last wrote each image
//! - [`orchestrator`]: the per-frame loop and resize recovery
//!
//! The engine is generic over [`backend::Gpu`] and [`backend::Surface`].
//! [`vulkan`] implements them on a real device; [`sim`] is a deterministic
//! in-process model used by the tests and the headless demo.

mod error;

pub mod backend;
pub mod orchestrator;
pub mod pass;
pub mod pool;
pub mod ring;
pub mod sim;
pub mod tracking;
pub mod vulkan;

pub use backend::{
    Acquire, Gpu, Present, STAGE_COUNT, Stage, Submission, Surface, SurfaceGrant, SurfaceImages,
    SurfaceRequest, Timeout, WaitStatus,
};
pub use error::{FrameError, FrameResult};
pub use orchestrator::{
    DEFAULT_STATS_INTERVAL, FrameOrchestrator, FrameStats, FrameStatus, LoopControl, RunSummary,
    StaleSource,
};
pub use pass::{DrawItem, FramePass, MeshId, PassContext, SceneSource, StagePasses, StaticScene};
pub use pool::{PoolState, PresentationPool};
pub use ring::{FrameRing, FrameSlot, FrameTicket, StageSignals};
pub use tracking::InFlightTable;
