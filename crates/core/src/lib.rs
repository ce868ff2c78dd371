//! Core utilities for the frame pipelining engine.
//!
//! This crate provides foundational types and utilities used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Timer utilities
//! - Configuration management
//! - Drawable extents

mod config;
mod error;
mod extent;
mod logging;
mod timer;

pub use config::{
    Config, DebugConfig, FramesConfig, PresentModePreference, RenderConfig, WindowConfig,
};
pub use error::{Error, Result};
pub use extent::Extent;
pub use logging::{init_logging, init_logging_with};
pub use timer::{FpsCounter, Timer};
