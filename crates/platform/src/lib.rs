//! Platform abstraction layer.
//!
//! This crate provides platform-specific functionality:
//! - Window management via winit
//! - Event pumping with explicitly passed handlers
//! - Raw window handles for Vulkan surface creation

mod events;
mod window;

pub use events::{DesktopWindow, IgnoreEvents, WindowEvents, WindowSystem};
pub use window::{Surface, Window, get_required_extensions};
