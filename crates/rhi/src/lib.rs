//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance and device creation
//! - Swapchain management
//! - Command buffer recording
//! - Image and attachment management
//! - Synchronization primitives

mod error;

pub mod command;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod rendering;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
