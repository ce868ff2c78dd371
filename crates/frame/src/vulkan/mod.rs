//! Frame engine backend for a Vulkan device.
//!
//! - [`VulkanGpu`] maps device signals to semaphores, host signals to fences and
//!   command batches to primary command buffers
//! - [`VulkanSurface`] owns the window surface and its swapchain and creates
//!   one [`VulkanImage`] per swapchain image, each with its own depth buffer
//! - [`ScenePass`] and [`HudPass`] are the demo stage recorders

mod gpu;
mod passes;
mod surface;

pub use gpu::VulkanGpu;
pub use passes::{HudPass, ScenePass};
pub use surface::{VulkanImage, VulkanSurface, present_mode, present_mode_preference};
