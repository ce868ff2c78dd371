//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(vk::Result),

    /// The logical device was lost; nothing created from it is usable anymore.
    #[error("Device lost")]
    DeviceLost,

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
            other => RhiError::VulkanError(other),
        }
    }
}

impl RhiError {
    /// Returns `true` for host or device memory exhaustion.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            RhiError::VulkanError(
                vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            ) | RhiError::AllocatorError(gpu_allocator::AllocationError::OutOfMemory)
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_is_distinct() {
        let err: RhiError = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, RhiError::DeviceLost));
    }

    #[test]
    fn test_out_of_memory_detection() {
        let host: RhiError = vk::Result::ERROR_OUT_OF_HOST_MEMORY.into();
        let device: RhiError = vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.into();
        let other: RhiError = vk::Result::ERROR_INITIALIZATION_FAILED.into();
        assert!(host.is_out_of_memory());
        assert!(device.is_out_of_memory());
        assert!(!other.is_out_of_memory());
        assert!(!RhiError::DeviceLost.is_out_of_memory());
    }
}
