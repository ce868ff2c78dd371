//! Image views and device-local attachment images.
//!
//! - [`ImageView`] owns a view over an image owned by someone else (for
//!   example a swapchain image)
//! - [`AttachmentImage`] owns an image, its memory and a view; used for depth
//!   buffers and other per-image render targets
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framechain_rhi::device::Device;
//! use framechain_rhi::image::{AttachmentImage, DEFAULT_DEPTH_FORMAT};
//! use ash::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), framechain_rhi::RhiError> {
//! let depth = AttachmentImage::depth(device, vk::Extent2D { width: 1920, height: 1080 }, DEFAULT_DEPTH_FORMAT)?;
//! let view = depth.view();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Default depth buffer format (32-bit floating point).
pub const DEFAULT_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// RAII image view over an externally owned image.
pub struct ImageView {
    device: Arc<Device>,
    view: vk::ImageView,
}

impl ImageView {
    /// Creates a 2D view covering the first mip level and layer of `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if image view creation fails.
    pub fn new(
        device: Arc<Device>,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<Self> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe { device.handle().create_image_view(&create_info, None)? };

        Ok(Self { device, view })
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
        }
    }
}

/// A device-local image with its own memory and view.
///
/// # Resource Destruction
///
/// Resources are destroyed in the following order:
/// 1. Image view
/// 2. Image
/// 3. Memory allocation
pub struct AttachmentImage {
    device: Arc<Device>,
    image: vk::Image,
    view: Option<ImageView>,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl AttachmentImage {
    /// Creates a new attachment image.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `extent` - Size in pixels; both dimensions must be non-zero
    /// * `format` - Pixel format
    /// * `usage` - Image usage flags
    /// * `aspect` - Aspect of the created view
    /// * `name` - Allocation name for allocator debugging
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The extent is empty
    /// - Image creation fails
    /// - Memory allocation fails (see [`RhiError::is_out_of_memory`])
    /// - Image view creation fails
    pub fn new(
        device: Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        name: &str,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidHandle(
                "Attachment dimensions must be greater than 0".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        // From here on, Drop cleans up whatever has been created.
        let mut attachment = Self {
            device: device.clone(),
            image,
            view: None,
            allocation: None,
            format,
            extent,
        };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = {
            let mut allocator = device.allocator().lock().map_err(|_| {
                RhiError::InvalidHandle("GPU allocator mutex poisoned".to_string())
            })?;
            allocator.allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }
        attachment.allocation = Some(allocation);

        attachment.view = Some(ImageView::new(device, image, format, aspect)?);

        debug!(
            "Created attachment '{}': {}x{} ({:?})",
            name, extent.width, extent.height, format
        );

        Ok(attachment)
    }

    /// Creates a depth attachment.
    pub fn depth(device: Arc<Device>, extent: vk::Extent2D, format: vk::Format) -> RhiResult<Self> {
        Self::new(
            device,
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            "depth",
        )
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Returns the view handle, or a null handle while the image is being torn down.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
            .as_ref()
            .map_or(vk::ImageView::null(), ImageView::handle)
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for AttachmentImage {
    fn drop(&mut self) {
        self.view = None;
        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator().lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free attachment allocation: {:?}", e);
                    }
                }
                Err(_) => error!("GPU allocator mutex poisoned, leaking attachment memory"),
            }
        }

        debug!(
            "Destroyed attachment: {}x{}",
            self.extent.width, self.extent.height
        );
    }
}
