use std::sync::Arc;

use framechain_core::{Extent, PresentModePreference};
use framechain_platform::Surface as WindowSurface;
use framechain_rhi::device::Device;
use framechain_rhi::image::{AttachmentImage, DEFAULT_DEPTH_FORMAT, ImageView};
use framechain_rhi::rendering::{ColorAttachment, DepthAttachment, RenderingConfig};
use framechain_rhi::swapchain::{AcquireOutcome, PresentOutcome, Swapchain, SwapchainRequest};
use framechain_rhi::sync::Semaphore;
use framechain_rhi::{RhiResult, vk};
use tracing::debug;

use super::gpu::VulkanGpu;
use crate::backend::{
    Acquire, Present, STAGE_COUNT, Stage, Surface, SurfaceGrant, SurfaceImages, SurfaceRequest,
};
use crate::error::{FrameError, FrameResult};

/// Maps the configured preference to a Vulkan present mode.
pub fn present_mode(preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

/// Maps a Vulkan present mode back to a preference. Unknown modes read as FIFO.
pub fn present_mode_preference(mode: vk::PresentModeKHR) -> PresentModePreference {
    match mode {
        vk::PresentModeKHR::FIFO_RELAXED => PresentModePreference::FifoRelaxed,
        vk::PresentModeKHR::MAILBOX => PresentModePreference::Mailbox,
        vk::PresentModeKHR::IMMEDIATE => PresentModePreference::Immediate,
        _ => PresentModePreference::Fifo,
    }
}

/// One swapchain image with its colour view, its own depth buffer and the
/// render target of each stage.
///
/// # Resource Destruction
///
/// The colour view and the depth buffer are destroyed on drop. The image
/// itself belongs to the swapchain.
pub struct VulkanImage {
    index: u32,
    image: vk::Image,
    format: vk::Format,
    extent: vk::Extent2D,
    targets: [RenderingConfig; STAGE_COUNT],
    color: ImageView,
    depth: AttachmentImage,
}

impl VulkanImage {
    fn new(
        device: &Arc<Device>,
        index: u32,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let color = ImageView::new(device.clone(), image, format, vk::ImageAspectFlags::COLOR)?;
        let depth = AttachmentImage::depth(device.clone(), extent, DEFAULT_DEPTH_FORMAT)?;

        let scene = RenderingConfig::from_extent(extent)
            .with_color_attachment(ColorAttachment::new(color.handle()))
            .with_depth_attachment(DepthAttachment::new(depth.view()).with_clear_depth(1.0));
        let overlay = RenderingConfig::from_extent(extent)
            .with_color_attachment(ColorAttachment::new(color.handle()).load());

        Ok(Self {
            index,
            image,
            format,
            extent,
            targets: [scene, overlay],
            color,
            depth,
        })
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn color_view(&self) -> vk::ImageView {
        self.color.handle()
    }

    #[inline]
    pub fn depth(&self) -> &AttachmentImage {
        &self.depth
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Render target written by `stage`. The scene target clears colour and
    /// depth, the overlay target loads the scene's colour.
    #[inline]
    pub fn render_target(&self, stage: Stage) -> &RenderingConfig {
        &self.targets[stage.index()]
    }
}

/// A window surface and the swapchain presenting to it.
pub struct VulkanSurface {
    // Destroyed before the surface it presents to.
    swapchain: Option<Swapchain>,
    surface: WindowSurface,
    device: Arc<Device>,
}

impl VulkanSurface {
    /// Takes ownership of a window surface. No swapchain exists until the
    /// presentation pool builds its first image set.
    pub fn new(device: Arc<Device>, surface: WindowSurface) -> Self {
        Self {
            swapchain: None,
            surface,
            device,
        }
    }

    #[inline]
    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    fn current(&self) -> FrameResult<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| FrameError::invalid_state("no swapchain has been created"))
    }
}

impl Surface for VulkanSurface {
    type Gpu = VulkanGpu;
    type Image = VulkanImage;

    fn create_images(
        &mut self,
        request: &SurfaceRequest,
        extent: Extent,
    ) -> FrameResult<SurfaceImages<VulkanImage>> {
        let swapchain_request = SwapchainRequest {
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
            preferred_image_count: request.preferred_image_count,
            present_mode: present_mode(request.present_mode),
        };

        let replacement = Swapchain::new(
            self.device.clone(),
            self.surface.handle(),
            &swapchain_request,
            self.swapchain.as_ref(),
        )?;
        // The retired swapchain is destroyed here; the pool already dropped
        // every view into it.
        let swapchain = self.swapchain.insert(replacement);

        let format = swapchain.format();
        let granted = swapchain.extent();
        let images = swapchain
            .images()
            .iter()
            .enumerate()
            .map(|(index, &image)| VulkanImage::new(&self.device, index as u32, image, format, granted))
            .collect::<RhiResult<Vec<_>>>()?;

        debug!(
            "Created {} swapchain image target(s) at {}x{}",
            images.len(),
            granted.width,
            granted.height
        );

        Ok(SurfaceImages {
            grant: SurfaceGrant {
                extent: Extent::new(granted.width, granted.height),
                present_mode: present_mode_preference(swapchain.present_mode()),
            },
            images,
        })
    }

    fn acquire_next_image(&mut self, signal: &Semaphore) -> FrameResult<Acquire> {
        Ok(match self.current()?.acquire_next_image(signal.handle())? {
            AcquireOutcome::Acquired { index, suboptimal } => Acquire::Ready { index, suboptimal },
            AcquireOutcome::OutOfDate => Acquire::OutOfDate,
        })
    }

    fn present(&mut self, index: u32, wait: &Semaphore) -> FrameResult<Present> {
        let queue = self.device.present_queue();
        Ok(match self.current()?.present(queue, index, wait.handle())? {
            PresentOutcome::Presented { suboptimal } => Present::Done { suboptimal },
            PresentOutcome::OutOfDate => Present::OutOfDate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_mapping_round_trips() {
        for preference in [
            PresentModePreference::Fifo,
            PresentModePreference::FifoRelaxed,
            PresentModePreference::Mailbox,
            PresentModePreference::Immediate,
        ] {
            assert_eq!(present_mode_preference(present_mode(preference)), preference);
        }
        assert_eq!(
            present_mode_preference(vk::PresentModeKHR::SHARED_DEMAND_REFRESH),
            PresentModePreference::Fifo
        );
    }

    #[test]
    fn test_surface_types_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<VulkanImage>();
        assert_send::<VulkanSurface>();
    }
}
