//! Dynamic rendering helpers (Vulkan 1.3).
//!
//! This module provides utilities for setting up dynamic rendering without
//! using VkRenderPass objects.
//!
//! - [`ColorAttachment`] - Configuration for a color attachment
//! - [`DepthAttachment`] - Configuration for a depth attachment
//! - [`RenderingConfig`] - Complete rendering configuration
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use framechain_rhi::rendering::{ColorAttachment, DepthAttachment, RenderingConfig};
//! use framechain_rhi::command::CommandBuffer;
//!
//! # fn example(color_view: vk::ImageView, depth_view: vk::ImageView, cmd: &CommandBuffer) {
//! let config = RenderingConfig::new(800, 600)
//!     .with_color_attachment(ColorAttachment::new(color_view).with_clear_color([0.1, 0.1, 0.1, 1.0]))
//!     .with_depth_attachment(DepthAttachment::new(depth_view).with_clear_depth(1.0));
//!
//! let bundle = config.build();
//! cmd.begin_rendering(&bundle.info());
//! // ... draw commands ...
//! cmd.end_rendering();
//! # }
//! ```

use ash::vk;

/// Configuration for a color attachment in dynamic rendering.
///
/// Defaults: `COLOR_ATTACHMENT_OPTIMAL`, load `CLEAR`, store `STORE`, black.
#[derive(Clone, Copy)]
pub struct ColorAttachment {
    /// The image view to render to.
    pub image_view: vk::ImageView,
    /// The image layout during rendering.
    pub layout: vk::ImageLayout,
    /// How to load the attachment contents at the start of rendering.
    pub load_op: vk::AttachmentLoadOp,
    /// How to store the attachment contents at the end of rendering.
    pub store_op: vk::AttachmentStoreOp,
    /// Clear value when load_op is CLEAR.
    pub clear_value: vk::ClearColorValue,
}

impl ColorAttachment {
    /// Creates a new color attachment with default settings.
    #[inline]
    pub fn new(image_view: vk::ImageView) -> Self {
        Self {
            image_view,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        }
    }

    /// Sets the clear color (RGBA, linear).
    #[inline]
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_value = vk::ClearColorValue { float32: color };
        self
    }

    /// Keeps the previous contents instead of clearing.
    #[inline]
    pub fn load(mut self) -> Self {
        self.load_op = vk::AttachmentLoadOp::LOAD;
        self
    }

    /// Converts this attachment to a `VkRenderingAttachmentInfo`.
    #[inline]
    pub fn to_rendering_attachment_info(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(self.layout)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(vk::ClearValue {
                color: self.clear_value,
            })
    }
}

impl std::fmt::Debug for ColorAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // ClearColorValue is a union; the float32 variant is the one we write
        let clear_color = unsafe { self.clear_value.float32 };
        f.debug_struct("ColorAttachment")
            .field("image_view", &self.image_view)
            .field("layout", &self.layout)
            .field("load_op", &self.load_op)
            .field("store_op", &self.store_op)
            .field("clear_value", &clear_color)
            .finish()
    }
}

/// Configuration for a depth attachment in dynamic rendering.
///
/// Defaults: `DEPTH_ATTACHMENT_OPTIMAL`, load `CLEAR`, store `DONT_CARE`, depth 1.0.
#[derive(Clone, Copy, Debug)]
pub struct DepthAttachment {
    pub image_view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: vk::ClearDepthStencilValue,
}

impl DepthAttachment {
    #[inline]
    pub fn new(image_view: vk::ImageView) -> Self {
        Self {
            image_view,
            layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            clear_value: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        }
    }

    #[inline]
    pub fn with_clear_depth(mut self, depth: f32) -> Self {
        self.clear_value.depth = depth;
        self
    }

    #[inline]
    pub fn to_rendering_attachment_info(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(self.layout)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(vk::ClearValue {
                depth_stencil: self.clear_value,
            })
    }
}

/// Complete configuration for one `vkCmdBeginRendering` call.
#[derive(Clone, Debug, Default)]
pub struct RenderingConfig {
    /// Color attachments for this rendering operation.
    pub color_attachments: Vec<ColorAttachment>,
    /// Optional depth attachment.
    pub depth_attachment: Option<DepthAttachment>,
    /// Render area (region to render to).
    pub render_area: vk::Rect2D,
}

impl RenderingConfig {
    /// Creates a new rendering configuration covering `width` x `height`.
    #[inline]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            color_attachments: Vec::new(),
            depth_attachment: None,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width, height },
            },
        }
    }

    #[inline]
    pub fn from_extent(extent: vk::Extent2D) -> Self {
        Self::new(extent.width, extent.height)
    }

    #[inline]
    pub fn with_color_attachment(mut self, attachment: ColorAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    #[inline]
    pub fn with_depth_attachment(mut self, attachment: DepthAttachment) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }

    /// Returns the render area extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.render_area.extent
    }

    /// Builds a [`RenderingInfoBundle`] that owns the attachment infos.
    pub fn build(&self) -> RenderingInfoBundle {
        RenderingInfoBundle {
            color_attachments: self
                .color_attachments
                .iter()
                .map(ColorAttachment::to_rendering_attachment_info)
                .collect(),
            depth_attachment: self
                .depth_attachment
                .as_ref()
                .map(DepthAttachment::to_rendering_attachment_info),
            render_area: self.render_area,
        }
    }
}

/// A `VkRenderingInfo` together with the attachment arrays it points into.
pub struct RenderingInfoBundle {
    color_attachments: Vec<vk::RenderingAttachmentInfo<'static>>,
    depth_attachment: Option<vk::RenderingAttachmentInfo<'static>>,
    render_area: vk::Rect2D,
}

impl RenderingInfoBundle {
    /// Returns the `VkRenderingInfo` referencing this bundle's data.
    pub fn info(&self) -> vk::RenderingInfo<'_> {
        let mut info = vk::RenderingInfo::default()
            .render_area(self.render_area)
            .layer_count(1)
            .color_attachments(&self.color_attachments);

        if let Some(ref depth) = self.depth_attachment {
            info = info.depth_attachment(depth);
        }

        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_attachment_default() {
        let attachment = ColorAttachment::new(vk::ImageView::null());
        assert_eq!(attachment.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        let clear = unsafe { attachment.clear_value.float32 };
        assert_eq!(clear, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_color_attachment_load_keeps_contents() {
        let attachment = ColorAttachment::new(vk::ImageView::null())
            .with_clear_color([1.0, 0.0, 0.0, 1.0])
            .load();
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::LOAD);
        let clear = unsafe { attachment.clear_value.float32 };
        assert_eq!(clear, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_depth_attachment_clear_depth() {
        let attachment = DepthAttachment::new(vk::ImageView::null()).with_clear_depth(0.0);
        assert_eq!(attachment.clear_value.depth, 0.0);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::DONT_CARE);
    }

    #[test]
    fn test_bundle_carries_attachments() {
        let bundle = RenderingConfig::new(640, 480)
            .with_color_attachment(ColorAttachment::new(vk::ImageView::null()))
            .with_depth_attachment(DepthAttachment::new(vk::ImageView::null()))
            .build();
        let info = bundle.info();
        assert_eq!(info.color_attachment_count, 1);
        assert!(!info.p_depth_attachment.is_null());
        assert_eq!(info.render_area.extent.width, 640);
        assert_eq!(info.layer_count, 1);
    }

    #[test]
    fn test_bundle_without_depth() {
        let bundle = RenderingConfig::from_extent(vk::Extent2D {
            width: 32,
            height: 16,
        })
        .with_color_attachment(ColorAttachment::new(vk::ImageView::null()).load())
        .build();
        let info = bundle.info();
        assert!(info.p_depth_attachment.is_null());
        assert_eq!(info.color_attachment_count, 1);
        assert_eq!(info.render_area.extent.height, 16);
    }
}
