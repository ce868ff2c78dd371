//! Demo stage recorders.
//!
//! Both passes draw with `vkCmdClearAttachments` only, so they need no
//! pipelines or shaders. The scene pass fills one rectangle per draw item;
//! the HUD pass marks the frame slot and image in use and ends the image in
//! `PRESENT_SRC_KHR`.

use framechain_core::Extent;
use framechain_rhi::command::image_transition;
use framechain_rhi::vk;
use glam::{Mat4, Vec3};

use super::surface::{VulkanImage, VulkanSurface};
use crate::backend::Stage;
use crate::error::FrameResult;
use crate::pass::{FramePass, PassContext};

/// Frames per sweep of the HUD progress bar.
const PROGRESS_PERIOD: u64 = 120;
/// Edge of one HUD indicator square in pixels.
const INDICATOR_SIZE: u32 = 16;
const INDICATOR_GAP: u32 = 6;
const HUD_MARGIN: u32 = 12;
const PROGRESS_HEIGHT: u32 = 6;

/// Clears the image and fills the projected bounds of each draw item.
pub struct ScenePass {
    clear_color: [f32; 4],
    palette: Vec<[f32; 4]>,
}

impl ScenePass {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            clear_color,
            palette: vec![
                [0.90, 0.35, 0.25, 1.0],
                [0.25, 0.70, 0.45, 1.0],
                [0.30, 0.45, 0.90, 1.0],
                [0.95, 0.80, 0.30, 1.0],
            ],
        }
    }

    /// Colours picked by mesh id, wrapping around.
    pub fn with_palette(mut self, palette: Vec<[f32; 4]>) -> Self {
        if !palette.is_empty() {
            self.palette = palette;
        }
        self
    }

    fn color_of(&self, mesh: u32) -> [f32; 4] {
        self.palette[mesh as usize % self.palette.len()]
    }
}

impl FramePass<VulkanSurface> for ScenePass {
    fn record(&mut self, ctx: &PassContext<'_, VulkanSurface>) -> FrameResult<()> {
        let cmd = ctx.batch;
        let image = ctx.image;

        cmd.pipeline_barrier(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            &[
                image_transition(
                    image.image(),
                    vk::ImageAspectFlags::COLOR,
                    (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
                    (vk::AccessFlags::empty(), vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
                ),
                image_transition(
                    image.depth().image(),
                    vk::ImageAspectFlags::DEPTH,
                    (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL),
                    (
                        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    ),
                ),
            ],
        );

        let mut target = image.render_target(Stage::Scene).clone();
        if let Some(color) = target.color_attachments.first_mut() {
            *color = color.with_clear_color(self.clear_color);
        }
        let bundle = target.build();
        cmd.begin_rendering(&bundle.info());

        for item in ctx.draw_list {
            if let Some(rect) = projected_rect(&item.transform, ctx.extent) {
                fill(cmd, rect, self.color_of(item.mesh.0));
            }
        }

        cmd.end_rendering();
        Ok(())
    }
}

/// Draws the frame HUD and hands the image over to presentation.
///
/// The top row has one square per frame slot and the second row one per
/// image; the slot and image recorded this frame are lit. A bar along the
/// bottom edge sweeps with the frame number.
pub struct HudPass {
    color: [f32; 4],
    frames_in_flight: usize,
    image_count: usize,
}

impl HudPass {
    pub fn new(color: [f32; 4], frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            color,
            frames_in_flight,
            image_count,
        }
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.image_count
    }

    fn dimmed(&self) -> [f32; 4] {
        let [r, g, b, a] = self.color;
        [r * 0.3, g * 0.3, b * 0.3, a]
    }
}

impl FramePass<VulkanSurface> for HudPass {
    fn record(&mut self, ctx: &PassContext<'_, VulkanSurface>) -> FrameResult<()> {
        let cmd = ctx.batch;
        let image: &VulkanImage = ctx.image;

        let bundle = image.render_target(Stage::Overlay).build();
        cmd.begin_rendering(&bundle.info());

        let rows = [
            (0, self.frames_in_flight, ctx.slot),
            (1, self.image_count, ctx.image_index as usize),
        ];
        for (row, count, active) in rows {
            for (index, rect) in indicator_rects(row, count, ctx.extent).into_iter().enumerate() {
                let color = if index == active {
                    self.color
                } else {
                    self.dimmed()
                };
                fill(cmd, rect, color);
            }
        }
        if let Some(rect) = progress_rect(ctx.frame, ctx.extent) {
            fill(cmd, rect, self.color);
        }

        cmd.end_rendering();

        cmd.pipeline_barrier(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            &[image_transition(
                image.image(),
                vk::ImageAspectFlags::COLOR,
                (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR),
                (vk::AccessFlags::COLOR_ATTACHMENT_WRITE, vk::AccessFlags::empty()),
            )],
        );
        Ok(())
    }

    fn on_surface_rebuilt(&mut self, image_count: usize, _extent: Extent) -> FrameResult<()> {
        self.image_count = image_count;
        Ok(())
    }
}

fn fill(cmd: &framechain_rhi::command::CommandBuffer, rect: vk::Rect2D, color: [f32; 4]) {
    let attachment = vk::ClearAttachment {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        color_attachment: 0,
        clear_value: vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
    };
    let clear_rect = vk::ClearRect {
        rect,
        base_array_layer: 0,
        layer_count: 1,
    };
    cmd.clear_attachments(&[attachment], &[clear_rect]);
}

fn rect(x: u32, y: u32, width: u32, height: u32) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: x as i32,
            y: y as i32,
        },
        extent: vk::Extent2D { width, height },
    }
}

/// Pixel bounds of the unit quad centred on the origin after `transform`,
/// clipped to `extent`. `None` when nothing is visible.
fn projected_rect(transform: &Mat4, extent: Extent) -> Option<vk::Rect2D> {
    if extent.is_empty() {
        return None;
    }
    let corners = [
        Vec3::new(-0.5, -0.5, 0.0),
        Vec3::new(0.5, -0.5, 0.0),
        Vec3::new(-0.5, 0.5, 0.0),
        Vec3::new(0.5, 0.5, 0.0),
    ]
    .map(|corner| transform.project_point3(corner));

    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for corner in corners {
        if !corner.is_finite() {
            return None;
        }
        min_x = min_x.min(corner.x);
        min_y = min_y.min(corner.y);
        max_x = max_x.max(corner.x);
        max_y = max_y.max(corner.y);
    }

    let to_pixels = |ndc: f32, size: u32| ((ndc.clamp(-1.0, 1.0) * 0.5 + 0.5) * size as f32) as u32;
    let (x0, x1) = (to_pixels(min_x, extent.width), to_pixels(max_x, extent.width));
    let (y0, y1) = (to_pixels(min_y, extent.height), to_pixels(max_y, extent.height));
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(rect(x0, y0, x1 - x0, y1 - y0))
}

/// Indicator squares of one HUD row, dropping any that do not fit.
fn indicator_rects(row: u32, count: usize, extent: Extent) -> Vec<vk::Rect2D> {
    let y = HUD_MARGIN + row * (INDICATOR_SIZE + INDICATOR_GAP);
    if y + INDICATOR_SIZE > extent.height {
        return Vec::new();
    }
    (0..count as u32)
        .map(|i| HUD_MARGIN + i * (INDICATOR_SIZE + INDICATOR_GAP))
        .take_while(|x| x + INDICATOR_SIZE <= extent.width)
        .map(|x| rect(x, y, INDICATOR_SIZE, INDICATOR_SIZE))
        .collect()
}

fn progress_rect(frame: u64, extent: Extent) -> Option<vk::Rect2D> {
    if extent.height < PROGRESS_HEIGHT {
        return None;
    }
    let phase = (frame % PROGRESS_PERIOD + 1) as f32 / PROGRESS_PERIOD as f32;
    let width = (extent.width as f32 * phase) as u32;
    (width > 0).then(|| rect(0, extent.height - PROGRESS_HEIGHT, width, PROGRESS_HEIGHT))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: Extent = Extent::new(800, 600);

    #[test]
    fn test_identity_quad_covers_centre_half() {
        let r = projected_rect(&Mat4::IDENTITY, EXTENT).unwrap();
        assert_eq!((r.offset.x, r.offset.y), (200, 150));
        assert_eq!((r.extent.width, r.extent.height), (400, 300));
    }

    #[test]
    fn test_projected_rect_is_clipped() {
        let big = Mat4::from_scale(Vec3::splat(10.0));
        let r = projected_rect(&big, EXTENT).unwrap();
        assert_eq!((r.offset.x, r.offset.y), (0, 0));
        assert_eq!((r.extent.width, r.extent.height), (800, 600));

        let off_screen = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0));
        assert!(projected_rect(&off_screen, EXTENT).is_none());
        assert!(projected_rect(&Mat4::IDENTITY, Extent::new(0, 0)).is_none());
    }

    #[test]
    fn test_indicators_stop_at_window_edge() {
        assert_eq!(indicator_rects(0, 3, EXTENT).len(), 3);
        assert_eq!(indicator_rects(1, 3, EXTENT)[1].offset.y, 34);
        // 12 + i * 22 + 16 <= 60 keeps two squares.
        assert_eq!(indicator_rects(0, 5, Extent::new(60, 600)).len(), 2);
        assert!(indicator_rects(1, 3, Extent::new(800, 40)).is_empty());
    }

    #[test]
    fn test_progress_bar_sweeps() {
        let first = progress_rect(0, EXTENT).unwrap();
        let last = progress_rect(PROGRESS_PERIOD - 1, EXTENT).unwrap();
        assert!(first.extent.width < last.extent.width);
        assert_eq!(last.extent.width, 800);
        assert_eq!(first.offset.y, 594);
        assert!(progress_rect(0, Extent::new(800, 2)).is_none());
    }

    #[test]
    fn test_palette_wraps() {
        let pass = ScenePass::new([0.0; 4]).with_palette(vec![[1.0; 4], [0.5; 4]]);
        assert_eq!(pass.color_of(3), [0.5; 4]);
        let kept = ScenePass::new([0.0; 4]).with_palette(Vec::new());
        assert_eq!(kept.palette.len(), 4);
    }

    #[test]
    fn test_hud_tracks_image_count() {
        let mut hud = HudPass::new([1.0; 4], 2, 3);
        hud.on_surface_rebuilt(4, EXTENT).unwrap();
        assert_eq!(hud.image_count(), 4);
    }
}
