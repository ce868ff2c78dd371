use framechain_core::Extent;

use super::gpu::ImageId;
use super::surface::SimSurface;
use crate::backend::Stage;
use crate::error::FrameResult;
use crate::pass::{FramePass, PassContext};

/// What one [`RecordingPass::record`](FramePass::record) call saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassRecord {
    pub frame: u64,
    pub stage: Stage,
    pub slot: usize,
    pub image: ImageId,
    pub draw_items: usize,
    pub extent: Extent,
}

/// Writes the frame's image and remembers every call.
#[derive(Debug, Default)]
pub struct RecordingPass {
    records: Vec<PassRecord>,
    rebuilds: Vec<(usize, Extent)>,
}

impl RecordingPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[PassRecord] {
        &self.records
    }

    /// `(image_count, extent)` of every rebuild notification.
    pub fn rebuilds(&self) -> &[(usize, Extent)] {
        &self.rebuilds
    }
}

impl FramePass<SimSurface> for RecordingPass {
    fn record(&mut self, ctx: &PassContext<'_, SimSurface>) -> FrameResult<()> {
        ctx.batch.write(ctx.image.id())?;
        self.records.push(PassRecord {
            frame: ctx.frame,
            stage: ctx.stage,
            slot: ctx.slot,
            image: ctx.image.id(),
            draw_items: ctx.draw_list.len(),
            extent: ctx.extent,
        });
        Ok(())
    }

    fn on_surface_rebuilt(&mut self, image_count: usize, extent: Extent) -> FrameResult<()> {
        self.rebuilds.push((image_count, extent));
        Ok(())
    }
}
