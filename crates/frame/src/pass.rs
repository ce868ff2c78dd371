//! Collaborators that feed and record each frame.
//!
//! The engine calls a [`SceneSource`] once per frame for its draw list and one
//! [`FramePass`] per [`Stage`] to record into the slot's command batch. Passes
//! are borrowed for the duration of a call through [`StagePasses`]; the engine
//! never stores them.

use framechain_core::Extent;
use glam::Mat4;

use crate::backend::{Gpu, Stage, Surface};
use crate::error::FrameResult;
use crate::ring::StageSignals;

/// Opaque handle of a mesh owned by the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// One mesh instance to draw this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    pub mesh: MeshId,
    /// Model transform in normalized device space.
    pub transform: Mat4,
}

impl DrawItem {
    pub fn new(mesh: MeshId, transform: Mat4) -> Self {
        Self { mesh, transform }
    }
}

/// Supplies the draw list.
pub trait SceneSource {
    /// Called once per frame after the image is acquired and before the scene
    /// stage is recorded.
    fn draw_list(&mut self, frame: u64) -> Vec<DrawItem>;
}

/// A scene that draws the same items every frame.
#[derive(Debug, Clone, Default)]
pub struct StaticScene {
    items: Vec<DrawItem>,
}

impl StaticScene {
    pub fn new(items: Vec<DrawItem>) -> Self {
        Self { items }
    }
}

impl SceneSource for StaticScene {
    fn draw_list(&mut self, _frame: u64) -> Vec<DrawItem> {
        self.items.clone()
    }
}

/// Everything a pass may touch while recording one stage of one frame.
pub struct PassContext<'a, S: Surface> {
    pub frame: u64,
    pub stage: Stage,
    pub slot: usize,
    pub image_index: u32,
    /// The acquired image and its per-stage render targets.
    pub image: &'a S::Image,
    /// Already open; the engine closes and submits it.
    pub batch: &'a <S::Gpu as Gpu>::CommandBatch,
    pub extent: Extent,
    pub draw_list: &'a [DrawItem],
    /// The signals this stage's submission will wait on and signal.
    pub signals: StageSignals<'a, S::Gpu>,
}

/// Records one stage of a frame.
pub trait FramePass<S: Surface> {
    fn record(&mut self, ctx: &PassContext<'_, S>) -> FrameResult<()>;

    /// The image set was recreated; rebuild anything sized by it.
    fn on_surface_rebuilt(&mut self, _image_count: usize, _extent: Extent) -> FrameResult<()> {
        Ok(())
    }
}

/// The pass for each stage, borrowed from the caller.
pub struct StagePasses<'a, S: Surface> {
    pub scene: &'a mut dyn FramePass<S>,
    pub overlay: &'a mut dyn FramePass<S>,
}

impl<'a, S: Surface> StagePasses<'a, S> {
    pub fn new(scene: &'a mut dyn FramePass<S>, overlay: &'a mut dyn FramePass<S>) -> Self {
        Self { scene, overlay }
    }

    pub(crate) fn record(&mut self, ctx: &PassContext<'_, S>) -> FrameResult<()> {
        match ctx.stage {
            Stage::Scene => self.scene.record(ctx),
            Stage::Overlay => self.overlay.record(ctx),
        }
    }

    pub(crate) fn surface_rebuilt(&mut self, image_count: usize, extent: Extent) -> FrameResult<()> {
        self.scene.on_surface_rebuilt(image_count, extent)?;
        self.overlay.on_surface_rebuilt(image_count, extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_static_scene_repeats_items() {
        let item = DrawItem::new(MeshId(7), Mat4::from_translation(Vec3::X));
        let mut scene = StaticScene::new(vec![item]);
        assert_eq!(scene.draw_list(1), vec![item]);
        assert_eq!(scene.draw_list(2), vec![item]);
        assert!(StaticScene::default().draw_list(1).is_empty());
    }
}
