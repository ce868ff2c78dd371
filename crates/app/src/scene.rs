//! Animated demo scene.

use std::f32::consts::TAU;

use framechain_frame::{DrawItem, MeshId, SceneSource};
use glam::{Mat4, Vec3};

/// Frames per full orbit.
const ORBIT_PERIOD: u64 = 360;
const ORBIT_RADIUS: f32 = 0.5;
const ITEM_SCALE: f32 = 0.25;

/// Squares circling the centre of the view, evenly spaced.
#[derive(Debug, Clone)]
pub struct OrbitScene {
    count: u32,
}

impl OrbitScene {
    pub fn new(count: u32) -> Self {
        Self { count }
    }
}

impl SceneSource for OrbitScene {
    fn draw_list(&mut self, frame: u64) -> Vec<DrawItem> {
        let phase = (frame % ORBIT_PERIOD) as f32 / ORBIT_PERIOD as f32 * TAU;
        (0..self.count)
            .map(|i| {
                let angle = phase + i as f32 * TAU / self.count as f32;
                let offset = Vec3::new(angle.cos(), angle.sin(), 0.0) * ORBIT_RADIUS;
                let transform =
                    Mat4::from_translation(offset) * Mat4::from_scale(Vec3::splat(ITEM_SCALE));
                DrawItem::new(MeshId(i), transform)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_stay_in_view() {
        let mut scene = OrbitScene::new(5);
        for frame in [0, 45, 90, 359, 1000] {
            let items = scene.draw_list(frame);
            assert_eq!(items.len(), 5);
            for item in items {
                let centre = item.transform.project_point3(Vec3::ZERO);
                assert!(centre.x.abs() <= ORBIT_RADIUS + 1e-4);
                assert!(centre.y.abs() <= ORBIT_RADIUS + 1e-4);
            }
        }
    }

    #[test]
    fn test_orbit_repeats() {
        let mut scene = OrbitScene::new(3);
        assert_eq!(scene.draw_list(7), scene.draw_list(7 + ORBIT_PERIOD));
        assert!(OrbitScene::new(0).draw_list(1).is_empty());
    }
}
