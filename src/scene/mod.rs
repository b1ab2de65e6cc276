//! Scene Index
//!
//! The read-only view of the scene the tasks render from: active camera,
//! lights, primitive bounds and selection, environment map, and the version
//! counters used for cheap change detection.
//!
//! # Version counters
//!
//! Every mutator bumps the counter of the category it touches. Tasks compare
//! [`SceneVersions`] snapshots between frames instead of diffing the scene:
//!
//! | Counter | Bumped by |
//! |---------|-----------|
//! | `mesh_geometry` | primitive insert/remove |
//! | `material` | [`SceneIndex::touch_material`] |
//! | `transform` | [`SceneIndex::set_bounds`] |
//! | `visibility` | [`SceneIndex::set_visible`] |
//! | `light` | light insert/remove, any [`SceneIndex::light_mut`] guard |
//! | `selection` | [`SceneIndex::set_selected`] |

mod camera;
mod light;
mod shadow_atlas;

use std::ops::{Deref, DerefMut};

use glam::Vec3;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::device::TextureHandle;

pub use camera::{Camera, CameraAttributes};
pub use light::{Light, LightKind, ShadowSettings};
pub use shadow_atlas::{
    ShadowAssignment, ShadowAtlasConfig, pack_shadow_atlas, tile_size,
};

slotmap::new_key_type! {
    /// Handle to a light in a [`SceneIndex`].
    pub struct LightId;
}

/// Primitive identifier as written to the mesh-id target (`id + 1`, 0 is
/// background).
pub type PrimitiveId = u32;

/// Axis-aligned bounding box.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// The 8 corners, bit `i` of the index selecting `max` on axis `i`.
    #[must_use]
    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    /// The 12 edges as 24 line-list vertices.
    #[must_use]
    pub fn line_vertices(&self) -> [Vec3; 24] {
        const EDGES: [(usize, usize); 12] = [
            (0, 1), (2, 3), (4, 5), (6, 7),
            (0, 2), (1, 3), (4, 6), (5, 7),
            (0, 4), (1, 5), (2, 6), (3, 7),
        ];
        let corners = self.corners();
        let mut out = [Vec3::ZERO; 24];
        for (i, (a, b)) in EDGES.iter().enumerate() {
            out[i * 2] = corners[*a];
            out[i * 2 + 1] = corners[*b];
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Primitive {
    pub collection: String,
    pub bounds: Aabb,
    pub visible: bool,
    pub selected: bool,
}

/// Monotonic change counters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct SceneVersions {
    pub mesh_geometry: u64,
    pub material: u64,
    pub transform: u64,
    pub visibility: u64,
    pub light: u64,
    pub selection: u64,
}

/// Mutable access to a scene item; bumps a version counter when dropped.
pub struct VersionGuard<'a, T> {
    data: &'a mut T,
    version: &'a mut u64,
}

impl<T> Deref for VersionGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
    }
}

impl<T> DerefMut for VersionGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}

impl<T> Drop for VersionGuard<'_, T> {
    fn drop(&mut self) {
        *self.version = self.version.wrapping_add(1);
    }
}

/// Scene data consumed read-only by the frame graph.
#[derive(Default)]
pub struct SceneIndex {
    camera: Option<Camera>,
    lights: SlotMap<LightId, Light>,
    primitives: FxHashMap<PrimitiveId, Primitive>,
    environment_map: Option<TextureHandle>,
    versions: SceneVersions,
}

impl SceneIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Camera ─────────────────────────────────────────────────────────────

    pub fn set_camera(&mut self, camera: Option<Camera>) {
        self.camera = camera;
    }

    #[must_use]
    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    // ── Lights ─────────────────────────────────────────────────────────────

    pub fn add_light(&mut self, light: Light) -> LightId {
        self.versions.light += 1;
        self.lights.insert(light)
    }

    pub fn remove_light(&mut self, id: LightId) -> Option<Light> {
        self.versions.light += 1;
        self.lights.remove(id)
    }

    #[must_use]
    pub fn light(&self, id: LightId) -> Option<&Light> {
        self.lights.get(id)
    }

    pub fn light_mut(&mut self, id: LightId) -> Option<VersionGuard<'_, Light>> {
        let data = self.lights.get_mut(id)?;
        Some(VersionGuard {
            data,
            version: &mut self.versions.light,
        })
    }

    pub fn lights(&self) -> impl Iterator<Item = (LightId, &Light)> {
        self.lights.iter()
    }

    /// Visible lights, in scene order.
    pub fn visible_lights(&self) -> impl Iterator<Item = (LightId, &Light)> {
        self.lights.iter().filter(|(_, l)| l.visible)
    }

    // ── Primitives ─────────────────────────────────────────────────────────

    pub fn insert_primitive(&mut self, id: PrimitiveId, primitive: Primitive) {
        self.versions.mesh_geometry += 1;
        if primitive.selected {
            self.versions.selection += 1;
        }
        self.primitives.insert(id, primitive);
    }

    pub fn remove_primitive(&mut self, id: PrimitiveId) -> Option<Primitive> {
        let removed = self.primitives.remove(&id)?;
        self.versions.mesh_geometry += 1;
        Some(removed)
    }

    #[must_use]
    pub fn primitive(&self, id: PrimitiveId) -> Option<&Primitive> {
        self.primitives.get(&id)
    }

    pub fn primitives(&self) -> impl Iterator<Item = (PrimitiveId, &Primitive)> {
        self.primitives.iter().map(|(id, p)| (*id, p))
    }

    pub fn set_bounds(&mut self, id: PrimitiveId, bounds: Aabb) {
        if let Some(p) = self.primitives.get_mut(&id) {
            p.bounds = bounds;
            self.versions.transform += 1;
        }
    }

    pub fn set_visible(&mut self, id: PrimitiveId, visible: bool) {
        if let Some(p) = self.primitives.get_mut(&id)
            && p.visible != visible
        {
            p.visible = visible;
            self.versions.visibility += 1;
        }
    }

    pub fn set_selected(&mut self, id: PrimitiveId, selected: bool) {
        if let Some(p) = self.primitives.get_mut(&id)
            && p.selected != selected
        {
            p.selected = selected;
            self.versions.selection += 1;
        }
    }

    /// Records that some material parameter changed.
    pub fn touch_material(&mut self) {
        self.versions.material += 1;
    }

    #[must_use]
    pub fn has_selection(&self) -> bool {
        self.primitives.values().any(|p| p.selected && p.visible)
    }

    /// Visible, selected primitives.
    pub fn selected_primitives(&self) -> impl Iterator<Item = (PrimitiveId, &Primitive)> {
        self.primitives()
            .filter(|(_, p)| p.selected && p.visible)
    }

    // ── Environment ────────────────────────────────────────────────────────

    pub fn set_environment_map(&mut self, texture: Option<TextureHandle>) {
        self.environment_map = texture;
    }

    #[must_use]
    pub fn environment_map(&self) -> Option<TextureHandle> {
        self.environment_map
    }

    #[must_use]
    pub fn versions(&self) -> SceneVersions {
        self.versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube() -> Primitive {
        Primitive {
            collection: "scene".to_string(),
            bounds: Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)),
            visible: true,
            selected: false,
        }
    }

    #[test]
    fn mutators_bump_their_counters() {
        let mut scene = SceneIndex::new();
        scene.insert_primitive(1, cube());
        assert_eq!(scene.versions().mesh_geometry, 1);

        scene.set_visible(1, false);
        scene.set_visible(1, false);
        assert_eq!(scene.versions().visibility, 1);

        let light = scene.add_light(Light::directional(-Vec3::Y, 3.0));
        let before = scene.versions().light;
        scene.light_mut(light).unwrap().intensity = 5.0;
        assert_eq!(scene.versions().light, before + 1);
        assert_eq!(scene.light(light).unwrap().intensity, 5.0);
    }

    #[test]
    fn selection_ignores_hidden_primitives() {
        let mut scene = SceneIndex::new();
        scene.insert_primitive(7, cube());
        assert!(!scene.has_selection());
        scene.set_selected(7, true);
        assert!(scene.has_selection());
        scene.set_visible(7, false);
        assert!(!scene.has_selection());
    }

    #[test]
    fn box_edges_connect_corners() {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let lines = bounds.line_vertices();
        for pair in lines.chunks(2) {
            let delta = (pair[1] - pair[0]).abs();
            assert!((delta.x + delta.y + delta.z - 1.0).abs() < 1e-6);
        }
    }
}
