//! Shadow atlas packing.
//!
//! Every shadow-casting light gets one square tile in a layered depth atlas.
//! Each slice holds tiles of a single size, so lights are packed by
//! resolution, largest first:
//!
//! ```text
//!  slice 0 (2048 tiles)   slice 1 (1024 tiles)
//!  ┌────────┬────────┐    ┌────┬────┬────┬────┐
//!  │ L0     │ L3     │    │ L1 │ L2 │    │    │
//!  ├────────┼────────┤    ├────┼────┼────┼────┤
//!  │        │        │    │    │    │    │    │
//!  └────────┴────────┘    └────┴────┴────┴────┘
//! ```

use glam::Mat4;
use log::warn;
use serde::{Deserialize, Serialize};

use super::LightId;
use crate::device::Viewport;

/// Atlas dimensions.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowAtlasConfig {
    /// Edge length of every slice in texels.
    pub size: u32,
    pub slices: u32,
}

impl Default for ShadowAtlasConfig {
    fn default() -> Self {
        Self {
            size: 4096,
            slices: 4,
        }
    }
}

/// Where one light's shadow map lives this frame.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ShadowAssignment {
    pub light: LightId,
    /// Index into the shadow-view constants.
    pub shadow_index: u32,
    pub slice: u32,
    /// Tile rectangle inside the slice.
    pub viewport: Viewport,
    pub view_projection: Mat4,
}

impl ShadowAssignment {
    /// Whether the tile covers its whole slice.
    #[must_use]
    pub fn covers_slice(&self, config: &ShadowAtlasConfig) -> bool {
        self.viewport.width as u32 >= config.size && self.viewport.height as u32 >= config.size
    }
}

/// Tile edge for a requested resolution: a power of two within the slice.
#[must_use]
pub fn tile_size(resolution: u32, atlas_size: u32) -> u32 {
    resolution.clamp(16, atlas_size.max(16)).next_power_of_two().min(atlas_size)
}

/// Packs `(light, resolution, view_projection)` requests into the atlas.
///
/// At most `max_lights` lights are assigned; the rest are dropped with a
/// warning, as are lights that no longer fit into any slice.
#[must_use]
pub fn pack_shadow_atlas(
    requests: &[(LightId, u32, Mat4)],
    config: &ShadowAtlasConfig,
    max_lights: usize,
) -> Vec<ShadowAssignment> {
    if config.size == 0 || config.slices == 0 {
        return Vec::new();
    }
    let mut ordered: Vec<(LightId, u32, Mat4)> = requests
        .iter()
        .map(|&(light, resolution, vp)| (light, tile_size(resolution, config.size), vp))
        .collect();
    // Stable: lights with equal tiles keep scene order.
    ordered.sort_by(|a, b| b.1.cmp(&a.1));

    let mut assignments = Vec::with_capacity(ordered.len().min(max_lights));
    let mut slice: Option<(u32, u32, u32)> = None; // (index, tile, used)

    for (light, tile, view_projection) in ordered {
        if assignments.len() >= max_lights {
            warn!("Shadow atlas: more than {max_lights} shadow-casting lights, dropping the rest");
            break;
        }

        let per_row = config.size / tile;
        let capacity = per_row * per_row;
        let (index, used) = match slice {
            Some((index, slice_tile, used)) if slice_tile == tile && used < capacity => (index, used),
            Some((index, _, _)) => (index + 1, 0),
            None => (0, 0),
        };
        if index >= config.slices {
            warn!("Shadow atlas: out of slices, light {light:?} gets no shadow");
            break;
        }
        slice = Some((index, tile, used + 1));

        let x = (used % per_row) * tile;
        let y = (used / per_row) * tile;
        assignments.push(ShadowAssignment {
            light,
            shadow_index: assignments.len() as u32,
            slice: index,
            viewport: Viewport {
                x: x as f32,
                y: y as f32,
                width: tile as f32,
                height: tile as f32,
            },
            view_projection,
        });
    }
    assignments
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn ids(n: usize) -> Vec<LightId> {
        let mut map: SlotMap<LightId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn slices_hold_one_tile_size() {
        let lights = ids(4);
        let config = ShadowAtlasConfig { size: 2048, slices: 4 };
        let requests = [
            (lights[0], 2048, Mat4::IDENTITY),
            (lights[1], 1024, Mat4::IDENTITY),
            (lights[2], 1000, Mat4::IDENTITY),
            (lights[3], 2048, Mat4::IDENTITY),
        ];
        let packed = pack_shadow_atlas(&requests, &config, 16);

        assert_eq!(packed.len(), 4);
        assert_eq!((packed[0].light, packed[0].slice), (lights[0], 0));
        assert_eq!((packed[1].light, packed[1].slice), (lights[3], 1));
        assert_eq!((packed[2].light, packed[2].slice), (lights[1], 2));
        assert_eq!((packed[3].light, packed[3].slice), (lights[2], 2));
        assert_eq!(packed[3].viewport.x, 1024.0);
        assert!(packed[0].covers_slice(&config));
        assert!(!packed[2].covers_slice(&config));
        let indices: Vec<u32> = packed.iter().map(|a| a.shadow_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn overflow_drops_lights() {
        let lights = ids(3);
        let config = ShadowAtlasConfig { size: 1024, slices: 1 };
        let requests: Vec<_> = lights.iter().map(|l| (*l, 1024, Mat4::IDENTITY)).collect();
        assert_eq!(pack_shadow_atlas(&requests, &config, 16).len(), 1);
        assert_eq!(pack_shadow_atlas(&requests, &ShadowAtlasConfig::default(), 2).len(), 2);
    }
}
