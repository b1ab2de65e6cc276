//! GPU constant layouts.
//!
//! All structs are `#[repr(C)]` + `bytemuck::Pod`, built from 4-byte scalars
//! only so the Rust layout matches WGSL uniform layout without hidden padding.
//!
//! # Frame constants buffer
//!
//! ```text
//!  0                       frame uniforms  (FrameUniforms)
//!  SHADOW_VIEWS_OFFSET     shadow views    (MAX_SHADOW_LIGHTS × 256-byte stride,
//!                                           bound with a dynamic offset per light)
//!  LIGHTS_OFFSET           lights          (MAX_LIGHTS × LightUniforms)
//! ```

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::device::align_to;
use crate::scene::{CameraAttributes, Light, LightKind};

pub const MAX_LIGHTS: usize = 64;
pub const MAX_SHADOW_LIGHTS: usize = 16;

/// Dynamic-offset alignment guaranteed by every backend.
pub const UNIFORM_OFFSET_ALIGNMENT: u64 = 256;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub inverse_view: [[f32; 4]; 4],
    pub inverse_projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    pub prev_view_projection: [[f32; 4]; 4],
    pub jitter: [f32; 2],
    pub viewport_size: [f32; 2],
    pub near: f32,
    pub far: f32,
    pub exposure: f32,
    pub time: f32,
    pub frame_number: u32,
    pub light_count: u32,
    pub shadow_count: u32,
    pub taa_enabled: u32,
    pub camera_position: [f32; 3],
    pub _pad: f32,
}

impl FrameUniforms {
    #[must_use]
    pub fn from_camera(camera: &CameraAttributes) -> Self {
        Self {
            view: camera.view.to_cols_array_2d(),
            projection: camera.projection.to_cols_array_2d(),
            inverse_view: camera.inverse_view.to_cols_array_2d(),
            inverse_projection: camera.inverse_projection.to_cols_array_2d(),
            view_projection: camera.view_projection.to_cols_array_2d(),
            prev_view_projection: camera.prev_view_projection.to_cols_array_2d(),
            jitter: [0.0; 2],
            viewport_size: camera.viewport_size.to_array(),
            near: camera.near,
            far: camera.far,
            exposure: camera.exposure,
            camera_position: camera.position.to_array(),
            ..Self::zeroed()
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ShadowViewUniforms {
    pub view_projection: [[f32; 4]; 4],
    /// Tile rectangle in normalized atlas coordinates (x, y, w, h).
    pub atlas_rect: [f32; 4],
    pub slice: u32,
    pub shadow_index: u32,
    pub _pad: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LightUniforms {
    pub position: [f32; 3],
    pub kind: u32,
    pub direction: [f32; 3],
    /// -1 when the light has no shadow this frame.
    pub shadow_index: i32,
    pub color: [f32; 3],
    pub intensity: f32,
    pub range: f32,
    pub inner_cone_cos: f32,
    pub outer_cone_cos: f32,
    pub _pad: f32,
}

impl LightUniforms {
    #[must_use]
    pub fn new(light: &Light, shadow_index: Option<u32>) -> Self {
        let (kind, inner, outer) = match light.kind {
            LightKind::Directional => (0, 1.0, 1.0),
            LightKind::Spot { inner_cone, outer_cone } => (1, inner_cone.cos(), outer_cone.cos()),
            LightKind::Point => (2, -1.0, -1.0),
        };
        Self {
            position: light.position.to_array(),
            kind,
            direction: light.direction.normalize_or_zero().to_array(),
            shadow_index: shadow_index.map_or(-1, |i| i as i32),
            color: light.color.to_array(),
            intensity: light.intensity,
            range: if light.range.is_finite() { light.range } else { 0.0 },
            inner_cone_cos: inner,
            outer_cone_cos: outer,
            _pad: 0.0,
        }
    }
}

/// Per-frame constants of the compositor.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PostProcessUniforms {
    pub outline_color: [f32; 4],
    pub exposure: f32,
    pub ssao_radius: f32,
    pub ssr_max_steps: u32,
    /// Bit 0 SSR, bit 1 SSAO, bit 2 TAA, bit 3 selection outline.
    pub effects: u32,
    pub debug_channel: u32,
    pub _pad: [u32; 3],
}

/// Constants of the temporal accumulation pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct AccumulationUniforms {
    pub jitter: [f32; 2],
    pub skip_rejection: u32,
    pub history_valid: u32,
}

/// Constants of one jump-flood update pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct JumpFloodUniforms {
    pub radius: u32,
    pub _pad: [u32; 3],
}

// ─── Frame Constants Layout ───────────────────────────────────────────────────

pub const SHADOW_VIEWS_OFFSET: u64 = align_to(
    size_of::<FrameUniforms>() as u64,
    UNIFORM_OFFSET_ALIGNMENT,
);
pub const SHADOW_VIEW_STRIDE: u64 = UNIFORM_OFFSET_ALIGNMENT;
pub const LIGHTS_OFFSET: u64 = SHADOW_VIEWS_OFFSET + MAX_SHADOW_LIGHTS as u64 * SHADOW_VIEW_STRIDE;
pub const FRAME_CONSTANTS_SIZE: u64 = LIGHTS_OFFSET + (MAX_LIGHTS * size_of::<LightUniforms>()) as u64;

/// Byte offset of shadow view `index` in the frame constants buffer.
#[inline]
#[must_use]
pub const fn shadow_view_offset(index: u32) -> u64 {
    SHADOW_VIEWS_OFFSET + index as u64 * SHADOW_VIEW_STRIDE
}

/// CPU staging image of the frame constants buffer.
///
/// Light and shadow data are filled during prepare; the frame uniforms are
/// written last, at execute time, once the jitter is known.
pub struct FrameConstants {
    bytes: Vec<u8>,
}

impl Default for FrameConstants {
    fn default() -> Self {
        Self {
            bytes: vec![0; FRAME_CONSTANTS_SIZE as usize],
        }
    }
}

impl FrameConstants {
    pub fn write_frame(&mut self, uniforms: &FrameUniforms) {
        self.write(0, bytemuck::bytes_of(uniforms));
    }

    pub fn write_shadow_view(&mut self, index: u32, uniforms: &ShadowViewUniforms) {
        if (index as usize) < MAX_SHADOW_LIGHTS {
            self.write(shadow_view_offset(index), bytemuck::bytes_of(uniforms));
        }
    }

    pub fn write_lights(&mut self, lights: &[LightUniforms]) {
        let count = lights.len().min(MAX_LIGHTS);
        self.write(LIGHTS_OFFSET, bytemuck::cast_slice(&lights[..count]));
    }

    #[must_use]
    pub fn frame(&self) -> FrameUniforms {
        bytemuck::pod_read_unaligned(&self.bytes[..size_of::<FrameUniforms>()])
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn write(&mut self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }
}

/// Normalized atlas rectangle of a tile.
#[must_use]
pub fn atlas_rect(viewport: &crate::device::Viewport, atlas_size: u32) -> [f32; 4] {
    let size = atlas_size.max(1) as f32;
    [
        viewport.x / size,
        viewport.y / size,
        viewport.width / size,
        viewport.height / size,
    ]
}

/// Matrix helper for shadow view uniforms.
#[must_use]
pub fn shadow_view(view_projection: Mat4, rect: [f32; 4], slice: u32, shadow_index: u32) -> ShadowViewUniforms {
    ShadowViewUniforms {
        view_projection: view_projection.to_cols_array_2d(),
        atlas_rect: rect,
        slice,
        shadow_index,
        _pad: [0; 2],
    }
}
