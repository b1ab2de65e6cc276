//! Graph Settings
//!
//! Serializable configuration consumed once by
//! [`build_standard_graph`](crate::tasks::build_standard_graph).
//!
//! # Fields
//!
//! | Field                | Description                                   | Default             |
//! |----------------------|-----------------------------------------------|---------------------|
//! | `formats`            | G-buffer channel formats (`null` = inactive)  | see [`GBufferFormats`] |
//! | `shadow_atlas`       | Atlas slice size and slice count              | 4096 × 4            |
//! | `shadow_format`      | Shadow atlas depth format                     | `Depth32Float`      |
//! | `oit_layer_count`    | OIT fragment layers per pixel                 | 8                   |
//! | `readback_capacity`  | Staging textures in the picking ring          | 3                   |
//! | `clear_color`        | Linear RGB scene-color clear value            | black               |
//! | `render_mode`        | Solid / wireframe / points                    | `Solid`             |
//! | `debug_view`         | G-buffer channel shown instead of the image   | `None`              |
//! | `fixed_step_ms`      | Constant frame delta (deterministic playback) | `None`              |
//! | `tasks`              | Initial parameter blocks, keyed by task id    | empty               |
//! | `disabled`           | Task ids disabled after construction          | empty               |
//!
//! # Example
//!
//! ```rust,ignore
//! let settings = GraphSettings::from_json(r#"{
//!     "formats": { "ibl": null },
//!     "disabled": ["bounding_box"],
//!     "tasks": { "post_process": { "kind": "post_process", "taa": false } }
//! }"#)?;
//! let graph = build_standard_graph(&settings)?;
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::graph::{DebugView, RenderMode, TaskId, TaskParams};
use crate::scene::ShadowAtlasConfig;

/// Per-channel render-target formats.
///
/// `None` marks a channel as not requested in this configuration: its slot
/// stays registered but never gets a backing texture.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GBufferFormats {
    pub scene_color: Option<wgpu::TextureFormat>,
    pub normal: Option<wgpu::TextureFormat>,
    pub material: Option<wgpu::TextureFormat>,
    pub base_color: Option<wgpu::TextureFormat>,
    pub ibl: Option<wgpu::TextureFormat>,
    /// Must be a 32-bit unsigned integer format for picking.
    pub mesh_id: Option<wgpu::TextureFormat>,
    /// Motion vectors, current and previous frame.
    pub motion: Option<wgpu::TextureFormat>,
    /// Depth history and selection depth.
    pub depth: Option<wgpu::TextureFormat>,
    /// Jump-flood closest-selected-location buffers.
    pub closest_selected: Option<wgpu::TextureFormat>,
    pub jittered_color: Option<wgpu::TextureFormat>,
}

impl Default for GBufferFormats {
    fn default() -> Self {
        use wgpu::TextureFormat as F;
        Self {
            scene_color: Some(F::Rgba16Float),
            normal: Some(F::Rgba16Float),
            material: Some(F::Rgba8Unorm),
            base_color: Some(F::Rgba8Unorm),
            ibl: Some(F::Rgba16Float),
            mesh_id: Some(F::R32Uint),
            motion: Some(F::Rg16Float),
            depth: Some(F::Depth24PlusStencil8),
            closest_selected: Some(F::Rg32Float),
            jittered_color: Some(F::Rgba16Float),
        }
    }
}

/// Configuration of the standard frame graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    // === Targets ===
    pub formats: GBufferFormats,
    pub shadow_atlas: ShadowAtlasConfig,
    pub shadow_format: Option<wgpu::TextureFormat>,
    pub oit_layer_count: u8,
    pub readback_capacity: usize,

    // === Frame Defaults ===
    pub clear_color: [f32; 3],
    pub render_mode: RenderMode,
    pub debug_view: DebugView,
    pub fixed_step_ms: Option<u64>,

    // === Tasks ===
    /// Parameter blocks applied after the defaults of the standard graph.
    pub tasks: BTreeMap<TaskId, TaskParams>,
    pub disabled: Vec<TaskId>,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            formats: GBufferFormats::default(),
            shadow_atlas: ShadowAtlasConfig::default(),
            shadow_format: Some(wgpu::TextureFormat::Depth32Float),
            oit_layer_count: 8,
            readback_capacity: 3,
            clear_color: [0.0, 0.0, 0.0],
            render_mode: RenderMode::Solid,
            debug_view: DebugView::None,
            fixed_step_ms: None,
            tasks: BTreeMap::new(),
            disabled: Vec::new(),
        }
    }
}

impl GraphSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Adds or replaces the initial parameter block of `task`.
    #[must_use]
    pub fn with_task_params(mut self, task: TaskId, params: TaskParams) -> Self {
        self.tasks.insert(task, params);
        self
    }

    #[must_use]
    pub fn with_disabled(mut self, task: TaskId) -> Self {
        if !self.disabled.contains(&task) {
            self.disabled.push(task);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PostProcessParams;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = GraphSettings::from_json(
            r#"{ "formats": { "ibl": null }, "oit_layer_count": 4, "disabled": ["bounding_box"] }"#,
        )
        .unwrap();
        assert_eq!(settings.formats.ibl, None);
        assert_eq!(settings.formats.scene_color, Some(wgpu::TextureFormat::Rgba16Float));
        assert_eq!(settings.oit_layer_count, 4);
        assert_eq!(settings.disabled, vec![TaskId::new("bounding_box")]);
        assert_eq!(settings.shadow_atlas, ShadowAtlasConfig::default());
    }

    #[test]
    fn json_round_trip() {
        let settings = GraphSettings::default().with_task_params(
            TaskId::new("post_process"),
            TaskParams::PostProcess(PostProcessParams {
                taa: false,
                ..PostProcessParams::default()
            }),
        );
        let json = settings.to_json().unwrap();
        let back = GraphSettings::from_json(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn malformed_json_is_a_settings_error() {
        let err = GraphSettings::from_json("{ \"oit_layer_count\": \"many\" }").unwrap_err();
        assert!(matches!(err, crate::errors::StrataError::Settings(_)));
    }
}
