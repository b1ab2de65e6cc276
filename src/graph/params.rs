//! Scene-delta parameters.
//!
//! The embedding application describes each task's configuration with a
//! [`TaskParams`] block and marks the task dirty with [`DirtyBits`]. The graph
//! keeps both in a [`SceneDelta`] and hands them to [`Task::sync`] only when
//! some bit is set.
//!
//! [`Task::sync`]: super::Task::sync

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::TaskId;
use super::frame_context::FrameKey;

bitflags! {
    /// Per-task change notifications.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
    pub struct DirtyBits: u32 {
        /// The parameter block was replaced.
        const PARAMS      = 1 << 0;
        /// The set of primitives in the task's collection changed.
        const COLLECTION  = 1 << 1;
        /// Material tags of primitives in the collection changed.
        const RENDER_TAGS = 1 << 2;
        /// Primitive visibility changed.
        const VISIBILITY  = 1 << 3;
        const ALL = Self::PARAMS.bits()
            | Self::COLLECTION.bits()
            | Self::RENDER_TAGS.bits()
            | Self::VISIBILITY.bits();
    }
}

// ─── Parameter Blocks ─────────────────────────────────────────────────────────

/// Material bucket a geometry task draws.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialTag {
    #[default]
    Opaque,
    Masked,
    Additive,
    Translucent,
    /// Translucent geometry resolved through order-independent transparency.
    Oit,
}

/// Which primitives a geometry task draws with respect to the selection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionFilter {
    #[default]
    All,
    Selected,
    Unselected,
}

/// Named render pass a geometry task draws into.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassSelector {
    OpaqueSelected,
    #[default]
    Main,
    TransparentSelected,
    Oit,
}

impl PassSelector {
    /// Frame context key the pass state is published under.
    #[must_use]
    pub fn frame_key(self) -> FrameKey {
        match self {
            Self::OpaqueSelected => FrameKey::OpaqueSelectedPass,
            Self::Main => FrameKey::MainPass,
            Self::TransparentSelected => FrameKey::TransparentSelectedPass,
            Self::Oit => FrameKey::OitPass,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BeginFrameParams {
    /// Linear RGB clear color of the scene-color channel.
    pub clear_color: [f32; 3],
}

impl Default for BeginFrameParams {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0],
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderPrimitivesParams {
    /// Collection name handed to the geometry renderer.
    pub collection: String,
    pub material_tag: MaterialTag,
    pub selection: SelectionFilter,
    pub pass: PassSelector,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowParams {
    pub enabled: bool,
}

impl Default for ShadowParams {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionParams {
    /// Outline search radius in pixels.
    pub maximum_distance: f32,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            maximum_distance: 16.0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessParams {
    pub ssr: bool,
    pub ssao: bool,
    pub taa: bool,
    pub exposure: f32,
    pub outline_color: [f32; 4],
    pub ssao_radius: f32,
    pub ssr_max_steps: u32,
}

impl Default for PostProcessParams {
    fn default() -> Self {
        Self {
            ssr: true,
            ssao: true,
            taa: true,
            exposure: 1.0,
            outline_color: [1.0, 0.6, 0.0, 1.0],
            ssao_radius: 0.5,
            ssr_max_steps: 64,
        }
    }
}

/// Which primitives get a bounding-box overlay.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundsDisplay {
    None,
    #[default]
    Selected,
    All,
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundingBoxParams {
    pub display: BoundsDisplay,
    pub color: [f32; 4],
}

impl Default for BoundingBoxParams {
    fn default() -> Self {
        Self {
            display: BoundsDisplay::Selected,
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentMapParams {
    pub intensity: f32,
    /// Rotation around the up axis in radians.
    pub rotation: f32,
}

impl Default for EnvironmentMapParams {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            rotation: 0.0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OitParams {
    /// Fragment layers stored per pixel before spilling into the tail.
    pub layer_count: u8,
}

impl Default for OitParams {
    fn default() -> Self {
        Self { layer_count: 8 }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PickParams {
    /// Pixel to read the primitive id under, `None` disables picking.
    pub location: Option<[u32; 2]>,
}

/// Typed parameter block for one task.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskParams {
    #[default]
    None,
    BeginFrame(BeginFrameParams),
    RenderPrimitives(RenderPrimitivesParams),
    Shadows(ShadowParams),
    ProcessSelection(SelectionParams),
    PostProcess(PostProcessParams),
    BoundingBox(BoundingBoxParams),
    EnvironmentMap(EnvironmentMapParams),
    Oit(OitParams),
    ReadPrimitiveId(PickParams),
}

impl TaskParams {
    /// Variant name, used in "unexpected parameter block" messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BeginFrame(_) => "begin_frame",
            Self::RenderPrimitives(_) => "render_primitives",
            Self::Shadows(_) => "shadows",
            Self::ProcessSelection(_) => "process_selection",
            Self::PostProcess(_) => "post_process",
            Self::BoundingBox(_) => "bounding_box",
            Self::EnvironmentMap(_) => "environment_map",
            Self::Oit(_) => "oit",
            Self::ReadPrimitiveId(_) => "read_primitive_id",
        }
    }
}

// ─── Scene Delta ──────────────────────────────────────────────────────────────

/// Parameter blocks and pending dirty bits, keyed by task id.
#[derive(Default, Debug)]
pub struct SceneDelta {
    pub(crate) params: FxHashMap<TaskId, TaskParams>,
    pub(crate) dirty: FxHashMap<TaskId, DirtyBits>,
}

impl SceneDelta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a task's parameter block and marks it [`DirtyBits::PARAMS`].
    pub fn set_params(&mut self, task: TaskId, params: TaskParams) {
        self.params.insert(task, params);
        self.mark_dirty(task, DirtyBits::PARAMS);
    }

    #[must_use]
    pub fn params(&self, task: TaskId) -> Option<&TaskParams> {
        self.params.get(&task)
    }

    pub fn mark_dirty(&mut self, task: TaskId, bits: DirtyBits) {
        *self.dirty.entry(task).or_default() |= bits;
    }

    #[must_use]
    pub fn dirty(&self, task: TaskId) -> DirtyBits {
        self.dirty.get(&task).copied().unwrap_or_default()
    }

    pub(crate) fn forget(&mut self, task: TaskId) {
        self.params.remove(&task);
        self.dirty.remove(&task);
    }
}
