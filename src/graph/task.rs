//! Task trait and phase contexts.
//!
//! Every unit of frame work implements [`Task`]. The graph calls the three
//! phases in a fixed relative order each frame:
//!
//! ```text
//!   sync     (only when dirty)   parameter blocks → cached task state
//!   prepare  (CPU)               resolve targets, compute constants, publish
//!   execute  (GPU commands)      read published entries, record commands
//! ```
//!
//! # Failure policy
//!
//! Phases never return errors. A missing frame context entry or a refused
//! allocation is reported through [`report_unexpected`] and the phase returns
//! early; downstream tasks see the entry missing and skip as well.

use std::any::Any;
use std::fmt::Display;

use log::warn;

use super::frame_context::FrameContext;
use super::params::{DirtyBits, MaterialTag, SelectionFilter, TaskParams};
use super::render_params::RenderParams;
use crate::device::GpuDevice;
use crate::pass_state::{PassStateRegistry, RenderPassState};
use crate::scene::{LightId, SceneIndex};
use crate::targets::RenderTargetSet;

// ─── Contexts ─────────────────────────────────────────────────────────────────

/// Mutable context for the **prepare** phase.
pub struct PrepareContext<'a> {
    pub device: &'a mut dyn GpuDevice,
    pub scene: &'a SceneIndex,
    pub params: &'a mut RenderParams,
    pub frame: &'a mut FrameContext,
    pub targets: &'a mut RenderTargetSet,
    pub passes: &'a mut PassStateRegistry,
}

/// Context for the **execute** phase.
///
/// Render targets are read-only here; pass states stay mutable because
/// `begin`/`commit` and draw statistics are per-frame state.
pub struct ExecuteContext<'a> {
    pub device: &'a mut dyn GpuDevice,
    pub scene: &'a SceneIndex,
    pub params: &'a RenderParams,
    pub frame: &'a mut FrameContext,
    pub targets: &'a RenderTargetSet,
    pub passes: &'a mut PassStateRegistry,
    pub geometry: &'a mut dyn GeometryRenderer,
}

// ─── Geometry Delegate ────────────────────────────────────────────────────────

/// What a geometry task asks the external renderer to draw.
pub struct GeometryRequest<'a> {
    /// Name of the requesting task.
    pub task: &'a str,
    pub collection: &'a str,
    pub material_tag: MaterialTag,
    pub selection: SelectionFilter,
    /// Committed pass state the draws go into.
    pub pass: &'a RenderPassState,
    /// Set when rendering a shadow map for this light.
    pub shadow_light: Option<LightId>,
    pub scene: &'a SceneIndex,
    pub frame: &'a FrameContext,
}

/// Batching, culling and draw submission for scene geometry.
///
/// The graph only supplies a committed [`RenderPassState`]; everything about
/// how meshes are drawn belongs to the implementor.
pub trait GeometryRenderer {
    /// Issues the draws for `request` and returns the number of draw items.
    fn render(&mut self, device: &mut dyn GpuDevice, request: &GeometryRequest<'_>) -> u32;
}

/// Geometry renderer that draws nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeometry;

impl GeometryRenderer for NoGeometry {
    fn render(&mut self, _device: &mut dyn GpuDevice, _request: &GeometryRequest<'_>) -> u32 {
        0
    }
}

// ─── Task Trait ───────────────────────────────────────────────────────────────

/// A node of the frame graph.
///
/// Tasks are `'static` so the graph can hand out typed references through
/// [`TaskGraph::task`](super::TaskGraph::task).
pub trait Task: Any {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called once when the task is inserted into a graph. Tasks register
    /// their render-target slots and pass states here.
    fn register(&mut self, _targets: &mut RenderTargetSet, _passes: &mut PassStateRegistry) {}

    /// Consumes a parameter block. Called only when `dirty` is non-empty; the
    /// task must clear the bits it handled.
    fn sync(&mut self, _params: &TaskParams, _frame: &mut FrameContext, dirty: &mut DirtyBits) {
        *dirty = DirtyBits::empty();
    }

    /// CPU-side setup for this frame.
    fn prepare(&mut self, _ctx: &mut PrepareContext<'_>) {}

    /// Records GPU commands for this frame.
    fn execute(&mut self, ctx: &mut ExecuteContext<'_>);

    /// Frees device resources the task owns outside the render-target set.
    fn release(&mut self, _device: &mut dyn GpuDevice) {}
}

/// Logs an "unexpected state" event for `task`.
pub fn report_unexpected(task: &str, what: impl Display) {
    warn!("{task}: unexpected state: {what}");
}

/// Logs a parameter block of the wrong kind and clears the dirty bits.
pub fn report_wrong_params(task: &str, params: &TaskParams, dirty: &mut DirtyBits) {
    if *params != TaskParams::None {
        report_unexpected(task, format_args!("ignoring '{}' parameter block", params.kind()));
    }
    *dirty = DirtyBits::empty();
}
