//! Frame Graph Core
//!
//! The control plane of the renderer:
//!
//! - [`Task`]: three-phase unit of work (`sync` / `prepare` / `execute`)
//! - [`TaskGraph`]: ordered task list, enable/disable, per-frame driver
//! - [`FrameContext`]: typed per-frame data exchange between tasks
//! - [`RenderParams`]: persistent frame number, clock and display modes
//! - [`SceneDelta`]: parameter blocks and dirty bits per task

mod frame_context;
mod id;
mod params;
mod render_params;
mod task;
mod task_graph;

pub use frame_context::{FrameContext, FrameFlags, FrameKey, FrameValue};
pub use id::TaskId;
pub use params::{
    BeginFrameParams, BoundingBoxParams, BoundsDisplay, DirtyBits, EnvironmentMapParams,
    MaterialTag, OitParams, PassSelector, PickParams, PostProcessParams, RenderPrimitivesParams,
    SceneDelta, SelectionFilter, SelectionParams, ShadowParams, TaskParams,
};
pub use render_params::{DebugView, FrameClock, RenderMode, RenderParams};
pub use task::{
    ExecuteContext, GeometryRenderer, GeometryRequest, NoGeometry, PrepareContext, Task,
    report_unexpected, report_wrong_params,
};
pub use task_graph::{FrameSummary, TaskGraph};
