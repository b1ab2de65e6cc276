#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Strata
//!
//! Frame-graph task scheduler for a real-time physically-based renderer.
//! A [`TaskGraph`] runs an ordered list of [`Task`]s through three phases
//! per frame; tasks exchange per-frame data through the [`FrameContext`] and
//! record commands through a [`GpuDevice`].
//!
//! ```rust,ignore
//! let mut graph = strata::build_standard_graph(&GraphSettings::default())?;
//! graph.params_mut().output = Some(swapchain_view);
//! let summary = graph.render_frame(&mut device, &scene, &mut geometry);
//! ```

pub mod device;
pub mod errors;
pub mod graph;
pub mod pass_state;
pub mod pipelines;
pub mod readback;
pub mod scene;
pub mod settings;
pub mod targets;
pub mod tasks;
pub mod uniforms;

pub use device::{GpuDevice, HeadlessDevice, WgpuDevice};
pub use errors::{Result, StrataError};
pub use graph::{FrameContext, FrameKey, GeometryRenderer, GeometryRequest, Task, TaskGraph, TaskId};
pub use pass_state::RenderPassState;
pub use scene::SceneIndex;
pub use settings::GraphSettings;
pub use targets::RenderTargetSet;
pub use tasks::{StandardGraphExt, build_standard_graph, standard_ids};
