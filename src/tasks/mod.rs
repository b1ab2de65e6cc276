//! Concrete Tasks
//!
//! Every stage of the standard frame. Each task is a narrow producer and/or
//! consumer of [`FrameContext`](crate::graph::FrameContext) entries:
//!
//! | Task | Reads | Publishes |
//! |------|-------|-----------|
//! | [`BeginFrameTask`] | output, camera, lights | G-buffer views, depth/motion history, pass states, camera, shadow assignments, frame constants |
//! | [`ShadowsTask`] | shadow assignments, frame constants | shadow atlas, shadow pass |
//! | [`BeginMainPassTask`] | G-buffer, depth, shadow atlas | |
//! | [`RenderPrimitivesTask`] | one pass state | |
//! | [`CopySelectionDepthTask`] | depth, selection depth | |
//! | [`EnvironmentMapTask`] | main pass, frame constants | |
//! | [`BoundingBoxTask`] | main pass, frame constants | |
//! | [`BeginOitTask`] | depth | OIT layers, tail, version, OIT pass |
//! | [`EndOitTask`] | OIT pass, G-buffer | |
//! | [`ReadPrimitiveIdTask`] | mesh id | |
//! | [`ProcessSelectionTask`] | selection depth, closest-selected buffers | selection outline |
//! | [`PostProcessTask`] | everything above | jitter, TAA flag |
//!
//! [`build_standard_graph`] inserts them in the one order that is correct:
//!
//! ```text
//!  begin_frame → shadows → begin_main_pass → render_opaque_selected
//!  → copy_selection_depth → render_opaque → render_transparent → environment_map
//!  → bounding_box → render_additive → render_transparent_selected → begin_oit
//!  → render_oit → end_oit → read_primitive_id → process_selection → post_process
//! ```

mod begin_frame;
mod begin_main_pass;
mod bounding_box;
mod copy_selection_depth;
mod environment_map;
mod oit;
mod post_process;
mod process_selection;
mod read_primitive_id;
mod render_primitives;
mod shadows;

use log::info;

use crate::errors::{FrameContextError, Result};
use crate::graph::{
    BeginFrameParams, MaterialTag, OitParams, PassSelector, RenderPrimitivesParams,
    SelectionFilter, TaskGraph, TaskParams, report_unexpected,
};
use crate::scene::PrimitiveId;
use crate::settings::GraphSettings;

pub use begin_frame::{BeginFrameTask, GBufferSlots};
pub use begin_main_pass::BeginMainPassTask;
pub use bounding_box::BoundingBoxTask;
pub use copy_selection_depth::CopySelectionDepthTask;
pub use environment_map::EnvironmentMapTask;
pub use oit::{BeginOitTask, EndOitTask, OIT_FRAGMENT_SIZE};
pub use post_process::{AccumulationState, PostProcessTask, halton};
pub use process_selection::{ProcessSelectionTask, jump_flood_iterations};
pub use read_primitive_id::ReadPrimitiveIdTask;
pub use render_primitives::RenderPrimitivesTask;
pub use shadows::{ShadowFrameStats, ShadowsTask};

/// Ids of the tasks inserted by [`build_standard_graph`].
pub mod standard_ids {
    use crate::graph::TaskId;

    macro_rules! ids {
        ($($name:ident),* $(,)?) => {
            $(
                #[must_use]
                pub fn $name() -> TaskId {
                    TaskId::new(stringify!($name))
                }
            )*

            /// Every standard id, in execution order.
            #[must_use]
            pub fn all() -> Vec<TaskId> {
                vec![$($name()),*]
            }
        };
    }

    ids!(
        begin_frame,
        shadows,
        begin_main_pass,
        render_opaque_selected,
        copy_selection_depth,
        render_opaque,
        render_transparent,
        environment_map,
        bounding_box,
        render_additive,
        render_transparent_selected,
        begin_oit,
        render_oit,
        end_oit,
        read_primitive_id,
        process_selection,
        post_process,
    );
}

/// Queries answered by the tasks [`build_standard_graph`] inserts.
pub trait StandardGraphExt {
    /// Primitive under the pick location as of the last completed readback.
    fn selected_primitive(&self) -> Option<PrimitiveId>;
}

impl StandardGraphExt for TaskGraph {
    fn selected_primitive(&self) -> Option<PrimitiveId> {
        self.task::<ReadPrimitiveIdTask>(standard_ids::read_primitive_id())?
            .latest()
    }
}

/// Collection name the standard geometry tasks draw.
pub const SCENE_COLLECTION: &str = "scene";

/// Unwraps a frame context read, reporting a miss as an unexpected state.
pub(crate) fn require<T>(task: &str, read: std::result::Result<T, FrameContextError>) -> Option<T> {
    match read {
        Ok(value) => Some(value),
        Err(e) => {
            report_unexpected(task, e);
            None
        }
    }
}

fn primitives(
    tag: MaterialTag,
    selection: SelectionFilter,
    pass: PassSelector,
) -> (RenderPrimitivesTask, TaskParams) {
    let params = RenderPrimitivesParams {
        collection: SCENE_COLLECTION.to_string(),
        material_tag: tag,
        selection,
        pass,
    };
    (
        RenderPrimitivesTask::new(params.clone()),
        TaskParams::RenderPrimitives(params),
    )
}

/// Builds the full pipeline in its fixed order and applies `settings`.
pub fn build_standard_graph(settings: &GraphSettings) -> Result<TaskGraph> {
    use standard_ids as id;

    let mut graph = TaskGraph::new();
    let formats = settings.formats;

    graph.insert(id::begin_frame(), BeginFrameTask::new(formats, settings.shadow_atlas))?;
    graph.set_params(
        id::begin_frame(),
        TaskParams::BeginFrame(BeginFrameParams {
            clear_color: settings.clear_color,
        }),
    )?;
    graph.insert(id::shadows(), ShadowsTask::new(settings.shadow_format, settings.shadow_atlas))?;
    graph.insert(id::begin_main_pass(), BeginMainPassTask)?;

    let geometry = [
        (id::render_opaque_selected(), MaterialTag::Opaque, SelectionFilter::Selected, PassSelector::OpaqueSelected),
        (id::render_opaque(), MaterialTag::Opaque, SelectionFilter::Unselected, PassSelector::Main),
        (id::render_transparent(), MaterialTag::Translucent, SelectionFilter::Unselected, PassSelector::Main),
        (id::render_additive(), MaterialTag::Additive, SelectionFilter::All, PassSelector::Main),
        (id::render_transparent_selected(), MaterialTag::Translucent, SelectionFilter::Selected, PassSelector::TransparentSelected),
        (id::render_oit(), MaterialTag::Oit, SelectionFilter::All, PassSelector::Oit),
    ];
    let insert_primitives = |graph: &mut TaskGraph, index: usize| -> Result<()> {
        let (task_id, tag, selection, pass) = geometry[index];
        let (task, params) = primitives(tag, selection, pass);
        graph.insert(task_id, task)?;
        graph.set_params(task_id, params)
    };

    insert_primitives(&mut graph, 0)?;
    graph.insert(id::copy_selection_depth(), CopySelectionDepthTask)?;
    insert_primitives(&mut graph, 1)?;
    insert_primitives(&mut graph, 2)?;
    graph.insert(id::environment_map(), EnvironmentMapTask::new())?;
    graph.insert(id::bounding_box(), BoundingBoxTask::new())?;
    insert_primitives(&mut graph, 3)?;
    insert_primitives(&mut graph, 4)?;
    graph.insert(id::begin_oit(), BeginOitTask::new(settings.oit_layer_count))?;
    graph.set_params(
        id::begin_oit(),
        TaskParams::Oit(OitParams {
            layer_count: settings.oit_layer_count,
        }),
    )?;
    insert_primitives(&mut graph, 5)?;
    graph.insert(id::end_oit(), EndOitTask::new())?;
    graph.insert(
        id::read_primitive_id(),
        ReadPrimitiveIdTask::new(formats.mesh_id, settings.readback_capacity),
    )?;
    graph.insert(id::process_selection(), ProcessSelectionTask::new())?;
    graph.insert(id::post_process(), PostProcessTask::new())?;

    for (task, params) in &settings.tasks {
        graph.set_params(*task, params.clone())?;
    }
    for task in &settings.disabled {
        graph.disable(*task)?;
    }

    let render = graph.params_mut();
    render.render_mode = settings.render_mode;
    render.debug_view = settings.debug_view;
    render.clock.fixed_step = settings.fixed_step_ms.map(std::time::Duration::from_millis);

    info!(
        "Standard frame graph: {} tasks, {} disabled",
        graph.len(),
        settings.disabled.len()
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_order_matches_ids() {
        let graph = build_standard_graph(&GraphSettings::default()).unwrap();
        assert_eq!(graph.order(), standard_ids::all().as_slice());
        assert_eq!(graph.enabled_order().len(), graph.len());
    }

    #[test]
    fn settings_disable_and_parametrize() {
        let settings = GraphSettings::default()
            .with_disabled(standard_ids::bounding_box())
            .with_task_params(standard_ids::begin_oit(), TaskParams::Oit(OitParams { layer_count: 2 }));
        let graph = build_standard_graph(&settings).unwrap();
        assert!(!graph.is_enabled(standard_ids::bounding_box()));
        assert_eq!(
            graph.task_params(standard_ids::begin_oit()),
            Some(&TaskParams::Oit(OitParams { layer_count: 2 }))
        );
    }

    #[test]
    fn unknown_disabled_id_is_rejected() {
        let settings = GraphSettings::default().with_disabled(crate::graph::TaskId::new("no_such_task"));
        assert!(build_standard_graph(&settings).is_err());
    }

    #[test]
    fn picking_needs_the_standard_pick_task() {
        let mut graph = build_standard_graph(&GraphSettings::default()).unwrap();
        assert_eq!(graph.selected_primitive(), None);

        graph.remove(standard_ids::read_primitive_id()).unwrap();
        assert_eq!(graph.selected_primitive(), None);
        assert!(TaskGraph::new().selected_primitive().is_none());
    }
}
