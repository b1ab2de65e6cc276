//! Graph Settings Tests
//!
//! JSON configuration driving the standard graph: formats, disabled tasks,
//! initial parameter blocks and global display modes.

mod common;

use common::Harness;
use strata::graph::{BoundsDisplay, DebugView, FrameKey, RenderMode, TaskParams};
use strata::settings::GraphSettings;
use strata::standard_ids as id;
use strata::tasks::ProcessSelectionTask;

const CONFIG: &str = r#"{
    "oit_layer_count": 4,
    "render_mode": "wireframe",
    "fixed_step_ms": 20,
    "disabled": ["environment_map"],
    "tasks": {
        "bounding_box": { "kind": "bounding_box", "display": "all" },
        "process_selection": { "kind": "process_selection", "maximum_distance": 4.0 }
    }
}"#;

#[test]
fn json_settings_configure_the_graph() -> anyhow::Result<()> {
    let settings = GraphSettings::from_json(CONFIG)?;
    assert_eq!(settings.oit_layer_count, 4);
    assert_eq!(settings.render_mode, RenderMode::Wireframe);

    let mut h = Harness::with_settings(&settings);
    assert!(!h.graph.is_enabled(id::environment_map()));
    assert_eq!(h.graph.params().render_mode, RenderMode::Wireframe);
    assert!(matches!(
        h.graph.task_params(id::bounding_box()),
        Some(TaskParams::BoundingBox(p)) if p.display == BoundsDisplay::All
    ));

    h.select(0);
    let summary = h.frame();
    assert_eq!(summary.skipped, vec![id::environment_map()]);
    let outline = h.graph.task::<ProcessSelectionTask>(id::process_selection()).unwrap();
    assert_eq!(outline.iterations(), 3);
    assert!(summary.published(FrameKey::SelectionOutline));
    assert_eq!(h.device.validation_errors(), 0);
    Ok(())
}

#[test]
fn settings_survive_a_round_trip() -> anyhow::Result<()> {
    let mut settings = GraphSettings::from_json(CONFIG)?;
    settings.debug_view = DebugView::Depth;
    settings.formats.motion = None;

    let json = settings.to_json()?;
    assert_eq!(GraphSettings::from_json(&json)?, settings);
    Ok(())
}

#[test]
fn unknown_task_in_settings_fails_the_build() {
    let settings = GraphSettings::from_json(r#"{ "disabled": ["not_a_task"] }"#).unwrap();
    assert!(strata::build_standard_graph(&settings).is_err());
}

#[test]
fn malformed_settings_are_rejected() {
    assert!(GraphSettings::from_json(r#"{ "oit_layer_count": "many" }"#).is_err());
}
