//! Frame Graph Order Tests
//!
//! Tests for the fixed task order of the standard graph:
//! - Execute order and the position of every stage
//! - Geometry requests per pass, in order
//! - Enable / disable and the frame summary
//! - Frame context lifetime across frames

mod common;

use common::{Harness, RecordingGeometry};
use strata::graph::{FrameKey, MaterialTag, SelectionFilter};
use strata::settings::GraphSettings;
use strata::standard_ids as id;
use strata::tasks::RenderPrimitivesTask;

// ============================================================================
// Order
// ============================================================================

#[test]
fn every_standard_task_executes_in_order() {
    let mut h = Harness::new();
    let summary = h.frame();

    assert_eq!(summary.frame_number, 1);
    assert_eq!(summary.executed, id::all());
    assert!(summary.skipped.is_empty());
    assert_eq!(h.device.submissions(), 1);
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn selection_copy_sits_between_selected_and_unselected_opaque() {
    let mut h = Harness::new();
    let summary = h.frame();

    let selected = summary.position(id::render_opaque_selected()).unwrap();
    let copy = summary.position(id::copy_selection_depth()).unwrap();
    let opaque = summary.position(id::render_opaque()).unwrap();
    assert!(selected < copy && copy < opaque);

    let begin_oit = summary.position(id::begin_oit()).unwrap();
    let render_oit = summary.position(id::render_oit()).unwrap();
    let end_oit = summary.position(id::end_oit()).unwrap();
    assert_eq!(render_oit, begin_oit + 1);
    assert_eq!(end_oit, render_oit + 1);

    assert_eq!(summary.executed.last(), Some(&id::post_process()));
}

#[test]
fn selection_copy_order_survives_disabled_tasks() {
    let disable_sets = [
        vec![id::render_opaque_selected()],
        vec![id::shadows()],
        vec![id::shadows(), id::begin_oit(), id::render_oit(), id::end_oit()],
        vec![id::render_transparent(), id::environment_map(), id::bounding_box()],
    ];

    for disabled in disable_sets {
        let mut h = Harness::new();
        for task in &disabled {
            h.graph.disable(*task).unwrap();
        }
        let summary = h.frame();
        for task in &disabled {
            assert!(summary.position(*task).is_none());
        }

        let copy = summary.position(id::copy_selection_depth()).unwrap();
        let opaque = summary.position(id::render_opaque()).unwrap();
        assert!(copy < opaque);
        if let Some(selected) = summary.position(id::render_opaque_selected()) {
            assert!(selected < copy);
        }
        assert!(summary.position(id::begin_main_pass()).unwrap() < copy);
        assert_eq!(summary.executed.first(), Some(&id::begin_frame()));
        assert_eq!(summary.executed.last(), Some(&id::post_process()));
    }
}

#[test]
fn geometry_requests_follow_the_pass_order() {
    let mut h = Harness::new();
    h.frame();

    assert_eq!(
        h.geometry.passes(),
        vec!["opaque selected", "main", "main", "main", "transparent selected", "oit"]
    );

    let requests = &h.geometry.requests;
    assert_eq!(requests[0].material_tag, MaterialTag::Opaque);
    assert_eq!(requests[0].selection, SelectionFilter::Selected);
    assert_eq!(requests[1].selection, SelectionFilter::Unselected);
    assert_eq!(requests[2].material_tag, MaterialTag::Translucent);
    assert_eq!(requests[3].material_tag, MaterialTag::Additive);
    assert_eq!(requests[5].material_tag, MaterialTag::Oit);
    assert!(requests.iter().all(|r| r.collection == "scene"));
    assert!(requests.iter().all(|r| r.shadow_light.is_none()));
}

// ============================================================================
// Enable / Disable
// ============================================================================

#[test]
fn disabled_tasks_are_reported_and_skipped() {
    let mut h = Harness::new();
    h.graph.disable(id::render_transparent()).unwrap();
    h.graph.disable(id::bounding_box()).unwrap();

    let summary = h.frame();
    assert_eq!(summary.skipped, vec![id::render_transparent(), id::bounding_box()]);
    assert!(summary.position(id::render_transparent()).is_none());
    assert_eq!(h.geometry.passes().iter().filter(|p| **p == "main").count(), 2);

    h.graph.enable(id::render_transparent()).unwrap();
    let summary = h.frame();
    assert_eq!(summary.skipped, vec![id::bounding_box()]);
    assert_eq!(h.geometry.passes().iter().filter(|p| **p == "main").count(), 3);
}

#[test]
fn settings_can_disable_tasks_up_front() {
    let settings = GraphSettings::default().with_disabled(id::process_selection());
    let mut h = Harness::with_settings(&settings);
    let summary = h.frame();

    assert_eq!(summary.skipped, vec![id::process_selection()]);
    assert!(!summary.published(FrameKey::SelectionOutline));
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn draw_items_are_counted_per_task() {
    let mut h = Harness::new();
    h.geometry = RecordingGeometry::new()
        .with_draw_items(MaterialTag::Opaque, 7)
        .with_draw_items(MaterialTag::Translucent, 2);
    h.frame();

    let opaque = h.graph.task::<RenderPrimitivesTask>(id::render_opaque()).unwrap();
    assert_eq!(opaque.last_draw_items(), 7);
    let transparent = h.graph.task::<RenderPrimitivesTask>(id::render_transparent()).unwrap();
    assert_eq!(transparent.last_draw_items(), 2);
}

// ============================================================================
// Frame Context
// ============================================================================

#[test]
fn core_entries_are_published_every_frame() {
    let mut h = Harness::new();
    for frame in 1..=3 {
        let summary = h.frame();
        assert_eq!(summary.frame_number, frame);
        for key in [
            FrameKey::SceneColor,
            FrameKey::DepthCurrent,
            FrameKey::DepthPrevious,
            FrameKey::MeshId,
            FrameKey::Camera,
            FrameKey::FrameConstants,
            FrameKey::ShadowAssignments,
            FrameKey::MainPass,
            FrameKey::OpaqueSelectedPass,
            FrameKey::TransparentSelectedPass,
            FrameKey::OitPass,
            FrameKey::Jitter,
            FrameKey::TaaEnabled,
        ] {
            assert!(summary.published(key), "{key:?} missing in frame {frame}");
        }
    }
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn shadow_entries_need_a_shadow_caster() {
    let mut h = Harness::new();
    let summary = h.frame();
    assert!(!summary.published(FrameKey::ShadowAtlas));
    assert!(!summary.published(FrameKey::ShadowPass));
}
