//! Selection and Picking Tests
//!
//! - Selection depth copy and jump-flood outline
//! - Outline pass count follows the maximum distance
//! - Picking through the readback ring, with its latency
//! - Bounding-box overlay rebuilds

mod common;

use glam::Vec3;

use common::{Harness, cube};
use strata::device::DeviceCommand;
use strata::graph::{
    BoundingBoxParams, BoundsDisplay, FrameKey, PickParams, SelectionParams, TaskParams,
};
use strata::scene::Aabb;
use strata::standard_ids as id;
use strata::tasks::{BoundingBoxTask, ProcessSelectionTask, ReadPrimitiveIdTask, StandardGraphExt};

fn outline(h: &Harness) -> &ProcessSelectionTask {
    h.graph.task::<ProcessSelectionTask>(id::process_selection()).unwrap()
}

fn pick(h: &mut Harness, x: u32, y: u32) {
    h.graph
        .set_params(
            id::read_primitive_id(),
            TaskParams::ReadPrimitiveId(PickParams { location: Some([x, y]) }),
        )
        .unwrap();
}

// ============================================================================
// Outline
// ============================================================================

#[test]
fn no_selection_clears_the_outline_buffers() {
    let mut h = Harness::new();
    let summary = h.frame();

    assert_eq!(outline(&h).last_passes(), 0);
    assert!(!summary.published(FrameKey::SelectionOutline));
    let clears = h
        .device
        .commands()
        .iter()
        .filter(|c| matches!(c, DeviceCommand::ClearRenderTarget { color, .. } if color.r == -1.0))
        .count();
    assert_eq!(clears, 2);
}

#[test]
fn selection_runs_the_jump_flood() {
    let mut h = Harness::new();
    h.select(0);
    let summary = h.frame();

    assert_eq!(outline(&h).iterations(), 5);
    assert_eq!(outline(&h).last_passes(), 5);
    assert!(summary.published(FrameKey::SelectionOutline));

    let shaders = h.device.bound_shaders();
    assert_eq!(shaders.iter().filter(|s| **s == "jump_flood_init").count(), 1);
    assert!(shaders.contains(&"jump_flood_update"));
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn selection_depth_is_copied_after_the_selected_pass() {
    let mut h = Harness::new();
    h.select(0);
    h.frame();

    let copies = h
        .device
        .commands()
        .iter()
        .filter(|c| matches!(c, DeviceCommand::CopyTexture { .. }))
        .count();
    // Selection depth plus the TAA resolve into the output.
    assert_eq!(copies, 2);
}

#[test]
fn selection_depth_copy_reads_the_main_depth() {
    let mut h = Harness::new();
    h.select(0);
    h.frame();

    let (src, dst) = h
        .device
        .commands()
        .iter()
        .find_map(|c| match c {
            DeviceCommand::CopyTexture { src, dst } => Some((*src, *dst)),
            _ => None,
        })
        .unwrap();
    assert!(h.device.texture_label(src).unwrap().starts_with("depth "));
    assert_eq!(h.device.texture_label(dst), Some("selection depth"));
}

#[test]
fn outline_distance_changes_the_pass_count() {
    let mut h = Harness::new();
    h.select(0);
    h.graph
        .set_params(
            id::process_selection(),
            TaskParams::ProcessSelection(SelectionParams { maximum_distance: 40.0 }),
        )
        .unwrap();
    h.frame();

    assert_eq!(outline(&h).iterations(), 7);
    assert_eq!(outline(&h).last_passes(), 7);
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn huge_outline_distance_is_clamped() {
    let mut h = Harness::new();
    h.select(0);
    h.graph
        .set_params(
            id::process_selection(),
            TaskParams::ProcessSelection(SelectionParams { maximum_distance: 1.0e10 }),
        )
        .unwrap();
    h.frames(2);

    assert_eq!(outline(&h).iterations(), 17);
    assert_eq!(outline(&h).last_passes(), 17);
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn non_finite_outline_distance_keeps_the_previous_one() {
    let mut h = Harness::new();
    h.select(0);
    for maximum_distance in [f32::INFINITY, f32::NAN] {
        h.graph
            .set_params(
                id::process_selection(),
                TaskParams::ProcessSelection(SelectionParams { maximum_distance }),
            )
            .unwrap();
        h.frames(2);

        assert_eq!(outline(&h).iterations(), 5);
        assert_eq!(outline(&h).last_passes(), 5);
    }
}

#[test]
fn failed_flood_pipeline_leaves_an_empty_outline() {
    let mut h = Harness::new();
    h.device.fail_shader("jump_flood_update");
    h.select(0);
    let summary = h.frame();

    assert_eq!(outline(&h).last_passes(), 0);
    assert!(!summary.published(FrameKey::SelectionOutline));
    assert_eq!(h.device.validation_errors(), 0);
}

// ============================================================================
// Picking
// ============================================================================

#[test]
fn picking_lags_by_the_readback_latency() {
    let mut h = Harness::new();
    h.device.fill_texels("mesh id", &43u32.to_le_bytes());
    pick(&mut h, 10, 20);

    h.frame();
    assert_eq!(h.graph.selected_primitive(), None);
    assert_eq!(h.graph.task::<ReadPrimitiveIdTask>(id::read_primitive_id()).unwrap().pending(), 1);

    h.frame();
    assert_eq!(h.graph.selected_primitive(), Some(42));
    let task = h.graph.task::<ReadPrimitiveIdTask>(id::read_primitive_id()).unwrap();
    assert_eq!(task.latest_frame(), Some(1));
    assert_eq!(task.pending(), 1);
}

#[test]
fn background_texel_picks_nothing() {
    let mut h = Harness::new();
    pick(&mut h, 0, 0);
    h.frames(3);
    assert_eq!(h.graph.selected_primitive(), None);
    assert!(h.graph.task::<ReadPrimitiveIdTask>(id::read_primitive_id()).unwrap().latest_frame().is_some());
}

#[test]
fn pick_location_is_clamped_to_the_target() {
    let mut h = Harness::new();
    pick(&mut h, 5000, 5000);
    h.frame();

    let copy = h.device.commands().iter().find_map(|c| match c {
        DeviceCommand::CopyTexelToStaging { x, y, .. } => Some((*x, *y)),
        _ => None,
    });
    assert_eq!(copy, Some((common::WIDTH - 1, common::HEIGHT - 1)));
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn slow_readbacks_exhaust_the_ring_without_stalling() {
    let mut h = Harness::new();
    h.device.readback_latency = 10;
    pick(&mut h, 1, 1);
    h.frames(5);

    let task = h.graph.task::<ReadPrimitiveIdTask>(id::read_primitive_id()).unwrap();
    assert_eq!(task.pending(), 3);
    assert_eq!(task.latest(), None);
}

// ============================================================================
// Bounding Boxes
// ============================================================================

#[test]
fn bounds_follow_the_display_mode() {
    let mut h = Harness::new();
    h.scene.insert_primitive(1, cube(false));
    h.frame();
    let boxes = h.graph.task::<BoundingBoxTask>(id::bounding_box()).unwrap();
    assert_eq!(boxes.vertex_count(), 0);

    h.select(1);
    h.frame();
    let boxes = h.graph.task::<BoundingBoxTask>(id::bounding_box()).unwrap();
    assert_eq!(boxes.vertex_count(), 24);

    h.graph
        .set_params(
            id::bounding_box(),
            TaskParams::BoundingBox(BoundingBoxParams {
                display: BoundsDisplay::All,
                ..BoundingBoxParams::default()
            }),
        )
        .unwrap();
    h.scene.set_bounds(0, Aabb::new(Vec3::ZERO, Vec3::ONE));
    h.frame();
    let boxes = h.graph.task::<BoundingBoxTask>(id::bounding_box()).unwrap();
    assert_eq!(boxes.vertex_count(), 48);
    assert!(h.device.bound_shaders().contains(&"bounding_box"));
    assert_eq!(h.device.validation_errors(), 0);
}
