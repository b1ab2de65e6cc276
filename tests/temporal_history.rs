//! Temporal History Tests
//!
//! Depth and motion history pairs, TAA history validity and the
//! static-frame (skip rejection) decision.

mod common;

use glam::Vec3;

use common::Harness;
use strata::graph::{MaterialTag, PassSelector, RenderPrimitivesParams, SelectionFilter, TaskParams};
use strata::scene::Camera;
use strata::standard_ids as id;
use strata::tasks::{BeginFrameTask, PostProcessTask};

fn post(h: &Harness) -> &PostProcessTask {
    h.graph.task::<PostProcessTask>(id::post_process()).unwrap()
}

// ============================================================================
// Depth / Motion History
// ============================================================================

#[test]
fn depth_history_swaps_every_frame() {
    let mut h = Harness::new();
    let slots = *h.graph.task::<BeginFrameTask>(id::begin_frame()).unwrap().slots().unwrap();

    h.frame();
    let first_current = h.graph.targets().texture(slots.depth.current());
    let first_previous = h.graph.targets().texture(slots.depth.previous());
    assert!(first_current.is_some() && first_previous.is_some());
    assert_ne!(first_current, first_previous);

    h.frame();
    let slots = *h.graph.task::<BeginFrameTask>(id::begin_frame()).unwrap().slots().unwrap();
    assert_eq!(h.graph.targets().texture(slots.depth.current()), first_previous);
    assert_eq!(h.graph.targets().texture(slots.depth.previous()), first_current);
}

#[test]
fn steady_frames_allocate_nothing() {
    let mut h = Harness::new();
    h.frames(2);
    let allocations = h.graph.targets().allocation_count();
    let textures = h.device.textures_created();

    h.frames(5);
    assert_eq!(h.graph.targets().allocation_count(), allocations);
    assert_eq!(h.device.textures_created(), textures);
    assert_eq!(h.device.validation_errors(), 0);
}

// ============================================================================
// Accumulation
// ============================================================================

#[test]
fn history_becomes_valid_on_the_second_frame() {
    let mut h = Harness::new();
    h.frame();
    let first = post(&h).last_accumulation();
    assert!(post(&h).taa_active());
    assert!(!first.history_valid);
    assert!(!first.skip_rejection);
    assert_ne!(first.jitter, glam::Vec2::ZERO);

    h.frame();
    let second = post(&h).last_accumulation();
    assert!(second.history_valid);
    assert!(second.skip_rejection);
    assert_ne!(second.jitter, first.jitter);
}

#[test]
fn camera_motion_forces_rejection() {
    let mut h = Harness::new();
    h.frames(2);
    assert!(post(&h).last_accumulation().skip_rejection);

    h.scene.set_camera(Some(Camera::look_at(
        Vec3::new(3.0, 2.0, 5.0),
        Vec3::ZERO,
        45f32.to_radians(),
        16.0 / 9.0,
        0.1,
        100.0,
    )));
    h.frame();
    let moved = post(&h).last_accumulation();
    assert!(!moved.skip_rejection);
    assert!(moved.history_valid);

    h.frame();
    assert!(post(&h).last_accumulation().skip_rejection);
}

#[test]
fn scene_edits_force_rejection() {
    let mut h = Harness::new();
    h.frames(2);

    h.scene.set_visible(0, false);
    h.frame();
    assert!(!post(&h).last_accumulation().skip_rejection);

    h.frame();
    h.scene.touch_material();
    h.frame();
    assert!(!post(&h).last_accumulation().skip_rejection);
}

#[test]
fn selection_changes_do_not_touch_history() {
    let mut h = Harness::new();
    h.frames(2);
    h.select(0);
    h.frames(2);
    let state = post(&h).last_accumulation();
    assert!(state.history_valid);
    assert!(state.skip_rejection);
}

#[test]
fn retargeting_a_geometry_task_suspends_supersampling() {
    let mut h = Harness::new();
    h.frames(2);

    h.graph
        .set_params(
            id::render_transparent(),
            TaskParams::RenderPrimitives(RenderPrimitivesParams {
                collection: "overlay".to_string(),
                material_tag: MaterialTag::Translucent,
                selection: SelectionFilter::All,
                pass: PassSelector::Main,
            }),
        )
        .unwrap();
    h.frame();
    assert!(!post(&h).last_accumulation().skip_rejection);
    assert!(h.geometry.requests.iter().any(|r| r.collection == "overlay"));

    h.frame();
    assert!(post(&h).last_accumulation().skip_rejection);
}

#[test]
fn resize_invalidates_history_for_one_frame() {
    let mut h = Harness::new();
    h.frames(3);

    h.resize(400, 300);
    h.frame();
    let resized = post(&h).last_accumulation();
    assert!(!resized.history_valid);
    assert!(!resized.skip_rejection);

    h.frame();
    assert!(post(&h).last_accumulation().history_valid);
    assert_eq!(h.device.validation_errors(), 0);
}
