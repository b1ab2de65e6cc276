//! Graceful Degradation Tests
//!
//! A frame never panics and never issues invalid commands when inputs are
//! missing: no output, no camera, inactive channels, refused allocations,
//! pipelines still compiling or failing.

mod common;

use glam::Vec3;

use common::Harness;
use strata::graph::{FrameKey, NoGeometry};
use strata::scene::{Light, ShadowSettings};
use strata::settings::GraphSettings;
use strata::standard_ids as id;
use strata::tasks::{EndOitTask, PostProcessTask, ReadPrimitiveIdTask};

// ============================================================================
// Missing Inputs
// ============================================================================

#[test]
fn no_output_records_no_draws() {
    let mut h = Harness::new();
    h.graph.params_mut().output = None;
    let summary = h.frame();

    assert_eq!(summary.executed.len(), id::all().len());
    assert!(summary.published.is_empty());
    assert_eq!(h.device.draw_count(), 0);
    assert!(h.geometry.requests.is_empty());
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn no_camera_skips_the_main_passes() {
    let mut h = Harness::new();
    h.scene.set_camera(None);
    let summary = h.frame();

    assert!(summary.published(FrameKey::SceneColor));
    assert!(!summary.published(FrameKey::Camera));
    assert!(!summary.published(FrameKey::MainPass));
    assert!(!h.geometry.passes().contains(&"main"));
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn camera_can_come_and_go() {
    let mut h = Harness::new();
    h.frame();
    let camera = h.scene.camera().cloned();
    h.scene.set_camera(None);
    h.frame();
    h.scene.set_camera(camera);
    let summary = h.frame();

    assert!(summary.published(FrameKey::MainPass));
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn oversized_shadow_atlas_is_refused() {
    let mut h = Harness::new();
    h.device.max_texture_dimension = 1024;
    let light = Light::directional(Vec3::NEG_Y, 1.0).with_shadow(ShadowSettings::default());
    h.scene.add_light(light);
    let summary = h.frame();

    assert!(summary.published(FrameKey::ShadowAssignments));
    assert!(!summary.published(FrameKey::ShadowAtlas));
    assert!(summary.published(FrameKey::MainPass));
    assert!(h.geometry.shadow_lights().is_empty());
    assert_eq!(h.device.validation_errors(), 0);
}

// ============================================================================
// Inactive Channels
// ============================================================================

#[test]
fn inactive_channels_are_not_published() {
    let mut settings = GraphSettings::default();
    settings.formats.ibl = None;
    settings.formats.mesh_id = None;
    settings.formats.jittered_color = None;
    let mut h = Harness::with_settings(&settings);
    let summary = h.frame();

    assert!(!summary.published(FrameKey::Ibl));
    assert!(!summary.published(FrameKey::MeshId));
    assert!(!summary.published(FrameKey::JitteredColor));

    let post = h.graph.task::<PostProcessTask>(id::post_process()).unwrap();
    assert!(!post.taa_active());
    assert!(h.device.bound_shaders().contains(&"composite"));
    assert!(h.graph.task::<EndOitTask>(id::end_oit()).unwrap().resolved());
    assert_eq!(
        h.graph.task::<ReadPrimitiveIdTask>(id::read_primitive_id()).unwrap().pending(),
        0
    );
    assert_eq!(h.device.validation_errors(), 0);
}

// ============================================================================
// Pipelines
// ============================================================================

#[test]
fn compiling_pipelines_delay_work_without_errors() {
    let mut h = Harness::new();
    h.device.pipeline_latency = 2;
    h.select(0);

    h.frame();
    assert!(!h.graph.task::<EndOitTask>(id::end_oit()).unwrap().resolved());
    assert!(!h.device.bound_shaders().contains(&"taa_accumulate"));

    h.frames(4);
    assert!(h.graph.task::<EndOitTask>(id::end_oit()).unwrap().resolved());
    assert!(h.device.bound_shaders().contains(&"taa_accumulate"));
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn failed_composite_skips_post_processing() {
    let mut h = Harness::new();
    h.device.fail_shader("composite_jittered");
    h.frames(2);

    assert!(!h.device.bound_shaders().contains(&"taa_accumulate"));
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn empty_geometry_renderer_is_fine() {
    let mut h = Harness::new();
    let summary = h.graph.render_frame(&mut h.device, &h.scene, &mut NoGeometry);
    assert_eq!(summary.executed.len(), id::all().len());
    assert!(!h.graph.task::<EndOitTask>(id::end_oit()).unwrap().resolved());
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn release_frees_every_graph_texture() {
    let mut h = Harness::new();
    h.frames(2);
    h.graph.release(&mut h.device);

    // Only the caller's output texture survives.
    assert_eq!(h.device.live_texture_count(), 1);
}
