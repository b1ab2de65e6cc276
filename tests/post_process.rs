//! Post-Process Tests
//!
//! Effect gating by render mode and debug view, the composite target
//! choice, and the environment map stage that feeds it.

mod common;

use common::Harness;
use strata::device::{DeviceCommand, GpuDevice, TextureDesc};
use strata::graph::{DebugView, FrameKey, PostProcessParams, RenderMode, TaskParams};
use strata::standard_ids as id;
use strata::tasks::{EnvironmentMapTask, PostProcessTask};

fn post(h: &Harness) -> &PostProcessTask {
    h.graph.task::<PostProcessTask>(id::post_process()).unwrap()
}

fn set_post(h: &mut Harness, params: PostProcessParams) {
    h.graph
        .set_params(id::post_process(), TaskParams::PostProcess(params))
        .unwrap();
}

// ============================================================================
// Effect Gating
// ============================================================================

#[test]
fn solid_mode_runs_every_effect() {
    let mut h = Harness::new();
    h.frame();

    assert!(post(&h).ssao_active());
    assert!(post(&h).ssr_active());
    assert!(post(&h).taa_active());
    let shaders = h.device.bound_shaders();
    for shader in ["ssao", "ssr", "composite_jittered", "taa_accumulate"] {
        assert!(shaders.contains(&shader), "{shader} was not bound");
    }
    assert!(!shaders.contains(&"composite"));
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn wireframe_disables_effects() {
    let mut h = Harness::new();
    h.graph.params_mut().render_mode = RenderMode::Wireframe;
    let summary = h.frame();

    assert!(!post(&h).ssao_active());
    assert!(!post(&h).ssr_active());
    assert!(!post(&h).taa_active());
    assert!(h.device.bound_shaders().contains(&"composite"));
    assert!(summary.published(FrameKey::TaaEnabled));
    assert_eq!(post(&h).last_accumulation().jitter, glam::Vec2::ZERO);
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn ssao_debug_view_keeps_ssao_only() {
    let mut h = Harness::new();
    h.graph.params_mut().debug_view = DebugView::Ssao;
    h.frame();

    assert!(post(&h).ssao_active());
    assert!(!post(&h).ssr_active());
    assert!(!post(&h).taa_active());

    h.graph.params_mut().debug_view = DebugView::Normals;
    h.frame();
    assert!(!post(&h).ssao_active());
}

#[test]
fn disabled_effects_release_their_targets() {
    let mut h = Harness::new();
    h.frame();
    let live = h.device.live_texture_count();

    set_post(
        &mut h,
        PostProcessParams {
            ssr: false,
            taa: false,
            ..PostProcessParams::default()
        },
    );
    h.frame();
    assert!(!post(&h).ssr_active());
    assert!(!post(&h).taa_active());
    // Reflections plus both history targets.
    assert_eq!(h.device.live_texture_count(), live - 3);
    assert!(h.device.bound_shaders().contains(&"composite"));
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn toggling_taa_suspends_accumulation() {
    let mut h = Harness::new();
    h.frames(2);
    assert!(post(&h).last_accumulation().skip_rejection);

    set_post(
        &mut h,
        PostProcessParams {
            taa: false,
            ..PostProcessParams::default()
        },
    );
    h.frame();
    assert!(!post(&h).last_accumulation().skip_rejection);

    set_post(&mut h, PostProcessParams::default());
    h.frame();
    let state = post(&h).last_accumulation();
    assert!(!state.skip_rejection);
    assert!(!state.history_valid);
}

#[test]
fn taa_resolves_into_the_output() {
    let mut h = Harness::new();
    h.frame();
    let output = h.output.texture;
    assert!(h.device.commands().iter().any(
        |c| matches!(c, DeviceCommand::CopyTexture { dst, .. } if *dst == output)
    ));
}

// ============================================================================
// Environment Map
// ============================================================================

#[test]
fn environment_map_draws_only_when_present() {
    let mut h = Harness::new();
    h.frame();
    assert!(!h.graph.task::<EnvironmentMapTask>(id::environment_map()).unwrap().drawn());

    let texture = h
        .device
        .create_texture(&TextureDesc::render_target("environment", 64, 64, wgpu::TextureFormat::Rgba16Float))
        .unwrap();
    h.scene.set_environment_map(Some(texture));
    h.frame();
    assert!(h.graph.task::<EnvironmentMapTask>(id::environment_map()).unwrap().drawn());
    assert!(h.device.bound_shaders().contains(&"environment_map"));
    assert_eq!(h.device.validation_errors(), 0);
}
