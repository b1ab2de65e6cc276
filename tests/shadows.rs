//! Shadow Atlas Tests
//!
//! Tests for incremental shadow rendering:
//! - First frame renders every caster with whole-slice clears
//! - Clean tiles are not re-rendered
//! - A single dirty light in a shared slice gets a tile clear
//! - Scene changes dirty every tile
//! - Deferred slices while the tile-clear pipeline compiles

mod common;

use glam::Vec3;

use common::Harness;
use strata::graph::{FrameKey, ShadowParams, TaskParams};
use strata::scene::{Aabb, Light, LightId, ShadowSettings};
use strata::standard_ids as id;
use strata::tasks::ShadowsTask;

// ============================================================================
// Helpers
// ============================================================================

fn caster(direction: Vec3) -> Light {
    Light::directional(direction, 3.0).with_shadow(ShadowSettings::default())
}

/// Harness with two shadow-casting lights sharing the first slice.
fn two_casters() -> (Harness, LightId, LightId) {
    let mut h = Harness::new();
    let a = h.scene.add_light(caster(Vec3::new(0.0, -1.0, 0.0)));
    let b = h.scene.add_light(caster(Vec3::new(1.0, -1.0, 0.0)));
    (h, a, b)
}

fn shadows(h: &Harness) -> &ShadowsTask {
    h.graph.task::<ShadowsTask>(id::shadows()).unwrap()
}

// ============================================================================
// Incremental Rendering
// ============================================================================

#[test]
fn first_frame_renders_every_caster() {
    let (mut h, a, b) = two_casters();
    h.scene.add_light(Light::point(Vec3::ZERO, 10.0));
    let summary = h.frame();

    let stats = shadows(&h).last_frame();
    assert_eq!(stats.rendered.len(), 2);
    assert!(stats.rendered.contains(&a) && stats.rendered.contains(&b));
    assert_eq!(stats.full_slice_clears, 1);
    assert_eq!(stats.tile_clears, 0);

    assert!(summary.published(FrameKey::ShadowAtlas));
    assert!(summary.published(FrameKey::ShadowPass));
    let mut lights = h.geometry.shadow_lights();
    lights.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(lights, expected);
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn clean_tiles_are_skipped() {
    let (mut h, a, b) = two_casters();
    h.frame();
    h.frame();

    let task = shadows(&h);
    assert!(task.last_frame().rendered.is_empty());
    assert!(task.is_clean(a));
    assert!(task.is_clean(b));
    assert!(h.geometry.shadow_lights().is_empty());
}

#[test]
fn one_dirty_light_clears_only_its_tile() {
    let (mut h, a, b) = two_casters();
    h.frames(2);

    h.scene.light_mut(a).unwrap().intensity = 5.0;
    h.frame();

    let stats = shadows(&h).last_frame();
    assert_eq!(stats.rendered, vec![a]);
    assert_eq!(stats.full_slice_clears, 0);
    assert_eq!(stats.tile_clears, 1);
    assert!(shadows(&h).is_clean(b));
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn moving_geometry_dirties_every_tile() {
    let (mut h, _, _) = two_casters();
    h.frames(2);

    h.scene.set_bounds(0, Aabb::new(Vec3::splat(-2.0), Vec3::splat(2.0)));
    h.frame();

    let stats = shadows(&h).last_frame();
    assert_eq!(stats.rendered.len(), 2);
    assert_eq!(stats.full_slice_clears, 1);
}

#[test]
fn removed_caster_is_forgotten() {
    let (mut h, a, b) = two_casters();
    h.frame();

    h.scene.remove_light(a);
    h.frame();
    assert!(!shadows(&h).is_clean(a));
    assert!(shadows(&h).is_clean(b));
}

// ============================================================================
// Toggling and Pipeline Latency
// ============================================================================

#[test]
fn disabling_shadows_drops_the_atlas() {
    let (mut h, a, _) = two_casters();
    h.frame();

    h.graph
        .set_params(id::shadows(), TaskParams::Shadows(ShadowParams { enabled: false }))
        .unwrap();
    let summary = h.frame();
    assert!(!summary.published(FrameKey::ShadowAtlas));
    assert!(shadows(&h).last_frame().rendered.is_empty());

    h.graph
        .set_params(id::shadows(), TaskParams::Shadows(ShadowParams { enabled: true }))
        .unwrap();
    h.frame();
    assert!(shadows(&h).last_frame().rendered.contains(&a));
}

#[test]
fn partial_slice_waits_for_the_clear_pipeline() {
    let (mut h, a, _) = two_casters();
    h.frame();

    h.device.pipeline_latency = 2;
    h.scene.light_mut(a).unwrap().intensity = 0.5;

    let mut rendered_in = None;
    for frame in 0..6 {
        h.frame();
        if shadows(&h).last_frame().rendered.contains(&a) {
            rendered_in = Some(frame);
            break;
        }
        assert!(!shadows(&h).is_clean(a));
    }
    assert!(rendered_in.is_some_and(|f| f > 0));
    assert_eq!(shadows(&h).last_frame().tile_clears, 1);
    assert_eq!(h.device.validation_errors(), 0);
}
