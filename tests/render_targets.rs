//! Render Target Lifetime Tests
//!
//! Offscreen targets follow the output size, are reused while nothing
//! changes, and every task-owned slot lives in the graph's target set.

mod common;

use common::Harness;
use strata::device::GpuDevice;
use strata::standard_ids as id;
use strata::tasks::BeginFrameTask;

#[test]
fn gbuffer_matches_the_output_size() {
    let mut h = Harness::new();
    h.frame();
    let slots = *h.graph.task::<BeginFrameTask>(id::begin_frame()).unwrap().slots().unwrap();

    for slot in [slots.scene_color, slots.normal, slots.mesh_id, slots.selection_depth] {
        assert_eq!(h.graph.targets().extent(slot), Some((common::WIDTH, common::HEIGHT)));
    }

    h.resize(640, 480);
    h.frame();
    for slot in [slots.scene_color, slots.normal, slots.mesh_id, slots.selection_depth] {
        assert_eq!(h.graph.targets().extent(slot), Some((640, 480)));
    }
    assert_eq!(h.device.validation_errors(), 0);
}

#[test]
fn resize_reallocates_each_target_once() {
    let mut h = Harness::new();
    h.frames(2);
    let before = h.graph.targets().allocation_count();

    h.resize(256, 128);
    h.frames(3);
    let after = h.graph.targets().allocation_count();

    // Every live output-sized target is replaced exactly once.
    h.resize(128, 64);
    h.frame();
    assert_eq!(h.graph.targets().allocation_count() - after, after - before);
}

#[test]
fn replaced_targets_are_destroyed() {
    let mut h = Harness::new();
    h.frames(2);
    let live = h.device.live_texture_count();

    h.resize(500, 200);
    h.frames(2);
    assert_eq!(h.device.live_texture_count(), live);
}

#[test]
fn swapped_output_of_the_same_shape_keeps_the_targets() {
    let mut h = Harness::new();
    h.frames(2);
    let allocations = h.graph.targets().allocation_count();

    let old = h.output.texture;
    h.output = Harness::create_output(&mut h.device, common::WIDTH, common::HEIGHT);
    h.graph.params_mut().output = Some(h.output);
    h.device.destroy_texture(old);
    h.frame();

    assert_eq!(h.graph.targets().allocation_count(), allocations);
    assert_eq!(h.device.validation_errors(), 0);
}
