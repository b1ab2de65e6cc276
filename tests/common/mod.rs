//! Shared fixtures for the frame graph integration tests.

#![allow(dead_code)]

use std::collections::HashMap;

use glam::Vec3;

use strata::device::{GpuDevice, HeadlessDevice, TextureDesc, TextureView};
use strata::graph::{FrameSummary, GeometryRenderer, GeometryRequest, MaterialTag, SelectionFilter, TaskGraph};
use strata::scene::{Aabb, Camera, LightId, Primitive, PrimitiveId, SceneIndex};
use strata::settings::GraphSettings;
use strata::tasks::build_standard_graph;

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 180;
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One geometry request as seen by the renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub task: String,
    pub collection: String,
    pub material_tag: MaterialTag,
    pub selection: SelectionFilter,
    pub pass: &'static str,
    pub shadow_light: Option<LightId>,
}

/// Geometry renderer that records requests and reports a fixed number of
/// draw items per material tag.
#[derive(Default)]
pub struct RecordingGeometry {
    pub requests: Vec<RecordedRequest>,
    pub draw_items: HashMap<MaterialTag, u32>,
}

impl RecordingGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_draw_items(mut self, tag: MaterialTag, count: u32) -> Self {
        self.draw_items.insert(tag, count);
        self
    }

    pub fn passes(&self) -> Vec<&'static str> {
        self.requests.iter().map(|r| r.pass).collect()
    }

    pub fn shadow_lights(&self) -> Vec<LightId> {
        self.requests.iter().filter_map(|r| r.shadow_light).collect()
    }
}

impl GeometryRenderer for RecordingGeometry {
    fn render(&mut self, _device: &mut dyn GpuDevice, request: &GeometryRequest<'_>) -> u32 {
        self.requests.push(RecordedRequest {
            task: request.task.to_string(),
            collection: request.collection.to_string(),
            material_tag: request.material_tag,
            selection: request.selection,
            pass: request.pass.label(),
            shadow_light: request.shadow_light,
        });
        self.draw_items.get(&request.material_tag).copied().unwrap_or(1)
    }
}

pub fn cube(selected: bool) -> Primitive {
    Primitive {
        collection: "scene".to_string(),
        bounds: Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)),
        visible: true,
        selected,
    }
}

/// Headless device, scene and standard graph rendering into a 320×180 output.
pub struct Harness {
    pub device: HeadlessDevice,
    pub scene: SceneIndex,
    pub graph: TaskGraph,
    pub geometry: RecordingGeometry,
    pub output: TextureView,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(&GraphSettings::default())
    }

    pub fn with_settings(settings: &GraphSettings) -> Self {
        init_logger();
        let mut device = HeadlessDevice::new();
        let output = Self::create_output(&mut device, WIDTH, HEIGHT);

        let mut scene = SceneIndex::new();
        scene.set_camera(Some(Camera::default()));
        scene.insert_primitive(0, cube(false));

        let mut graph = build_standard_graph(settings).expect("standard graph");
        graph.params_mut().output = Some(output);

        Self {
            device,
            scene,
            graph,
            geometry: RecordingGeometry::new(),
            output,
        }
    }

    pub fn create_output(device: &mut HeadlessDevice, width: u32, height: u32) -> TextureView {
        let texture = device
            .create_texture(&TextureDesc::render_target("output", width, height, OUTPUT_FORMAT))
            .expect("output texture");
        TextureView::default_for(texture, OUTPUT_FORMAT)
    }

    /// Replaces the output with a new texture of the given size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.device.destroy_texture(self.output.texture);
        self.output = Self::create_output(&mut self.device, width, height);
        self.graph.params_mut().output = Some(self.output);
    }

    pub fn frame(&mut self) -> FrameSummary {
        self.geometry.requests.clear();
        self.graph.render_frame(&mut self.device, &self.scene, &mut self.geometry)
    }

    pub fn frames(&mut self, n: usize) -> FrameSummary {
        let mut last = FrameSummary::default();
        for _ in 0..n {
            last = self.frame();
        }
        last
    }

    pub fn select(&mut self, id: PrimitiveId) {
        if self.scene.primitive(id).is_none() {
            self.scene.insert_primitive(id, cube(true));
        } else {
            self.scene.set_selected(id, true);
        }
    }
}
