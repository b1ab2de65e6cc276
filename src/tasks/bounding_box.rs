//! Bounding Box Task
//!
//! Draws the world-space bounds of the selected (or all visible) primitives
//! as a line list into the main pass. Vertices are pulled from a buffer that
//! is rebuilt only when geometry, transforms, visibility or the selection
//! changed.

use log::{debug, error, trace};
use smallvec::smallvec;

use super::require;
use crate::device::{
    BindingDesc, BindingEntry, BufferDesc, BufferHandle, BufferKind, DepthState, GpuDevice,
};
use crate::graph::{
    BoundingBoxParams, BoundsDisplay, DirtyBits, ExecuteContext, FrameContext, FrameKey, Task,
    TaskParams, report_unexpected, report_wrong_params,
};
use crate::pipelines::{BindingCache, LazyPipeline};
use crate::scene::{SceneIndex, SceneVersions};
use crate::uniforms::FrameUniforms;

const NAME: &str = "BoundingBox";
const VERTEX_STRIDE: u64 = size_of::<[f32; 4]>() as u64;
const VERTICES_PER_BOX: usize = 24;

pub struct BoundingBoxTask {
    params: BoundingBoxParams,
    color_dirty: bool,

    vertex_buffer: Option<BufferHandle>,
    vertex_capacity: u64,
    vertex_count: u32,
    built_count: u32,
    built_for: Option<(SceneVersions, BoundsDisplay)>,

    color_buffer: Option<BufferHandle>,
    pipeline: LazyPipeline,
    bindings: BindingCache,
}

impl Default for BoundingBoxTask {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundingBoxTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            params: BoundingBoxParams::default(),
            color_dirty: true,
            vertex_buffer: None,
            vertex_capacity: 0,
            vertex_count: 0,
            built_count: 0,
            built_for: None,
            color_buffer: None,
            pipeline: LazyPipeline::new(),
            bindings: BindingCache::new(),
        }
    }

    /// Line vertices drawn last frame.
    #[must_use]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    fn collect_vertices(scene: &SceneIndex, display: BoundsDisplay) -> Vec<[f32; 4]> {
        let boxes: Vec<_> = match display {
            BoundsDisplay::None => Vec::new(),
            BoundsDisplay::Selected => scene.selected_primitives().map(|(_, p)| p.bounds).collect(),
            BoundsDisplay::All => scene
                .primitives()
                .filter(|(_, p)| p.visible)
                .map(|(_, p)| p.bounds)
                .collect(),
        };
        let mut vertices = Vec::with_capacity(boxes.len() * VERTICES_PER_BOX);
        for bounds in boxes {
            vertices.extend(bounds.line_vertices().iter().map(|v| v.extend(1.0).to_array()));
        }
        vertices
    }

    /// Uploads `vertices`, growing the buffer to the next power of two.
    fn upload(&mut self, device: &mut dyn GpuDevice, vertices: &[[f32; 4]]) -> Option<BufferHandle> {
        let needed = (vertices.len() as u64 * VERTEX_STRIDE).max(VERTEX_STRIDE);
        let live = self.vertex_buffer.filter(|b| device.buffer_size(*b).is_some());
        let buffer = match live {
            Some(buffer) if self.vertex_capacity >= needed => buffer,
            _ => {
                if let Some(old) = self.vertex_buffer.take() {
                    device.destroy_buffer(old);
                }
                let capacity = needed.next_power_of_two();
                match device.create_buffer(&BufferDesc::new("bounding box lines", capacity, BufferKind::Vertex)) {
                    Ok(buffer) => {
                        debug!("{NAME}: vertex buffer grown to {capacity} bytes");
                        self.vertex_buffer = Some(buffer);
                        self.vertex_capacity = capacity;
                        buffer
                    }
                    Err(e) => {
                        error!("{NAME}: {e}");
                        self.vertex_capacity = 0;
                        return None;
                    }
                }
            }
        };
        if !vertices.is_empty() {
            device.update_buffer(buffer, 0, bytemuck::cast_slice(vertices));
        }
        Some(buffer)
    }

    fn color_buffer(&mut self, device: &mut dyn GpuDevice) -> Option<BufferHandle> {
        if let Some(buffer) = self.color_buffer
            && device.buffer_size(buffer).is_some()
        {
            return Some(buffer);
        }
        match device.create_buffer(&BufferDesc::new("bounding box color", 16, BufferKind::Uniform)) {
            Ok(buffer) => {
                self.color_buffer = Some(buffer);
                self.color_dirty = true;
                Some(buffer)
            }
            Err(e) => {
                error!("{NAME}: {e}");
                None
            }
        }
    }
}

impl Task for BoundingBoxTask {
    fn name(&self) -> &str {
        NAME
    }

    fn sync(&mut self, params: &TaskParams, _frame: &mut FrameContext, dirty: &mut DirtyBits) {
        let TaskParams::BoundingBox(params) = params else {
            report_wrong_params(NAME, params, dirty);
            return;
        };
        if params.color != self.params.color {
            self.color_dirty = true;
        }
        self.params = *params;
        *dirty = DirtyBits::empty();
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        self.vertex_count = 0;
        if self.params.display == BoundsDisplay::None {
            return;
        }

        // =====================================================================
        // 1. Vertices
        // =====================================================================
        let stamp = (ctx.scene.versions(), self.params.display);
        let buffer = if self.built_for == Some(stamp) && self.vertex_buffer.is_some() {
            self.vertex_buffer
        } else {
            let vertices = Self::collect_vertices(ctx.scene, self.params.display);
            let buffer = self.upload(&mut *ctx.device, &vertices);
            self.built_for = buffer.map(|_| stamp);
            self.built_count = vertices.len() as u32;
            buffer
        };
        let Some(vertex_buffer) = buffer else {
            return;
        };
        let count = self.built_count;
        if count == 0 {
            trace!("{NAME}: nothing to outline");
            return;
        }

        // =====================================================================
        // 2. Pipeline and bindings
        // =====================================================================
        let Some(id) = require(NAME, ctx.frame.pass(FrameKey::MainPass)) else {
            return;
        };
        let Some(constants) = require(NAME, ctx.frame.buffer(FrameKey::FrameConstants)) else {
            return;
        };
        let Some(pass) = ctx.passes.get(id) else {
            report_unexpected(NAME, "main pass state missing");
            return;
        };

        let mut desc = pass
            .pipeline_desc("bounding box", "bounding_box")
            .with_topology(wgpu::PrimitiveTopology::LineList);
        if let Some(depth) = pass.depth() {
            desc = desc.with_depth(depth.format, DepthState::READ_ONLY);
        }
        desc.polygon_mode = wgpu::PolygonMode::Fill;
        desc.cull_mode = None;
        self.pipeline.ensure(&mut *ctx.device, desc);
        let Some(pipeline) = self.pipeline.ready(&mut *ctx.device) else {
            debug!("{NAME}: pipeline not ready");
            return;
        };

        let Some(color_buffer) = self.color_buffer(&mut *ctx.device) else {
            return;
        };
        if self.color_dirty {
            ctx.device.update_buffer(color_buffer, 0, bytemuck::cast_slice(&self.params.color));
            self.color_dirty = false;
        }

        let binding = BindingDesc {
            label: "bounding box inputs".to_string(),
            pipeline,
            group: 0,
            entries: smallvec![
                BindingEntry::Buffer {
                    buffer: constants,
                    offset: 0,
                    size: Some(size_of::<FrameUniforms>() as u64),
                },
                BindingEntry::Buffer {
                    buffer: color_buffer,
                    offset: 0,
                    size: None,
                },
                BindingEntry::Buffer {
                    buffer: vertex_buffer,
                    offset: 0,
                    size: None,
                },
            ],
        };
        let Some(binding) = self.bindings.get(&mut *ctx.device, "inputs", &binding) else {
            return;
        };

        // =====================================================================
        // 3. Draw
        // =====================================================================
        if let Err(e) = pass.commit(&mut *ctx.device, ctx.params.frame_number) {
            report_unexpected(NAME, e);
            return;
        }
        ctx.device.set_pipeline(pipeline);
        ctx.device.bind(0, binding, &[]);
        ctx.device.draw(count, 1);
        self.vertex_count = count;

        if let Some(pass) = ctx.passes.get_mut(id) {
            pass.record_draw_items(count / VERTICES_PER_BOX as u32);
        }
    }

    fn release(&mut self, device: &mut dyn GpuDevice) {
        self.bindings.clear(device);
        for buffer in [self.vertex_buffer.take(), self.color_buffer.take()].into_iter().flatten() {
            device.destroy_buffer(buffer);
        }
        self.built_for = None;
        self.vertex_capacity = 0;
    }
}
