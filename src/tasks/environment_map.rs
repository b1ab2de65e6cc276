//! Environment Map Task
//!
//! Fills the background of the main pass with the scene's environment map.
//! The full-screen triangle is drawn at the far plane with a read-only
//! depth test, so it only lands where no opaque geometry was written.

use log::{debug, error, trace};
use smallvec::smallvec;

use super::require;
use crate::device::{
    BindingDesc, BindingEntry, BufferDesc, BufferHandle, BufferKind, DepthState, GpuDevice,
    SamplerKind, TextureView, ViewKind,
};
use crate::graph::{
    DirtyBits, EnvironmentMapParams, ExecuteContext, FrameContext, FrameKey, Task, TaskParams,
    report_unexpected, report_wrong_params,
};
use crate::pipelines::{BindingCache, LazyPipeline};
use crate::uniforms::FrameUniforms;

const NAME: &str = "EnvironmentMap";
const PARAMS_SIZE: u64 = 16;

pub struct EnvironmentMapTask {
    params: EnvironmentMapParams,
    params_dirty: bool,
    params_buffer: Option<BufferHandle>,
    pipeline: LazyPipeline,
    bindings: BindingCache,
    drawn: bool,
}

impl Default for EnvironmentMapTask {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentMapTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            params: EnvironmentMapParams::default(),
            params_dirty: true,
            params_buffer: None,
            pipeline: LazyPipeline::new(),
            bindings: BindingCache::new(),
            drawn: false,
        }
    }

    /// Whether the background was drawn last frame.
    #[must_use]
    pub fn drawn(&self) -> bool {
        self.drawn
    }

    fn params_buffer(&mut self, device: &mut dyn GpuDevice) -> Option<BufferHandle> {
        if let Some(buffer) = self.params_buffer
            && device.buffer_size(buffer).is_some()
        {
            return Some(buffer);
        }
        match device.create_buffer(&BufferDesc::new("environment params", PARAMS_SIZE, BufferKind::Uniform)) {
            Ok(buffer) => {
                self.params_buffer = Some(buffer);
                self.params_dirty = true;
                Some(buffer)
            }
            Err(e) => {
                error!("{NAME}: {e}");
                None
            }
        }
    }
}

impl Task for EnvironmentMapTask {
    fn name(&self) -> &str {
        NAME
    }

    fn sync(&mut self, params: &TaskParams, _frame: &mut FrameContext, dirty: &mut DirtyBits) {
        let TaskParams::EnvironmentMap(params) = params else {
            report_wrong_params(NAME, params, dirty);
            return;
        };
        if self.params != *params {
            self.params = *params;
            self.params_dirty = true;
        }
        *dirty = DirtyBits::empty();
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        self.drawn = false;
        let Some(environment) = ctx.scene.environment_map() else {
            trace!("{NAME}: scene has no environment map");
            return;
        };
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
        let Some(depth) = pass.depth() else {
            report_unexpected(NAME, "main pass has no depth target");
            return;
        };

        let mut desc = pass.pipeline_desc("environment map", "environment_map");
        desc = desc.with_depth(depth.format, DepthState::READ_ONLY);
        desc.polygon_mode = wgpu::PolygonMode::Fill;
        desc.cull_mode = None;
        self.pipeline.ensure(&mut *ctx.device, desc);
        let Some(pipeline) = self.pipeline.ready(&mut *ctx.device) else {
            debug!("{NAME}: pipeline not ready");
            return;
        };

        let Some(params_buffer) = self.params_buffer(&mut *ctx.device) else {
            return;
        };
        if self.params_dirty {
            let data = [self.params.intensity, self.params.rotation, 0.0, 0.0];
            ctx.device.update_buffer(params_buffer, 0, bytemuck::cast_slice(&data));
            self.params_dirty = false;
        }

        let binding = BindingDesc {
            label: "environment map inputs".to_string(),
            pipeline,
            group: 0,
            entries: smallvec![
                BindingEntry::Texture(TextureView {
                    texture: environment,
                    kind: ViewKind::ShaderResource,
                    layer: None,
                }),
                BindingEntry::Sampler(SamplerKind::Linear),
                BindingEntry::Buffer {
                    buffer: constants,
                    offset: 0,
                    size: Some(size_of::<FrameUniforms>() as u64),
                },
                BindingEntry::Buffer {
                    buffer: params_buffer,
                    offset: 0,
                    size: None,
                },
            ],
        };
        let Some(binding) = self.bindings.get(&mut *ctx.device, "inputs", &binding) else {
            return;
        };

        if let Err(e) = pass.commit(&mut *ctx.device, ctx.params.frame_number) {
            report_unexpected(NAME, e);
            return;
        }
        ctx.device.set_pipeline(pipeline);
        ctx.device.bind(0, binding, &[]);
        ctx.device.draw(3, 1);
        self.drawn = true;

        if let Some(pass) = ctx.passes.get_mut(id) {
            pass.record_draw_items(1);
        }
    }

    fn release(&mut self, device: &mut dyn GpuDevice) {
        self.bindings.clear(device);
        if let Some(buffer) = self.params_buffer.take() {
            device.destroy_buffer(buffer);
        }
    }
}
