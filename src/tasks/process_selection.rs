//! Selection Outline (Jump Flooding)
//!
//! Builds a "closest selected pixel" field from the selection depth so the
//! post-process pass can draw an outline of configurable width.
//!
//! ```text
//!  init        selection depth ──► buffer 0      (seed: covered pixels)
//!  update 0    buffer 0 ──► buffer 1             radius 2^(k-1)
//!  update 1    buffer 1 ──► buffer 0             radius 2^(k-2)
//!  ...
//!  update k-1  buffer (k-1)%2 ──► buffer k%2     radius 1
//! ```
//!
//! `k` is [`jump_flood_iterations`] of the maximum outline distance. The
//! per-step radius lives in one uniform buffer at 256-byte strides and is
//! selected with a dynamic offset.

use log::{debug, error, trace};
use smallvec::smallvec;

use super::require;
use crate::device::{
    BindingDesc, BindingEntry, BufferDesc, BufferHandle, BufferKind, GpuDevice, PipelineDesc,
    PipelineHandle, ResourceRef, ResourceState, SamplerKind, TextureView, Viewport,
};
use crate::graph::{
    DirtyBits, ExecuteContext, FrameContext, FrameKey, FrameValue, SelectionParams, Task,
    TaskParams, report_unexpected, report_wrong_params,
};
use crate::pipelines::{BindingCache, LazyPipeline};
use crate::uniforms::{JumpFloodUniforms, UNIFORM_OFFSET_ALIGNMENT};

const NAME: &str = "ProcessSelection";

/// Value of a pixel with no selected pixel in reach.
const NO_SELECTION: wgpu::Color = wgpu::Color {
    r: -1.0,
    g: -1.0,
    b: 0.0,
    a: 0.0,
};

/// Largest outline distance honoured, in pixels. Wider than any texture the
/// device can allocate.
pub const MAX_OUTLINE_DISTANCE: f32 = 65_536.0;

/// Number of update passes for an outline of `maximum_distance` pixels:
/// `ceil(log2(max(d, 1))) + 1`, with `d` clamped to [`MAX_OUTLINE_DISTANCE`].
#[must_use]
pub fn jump_flood_iterations(maximum_distance: f32) -> u32 {
    let distance = if maximum_distance.is_nan() {
        1.0
    } else {
        maximum_distance.clamp(1.0, MAX_OUTLINE_DISTANCE)
    };
    (distance.log2().ceil() as u32).saturating_add(1)
}

pub struct ProcessSelectionTask {
    params: SelectionParams,
    iterations: u32,

    init_pipeline: LazyPipeline,
    update_pipeline: LazyPipeline,
    bindings: BindingCache,
    steps_buffer: Option<BufferHandle>,
    steps_written: u32,

    last_passes: u32,
}

impl Default for ProcessSelectionTask {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSelectionTask {
    #[must_use]
    pub fn new() -> Self {
        let params = SelectionParams::default();
        Self {
            iterations: jump_flood_iterations(params.maximum_distance),
            params,
            init_pipeline: LazyPipeline::new(),
            update_pipeline: LazyPipeline::new(),
            bindings: BindingCache::new(),
            steps_buffer: None,
            steps_written: 0,
            last_passes: 0,
        }
    }

    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Update passes run last frame (0 when skipped).
    #[must_use]
    pub fn last_passes(&self) -> u32 {
        self.last_passes
    }

    /// Radius of update step `step` for `iterations` steps.
    #[must_use]
    pub fn step_radius(iterations: u32, step: u32) -> u32 {
        1u32.checked_shl(iterations.saturating_sub(step.saturating_add(1)))
            .unwrap_or(u32::MAX)
    }

    fn steps_buffer(&mut self, device: &mut dyn GpuDevice) -> Option<BufferHandle> {
        let size = u64::from(self.iterations) * UNIFORM_OFFSET_ALIGNMENT;
        if let Some(buffer) = self.steps_buffer
            && device.buffer_size(buffer) == Some(size)
        {
            if self.steps_written != self.iterations {
                self.write_steps(device, buffer);
            }
            return Some(buffer);
        }

        if let Some(old) = self.steps_buffer.take() {
            device.destroy_buffer(old);
        }
        match device.create_buffer(&BufferDesc::new("jump flood steps", size, BufferKind::Uniform)) {
            Ok(buffer) => {
                self.steps_buffer = Some(buffer);
                self.write_steps(device, buffer);
                Some(buffer)
            }
            Err(e) => {
                error!("{NAME}: {e}");
                None
            }
        }
    }

    fn write_steps(&mut self, device: &mut dyn GpuDevice, buffer: BufferHandle) {
        for step in 0..self.iterations {
            let uniforms = JumpFloodUniforms {
                radius: Self::step_radius(self.iterations, step),
                _pad: [0; 3],
            };
            device.update_buffer(
                buffer,
                u64::from(step) * UNIFORM_OFFSET_ALIGNMENT,
                bytemuck::bytes_of(&uniforms),
            );
        }
        self.steps_written = self.iterations;
    }

    fn clear(device: &mut dyn GpuDevice, buffers: [TextureView; 2]) {
        for view in buffers {
            device.transition(ResourceRef::Texture(view.texture), ResourceState::RenderTarget);
            device.clear_render_target(view, NO_SELECTION);
        }
    }

    fn pipelines(&mut self, device: &mut dyn GpuDevice, format: wgpu::TextureFormat) -> Option<(PipelineHandle, PipelineHandle)> {
        self.init_pipeline
            .ensure(device, PipelineDesc::fullscreen("jump flood init", "jump_flood_init", &[format]));
        self.update_pipeline
            .ensure(device, PipelineDesc::fullscreen("jump flood update", "jump_flood_update", &[format]));
        let init = self.init_pipeline.ready(device);
        let update = self.update_pipeline.ready(device);
        init.zip(update)
    }
}

impl Task for ProcessSelectionTask {
    fn name(&self) -> &str {
        NAME
    }

    fn sync(&mut self, params: &TaskParams, _frame: &mut FrameContext, dirty: &mut DirtyBits) {
        let TaskParams::ProcessSelection(params) = params else {
            report_wrong_params(NAME, params, dirty);
            return;
        };
        if !params.maximum_distance.is_finite() {
            report_unexpected(NAME, format!("outline distance {} ignored", params.maximum_distance));
            *dirty = DirtyBits::empty();
            return;
        }
        if params.maximum_distance != self.params.maximum_distance {
            self.iterations = jump_flood_iterations(params.maximum_distance);
            debug!(
                "{NAME}: outline distance {} -> {} update passes",
                params.maximum_distance, self.iterations
            );
        }
        self.params = *params;
        *dirty = DirtyBits::empty();
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        self.last_passes = 0;
        let Some(buffer_0) = require(NAME, ctx.frame.view(FrameKey::ClosestSelected0)) else {
            return;
        };
        let Some(buffer_1) = require(NAME, ctx.frame.view(FrameKey::ClosestSelected1)) else {
            return;
        };
        let buffers = [buffer_0, buffer_1];

        if !ctx.scene.has_selection() {
            trace!("{NAME}: nothing selected");
            Self::clear(&mut *ctx.device, buffers);
            return;
        }
        let Some(selection_depth) = require(NAME, ctx.frame.view(FrameKey::SelectionDepth)) else {
            return;
        };
        let Some(desc) = ctx.device.texture_desc(buffer_0.texture) else {
            report_unexpected(NAME, "closest-selected texture is gone");
            return;
        };

        let Some((init, update)) = self.pipelines(&mut *ctx.device, desc.format) else {
            debug!("{NAME}: pipelines not ready");
            Self::clear(&mut *ctx.device, buffers);
            return;
        };
        let Some(steps) = self.steps_buffer(&mut *ctx.device) else {
            return;
        };

        // =====================================================================
        // 1. Bindings: one for the seed, one per ping-pong source
        // =====================================================================
        let seed = BindingDesc {
            label: "jump flood seed".to_string(),
            pipeline: init,
            group: 0,
            entries: smallvec![
                BindingEntry::Texture(selection_depth.as_shader_resource()),
                BindingEntry::Sampler(SamplerKind::Nearest),
            ],
        };
        let source = |view: TextureView| BindingDesc {
            label: "jump flood source".to_string(),
            pipeline: update,
            group: 0,
            entries: smallvec![
                BindingEntry::Texture(view.as_shader_resource()),
                BindingEntry::Sampler(SamplerKind::Nearest),
                BindingEntry::Buffer {
                    buffer: steps,
                    offset: 0,
                    size: Some(size_of::<JumpFloodUniforms>() as u64),
                },
            ],
        };
        let device = &mut *ctx.device;
        let (Some(seed), Some(from_0), Some(from_1)) = (
            self.bindings.get(device, "seed", &seed),
            self.bindings.get(device, "from 0", &source(buffer_0)),
            self.bindings.get(device, "from 1", &source(buffer_1)),
        ) else {
            return;
        };
        let sources = [from_0, from_1];
        let viewport = Viewport::full(desc.width, desc.height);

        // =====================================================================
        // 2. Seed
        // =====================================================================
        device.transition(ResourceRef::Texture(selection_depth.texture), ResourceState::ShaderResource);
        device.transition(ResourceRef::Texture(buffer_0.texture), ResourceState::RenderTarget);
        device.set_render_targets(&[buffer_0], None);
        device.set_viewport(viewport);
        device.set_pipeline(init);
        device.bind(0, seed, &[]);
        device.draw(3, 1);

        // =====================================================================
        // 3. Flood
        // =====================================================================
        device.set_pipeline(update);
        for step in 0..self.iterations {
            let src = (step % 2) as usize;
            let dst = ((step + 1) % 2) as usize;
            device.transition(ResourceRef::Texture(buffers[src].texture), ResourceState::ShaderResource);
            device.transition(ResourceRef::Texture(buffers[dst].texture), ResourceState::RenderTarget);
            device.set_render_targets(&[buffers[dst]], None);
            device.set_viewport(viewport);
            let offset = step * UNIFORM_OFFSET_ALIGNMENT as u32;
            device.bind(0, sources[src], &[offset]);
            device.draw(3, 1);
        }
        self.last_passes = self.iterations;

        let result = buffers[(self.iterations % 2) as usize];
        device.transition(ResourceRef::Texture(result.texture), ResourceState::ShaderResource);
        ctx.frame.insert(FrameKey::SelectionOutline, FrameValue::View(result));
    }

    fn release(&mut self, device: &mut dyn GpuDevice) {
        self.bindings.clear(device);
        if let Some(buffer) = self.steps_buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.steps_written = 0;
    }
}
