//! Order-Independent Transparency
//!
//! Two tasks bracket the OIT geometry:
//!
//! ```text
//!  BeginOit   allocate the per-pixel layer buffer (w × h × layers × 8 bytes),
//!             clear the tail target, begin the OIT pass
//!  <render_oit writes up to `layers` fragments per pixel, the rest blend
//!   into the tail; the stencil buffer counts stored fragments>
//!  EndOit     sort and resolve the layers, attenuate the opaque G-buffer
//! ```
//!
//! The layer buffer carries a version counter that bumps on reallocation so
//! consumers can rebuild bindings that reference it. `EndOit` does nothing
//! when no OIT geometry was drawn.

use log::{debug, error, info, trace};
use smallvec::{SmallVec, smallvec};

use super::require;
use crate::device::{
    BindingDesc, BindingEntry, BufferDesc, BufferHandle, BufferKind, DepthState, GpuDevice,
    PipelineDesc, ResourceRef, ResourceState, SamplerKind, TextureView, Viewport,
};
use crate::graph::{
    DirtyBits, ExecuteContext, FrameContext, FrameKey, FrameValue, PrepareContext, Task,
    TaskParams, report_unexpected, report_wrong_params,
};
use crate::pass_state::{
    ColorAttachment, DepthAttachment, FixedFunctionState, PassStateId, PassStateRegistry,
    RenderPassState,
};
use crate::pipelines::{BindingCache, LazyPipeline};
use crate::targets::{RenderTargetSet, TargetSlot};

/// Bytes per stored fragment: packed color and depth.
pub const OIT_FRAGMENT_SIZE: u64 = 8;
const TAIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

// ─── Begin ────────────────────────────────────────────────────────────────────

const BEGIN_NAME: &str = "BeginOit";

pub struct BeginOitTask {
    layer_count: u8,
    tail_slot: Option<TargetSlot>,
    pass: Option<PassStateId>,

    layers: Option<BufferHandle>,
    layers_shape: (u32, u32, u8),
    version: u64,

    // === Per-frame state ===
    tail: Option<TextureView>,
}

impl BeginOitTask {
    #[must_use]
    pub fn new(layer_count: u8) -> Self {
        Self {
            layer_count: layer_count.max(1),
            tail_slot: None,
            pass: None,
            layers: None,
            layers_shape: (0, 0, 0),
            version: 0,
            tail: None,
        }
    }

    #[must_use]
    pub fn layer_count(&self) -> u8 {
        self.layer_count
    }

    /// Bumped every time the layer buffer is reallocated.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn layer_buffer_size(width: u32, height: u32, layers: u8) -> u64 {
        u64::from(width) * u64::from(height) * u64::from(layers) * OIT_FRAGMENT_SIZE
    }

    fn ensure_layers(&mut self, device: &mut dyn GpuDevice, width: u32, height: u32) -> Option<BufferHandle> {
        let shape = (width, height, self.layer_count);
        if let Some(buffer) = self.layers
            && self.layers_shape == shape
            && device.buffer_size(buffer).is_some()
        {
            return Some(buffer);
        }

        if let Some(old) = self.layers.take() {
            device.destroy_buffer(old);
        }
        let size = Self::layer_buffer_size(width, height, self.layer_count);
        match device.create_buffer(&BufferDesc::new("oit layers", size, BufferKind::Storage)) {
            Ok(buffer) => {
                self.layers = Some(buffer);
                self.layers_shape = shape;
                self.version += 1;
                info!(
                    "{BEGIN_NAME}: layer buffer {width}x{height}x{} ({size} bytes, version {})",
                    self.layer_count, self.version
                );
                Some(buffer)
            }
            Err(e) => {
                error!("{BEGIN_NAME}: {e}");
                self.layers_shape = (0, 0, 0);
                None
            }
        }
    }
}

impl Task for BeginOitTask {
    fn name(&self) -> &str {
        BEGIN_NAME
    }

    fn register(&mut self, targets: &mut RenderTargetSet, passes: &mut PassStateRegistry) {
        self.tail_slot = Some(targets.register("oit tail"));
        self.pass = Some(passes.insert(RenderPassState::new("oit")));
    }

    fn sync(&mut self, params: &TaskParams, _frame: &mut FrameContext, dirty: &mut DirtyBits) {
        let TaskParams::Oit(params) = params else {
            report_wrong_params(BEGIN_NAME, params, dirty);
            return;
        };
        let layer_count = params.layer_count.max(1);
        if layer_count != self.layer_count {
            debug!("{BEGIN_NAME}: layer count {} -> {layer_count}", self.layer_count);
            self.layer_count = layer_count;
        }
        *dirty = DirtyBits::empty();
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) {
        self.tail = None;
        let Some(depth) = require(BEGIN_NAME, ctx.frame.view(FrameKey::DepthCurrent)) else {
            return;
        };
        let (Some(tail_slot), Some(pass_id)) = (self.tail_slot, self.pass) else {
            report_unexpected(BEGIN_NAME, "task was never registered with a graph");
            return;
        };
        let Some(depth_desc) = ctx.device.texture_desc(depth.texture) else {
            report_unexpected(BEGIN_NAME, "depth texture is gone");
            return;
        };

        let Some(layers) = self.ensure_layers(&mut *ctx.device, depth_desc.width, depth_desc.height) else {
            return;
        };
        let Some(tail) = ctx.targets.resolve_sized(
            &mut *ctx.device,
            tail_slot,
            Some(TAIL_FORMAT),
            depth_desc.width,
            depth_desc.height,
            1,
        ) else {
            return;
        };

        let Some(pass) = ctx.passes.get_mut(pass_id) else {
            report_unexpected(BEGIN_NAME, "OIT pass state missing");
            return;
        };
        pass.configure(
            &[ColorAttachment::clear(tail, TAIL_FORMAT, wgpu::Color::TRANSPARENT)],
            Some(DepthAttachment::load(depth, depth_desc.format)),
        );
        pass.set_fixed_function(FixedFunctionState {
            polygon_mode: ctx.params.render_mode.polygon_mode(),
            cull_mode: None,
            depth: DepthState::READ_ONLY,
            stencil_reference: Some(u32::from(self.layer_count)),
            blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
        });
        if let Ok(camera) = ctx.frame.camera() {
            pass.set_camera(Some(*camera));
        }
        pass.set_viewport(None);

        self.tail = Some(tail);
        ctx.frame.insert(FrameKey::OitLayers, FrameValue::Buffer(layers));
        ctx.frame.insert(FrameKey::OitTail, FrameValue::View(tail));
        ctx.frame.insert(FrameKey::OitVersion, FrameValue::Uint(self.version));
        ctx.frame.insert(FrameKey::OitPass, FrameValue::Pass(pass_id));
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        let (Some(tail), Some(layers), Some(pass_id)) = (self.tail, self.layers, self.pass) else {
            return;
        };
        ctx.device.transition(ResourceRef::Buffer(layers), ResourceState::UnorderedAccess);
        ctx.device.transition(ResourceRef::Texture(tail.texture), ResourceState::RenderTarget);

        let Some(pass) = ctx.passes.get_mut(pass_id) else {
            return;
        };
        if let Err(e) = pass.begin(&mut *ctx.device, ctx.params.frame_number) {
            report_unexpected(BEGIN_NAME, e);
        }
    }

    fn release(&mut self, device: &mut dyn GpuDevice) {
        if let Some(buffer) = self.layers.take() {
            device.destroy_buffer(buffer);
        }
        self.layers_shape = (0, 0, 0);
    }
}

// ─── End ──────────────────────────────────────────────────────────────────────

const END_NAME: &str = "EndOit";

pub struct EndOitTask {
    pipeline: LazyPipeline,
    bindings: BindingCache,
    bound_version: Option<u64>,
    resolved: bool,
}

impl Default for EndOitTask {
    fn default() -> Self {
        Self::new()
    }
}

impl EndOitTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pipeline: LazyPipeline::new(),
            bindings: BindingCache::new(),
            bound_version: None,
            resolved: false,
        }
    }

    /// Whether the layers were resolved last frame.
    #[must_use]
    pub fn resolved(&self) -> bool {
        self.resolved
    }
}

impl Task for EndOitTask {
    fn name(&self) -> &str {
        END_NAME
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        self.resolved = false;
        let Some(pass_id) = require(END_NAME, ctx.frame.pass(FrameKey::OitPass)) else {
            return;
        };
        let Some(pass) = ctx.passes.get(pass_id) else {
            report_unexpected(END_NAME, "OIT pass state missing");
            return;
        };
        if pass.draw_item_count() == 0 {
            debug!("{END_NAME}: no OIT geometry this frame");
            return;
        }

        let Some(layers) = require(END_NAME, ctx.frame.buffer(FrameKey::OitLayers)) else {
            return;
        };
        let Some(tail) = require(END_NAME, ctx.frame.view(FrameKey::OitTail)) else {
            return;
        };
        let Some(version) = require(END_NAME, ctx.frame.uint(FrameKey::OitVersion)) else {
            return;
        };

        // =====================================================================
        // 1. Targets: every present lighting channel is attenuated
        // =====================================================================
        let mut targets: SmallVec<[TextureView; 4]> = SmallVec::new();
        let mut formats: SmallVec<[wgpu::TextureFormat; 4]> = SmallVec::new();
        for key in [FrameKey::SceneColor, FrameKey::BaseColor, FrameKey::Material, FrameKey::Ibl] {
            let Ok(view) = ctx.frame.view(key) else {
                trace!("{END_NAME}: {key:?} inactive");
                continue;
            };
            let Some(desc) = ctx.device.texture_desc(view.texture) else {
                continue;
            };
            targets.push(view);
            formats.push(desc.format);
        }
        let Some(first) = targets.first().and_then(|v| ctx.device.texture_desc(v.texture)) else {
            report_unexpected(END_NAME, "no color channel to resolve into");
            return;
        };

        // =====================================================================
        // 2. Pipeline and bindings
        // =====================================================================
        let desc = PipelineDesc::fullscreen("oit attenuation", "oit_attenuation", &formats)
            .with_blend(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING);
        self.pipeline.ensure(&mut *ctx.device, desc);
        let Some(pipeline) = self.pipeline.ready(&mut *ctx.device) else {
            debug!("{END_NAME}: pipeline not ready");
            return;
        };

        if self.bound_version != Some(version) {
            self.bindings.invalidate(&mut *ctx.device, "layers");
            self.bound_version = Some(version);
        }
        let binding = BindingDesc {
            label: "oit resolve inputs".to_string(),
            pipeline,
            group: 0,
            entries: smallvec![
                BindingEntry::Buffer {
                    buffer: layers,
                    offset: 0,
                    size: None,
                },
                BindingEntry::Texture(tail.as_shader_resource()),
                BindingEntry::Sampler(SamplerKind::Nearest),
            ],
        };
        let Some(binding) = self.bindings.get(&mut *ctx.device, "layers", &binding) else {
            return;
        };

        // =====================================================================
        // 3. Resolve
        // =====================================================================
        ctx.device.transition(ResourceRef::Buffer(layers), ResourceState::ShaderResource);
        ctx.device.transition(ResourceRef::Texture(tail.texture), ResourceState::ShaderResource);
        ctx.device.set_render_targets(&targets, None);
        ctx.device.set_viewport(Viewport::full(first.width, first.height));
        ctx.device.set_pipeline(pipeline);
        ctx.device.bind(0, binding, &[]);
        ctx.device.draw(3, 1);
        self.resolved = true;
    }

    fn release(&mut self, device: &mut dyn GpuDevice) {
        self.bindings.clear(device);
        self.bound_version = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_buffer_size_is_eight_bytes_per_fragment() {
        assert_eq!(BeginOitTask::layer_buffer_size(1920, 1080, 8), 1920 * 1080 * 8 * 8);
        assert_eq!(BeginOitTask::layer_buffer_size(1, 1, 1), 8);
    }

    #[test]
    fn layer_count_is_at_least_one() {
        assert_eq!(BeginOitTask::new(0).layer_count(), 1);
    }
}
