//! Post-Process Task
//!
//! Last stage of the frame: screen-space effects, the compositor and
//! temporal anti-aliasing.
//!
//! ```text
//!  SSAO       depth + normal                    ──► ssao (R8)
//!  SSR        scene color + depth + normal      ──► reflections (RGBA16F)
//!  composite  scene color + G-buffer + effects
//!             + selection outline               ──► output, or jittered color when TAA is on
//!  TAA        jittered color + history[prev]
//!             + motion                          ──► history[cur] ──copy──► output
//! ```
//!
//! # Effects gating
//!
//! Effects only run in solid mode without a debug view. The one exception is
//! SSAO, which stays on when the debug view shows it.
//!
//! # Temporal accumulation
//!
//! The jitter for the next draw is published in **prepare** (the begin-frame
//! task writes it into the frame uniforms at execute time). History
//! rejection is skipped only when nothing that could change the image moved
//! since the last frame: scene versions, camera, compositor constants, and no
//! task suspended supersampling.
//!
//! Missing optional inputs are replaced by a 1×1 fallback texture so the
//! bindings keep their shape.

use glam::Vec2;
use log::{debug, error, trace};
use smallvec::{SmallVec, smallvec};

use super::require;
use crate::device::{
    BindingDesc, BindingEntry, BindingHandle, BufferDesc, BufferHandle, BufferKind, GpuDevice,
    PipelineDesc, PipelineHandle, ResourceRef, ResourceState, SamplerKind, TextureDesc,
    TextureHandle, TextureView, Viewport,
};
use crate::graph::{
    DebugView, DirtyBits, ExecuteContext, FrameContext, FrameFlags, FrameKey, FrameValue,
    PostProcessParams, PrepareContext, RenderMode, Task, TaskParams, report_unexpected,
    report_wrong_params,
};
use crate::pipelines::{BindingCache, LazyPipeline};
use crate::scene::SceneVersions;
use crate::targets::{PingPong, TargetSlot};
use crate::uniforms::{AccumulationUniforms, PostProcessUniforms, UNIFORM_OFFSET_ALIGNMENT};

const NAME: &str = "PostProcess";

const SSAO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;
const SSR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const FALLBACK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const ACCUMULATION_OFFSET: u64 = UNIFORM_OFFSET_ALIGNMENT;
const CONSTANTS_SIZE: u64 = 2 * UNIFORM_OFFSET_ALIGNMENT;
/// Length of the jitter sequence before it repeats.
const JITTER_PHASES: u64 = 8;

const EFFECT_SSR: u32 = 1 << 0;
const EFFECT_SSAO: u32 = 1 << 1;
const EFFECT_TAA: u32 = 1 << 2;
const EFFECT_OUTLINE: u32 = 1 << 3;

/// Radical inverse of `index` in `base`, the Halton low-discrepancy sequence.
#[must_use]
pub fn halton(mut index: u32, base: u32) -> f32 {
    let base = base.max(2);
    let mut fraction = 1.0;
    let mut result = 0.0;
    while index > 0 {
        fraction /= base as f32;
        result += fraction * (index % base) as f32;
        index /= base;
    }
    result
}

/// Temporal accumulation decisions of one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AccumulationState {
    pub jitter: Vec2,
    /// History is reused without neighbourhood rejection.
    pub skip_rejection: bool,
    /// History holds a frame of the same size and format.
    pub history_valid: bool,
}

/// Target slots, registered on first prepare.
#[derive(Clone, Copy)]
struct EffectSlots {
    ssao: TargetSlot,
    ssr: TargetSlot,
    history: PingPong<TargetSlot>,
}

/// Which effects run this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ActiveEffects {
    ssao: bool,
    ssr: bool,
    taa: bool,
}

/// Everything prepare resolved for execute.
#[derive(Clone, Copy)]
struct FramePlan {
    output: TextureView,
    output_format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    ssao: Option<TextureView>,
    ssr: Option<TextureView>,
    history: Option<(TextureView, TextureView)>,
}

pub struct PostProcessTask {
    params: PostProcessParams,
    slots: Option<EffectSlots>,

    ssao_pipeline: LazyPipeline,
    ssr_pipeline: LazyPipeline,
    composite_output: LazyPipeline,
    composite_jittered: LazyPipeline,
    accumulate_pipeline: LazyPipeline,
    bindings: BindingCache,

    constants_buffer: Option<BufferHandle>,
    fallback: Option<TextureHandle>,

    // === Temporal state ===
    last_uniforms: Option<PostProcessUniforms>,
    last_versions: Option<SceneVersions>,
    history_written: Option<(u64, (u32, u32, wgpu::TextureFormat))>,
    history_shape: Option<(u32, u32, wgpu::TextureFormat)>,

    // === Per-frame state ===
    active: ActiveEffects,
    uniforms: PostProcessUniforms,
    accumulation: AccumulationState,
    plan: Option<FramePlan>,
}

impl Default for PostProcessTask {
    fn default() -> Self {
        Self::new()
    }
}

impl PostProcessTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            params: PostProcessParams::default(),
            slots: None,
            ssao_pipeline: LazyPipeline::new(),
            ssr_pipeline: LazyPipeline::new(),
            composite_output: LazyPipeline::new(),
            composite_jittered: LazyPipeline::new(),
            accumulate_pipeline: LazyPipeline::new(),
            bindings: BindingCache::new(),
            constants_buffer: None,
            fallback: None,
            last_uniforms: None,
            last_versions: None,
            history_written: None,
            history_shape: None,
            active: ActiveEffects::default(),
            uniforms: bytemuck::Zeroable::zeroed(),
            accumulation: AccumulationState::default(),
            plan: None,
        }
    }

    #[must_use]
    pub fn params(&self) -> &PostProcessParams {
        &self.params
    }

    /// Accumulation decisions of the last prepared frame.
    #[must_use]
    pub fn last_accumulation(&self) -> AccumulationState {
        self.accumulation
    }

    #[must_use]
    pub fn ssao_active(&self) -> bool {
        self.active.ssao
    }

    #[must_use]
    pub fn ssr_active(&self) -> bool {
        self.active.ssr
    }

    #[must_use]
    pub fn taa_active(&self) -> bool {
        self.active.taa
    }

    /// Sub-pixel jitter for `frame_number`, in pixels within `[-0.5, 0.5)`.
    #[must_use]
    pub fn jitter(frame_number: u64) -> Vec2 {
        let index = (frame_number % JITTER_PHASES) as u32 + 1;
        Vec2::new(halton(index, 2) - 0.5, halton(index, 3) - 0.5)
    }

    fn effects(&self, render_mode: RenderMode, debug_view: DebugView) -> ActiveEffects {
        let effects_allowed = render_mode == RenderMode::Solid && debug_view == DebugView::None;
        let ssao_debug = render_mode == RenderMode::Solid && debug_view == DebugView::Ssao;
        ActiveEffects {
            ssao: self.params.ssao && (effects_allowed || ssao_debug),
            ssr: self.params.ssr && effects_allowed,
            taa: self.params.taa && effects_allowed,
        }
    }

    fn build_uniforms(&self, active: ActiveEffects, outline: bool, debug_view: DebugView) -> PostProcessUniforms {
        let mut effects = 0;
        if active.ssr {
            effects |= EFFECT_SSR;
        }
        if active.ssao {
            effects |= EFFECT_SSAO;
        }
        if active.taa {
            effects |= EFFECT_TAA;
        }
        if outline {
            effects |= EFFECT_OUTLINE;
        }
        PostProcessUniforms {
            outline_color: self.params.outline_color,
            exposure: self.params.exposure,
            ssao_radius: self.params.ssao_radius,
            ssr_max_steps: self.params.ssr_max_steps,
            effects,
            debug_channel: debug_view.channel(),
            _pad: [0; 3],
        }
    }

    fn ensure_buffer(&mut self, device: &mut dyn GpuDevice) -> Option<BufferHandle> {
        if let Some(buffer) = self.constants_buffer
            && device.buffer_size(buffer).is_some()
        {
            return Some(buffer);
        }
        match device.create_buffer(&BufferDesc::new("post process constants", CONSTANTS_SIZE, BufferKind::Uniform)) {
            Ok(buffer) => {
                self.constants_buffer = Some(buffer);
                Some(buffer)
            }
            Err(e) => {
                error!("{NAME}: {e}");
                None
            }
        }
    }

    fn ensure_fallback(&mut self, device: &mut dyn GpuDevice) -> Option<TextureView> {
        let texture = match self.fallback {
            Some(texture) if device.texture_desc(texture).is_some() => texture,
            _ => match device.create_texture(&TextureDesc::render_target("post process fallback", 1, 1, FALLBACK_FORMAT)) {
                Ok(texture) => {
                    device.clear_render_target(TextureView::default_for(texture, FALLBACK_FORMAT), wgpu::Color::TRANSPARENT);
                    self.fallback = Some(texture);
                    texture
                }
                Err(e) => {
                    error!("{NAME}: {e}");
                    return None;
                }
            },
        };
        Some(TextureView::default_for(texture, FALLBACK_FORMAT).as_shader_resource())
    }

    /// Draws a full-screen triangle into `target`.
    fn fullscreen_pass(
        device: &mut dyn GpuDevice,
        target: TextureView,
        viewport: Viewport,
        pipeline: PipelineHandle,
        binding: BindingHandle,
        dynamic_offsets: &[u32],
    ) {
        device.transition(ResourceRef::Texture(target.texture), ResourceState::RenderTarget);
        device.set_render_targets(&[target], None);
        device.set_viewport(viewport);
        device.set_pipeline(pipeline);
        device.bind(0, binding, dynamic_offsets);
        device.draw(3, 1);
        device.transition(ResourceRef::Texture(target.texture), ResourceState::ShaderResource);
    }
}

impl Task for PostProcessTask {
    fn name(&self) -> &str {
        NAME
    }

    fn sync(&mut self, params: &TaskParams, frame: &mut FrameContext, dirty: &mut DirtyBits) {
        let TaskParams::PostProcess(params) = params else {
            report_wrong_params(NAME, params, dirty);
            return;
        };
        if params.taa != self.params.taa {
            frame.set_flags(FrameFlags::SUSPEND_SUPERSAMPLING);
        }
        self.params = *params;
        *dirty = DirtyBits::empty();
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) {
        self.plan = None;
        self.active = ActiveEffects::default();

        // =====================================================================
        // 1. Inputs
        // =====================================================================
        if !ctx.frame.contains(FrameKey::SceneColor) {
            report_unexpected(NAME, "scene color is not available");
            return;
        }
        let Some(output) = ctx.params.output else {
            report_unexpected(NAME, "no output target");
            return;
        };
        let Some(output_desc) = ctx.device.texture_desc(output.texture) else {
            report_unexpected(NAME, "output texture is gone");
            return;
        };
        let slots = *self.slots.get_or_insert_with(|| EffectSlots {
            ssao: ctx.targets.register("ssao"),
            ssr: ctx.targets.register("reflections"),
            history: PingPong::new(ctx.targets.register("taa history 0"), ctx.targets.register("taa history 1")),
        });

        let active = self.effects(ctx.params.render_mode, ctx.params.debug_view);
        self.active = active;

        // =====================================================================
        // 2. Effect targets
        // =====================================================================
        let device = &mut *ctx.device;
        let mut effect_target = |slot: TargetSlot, format: wgpu::TextureFormat, on: bool| {
            if on {
                ctx.targets.resolve(device, slot, Some(format), Some(output))
            } else {
                ctx.targets.release(device, slot);
                None
            }
        };
        let ssao = effect_target(slots.ssao, SSAO_FORMAT, active.ssao);
        let ssr = effect_target(slots.ssr, SSR_FORMAT, active.ssr);

        let shape = (output_desc.width, output_desc.height, output_desc.format);
        let history = if active.taa {
            let mut history_slots = slots.history;
            if ctx.params.frame_number > 1 {
                history_slots.swap();
            }
            if let Some(s) = self.slots.as_mut() {
                s.history = history_slots;
            }
            let current = ctx.targets.resolve(&mut *ctx.device, history_slots.current(), Some(output_desc.format), Some(output));
            let previous = ctx.targets.resolve(&mut *ctx.device, history_slots.previous(), Some(output_desc.format), Some(output));
            current.zip(previous)
        } else {
            for slot in slots.history.slots() {
                ctx.targets.release(&mut *ctx.device, slot);
            }
            None
        };

        // =====================================================================
        // 3. Jitter and accumulation decisions
        // =====================================================================
        let taa = active.taa && history.is_some() && ctx.frame.contains(FrameKey::JitteredColor);
        let jitter = if taa {
            Self::jitter(ctx.params.frame_number)
        } else {
            Vec2::ZERO
        };
        ctx.frame.insert(FrameKey::Jitter, FrameValue::Vec2(jitter));
        ctx.frame.insert(FrameKey::TaaEnabled, FrameValue::Bool(taa));

        let outline = ctx.scene.has_selection();
        let uniforms = self.build_uniforms(active, outline, ctx.params.debug_view);
        let constants_changed = self.last_uniforms != Some(uniforms);
        let versions = ctx.scene.versions();
        let scene_static = self.last_versions.is_some_and(|last| {
            last.mesh_geometry == versions.mesh_geometry
                && last.material == versions.material
                && last.transform == versions.transform
                && last.visibility == versions.visibility
                && last.light == versions.light
        });
        let flags = ctx.frame.flags();
        let skip_rejection = scene_static
            && !flags.contains(FrameFlags::CAMERA_TRANSFORM_CHANGED)
            && !flags.contains(FrameFlags::SUSPEND_SUPERSAMPLING)
            && !constants_changed;
        let history_valid = taa
            && self.history_shape == Some(shape)
            && self
                .history_written
                .is_some_and(|(frame, written)| frame + 1 == ctx.params.frame_number && written == shape);

        if skip_rejection {
            trace!("{NAME}: static frame, history rejection skipped");
        }
        self.accumulation = AccumulationState {
            jitter,
            skip_rejection,
            history_valid,
        };
        self.uniforms = uniforms;
        self.last_uniforms = Some(uniforms);
        self.last_versions = Some(versions);
        self.history_shape = taa.then_some(shape);
        self.active.taa = taa;

        self.plan = Some(FramePlan {
            output,
            output_format: output_desc.format,
            width: output_desc.width,
            height: output_desc.height,
            ssao,
            ssr,
            history,
        });
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        let Some(plan) = self.plan else {
            return;
        };
        let Some(scene_color) = require(NAME, ctx.frame.view(FrameKey::SceneColor)) else {
            return;
        };
        let Some(constants) = self.ensure_buffer(&mut *ctx.device) else {
            return;
        };
        let Some(fallback) = self.ensure_fallback(&mut *ctx.device) else {
            return;
        };

        let accumulation = AccumulationUniforms {
            jitter: self.accumulation.jitter.to_array(),
            skip_rejection: u32::from(self.accumulation.skip_rejection),
            history_valid: u32::from(self.accumulation.history_valid),
        };
        ctx.device.update_buffer(constants, 0, bytemuck::bytes_of(&self.uniforms));
        ctx.device.update_buffer(constants, ACCUMULATION_OFFSET, bytemuck::bytes_of(&accumulation));

        let input = |key: FrameKey| -> TextureView {
            ctx.frame.view(key).map_or(fallback, TextureView::as_shader_resource)
        };
        let depth = input(FrameKey::DepthCurrent);
        let normal = input(FrameKey::Normal);
        let material = input(FrameKey::Material);
        let base_color = input(FrameKey::BaseColor);
        let ibl = input(FrameKey::Ibl);
        let motion = input(FrameKey::MotionCurrent);
        let outline = input(FrameKey::SelectionOutline);
        let jittered = ctx.frame.view(FrameKey::JitteredColor).ok();

        let uniforms_entry = BindingEntry::Buffer {
            buffer: constants,
            offset: 0,
            size: Some(size_of::<PostProcessUniforms>() as u64),
        };
        let viewport = Viewport::full(plan.width, plan.height);
        let device = &mut *ctx.device;

        // =====================================================================
        // 1. SSAO
        // =====================================================================
        let mut ssao_result = fallback;
        if let Some(target) = plan.ssao {
            self.ssao_pipeline
                .ensure(device, PipelineDesc::fullscreen("ssao", "ssao", &[SSAO_FORMAT]));
            if let Some(pipeline) = self.ssao_pipeline.ready(device) {
                let desc = BindingDesc {
                    label: "ssao inputs".to_string(),
                    pipeline,
                    group: 0,
                    entries: smallvec![
                        BindingEntry::Texture(depth),
                        BindingEntry::Texture(normal),
                        BindingEntry::Sampler(SamplerKind::Nearest),
                        uniforms_entry,
                    ],
                };
                if let Some(binding) = self.bindings.get(device, "ssao", &desc) {
                    Self::fullscreen_pass(device, target, viewport, pipeline, binding, &[]);
                    ssao_result = target.as_shader_resource();
                }
            } else {
                debug!("{NAME}: ssao pipeline not ready");
            }
        }

        // =====================================================================
        // 2. SSR
        // =====================================================================
        let mut ssr_result = fallback;
        if let Some(target) = plan.ssr {
            self.ssr_pipeline
                .ensure(device, PipelineDesc::fullscreen("ssr", "ssr", &[SSR_FORMAT]));
            if let Some(pipeline) = self.ssr_pipeline.ready(device) {
                let desc = BindingDesc {
                    label: "ssr inputs".to_string(),
                    pipeline,
                    group: 0,
                    entries: smallvec![
                        BindingEntry::Texture(scene_color.as_shader_resource()),
                        BindingEntry::Texture(depth),
                        BindingEntry::Texture(normal),
                        BindingEntry::Texture(material),
                        BindingEntry::Sampler(SamplerKind::Linear),
                        uniforms_entry,
                    ],
                };
                if let Some(binding) = self.bindings.get(device, "ssr", &desc) {
                    Self::fullscreen_pass(device, target, viewport, pipeline, binding, &[]);
                    ssr_result = target.as_shader_resource();
                }
            } else {
                debug!("{NAME}: ssr pipeline not ready");
            }
        }

        // =====================================================================
        // 3. Composite
        // =====================================================================
        let taa_target = match (self.active.taa, jittered, plan.history) {
            (true, Some(jittered), Some(history)) => Some((jittered, history)),
            _ => None,
        };
        let (composite_target, composite_format, pipeline_slot, shader) = match taa_target {
            Some((jittered, _)) => {
                let Some(desc) = device.texture_desc(jittered.texture) else {
                    report_unexpected(NAME, "jittered color texture is gone");
                    return;
                };
                (jittered, desc.format, &mut self.composite_jittered, "composite_jittered")
            }
            None => (plan.output, plan.output_format, &mut self.composite_output, "composite"),
        };
        pipeline_slot.ensure(device, PipelineDesc::fullscreen("composite", shader, &[composite_format]));
        let Some(composite) = pipeline_slot.ready(device) else {
            debug!("{NAME}: composite pipeline not ready");
            return;
        };

        let mut entries: SmallVec<[BindingEntry; 8]> = smallvec![
            BindingEntry::Texture(scene_color.as_shader_resource()),
            BindingEntry::Texture(ssao_result),
            BindingEntry::Texture(ssr_result),
            BindingEntry::Texture(outline),
            BindingEntry::Texture(ibl),
            BindingEntry::Texture(base_color),
            BindingEntry::Sampler(SamplerKind::Linear),
        ];
        entries.push(uniforms_entry);
        let desc = BindingDesc {
            label: "composite inputs".to_string(),
            pipeline: composite,
            group: 0,
            entries,
        };
        let Some(binding) = self.bindings.get(device, shader, &desc) else {
            return;
        };
        device.transition(ResourceRef::Texture(scene_color.texture), ResourceState::ShaderResource);
        Self::fullscreen_pass(device, composite_target, viewport, composite, binding, &[]);

        // =====================================================================
        // 4. Temporal accumulation
        // =====================================================================
        let Some((jittered, (current, previous))) = taa_target else {
            return;
        };
        self.accumulate_pipeline.ensure(
            device,
            PipelineDesc::fullscreen("taa accumulate", "taa_accumulate", &[plan.output_format]),
        );
        let Some(accumulate) = self.accumulate_pipeline.ready(device) else {
            debug!("{NAME}: accumulation pipeline not ready");
            return;
        };
        let desc = BindingDesc {
            label: "taa inputs".to_string(),
            pipeline: accumulate,
            group: 0,
            entries: smallvec![
                BindingEntry::Texture(jittered.as_shader_resource()),
                BindingEntry::Texture(previous.as_shader_resource()),
                BindingEntry::Texture(motion),
                BindingEntry::Texture(depth),
                BindingEntry::Sampler(SamplerKind::Linear),
                BindingEntry::Buffer {
                    buffer: constants,
                    offset: ACCUMULATION_OFFSET,
                    size: Some(size_of::<AccumulationUniforms>() as u64),
                },
            ],
        };
        let Some(binding) = self.bindings.get(device, "taa", &desc) else {
            return;
        };
        Self::fullscreen_pass(device, current, viewport, accumulate, binding, &[]);

        device.transition(ResourceRef::Texture(current.texture), ResourceState::CopySource);
        device.transition(ResourceRef::Texture(plan.output.texture), ResourceState::CopyDest);
        device.copy_texture(current.texture, plan.output.texture);
        device.transition(ResourceRef::Texture(plan.output.texture), ResourceState::RenderTarget);
        self.history_written = Some((ctx.params.frame_number, (plan.width, plan.height, plan.output_format)));
    }

    fn release(&mut self, device: &mut dyn GpuDevice) {
        self.bindings.clear(device);
        if let Some(buffer) = self.constants_buffer.take() {
            device.destroy_buffer(buffer);
        }
        if let Some(texture) = self.fallback.take() {
            device.destroy_texture(texture);
        }
        self.history_written = None;
        self.history_shape = None;
    }
}
