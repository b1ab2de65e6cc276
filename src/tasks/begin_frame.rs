//! Begin Frame Task
//!
//! Pipeline head. Owns the G-buffer slots, the depth / motion history pairs,
//! the jump-flood buffers and the three main pass states:
//!
//! ```text
//!  OpaqueSelectedPass       clears every channel and depth
//!  MainPass                 same targets, loads
//!  TransparentSelectedPass  same colors, selection depth
//! ```
//!
//! # Phase split
//!
//! Prepare advances the frame counter, swaps history, resolves targets,
//! computes camera attributes and the light / shadow-view constants and
//! publishes everything. The frame uniforms are written in **Execute**,
//! because the jitter and TAA flag are published by the post-process task's
//! Prepare, which runs after this task's Prepare.

use glam::{Mat4, Vec2};
use log::debug;

use crate::device::{
    BufferDesc, BufferHandle, BufferKind, DepthState, GpuDevice, ResourceRef, ResourceState,
    TextureView,
};
use crate::graph::{
    DirtyBits, ExecuteContext, FrameContext, FrameFlags, FrameKey, FrameValue, PrepareContext,
    Task, TaskParams, report_unexpected, report_wrong_params,
};
use crate::pass_state::{
    ColorAttachment, DepthAttachment, FixedFunctionState, FrameAttributes, PassStateId,
    PassStateRegistry, RenderPassState,
};
use crate::scene::{Camera, CameraAttributes, ShadowAtlasConfig, pack_shadow_atlas};
use crate::settings::GBufferFormats;
use crate::targets::{PingPong, RenderTargetSet, TargetSlot};
use crate::uniforms::{
    FRAME_CONSTANTS_SIZE, FrameConstants, FrameUniforms, LightUniforms, MAX_LIGHTS,
    MAX_SHADOW_LIGHTS, atlas_rect, shadow_view,
};

const NAME: &str = "BeginFrame";

/// Render-target slots registered by [`BeginFrameTask`].
#[derive(Clone, Copy, Debug)]
pub struct GBufferSlots {
    pub scene_color: TargetSlot,
    pub normal: TargetSlot,
    pub material: TargetSlot,
    pub base_color: TargetSlot,
    pub ibl: TargetSlot,
    pub mesh_id: TargetSlot,
    pub motion: PingPong<TargetSlot>,
    pub depth: PingPong<TargetSlot>,
    pub selection_depth: TargetSlot,
    pub closest_selected: [TargetSlot; 2],
    pub jittered_color: TargetSlot,
}

impl GBufferSlots {
    fn register(targets: &mut RenderTargetSet) -> Self {
        Self {
            scene_color: targets.register("scene color"),
            normal: targets.register("normal"),
            material: targets.register("material"),
            base_color: targets.register("base color"),
            ibl: targets.register("ibl"),
            mesh_id: targets.register("mesh id"),
            motion: PingPong::new(targets.register("motion 0"), targets.register("motion 1")),
            depth: PingPong::new(targets.register("depth 0"), targets.register("depth 1")),
            selection_depth: targets.register("selection depth"),
            closest_selected: [
                targets.register("closest selected 0"),
                targets.register("closest selected 1"),
            ],
            jittered_color: targets.register("jittered color"),
        }
    }
}

#[derive(Clone, Copy)]
struct MainPasses {
    opaque_selected: PassStateId,
    main: PassStateId,
    transparent_selected: PassStateId,
}

/// Camera state remembered for change detection.
#[derive(Clone, Copy, Default)]
struct PreviousCamera {
    view: Mat4,
    projection: Mat4,
    viewport: Vec2,
    view_projection: Option<Mat4>,
}

pub struct BeginFrameTask {
    formats: GBufferFormats,
    atlas: ShadowAtlasConfig,
    clear_color: [f32; 3],

    slots: Option<GBufferSlots>,
    passes: Option<MainPasses>,

    constants_buffer: Option<BufferHandle>,
    constants: FrameConstants,
    previous: PreviousCamera,

    // === Per-frame state (set in prepare, used in execute) ===
    camera: Option<CameraAttributes>,
    light_count: u32,
    shadow_count: u32,
    gbuffer: Vec<TextureView>,
    depth_view: Option<TextureView>,
}

impl BeginFrameTask {
    #[must_use]
    pub fn new(formats: GBufferFormats, atlas: ShadowAtlasConfig) -> Self {
        Self {
            formats,
            atlas,
            clear_color: [0.0; 3],
            slots: None,
            passes: None,
            constants_buffer: None,
            constants: FrameConstants::default(),
            previous: PreviousCamera::default(),
            camera: None,
            light_count: 0,
            shadow_count: 0,
            gbuffer: Vec::new(),
            depth_view: None,
        }
    }

    /// Slots registered when the task was inserted into a graph.
    #[must_use]
    pub fn slots(&self) -> Option<&GBufferSlots> {
        self.slots.as_ref()
    }

    /// CPU image of the frame constants uploaded last frame.
    #[must_use]
    pub fn frame_uniforms(&self) -> FrameUniforms {
        self.constants.frame()
    }

    fn scene_clear(&self) -> wgpu::Color {
        // Alpha accumulates coverage; transmittance is 1 - alpha.
        wgpu::Color {
            r: f64::from(self.clear_color[0]),
            g: f64::from(self.clear_color[1]),
            b: f64::from(self.clear_color[2]),
            a: 0.0,
        }
    }

    /// Detects camera changes and remembers this frame's camera.
    fn update_camera(&mut self, frame: &mut FrameContext, camera: &Camera, viewport: Vec2) -> CameraAttributes {
        let previous = self.previous;
        let changed = previous.viewport == Vec2::ZERO
            || previous.viewport != viewport
            || previous.view != camera.view
            || previous.projection != camera.projection;
        if changed {
            frame.set_flags(FrameFlags::CAMERA_TRANSFORM_CHANGED);
        }

        let attributes = CameraAttributes::new(camera, viewport, previous.view_projection);
        self.previous = PreviousCamera {
            view: camera.view,
            projection: camera.projection,
            viewport,
            view_projection: Some(attributes.view_projection),
        };
        attributes
    }

    fn configure_passes(
        &self,
        passes: &mut PassStateRegistry,
        ids: MainPasses,
        colors: &[(TextureView, wgpu::TextureFormat)],
        depth: (TextureView, wgpu::TextureFormat),
        selection_depth: Option<TextureView>,
        camera: CameraAttributes,
        attributes: FrameAttributes,
        polygon_mode: wgpu::PolygonMode,
    ) {
        let scene_clear = self.scene_clear();
        let cleared: Vec<ColorAttachment> = colors
            .iter()
            .enumerate()
            .map(|(i, &(view, format))| {
                let clear = if i == 0 { scene_clear } else { wgpu::Color::TRANSPARENT };
                ColorAttachment::clear(view, format, clear)
            })
            .collect();
        let loaded: Vec<ColorAttachment> = colors
            .iter()
            .map(|&(view, format)| ColorAttachment::load(view, format))
            .collect();

        let opaque = FixedFunctionState {
            polygon_mode,
            ..FixedFunctionState::default()
        };
        let transparent = FixedFunctionState {
            polygon_mode,
            cull_mode: None,
            depth: DepthState::READ_ONLY,
            blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
            ..FixedFunctionState::default()
        };

        let setups = [
            (
                ids.opaque_selected,
                &cleared,
                Some(DepthAttachment::clear(depth.0, depth.1, 1.0, 0)),
                opaque,
            ),
            (ids.main, &loaded, Some(DepthAttachment::load(depth.0, depth.1)), opaque),
            (
                ids.transparent_selected,
                &loaded,
                selection_depth.map(|view| DepthAttachment::load(view, depth.1)),
                transparent,
            ),
        ];
        for (id, colors, depth, state) in setups {
            let Some(pass) = passes.get_mut(id) else {
                report_unexpected(NAME, "pass state missing from registry");
                continue;
            };
            pass.configure(colors, depth);
            pass.set_fixed_function(state);
            pass.set_camera(Some(camera));
            pass.set_frame_attributes(Some(attributes));
            pass.set_viewport(None);
        }
    }
}

impl Task for BeginFrameTask {
    fn name(&self) -> &str {
        NAME
    }

    fn register(&mut self, targets: &mut RenderTargetSet, passes: &mut PassStateRegistry) {
        self.slots = Some(GBufferSlots::register(targets));
        self.passes = Some(MainPasses {
            opaque_selected: passes.insert(RenderPassState::new("opaque selected")),
            main: passes.insert(RenderPassState::new("main")),
            transparent_selected: passes.insert(RenderPassState::new("transparent selected")),
        });
    }

    fn sync(&mut self, params: &TaskParams, _frame: &mut FrameContext, dirty: &mut DirtyBits) {
        let TaskParams::BeginFrame(params) = params else {
            report_wrong_params(NAME, params, dirty);
            return;
        };
        self.clear_color = params.clear_color;
        *dirty = DirtyBits::empty();
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) {
        self.camera = None;
        self.gbuffer.clear();
        self.depth_view = None;

        // =====================================================================
        // 1. Frame counter, clock, history swap
        // =====================================================================
        ctx.params.frame_number += 1;
        ctx.params.clock.tick();

        let (Some(slots), Some(pass_ids)) = (self.slots.as_mut(), self.passes) else {
            report_unexpected(NAME, "task was never registered with a graph");
            return;
        };
        if ctx.params.frame_number > 1 {
            slots.depth.swap();
            slots.motion.swap();
        }
        let slots = *slots;

        let Some(output) = ctx.params.output else {
            report_unexpected(NAME, "no output target");
            return;
        };
        let Some(output_desc) = ctx.device.texture_desc(output.texture) else {
            report_unexpected(NAME, "output texture is gone");
            return;
        };

        // =====================================================================
        // 2. Resolve render targets
        // =====================================================================
        let f = self.formats;
        let mut resolve = |slot: TargetSlot, format: Option<wgpu::TextureFormat>| {
            let view = ctx.targets.resolve(&mut *ctx.device, slot, format, Some(output))?;
            Some((view, format?))
        };
        let scene_color = resolve(slots.scene_color, f.scene_color);
        let normal = resolve(slots.normal, f.normal);
        let material = resolve(slots.material, f.material);
        let base_color = resolve(slots.base_color, f.base_color);
        let ibl = resolve(slots.ibl, f.ibl);
        let mesh_id = resolve(slots.mesh_id, f.mesh_id);
        let motion_current = resolve(slots.motion.current(), f.motion);
        let motion_previous = resolve(slots.motion.previous(), f.motion);
        let depth_current = resolve(slots.depth.current(), f.depth);
        let depth_previous = resolve(slots.depth.previous(), f.depth);
        let selection_depth = resolve(slots.selection_depth, f.depth);
        let closest_0 = resolve(slots.closest_selected[0], f.closest_selected);
        let closest_1 = resolve(slots.closest_selected[1], f.closest_selected);
        let jittered = resolve(slots.jittered_color, f.jittered_color);

        let Some(depth) = depth_current else {
            report_unexpected(NAME, "depth target unavailable");
            return;
        };

        let published = [
            (FrameKey::SceneColor, scene_color),
            (FrameKey::Normal, normal),
            (FrameKey::Material, material),
            (FrameKey::BaseColor, base_color),
            (FrameKey::Ibl, ibl),
            (FrameKey::MeshId, mesh_id),
            (FrameKey::MotionCurrent, motion_current),
            (FrameKey::MotionPrevious, motion_previous),
            (FrameKey::DepthCurrent, depth_current),
            (FrameKey::DepthPrevious, depth_previous),
            (FrameKey::SelectionDepth, selection_depth),
            (FrameKey::ClosestSelected0, closest_0),
            (FrameKey::ClosestSelected1, closest_1),
            (FrameKey::JitteredColor, jittered),
        ];
        for (key, target) in published {
            if let Some((view, _)) = target {
                ctx.frame.insert(key, FrameValue::View(view));
            }
        }

        let colors: Vec<(TextureView, wgpu::TextureFormat)> =
            [scene_color, normal, material, base_color, ibl, mesh_id, motion_current]
                .into_iter()
                .flatten()
                .collect();
        self.gbuffer = colors.iter().map(|(view, _)| *view).collect();
        self.depth_view = Some(depth.0);

        // =====================================================================
        // 3. Camera
        // =====================================================================
        let Some(camera) = ctx.scene.camera() else {
            report_unexpected(NAME, "scene has no active camera");
            return;
        };
        let viewport = Vec2::new(output_desc.width as f32, output_desc.height as f32);
        let attributes = self.update_camera(ctx.frame, camera, viewport);
        ctx.frame.insert(FrameKey::Camera, FrameValue::Camera(Box::new(attributes)));

        // =====================================================================
        // 4. Lights and shadow assignments
        // =====================================================================
        let requests: Vec<_> = ctx
            .scene
            .visible_lights()
            .filter(|(_, light)| light.casts_shadow())
            .map(|(id, light)| {
                let resolution = light.shadow.map_or(0, |s| s.resolution);
                (id, resolution, light.shadow_view_projection())
            })
            .collect();
        let assignments = pack_shadow_atlas(&requests, &self.atlas, MAX_SHADOW_LIGHTS);
        for assignment in &assignments {
            let rect = atlas_rect(&assignment.viewport, self.atlas.size);
            self.constants.write_shadow_view(
                assignment.shadow_index,
                &shadow_view(assignment.view_projection, rect, assignment.slice, assignment.shadow_index),
            );
        }

        let lights: Vec<LightUniforms> = ctx
            .scene
            .visible_lights()
            .take(MAX_LIGHTS)
            .map(|(id, light)| {
                let shadow = assignments.iter().find(|a| a.light == id).map(|a| a.shadow_index);
                LightUniforms::new(light, shadow)
            })
            .collect();
        self.constants.write_lights(&lights);
        self.light_count = lights.len() as u32;
        self.shadow_count = assignments.len() as u32;
        ctx.frame.insert(FrameKey::ShadowAssignments, FrameValue::ShadowAssignments(assignments));

        // =====================================================================
        // 5. Frame constants buffer
        // =====================================================================
        let buffer = match self.constants_buffer {
            Some(buffer) if ctx.device.buffer_size(buffer).is_some() => buffer,
            _ => {
                let desc = BufferDesc::new("frame constants", FRAME_CONSTANTS_SIZE, BufferKind::Uniform);
                match ctx.device.create_buffer(&desc) {
                    Ok(buffer) => {
                        self.constants_buffer = Some(buffer);
                        buffer
                    }
                    Err(e) => {
                        log::error!("{NAME}: {e}");
                        return;
                    }
                }
            }
        };
        ctx.frame.insert(FrameKey::FrameConstants, FrameValue::Buffer(buffer));

        // =====================================================================
        // 6. Pass states
        // =====================================================================
        let frame_attributes = FrameAttributes {
            buffer,
            offset: 0,
            size: size_of::<FrameUniforms>() as u64,
        };
        self.configure_passes(
            ctx.passes,
            pass_ids,
            &colors,
            depth,
            selection_depth.map(|(view, _)| view),
            attributes,
            frame_attributes,
            ctx.params.render_mode.polygon_mode(),
        );
        ctx.frame.insert(FrameKey::OpaqueSelectedPass, FrameValue::Pass(pass_ids.opaque_selected));
        ctx.frame.insert(FrameKey::MainPass, FrameValue::Pass(pass_ids.main));
        if selection_depth.is_some() {
            ctx.frame.insert(
                FrameKey::TransparentSelectedPass,
                FrameValue::Pass(pass_ids.transparent_selected),
            );
        }
        self.camera = Some(attributes);
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        let (Some(camera), Some(buffer), Some(pass_ids)) = (self.camera, self.constants_buffer, self.passes) else {
            debug!("{NAME}: prepare did not complete, nothing to begin");
            return;
        };

        // Written by the post-process task's prepare; absent when it is disabled.
        let jitter = ctx.frame.vec2(FrameKey::Jitter).unwrap_or(Vec2::ZERO);
        let taa = ctx.frame.bool(FrameKey::TaaEnabled).unwrap_or(false);

        let uniforms = FrameUniforms {
            jitter: jitter.to_array(),
            time: ctx.params.clock.elapsed_seconds(),
            frame_number: ctx.params.frame_number as u32,
            light_count: self.light_count,
            shadow_count: self.shadow_count,
            taa_enabled: u32::from(taa),
            ..FrameUniforms::from_camera(&camera)
        };
        self.constants.write_frame(&uniforms);
        ctx.device.update_buffer(buffer, 0, self.constants.as_bytes());

        for view in &self.gbuffer {
            ctx.device.transition(ResourceRef::Texture(view.texture), ResourceState::RenderTarget);
        }
        if let Some(depth) = self.depth_view {
            ctx.device.transition(ResourceRef::Texture(depth.texture), ResourceState::DepthWrite);
        }

        let frame_number = ctx.params.frame_number;
        for id in [pass_ids.opaque_selected, pass_ids.main, pass_ids.transparent_selected] {
            let Some(pass) = ctx.passes.get_mut(id) else {
                continue;
            };
            if pass.depth().is_none() && pass.colors().is_empty() {
                continue;
            }
            if let Err(e) = pass.begin(&mut *ctx.device, frame_number) {
                report_unexpected(NAME, e);
            }
        }
    }

    fn release(&mut self, device: &mut dyn GpuDevice) {
        if let Some(buffer) = self.constants_buffer.take() {
            device.destroy_buffer(buffer);
        }
    }
}
