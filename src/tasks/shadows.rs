//! Shadow Atlas Task
//!
//! Re-renders only the shadow tiles whose inputs changed. A tile is dirty
//! when the scene geometry changed, the light changed, its atlas placement
//! moved, or the atlas texture was reallocated.
//!
//! Dirty lights are grouped by slice and slices are processed in ascending
//! order. A slice whose lights are all dirty is cleared once as a whole;
//! otherwise each dirty tile is cleared with a depth-only draw restricted to
//! its viewport so clean neighbours survive.

use log::{debug, trace};
use rustc_hash::FxHashMap;

use super::{SCENE_COLLECTION, require};
use crate::device::{
    DepthState, GpuDevice, PipelineDesc, ResourceRef, ResourceState, TextureHandle, TextureView,
    Viewport,
};
use crate::graph::{
    DirtyBits, ExecuteContext, FrameContext, FrameKey, FrameValue, GeometryRequest, MaterialTag,
    PrepareContext, SelectionFilter, Task, TaskParams, report_unexpected, report_wrong_params,
};
use crate::pass_state::{
    DepthAttachment, FixedFunctionState, FrameAttributes, PassStateId, PassStateRegistry,
    RenderPassState,
};
use crate::pipelines::LazyPipeline;
use crate::scene::{Light, LightId, ShadowAssignment, ShadowAtlasConfig};
use crate::targets::{RenderTargetSet, TargetSlot};
use crate::uniforms::{ShadowViewUniforms, shadow_view_offset};

const NAME: &str = "Shadows";

/// Everything a rendered tile depended on.
#[derive(Clone, Copy, PartialEq, Debug)]
struct ShadowStamp {
    /// Mesh geometry, transform and visibility versions.
    scene: (u64, u64, u64),
    light: Light,
    slice: u32,
    viewport: Viewport,
    atlas: TextureHandle,
}

struct SliceWork {
    slice: u32,
    full_clear: bool,
    lights: Vec<(ShadowAssignment, ShadowStamp)>,
}

/// What the last executed frame did, for diagnostics and tests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShadowFrameStats {
    /// Lights whose tile was re-rendered, in render order.
    pub rendered: Vec<LightId>,
    pub full_slice_clears: u32,
    pub tile_clears: u32,
}

pub struct ShadowsTask {
    format: Option<wgpu::TextureFormat>,
    atlas: ShadowAtlasConfig,
    enabled: bool,

    slot: Option<TargetSlot>,
    pass: Option<PassStateId>,
    clear_pipeline: LazyPipeline,
    rendered: FxHashMap<LightId, ShadowStamp>,

    // === Per-frame state ===
    atlas_view: Option<TextureView>,
    constants: Option<crate::device::BufferHandle>,
    work: Vec<SliceWork>,
    stats: ShadowFrameStats,
}

impl ShadowsTask {
    #[must_use]
    pub fn new(format: Option<wgpu::TextureFormat>, atlas: ShadowAtlasConfig) -> Self {
        Self {
            format,
            atlas,
            enabled: true,
            slot: None,
            pass: None,
            clear_pipeline: LazyPipeline::new(),
            rendered: FxHashMap::default(),
            atlas_view: None,
            constants: None,
            work: Vec::new(),
            stats: ShadowFrameStats::default(),
        }
    }

    #[must_use]
    pub fn last_frame(&self) -> &ShadowFrameStats {
        &self.stats
    }

    /// Whether `light`'s tile is up to date.
    #[must_use]
    pub fn is_clean(&self, light: LightId) -> bool {
        self.rendered.contains_key(&light) && !self.work.iter().any(|w| w.lights.iter().any(|(a, _)| a.light == light))
    }

    fn clear_pipeline_desc(format: wgpu::TextureFormat) -> PipelineDesc {
        PipelineDesc::fullscreen("shadow tile clear", "shadow_clear", &[])
            .with_depth(format, DepthState::ALWAYS_WRITE)
    }
}

impl Task for ShadowsTask {
    fn name(&self) -> &str {
        NAME
    }

    fn register(&mut self, targets: &mut RenderTargetSet, passes: &mut PassStateRegistry) {
        self.slot = Some(targets.register("shadow atlas"));
        self.pass = Some(passes.insert(RenderPassState::new("shadow")));
    }

    fn sync(&mut self, params: &TaskParams, _frame: &mut FrameContext, dirty: &mut DirtyBits) {
        let TaskParams::Shadows(params) = params else {
            report_wrong_params(NAME, params, dirty);
            return;
        };
        if self.enabled != params.enabled {
            self.enabled = params.enabled;
            // Tiles rendered before disabling are stale once re-enabled.
            self.rendered.clear();
        }
        *dirty = DirtyBits::empty();
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) {
        self.work.clear();
        self.atlas_view = None;
        if !self.enabled {
            return;
        }

        let Some(assignments) = require(NAME, ctx.frame.shadow_assignments()) else {
            return;
        };
        if assignments.is_empty() {
            trace!("{NAME}: no shadow-casting lights");
            self.rendered.clear();
            return;
        }
        let assignments = assignments.to_vec();
        let Some(constants) = require(NAME, ctx.frame.buffer(FrameKey::FrameConstants)) else {
            return;
        };
        let (Some(slot), Some(pass)) = (self.slot, self.pass) else {
            report_unexpected(NAME, "task was never registered with a graph");
            return;
        };
        let Some(format) = self.format else {
            debug!("{NAME}: no shadow format configured");
            return;
        };

        let size = self.atlas.size;
        let Some(atlas) = ctx
            .targets
            .resolve_sized(&mut *ctx.device, slot, Some(format), size, size, self.atlas.slices)
        else {
            return;
        };

        // =====================================================================
        // 1. Dirty detection
        // =====================================================================
        let versions = ctx.scene.versions();
        let scene = (versions.mesh_geometry, versions.transform, versions.visibility);
        self.rendered
            .retain(|id, _| assignments.iter().any(|a| a.light == *id));

        let mut dirty: Vec<(ShadowAssignment, ShadowStamp)> = Vec::new();
        for assignment in &assignments {
            let Some(light) = ctx.scene.light(assignment.light) else {
                report_unexpected(NAME, format_args!("assigned light {:?} is gone", assignment.light));
                continue;
            };
            let stamp = ShadowStamp {
                scene,
                light: *light,
                slice: assignment.slice,
                viewport: assignment.viewport,
                atlas: atlas.texture,
            };
            if self.rendered.get(&assignment.light) != Some(&stamp) {
                dirty.push((*assignment, stamp));
            }
        }

        // =====================================================================
        // 2. Group by slice, ascending
        // =====================================================================
        dirty.sort_by_key(|(a, _)| a.slice);
        for (assignment, stamp) in dirty {
            match self.work.last_mut() {
                Some(work) if work.slice == assignment.slice => work.lights.push((assignment, stamp)),
                _ => self.work.push(SliceWork {
                    slice: assignment.slice,
                    full_clear: false,
                    lights: vec![(assignment, stamp)],
                }),
            }
        }
        for work in &mut self.work {
            let in_slice = assignments.iter().filter(|a| a.slice == work.slice).count();
            work.full_clear = work.lights.len() == in_slice;
        }
        if self.work.iter().any(|w| !w.full_clear) {
            self.clear_pipeline.ensure(&mut *ctx.device, Self::clear_pipeline_desc(format));
        }

        self.atlas_view = Some(atlas);
        self.constants = Some(constants);
        ctx.frame.insert(FrameKey::ShadowAtlas, FrameValue::View(atlas.as_shader_resource()));
        ctx.frame.insert(FrameKey::ShadowPass, FrameValue::Pass(pass));
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        self.stats = ShadowFrameStats::default();
        let (Some(atlas), Some(constants), Some(format)) = (self.atlas_view, self.constants, self.format) else {
            return;
        };
        if self.work.is_empty() {
            trace!("{NAME}: every tile is clean");
            return;
        }
        let Some(pass) = self.pass.and_then(|id| ctx.passes.get_mut(id)) else {
            report_unexpected(NAME, "shadow pass state missing");
            return;
        };

        let clear_pipeline = if self.work.iter().any(|w| !w.full_clear) {
            self.clear_pipeline.ready(&mut *ctx.device)
        } else {
            None
        };

        ctx.device.transition(ResourceRef::Texture(atlas.texture), ResourceState::DepthWrite);
        let frame_number = ctx.params.frame_number;
        let mut deferred = Vec::new();

        for work in std::mem::take(&mut self.work) {
            if !work.full_clear && clear_pipeline.is_none() {
                trace!("{NAME}: tile clear pipeline pending, slice {} deferred", work.slice);
                deferred.push(work);
                continue;
            }

            let layer = atlas.layer(work.slice);
            let depth = if work.full_clear {
                self.stats.full_slice_clears += 1;
                DepthAttachment::clear(layer, format, 1.0, 0)
            } else {
                DepthAttachment::load(layer, format)
            };
            pass.configure(&[], Some(depth));
            pass.set_fixed_function(FixedFunctionState {
                cull_mode: Some(wgpu::Face::Front),
                ..FixedFunctionState::default()
            });
            if let Err(e) = pass.begin(&mut *ctx.device, frame_number) {
                report_unexpected(NAME, e);
                continue;
            }

            for (assignment, stamp) in work.lights {
                pass.set_viewport(Some(assignment.viewport));
                pass.set_frame_attributes(Some(FrameAttributes {
                    buffer: constants,
                    offset: shadow_view_offset(assignment.shadow_index),
                    size: size_of::<ShadowViewUniforms>() as u64,
                }));
                if let Err(e) = pass.commit(&mut *ctx.device, frame_number) {
                    report_unexpected(NAME, e);
                    continue;
                }
                if let Some(clear) = clear_pipeline.filter(|_| !work.full_clear) {
                    ctx.device.set_pipeline(clear);
                    ctx.device.draw(3, 1);
                    self.stats.tile_clears += 1;
                }

                let request = GeometryRequest {
                    task: NAME,
                    collection: SCENE_COLLECTION,
                    material_tag: MaterialTag::Opaque,
                    selection: SelectionFilter::All,
                    pass: &*pass,
                    shadow_light: Some(assignment.light),
                    scene: ctx.scene,
                    frame: &*ctx.frame,
                };
                let count = ctx.geometry.render(&mut *ctx.device, &request);
                pass.record_draw_items(count);

                self.rendered.insert(assignment.light, stamp);
                self.stats.rendered.push(assignment.light);
            }
        }
        self.work = deferred;

        ctx.device.transition(ResourceRef::Texture(atlas.texture), ResourceState::ShaderResource);
    }

    fn release(&mut self, _device: &mut dyn GpuDevice) {
        self.rendered.clear();
    }
}
