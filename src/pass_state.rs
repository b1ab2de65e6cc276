//! Render Pass State
//!
//! A [`RenderPassState`] is everything needed to draw into one fixed set of
//! targets: the targets and their formats, clear values, fixed-function
//! state, the active camera, the frame-attributes constant range and running
//! draw statistics.
//!
//! # Per-frame protocol
//!
//! ```text
//!  configure(..)   only re-initialises when targets or state differ
//!  begin(frame)    clears (where a clear value is set), resets stats, binds
//!  commit(frame)   re-binds targets, viewport and stencil reference
//!  <draws>         record_draw_items(n)
//! ```
//!
//! `commit` is idempotent and must precede every batch of draws, because any
//! task in between may have bound other targets.
//!
//! Pass states live in a [`PassStateRegistry`]; the owning task publishes the
//! [`PassStateId`] into the frame context and other tasks look it up there.

use log::debug;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::device::{
    BufferHandle, DepthState, GpuDevice, PipelineDesc, TextureView, Viewport,
};
use crate::errors::PassStateError;
use crate::scene::CameraAttributes;

slotmap::new_key_type! {
    /// Handle to a pass state in a [`PassStateRegistry`].
    pub struct PassStateId;
}

// ─── Attachments ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ColorAttachment {
    pub view: TextureView,
    pub format: wgpu::TextureFormat,
    /// Cleared to this value by [`RenderPassState::begin`], loaded otherwise.
    pub clear: Option<wgpu::Color>,
}

impl ColorAttachment {
    #[must_use]
    pub fn load(view: TextureView, format: wgpu::TextureFormat) -> Self {
        Self { view, format, clear: None }
    }

    #[must_use]
    pub fn clear(view: TextureView, format: wgpu::TextureFormat, color: wgpu::Color) -> Self {
        Self {
            view,
            format,
            clear: Some(color),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct DepthAttachment {
    pub view: TextureView,
    pub format: wgpu::TextureFormat,
    /// Depth and stencil clear values.
    pub clear: Option<(f32, u32)>,
}

impl DepthAttachment {
    #[must_use]
    pub fn load(view: TextureView, format: wgpu::TextureFormat) -> Self {
        Self { view, format, clear: None }
    }

    #[must_use]
    pub fn clear(view: TextureView, format: wgpu::TextureFormat, depth: f32, stencil: u32) -> Self {
        Self {
            view,
            format,
            clear: Some((depth, stencil)),
        }
    }
}

/// Rasterizer, depth, stencil and blend settings shared by a pass's draws.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct FixedFunctionState {
    pub polygon_mode: wgpu::PolygonMode,
    pub cull_mode: Option<wgpu::Face>,
    pub depth: DepthState,
    pub stencil_reference: Option<u32>,
    pub blend: Option<wgpu::BlendState>,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            polygon_mode: wgpu::PolygonMode::Fill,
            cull_mode: Some(wgpu::Face::Back),
            depth: DepthState::LESS_EQUAL,
            stencil_reference: None,
            blend: None,
        }
    }
}

/// Range of the frame-constants buffer the pass's shaders read.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FrameAttributes {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct DrawStats {
    pub draw_items: u32,
    pub batches: u32,
}

// ─── Pass State ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct RenderPassState {
    label: &'static str,
    colors: SmallVec<[ColorAttachment; 8]>,
    depth: Option<DepthAttachment>,
    state: FixedFunctionState,
    camera: Option<CameraAttributes>,
    frame_attributes: Option<FrameAttributes>,
    viewport: Option<Viewport>,
    stats: DrawStats,
    begun_frame: Option<u64>,
    generation: u64,
}

impl RenderPassState {
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            colors: SmallVec::new(),
            depth: None,
            state: FixedFunctionState::default(),
            camera: None,
            frame_attributes: None,
            viewport: None,
            stats: DrawStats::default(),
            begun_frame: None,
            generation: 0,
        }
    }

    /// Sets the attachments. Returns `true` when anything changed.
    pub fn configure(&mut self, colors: &[ColorAttachment], depth: Option<DepthAttachment>) -> bool {
        if self.colors.as_slice() == colors && self.depth == depth {
            return false;
        }
        self.colors = colors.iter().copied().collect();
        self.depth = depth;
        self.generation += 1;
        debug!("RenderPassState '{}': targets changed (generation {})", self.label, self.generation);
        true
    }

    /// Sets the fixed-function state. Returns `true` when anything changed.
    pub fn set_fixed_function(&mut self, state: FixedFunctionState) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        self.generation += 1;
        true
    }

    pub fn set_camera(&mut self, camera: Option<CameraAttributes>) {
        self.camera = camera;
    }

    pub fn set_frame_attributes(&mut self, attributes: Option<FrameAttributes>) {
        self.frame_attributes = attributes;
    }

    /// Restricts draws to a sub-rectangle; `None` covers the first target.
    pub fn set_viewport(&mut self, viewport: Option<Viewport>) {
        self.viewport = viewport;
    }

    /// Clears the targets that have clear values, resets statistics and binds.
    pub fn begin(&mut self, device: &mut dyn GpuDevice, frame_number: u64) -> Result<(), PassStateError> {
        if self.colors.is_empty() && self.depth.is_none() {
            return Err(PassStateError::MissingTargets(self.label));
        }
        for color in &self.colors {
            if let Some(clear) = color.clear {
                device.clear_render_target(color.view, clear);
            }
        }
        if let Some(DepthAttachment {
            view,
            clear: Some((depth, stencil)),
            ..
        }) = self.depth
        {
            device.clear_depth_stencil(view, depth, stencil);
        }
        self.stats = DrawStats::default();
        self.begun_frame = Some(frame_number);
        self.commit(device, frame_number)
    }

    /// Binds targets, viewport and stencil reference.
    pub fn commit(&self, device: &mut dyn GpuDevice, frame_number: u64) -> Result<(), PassStateError> {
        if self.begun_frame != Some(frame_number) {
            return Err(PassStateError::NotBegun(self.label));
        }
        if self.colors.is_empty() && self.depth.is_none() {
            return Err(PassStateError::MissingTargets(self.label));
        }

        let views: SmallVec<[TextureView; 8]> = self.colors.iter().map(|c| c.view).collect();
        device.set_render_targets(&views, self.depth.map(|d| d.view));

        let viewport = self.viewport.or_else(|| {
            let first = self.colors.first().map(|c| c.view).or(self.depth.map(|d| d.view))?;
            let desc = device.texture_desc(first.texture)?;
            Some(Viewport::full(desc.width, desc.height))
        });
        if let Some(viewport) = viewport {
            device.set_viewport(viewport);
        }
        if let Some(reference) = self.state.stencil_reference {
            device.set_stencil_reference(reference);
        }
        Ok(())
    }

    pub fn record_draw_items(&mut self, count: u32) {
        self.stats.draw_items += count;
        self.stats.batches += 1;
    }

    #[must_use]
    pub fn draw_item_count(&self) -> u32 {
        self.stats.draw_items
    }

    #[must_use]
    pub fn stats(&self) -> DrawStats {
        self.stats
    }

    /// Pipeline descriptor compatible with this pass's targets and state.
    #[must_use]
    pub fn pipeline_desc(&self, label: impl Into<String>, shader: &'static str) -> PipelineDesc {
        let formats: SmallVec<[wgpu::TextureFormat; 8]> = self.colors.iter().map(|c| c.format).collect();
        let mut desc = PipelineDesc::fullscreen(label, shader, &formats);
        if let Some(depth) = self.depth {
            desc = desc.with_depth(depth.format, self.state.depth);
            desc.stencil_test = self.state.stencil_reference.is_some();
        }
        if let Some(blend) = self.state.blend {
            desc = desc.with_blend(blend);
        }
        desc.polygon_mode = self.state.polygon_mode;
        desc.cull_mode = self.state.cull_mode;
        desc
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[must_use]
    pub fn colors(&self) -> &[ColorAttachment] {
        &self.colors
    }

    #[must_use]
    pub fn depth(&self) -> Option<DepthAttachment> {
        self.depth
    }

    #[must_use]
    pub fn fixed_function(&self) -> FixedFunctionState {
        self.state
    }

    #[must_use]
    pub fn camera(&self) -> Option<&CameraAttributes> {
        self.camera.as_ref()
    }

    #[must_use]
    pub fn frame_attributes(&self) -> Option<FrameAttributes> {
        self.frame_attributes
    }

    #[must_use]
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Bumped whenever targets or fixed-function state change.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

/// Storage for every pass state of a graph.
#[derive(Debug, Default)]
pub struct PassStateRegistry {
    passes: SlotMap<PassStateId, RenderPassState>,
}

impl PassStateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pass: RenderPassState) -> PassStateId {
        self.passes.insert(pass)
    }

    #[must_use]
    pub fn get(&self, id: PassStateId) -> Option<&RenderPassState> {
        self.passes.get(id)
    }

    pub fn get_mut(&mut self, id: PassStateId) -> Option<&mut RenderPassState> {
        self.passes.get_mut(id)
    }

    pub fn remove(&mut self, id: PassStateId) -> Option<RenderPassState> {
        self.passes.remove(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}
