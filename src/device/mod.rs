//! Device Abstraction
//!
//! The frame graph never talks to a graphics API directly. Every resource
//! allocation and every command goes through [`GpuDevice`], an object-safe,
//! always-synchronous interface:
//!
//! - **Resources**: textures, buffers, pipelines and bindings are addressed by
//!   `slotmap` keys. [`TextureView`] is a plain `Copy` value, so views handed
//!   to tasks never own anything and can be compared by equality.
//! - **Commands**: recorded in call order; the backend decides how to batch
//!   them into API-level passes at [`GpuDevice::submit`].
//! - **Pipelines**: compiled asynchronously by the backend. Tasks poll
//!   [`GpuDevice::pipeline_status`] and skip work while a pipeline is pending.
//!
//! Two backends ship with the crate:
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`HeadlessDevice`] | CPU-only validation backend with a command log |
//! | [`WgpuDevice`] | Records and replays commands into a `wgpu` encoder |

pub mod headless;
pub mod wgpu_backend;

use smallvec::SmallVec;

use crate::errors::DeviceError;

pub use headless::{DeviceCommand, HeadlessDevice};
pub use wgpu_backend::{PipelineFactory, WgpuDevice};

slotmap::new_key_type! {
    /// Handle to a device texture.
    pub struct TextureHandle;
    /// Handle to a device buffer.
    pub struct BufferHandle;
    /// Handle to a (possibly still compiling) render pipeline.
    pub struct PipelineHandle;
    /// Handle to a shader-resource binding set.
    pub struct BindingHandle;
}

// ─── Texture Types ────────────────────────────────────────────────────────────

/// How a texture is going to be used.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TextureKind {
    /// Color render target, always shader-readable.
    ColorTarget,
    /// Depth-stencil target, always shader-readable.
    DepthStencil,
    /// CPU-readable 1×1 staging image for readback.
    Staging,
    /// Imported texture the graph does not own (swap-chain image, environment map).
    External,
}

/// Texture creation parameters.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub array_layers: u32,
    pub format: wgpu::TextureFormat,
    pub kind: TextureKind,
}

impl TextureDesc {
    /// Descriptor for a render target; the kind follows from the format.
    #[must_use]
    pub fn render_target(
        label: impl Into<String>,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let kind = if format.is_depth_stencil_format() {
            TextureKind::DepthStencil
        } else {
            TextureKind::ColorTarget
        };
        Self {
            label: label.into(),
            width,
            height,
            array_layers: 1,
            format,
            kind,
        }
    }

    /// Descriptor for a 1×1 staging texture used by readback queues.
    #[must_use]
    pub fn staging(label: impl Into<String>, format: wgpu::TextureFormat) -> Self {
        Self {
            label: label.into(),
            width: 1,
            height: 1,
            array_layers: 1,
            format,
            kind: TextureKind::Staging,
        }
    }

    #[must_use]
    pub fn with_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers.max(1);
        self
    }

    /// Bind flags the backend must request for this texture.
    #[must_use]
    pub fn usage(&self) -> wgpu::TextureUsages {
        match self.kind {
            TextureKind::ColorTarget | TextureKind::DepthStencil => {
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST
            }
            TextureKind::Staging => wgpu::TextureUsages::COPY_DST,
            TextureKind::External => {
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST
            }
        }
    }
}

/// Which aspect of a texture a view exposes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ViewKind {
    RenderTarget,
    DepthStencil,
    ShaderResource,
}

/// Non-owning reference to a texture (or one layer of a texture array).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TextureView {
    pub texture: TextureHandle,
    pub kind: ViewKind,
    pub layer: Option<u32>,
}

impl TextureView {
    /// The default view of a texture: depth-stencil view for depth formats,
    /// render-target view otherwise.
    #[must_use]
    pub fn default_for(texture: TextureHandle, format: wgpu::TextureFormat) -> Self {
        let kind = if format.is_depth_stencil_format() {
            ViewKind::DepthStencil
        } else {
            ViewKind::RenderTarget
        };
        Self { texture, kind, layer: None }
    }

    /// Same texture, viewed for sampling.
    #[must_use]
    pub fn as_shader_resource(self) -> Self {
        Self { kind: ViewKind::ShaderResource, ..self }
    }

    /// Single array layer of the same texture.
    #[must_use]
    pub fn layer(self, layer: u32) -> Self {
        Self { layer: Some(layer), ..self }
    }
}

/// Explicit resource states for hand-off between tasks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ResourceState {
    RenderTarget,
    DepthWrite,
    ShaderResource,
    UnorderedAccess,
    CopySource,
    CopyDest,
}

/// Anything that can be transitioned.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ResourceRef {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

// ─── Buffer Types ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BufferKind {
    /// Uniform constants, updated from CPU staging every frame.
    Uniform,
    /// Read-write storage (OIT layers).
    Storage,
    /// Vertex data (bounding-box lines).
    Vertex,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub kind: BufferKind,
}

impl BufferDesc {
    #[must_use]
    pub fn new(label: impl Into<String>, size: u64, kind: BufferKind) -> Self {
        Self { label: label.into(), size, kind }
    }
}

// ─── Pipeline Types ───────────────────────────────────────────────────────────

/// Depth test / write configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare: wgpu::CompareFunction,
}

impl DepthState {
    pub const DISABLED: Self = Self {
        test: false,
        write: false,
        compare: wgpu::CompareFunction::Always,
    };
    pub const LESS_EQUAL: Self = Self {
        test: true,
        write: true,
        compare: wgpu::CompareFunction::LessEqual,
    };
    pub const READ_ONLY: Self = Self {
        test: true,
        write: false,
        compare: wgpu::CompareFunction::LessEqual,
    };
    pub const ALWAYS_WRITE: Self = Self {
        test: true,
        write: true,
        compare: wgpu::CompareFunction::Always,
    };
}

impl Default for DepthState {
    fn default() -> Self {
        Self::LESS_EQUAL
    }
}

/// Render pipeline creation parameters.
///
/// `shader` names a shader program known to the backend; compiling it is the
/// backend's business.
#[derive(Clone, PartialEq, Debug)]
pub struct PipelineDesc {
    pub label: String,
    pub shader: &'static str,
    pub color_formats: SmallVec<[wgpu::TextureFormat; 8]>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub depth: DepthState,
    pub blend: Option<wgpu::BlendState>,
    pub topology: wgpu::PrimitiveTopology,
    pub polygon_mode: wgpu::PolygonMode,
    pub cull_mode: Option<wgpu::Face>,
    pub stencil_test: bool,
}

impl PipelineDesc {
    /// Full-screen triangle pipeline writing the given color formats.
    #[must_use]
    pub fn fullscreen(
        label: impl Into<String>,
        shader: &'static str,
        color_formats: &[wgpu::TextureFormat],
    ) -> Self {
        Self {
            label: label.into(),
            shader,
            color_formats: color_formats.iter().copied().collect(),
            depth_format: None,
            depth: DepthState::DISABLED,
            blend: None,
            topology: wgpu::PrimitiveTopology::TriangleList,
            polygon_mode: wgpu::PolygonMode::Fill,
            cull_mode: None,
            stencil_test: false,
        }
    }

    #[must_use]
    pub fn with_depth(mut self, format: wgpu::TextureFormat, depth: DepthState) -> Self {
        self.depth_format = Some(format);
        self.depth = depth;
        self
    }

    #[must_use]
    pub fn with_blend(mut self, blend: wgpu::BlendState) -> Self {
        self.blend = Some(blend);
        self
    }

    #[must_use]
    pub fn with_topology(mut self, topology: wgpu::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }
}

/// Result of polling an asynchronously compiled pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PipelineStatus {
    Pending,
    Ready,
    Failed,
}

// ─── Binding Types ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SamplerKind {
    Linear,
    Nearest,
}

/// One resource in a binding set. Entry index is the binding slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BindingEntry {
    Texture(TextureView),
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    Sampler(SamplerKind),
}

/// Binding set creation parameters. The layout is taken from `pipeline`'s
/// bind group `group`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct BindingDesc {
    pub label: String,
    pub pipeline: PipelineHandle,
    pub group: u32,
    pub entries: SmallVec<[BindingEntry; 8]>,
}

// ─── Command Types ────────────────────────────────────────────────────────────

/// Pixel-space viewport.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    #[must_use]
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }
}

// ─── Device Trait ─────────────────────────────────────────────────────────────

/// Graphics device used by every task phase.
///
/// Command methods record into the current frame's command stream; nothing is
/// guaranteed to reach the GPU before [`submit`](Self::submit).
pub trait GpuDevice {
    /// Human-readable backend name for logs.
    fn backend_name(&self) -> &'static str;

    // ── Resources ──────────────────────────────────────────────────────────

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, DeviceError>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Descriptor of a live texture, `None` for stale handles.
    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc>;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn buffer_size(&self, buffer: BufferHandle) -> Option<u64>;

    /// Schedules pipeline compilation. The returned handle is usable once
    /// [`pipeline_status`](Self::pipeline_status) reports `Ready`.
    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, DeviceError>;

    fn pipeline_status(&mut self, pipeline: PipelineHandle) -> PipelineStatus;

    fn create_binding(&mut self, desc: &BindingDesc) -> Result<BindingHandle, DeviceError>;

    fn destroy_binding(&mut self, binding: BindingHandle);

    // ── Commands ───────────────────────────────────────────────────────────

    fn set_render_targets(&mut self, colors: &[TextureView], depth: Option<TextureView>);

    fn clear_render_target(&mut self, view: TextureView, color: wgpu::Color);

    fn clear_depth_stencil(&mut self, view: TextureView, depth: f32, stencil: u32);

    fn set_viewport(&mut self, viewport: Viewport);

    fn set_stencil_reference(&mut self, reference: u32);

    fn set_pipeline(&mut self, pipeline: PipelineHandle);

    fn bind(&mut self, group: u32, binding: BindingHandle, dynamic_offsets: &[u32]);

    fn draw(&mut self, vertex_count: u32, instance_count: u32);

    /// Copies the full extent of `src` into `dst`. Sizes and formats must match.
    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle);

    /// Copies one texel of `src` at (`x`, `y`) into a 1×1 staging texture.
    fn copy_texel_to_staging(&mut self, src: TextureHandle, x: u32, y: u32, staging: TextureHandle);

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn transition(&mut self, resource: ResourceRef, state: ResourceState);

    /// Flushes recorded commands to the GPU queue.
    fn submit(&mut self);

    // ── Readback ───────────────────────────────────────────────────────────

    /// Returns the staging texel bytes once the copy has completed on the GPU.
    fn read_staging(&mut self, staging: TextureHandle) -> Option<SmallVec<[u8; 16]>>;
}

/// Rounds `value` up to a multiple of `alignment`.
#[inline]
#[must_use]
pub const fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_target_kind_follows_format() {
        let color = TextureDesc::render_target("c", 4, 4, wgpu::TextureFormat::Rgba16Float);
        let depth = TextureDesc::render_target("d", 4, 4, wgpu::TextureFormat::Depth32Float);
        assert_eq!(color.kind, TextureKind::ColorTarget);
        assert_eq!(depth.kind, TextureKind::DepthStencil);
        assert!(depth.usage().contains(wgpu::TextureUsages::TEXTURE_BINDING));
    }

    #[test]
    fn align_rounds_up() {
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
    }
}
