//! WGPU Backend
//!
//! Implements [`GpuDevice`] on top of `wgpu`.
//!
//! # Command Replay
//!
//! The frame graph issues state-machine style commands (`set_render_targets`,
//! `clear_*`, `draw`). `wgpu` wants scoped render passes instead, so commands
//! are recorded and replayed at [`GpuDevice::submit`] into a single
//! `CommandEncoder`:
//!
//! ```text
//!  clear_*              ──► standalone pass with LoadOp::Clear
//!  run of draw / bind / ──► one render pass over the current targets
//!  pipeline / viewport      (LoadOp::Load), state re-applied at pass start
//!  copy_*               ──► encoder copy outside any pass
//! ```
//!
//! `update_buffer` goes straight to `Queue::write_buffer`, so it takes effect
//! at the start of the next submission. Tasks that update the same buffer
//! several times per frame write to disjoint offsets.
//!
//! # Pipelines
//!
//! Shader programs are provided by the embedding application as
//! [`PipelineFactory`] closures keyed by shader name. Compilation runs on a
//! worker thread; finished pipelines arrive through a `flume` channel and are
//! picked up by [`GpuDevice::pipeline_status`].

use std::sync::Arc;

use log::{debug, error, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;
use smallvec::SmallVec;

use super::{
    BindingDesc, BindingEntry, BindingHandle, BufferDesc, BufferHandle, BufferKind, GpuDevice,
    PipelineDesc, PipelineHandle, PipelineStatus, ResourceRef, ResourceState, SamplerKind,
    TextureDesc, TextureHandle, TextureKind, TextureView, ViewKind, Viewport,
};
use crate::errors::{DeviceError, Result, StrataError};

/// Builds a render pipeline for a [`PipelineDesc`]. Runs on the compile thread.
pub type PipelineFactory = Arc<
    dyn Fn(&wgpu::Device, &PipelineDesc) -> std::result::Result<wgpu::RenderPipeline, String>
        + Send
        + Sync,
>;

/// Bytes reserved per staging readback (one row at the copy alignment).
const STAGING_BUFFER_SIZE: u64 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64;

struct CompileJob {
    handle: PipelineHandle,
    desc: PipelineDesc,
    factory: PipelineFactory,
}

type CompileResult = (PipelineHandle, std::result::Result<wgpu::RenderPipeline, String>);

struct GpuTexture {
    desc: TextureDesc,
    texture: Option<wgpu::Texture>,
    staging: Option<wgpu::Buffer>,
    views: FxHashMap<(ViewKind, Option<u32>), wgpu::TextureView>,
    imported: bool,
}

struct GpuPipeline {
    label: String,
    status: PipelineStatus,
    pipeline: Option<wgpu::RenderPipeline>,
}

#[derive(Clone)]
enum Recorded {
    SetRenderTargets(SmallVec<[TextureView; 8]>, Option<TextureView>),
    ClearColor(TextureView, wgpu::Color),
    ClearDepth(TextureView, f32, u32),
    Viewport(Viewport),
    StencilReference(u32),
    Pipeline(PipelineHandle),
    Bind(u32, BindingHandle, SmallVec<[u32; 4]>),
    Draw(u32, u32),
    Copy(TextureHandle, TextureHandle),
    CopyTexel(TextureHandle, u32, u32, TextureHandle),
}

impl Recorded {
    fn is_pass_command(&self) -> bool {
        matches!(
            self,
            Self::Viewport(_) | Self::StencilReference(_) | Self::Pipeline(_) | Self::Bind(..) | Self::Draw(..)
        )
    }
}

/// Pass-scoped state that must be re-applied whenever a new `wgpu` pass starts.
#[derive(Default, Clone)]
struct ReplayState {
    colors: SmallVec<[TextureView; 8]>,
    depth: Option<TextureView>,
    viewport: Option<Viewport>,
    stencil_reference: Option<u32>,
    pipeline: Option<PipelineHandle>,
    binds: [Option<(BindingHandle, SmallVec<[u32; 4]>)>; 4],
}

/// `wgpu`-backed device.
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,

    textures: SlotMap<TextureHandle, GpuTexture>,
    buffers: SlotMap<BufferHandle, (BufferDesc, wgpu::Buffer)>,
    pipelines: SlotMap<PipelineHandle, GpuPipeline>,
    bindings: SlotMap<BindingHandle, wgpu::BindGroup>,
    samplers: FxHashMap<SamplerKind, wgpu::Sampler>,

    factories: FxHashMap<&'static str, PipelineFactory>,
    compile_tx: flume::Sender<CompileJob>,
    compiled_rx: flume::Receiver<CompileResult>,

    commands: Vec<Recorded>,
    map_tx: flume::Sender<(TextureHandle, bool)>,
    map_rx: flume::Receiver<(TextureHandle, bool)>,
    mapped: FxHashSet<TextureHandle>,
}

impl WgpuDevice {
    /// Wraps an existing device and queue and starts the pipeline compile thread.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Result<Self> {
        let (compile_tx, compile_rx) = flume::unbounded::<CompileJob>();
        let (compiled_tx, compiled_rx) = flume::unbounded::<CompileResult>();
        let worker_device = Arc::clone(&device);

        std::thread::Builder::new()
            .name("strata-pipeline-compiler".to_string())
            .spawn(move || {
                for job in compile_rx.iter() {
                    let result = (job.factory)(&worker_device, &job.desc);
                    if compiled_tx.send((job.handle, result)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| StrataError::BackendInit(e.to_string()))?;

        let (map_tx, map_rx) = flume::unbounded();

        Ok(Self {
            device,
            queue,
            textures: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            bindings: SlotMap::with_key(),
            samplers: FxHashMap::default(),
            factories: FxHashMap::default(),
            compile_tx,
            compiled_rx,
            commands: Vec::with_capacity(256),
            map_tx,
            map_rx,
            mapped: FxHashSet::default(),
        })
    }

    /// Requests a high-performance adapter without a surface and wraps it.
    pub fn new_offscreen() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| StrataError::BackendInit(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Strata Device"),
            ..Default::default()
        }))
        .map_err(|e| StrataError::BackendInit(e.to_string()))?;

        info!("WgpuDevice: using adapter '{}'", adapter.get_info().name);
        Self::new(Arc::new(device), Arc::new(queue))
    }

    /// Registers the factory that builds pipelines for `shader`.
    pub fn register_shader(&mut self, shader: &'static str, factory: PipelineFactory) {
        self.factories.insert(shader, factory);
    }

    /// Makes an externally owned texture (e.g. a swap-chain image) addressable.
    pub fn import_texture(&mut self, texture: wgpu::Texture, label: impl Into<String>) -> TextureHandle {
        let kind = if texture.usage().contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
            if texture.format().is_depth_stencil_format() {
                TextureKind::DepthStencil
            } else {
                TextureKind::ColorTarget
            }
        } else {
            TextureKind::External
        };
        let desc = TextureDesc {
            label: label.into(),
            width: texture.width(),
            height: texture.height(),
            array_layers: texture.depth_or_array_layers(),
            format: texture.format(),
            kind,
        };
        self.textures.insert(GpuTexture {
            desc,
            texture: Some(texture),
            staging: None,
            views: FxHashMap::default(),
            imported: true,
        })
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    // ── Internal helpers ───────────────────────────────────────────────────

    fn drain_compiled(&mut self) {
        while let Ok((handle, result)) = self.compiled_rx.try_recv() {
            let Some(entry) = self.pipelines.get_mut(handle) else {
                continue;
            };
            match result {
                Ok(pipeline) => {
                    debug!("WgpuDevice: pipeline '{}' ready", entry.label);
                    entry.pipeline = Some(pipeline);
                    entry.status = PipelineStatus::Ready;
                }
                Err(reason) => {
                    error!("WgpuDevice: pipeline '{}' failed to compile: {reason}", entry.label);
                    entry.status = PipelineStatus::Failed;
                }
            }
        }
    }

    fn ensure_view(&mut self, view: TextureView) {
        let Some(entry) = self.textures.get_mut(view.texture) else {
            return;
        };
        let Some(texture) = &entry.texture else {
            return;
        };
        let key = (view.kind, view.layer);
        if entry.views.contains_key(&key) {
            return;
        }

        let format = entry.desc.format;
        let aspect = if view.kind == ViewKind::ShaderResource && format.is_depth_stencil_format() {
            wgpu::TextureAspect::DepthOnly
        } else {
            wgpu::TextureAspect::All
        };
        let dimension = match view.layer {
            Some(_) => wgpu::TextureViewDimension::D2,
            None if entry.desc.array_layers > 1 => wgpu::TextureViewDimension::D2Array,
            None => wgpu::TextureViewDimension::D2,
        };
        let created = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(entry.desc.label.as_str()),
            dimension: Some(dimension),
            aspect,
            base_array_layer: view.layer.unwrap_or(0),
            array_layer_count: view.layer.map(|_| 1),
            ..Default::default()
        });
        entry.views.insert(key, created);
    }

    fn view(&self, view: TextureView) -> Option<&wgpu::TextureView> {
        self.textures.get(view.texture)?.views.get(&(view.kind, view.layer))
    }

    fn ensure_sampler(&mut self, kind: SamplerKind) {
        let device = &self.device;
        self.samplers.entry(kind).or_insert_with(|| {
            let filter = match kind {
                SamplerKind::Linear => wgpu::FilterMode::Linear,
                SamplerKind::Nearest => wgpu::FilterMode::Nearest,
            };
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Strata Sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        });
    }

    fn has_stencil(&self, view: TextureView) -> bool {
        self.textures
            .get(view.texture)
            .is_some_and(|t| t.desc.format.has_stencil_aspect())
    }

    fn encode_clear(&self, encoder: &mut wgpu::CommandEncoder, command: &Recorded) {
        match *command {
            Recorded::ClearColor(view, color) => {
                let Some(target) = self.view(view) else {
                    return;
                };
                encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Strata Clear"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: target,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(color),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });
            }
            Recorded::ClearDepth(view, depth, stencil) => {
                let Some(target) = self.view(view) else {
                    return;
                };
                let stencil_ops = self.has_stencil(view).then_some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(stencil),
                    store: wgpu::StoreOp::Store,
                });
                encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Strata Depth Clear"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: target,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(depth),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops,
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });
            }
            _ => {}
        }
    }

    /// Replays a run of pass-scoped commands inside one render pass.
    fn encode_pass(&self, encoder: &mut wgpu::CommandEncoder, state: &mut ReplayState, run: &[Recorded]) {
        let load_store = |_: ()| wgpu::Operations {
            load: wgpu::LoadOp::Load,
            store: wgpu::StoreOp::Store,
        };
        let color_attachments: SmallVec<[Option<wgpu::RenderPassColorAttachment<'_>>; 8]> = state
            .colors
            .iter()
            .map(|v| {
                self.view(*v).map(|view| wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: load_store(()),
                    depth_slice: None,
                })
            })
            .collect();
        let depth_stencil_attachment = state.depth.and_then(|v| {
            let view = self.view(v)?;
            Some(wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: self.has_stencil(v).then_some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
            })
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Strata Pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        // State set before this run still applies to it.
        if let Some(v) = state.viewport {
            pass.set_viewport(v.x, v.y, v.width, v.height, 0.0, 1.0);
        }
        if let Some(reference) = state.stencil_reference {
            pass.set_stencil_reference(reference);
        }
        if let Some(p) = state.pipeline.and_then(|p| self.pipelines.get(p)?.pipeline.as_ref()) {
            pass.set_pipeline(p);
        }
        for (group, bind) in state.binds.iter().enumerate() {
            if let Some((binding, offsets)) = bind
                && let Some(bind_group) = self.bindings.get(*binding)
            {
                pass.set_bind_group(group as u32, bind_group, offsets);
            }
        }

        for command in run {
            match command {
                Recorded::Viewport(v) => {
                    state.viewport = Some(*v);
                    pass.set_viewport(v.x, v.y, v.width, v.height, 0.0, 1.0);
                }
                Recorded::StencilReference(reference) => {
                    state.stencil_reference = Some(*reference);
                    pass.set_stencil_reference(*reference);
                }
                Recorded::Pipeline(handle) => {
                    state.pipeline = Some(*handle);
                    if let Some(p) = self.pipelines.get(*handle).and_then(|p| p.pipeline.as_ref()) {
                        pass.set_pipeline(p);
                    }
                }
                Recorded::Bind(group, binding, offsets) => {
                    if let Some(slot) = state.binds.get_mut(*group as usize) {
                        *slot = Some((*binding, offsets.clone()));
                    }
                    if let Some(bind_group) = self.bindings.get(*binding) {
                        pass.set_bind_group(*group, bind_group, offsets);
                    }
                }
                Recorded::Draw(vertex_count, instance_count) => {
                    pass.draw(0..*vertex_count, 0..*instance_count);
                }
                _ => {}
            }
        }
    }

    fn encode_copy(&self, encoder: &mut wgpu::CommandEncoder, src: TextureHandle, dst: TextureHandle) {
        let (Some(s), Some(d)) = (self.textures.get(src), self.textures.get(dst)) else {
            return;
        };
        let (Some(src_texture), Some(dst_texture)) = (&s.texture, &d.texture) else {
            return;
        };
        encoder.copy_texture_to_texture(
            src_texture.as_image_copy(),
            dst_texture.as_image_copy(),
            wgpu::Extent3d {
                width: s.desc.width,
                height: s.desc.height,
                depth_or_array_layers: s.desc.array_layers,
            },
        );
    }

    fn encode_texel_copy(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        src: TextureHandle,
        x: u32,
        y: u32,
        staging: TextureHandle,
    ) -> bool {
        let (Some(s), Some(d)) = (self.textures.get(src), self.textures.get(staging)) else {
            return false;
        };
        let (Some(src_texture), Some(buffer)) = (&s.texture, &d.staging) else {
            return false;
        };
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: src_texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        true
    }
}

impl GpuDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> std::result::Result<TextureHandle, DeviceError> {
        let limit = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > limit || desc.height > limit {
            return Err(DeviceError::TextureCreation {
                label: desc.label.clone(),
                reason: format!("{}x{} outside 1..={limit}", desc.width, desc.height),
            });
        }

        if desc.kind == TextureKind::Staging {
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label.as_str()),
                size: STAGING_BUFFER_SIZE,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            return Ok(self.textures.insert(GpuTexture {
                desc: desc.clone(),
                texture: None,
                staging: Some(buffer),
                views: FxHashMap::default(),
                imported: false,
            }));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label.as_str()),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.array_layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: desc.usage(),
            view_formats: &[],
        });
        Ok(self.textures.insert(GpuTexture {
            desc: desc.clone(),
            texture: Some(texture),
            staging: None,
            views: FxHashMap::default(),
            imported: false,
        }))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(entry) = self.textures.remove(texture) {
            self.mapped.remove(&texture);
            if !entry.imported
                && let Some(t) = entry.texture
            {
                t.destroy();
            }
        }
    }

    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(texture).map(|t| t.desc.clone())
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> std::result::Result<BufferHandle, DeviceError> {
        if desc.size == 0 || desc.size > self.device.limits().max_buffer_size {
            return Err(DeviceError::BufferCreation {
                label: desc.label.clone(),
                reason: format!("size {} outside device limits", desc.size),
            });
        }
        let usage = match desc.kind {
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
            BufferKind::Storage => wgpu::BufferUsages::STORAGE,
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
        } | wgpu::BufferUsages::COPY_DST;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label.as_str()),
            size: desc.size,
            usage,
            mapped_at_creation: false,
        });
        Ok(self.buffers.insert((desc.clone(), buffer)))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some((_, b)) = self.buffers.remove(buffer) {
            b.destroy();
        }
    }

    fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(buffer).map(|(d, _)| d.size)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> std::result::Result<PipelineHandle, DeviceError> {
        let Some(factory) = self.factories.get(desc.shader).cloned() else {
            return Err(DeviceError::PipelineCreation {
                label: desc.label.clone(),
                reason: format!("no factory registered for shader '{}'", desc.shader),
            });
        };
        let handle = self.pipelines.insert(GpuPipeline {
            label: desc.label.clone(),
            status: PipelineStatus::Pending,
            pipeline: None,
        });
        let job = CompileJob {
            handle,
            desc: desc.clone(),
            factory,
        };
        if self.compile_tx.send(job).is_err() {
            self.pipelines.remove(handle);
            return Err(DeviceError::PipelineCreation {
                label: desc.label.clone(),
                reason: "compile thread has stopped".to_string(),
            });
        }
        Ok(handle)
    }

    fn pipeline_status(&mut self, pipeline: PipelineHandle) -> PipelineStatus {
        self.drain_compiled();
        self.pipelines
            .get(pipeline)
            .map_or(PipelineStatus::Failed, |p| p.status)
    }

    fn create_binding(&mut self, desc: &BindingDesc) -> std::result::Result<BindingHandle, DeviceError> {
        self.drain_compiled();
        let layout = match self.pipelines.get(desc.pipeline) {
            None => return Err(DeviceError::InvalidHandle("pipeline")),
            Some(GpuPipeline { pipeline: Some(p), .. }) => p.get_bind_group_layout(desc.group),
            Some(p) => return Err(DeviceError::PipelineNotReady(p.label.clone())),
        };

        for entry in &desc.entries {
            match *entry {
                BindingEntry::Texture(view) => self.ensure_view(view),
                BindingEntry::Sampler(kind) => self.ensure_sampler(kind),
                BindingEntry::Buffer { .. } => {}
            }
        }

        let mut entries: SmallVec<[wgpu::BindGroupEntry<'_>; 8]> = SmallVec::new();
        for (index, entry) in desc.entries.iter().enumerate() {
            let resource = match *entry {
                BindingEntry::Texture(view) => self.view(view).map(wgpu::BindingResource::TextureView),
                BindingEntry::Buffer { buffer, offset, size } => self.buffers.get(buffer).map(|(_, b)| {
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: b,
                        offset,
                        size: size.and_then(wgpu::BufferSize::new),
                    })
                }),
                BindingEntry::Sampler(kind) => self.samplers.get(&kind).map(wgpu::BindingResource::Sampler),
            };
            let Some(resource) = resource else {
                return Err(DeviceError::BindingCreation {
                    label: desc.label.clone(),
                    reason: format!("entry {index} references a destroyed resource"),
                });
            };
            entries.push(wgpu::BindGroupEntry {
                binding: index as u32,
                resource,
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(desc.label.as_str()),
            layout: &layout,
            entries: &entries,
        });
        drop(entries);
        Ok(self.bindings.insert(bind_group))
    }

    fn destroy_binding(&mut self, binding: BindingHandle) {
        self.bindings.remove(binding);
    }

    fn set_render_targets(&mut self, colors: &[TextureView], depth: Option<TextureView>) {
        for view in colors.iter().copied().chain(depth) {
            self.ensure_view(view);
        }
        self.commands
            .push(Recorded::SetRenderTargets(colors.iter().copied().collect(), depth));
    }

    fn clear_render_target(&mut self, view: TextureView, color: wgpu::Color) {
        self.ensure_view(view);
        self.commands.push(Recorded::ClearColor(view, color));
    }

    fn clear_depth_stencil(&mut self, view: TextureView, depth: f32, stencil: u32) {
        self.ensure_view(view);
        self.commands.push(Recorded::ClearDepth(view, depth, stencil));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.commands.push(Recorded::Viewport(viewport));
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.commands.push(Recorded::StencilReference(reference));
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.commands.push(Recorded::Pipeline(pipeline));
    }

    fn bind(&mut self, group: u32, binding: BindingHandle, dynamic_offsets: &[u32]) {
        self.commands
            .push(Recorded::Bind(group, binding, dynamic_offsets.iter().copied().collect()));
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.commands.push(Recorded::Draw(vertex_count, instance_count));
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) {
        self.commands.push(Recorded::Copy(src, dst));
    }

    fn copy_texel_to_staging(&mut self, src: TextureHandle, x: u32, y: u32, staging: TextureHandle) {
        self.commands.push(Recorded::CopyTexel(src, x, y, staging));
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        match self.buffers.get(buffer) {
            Some((_, b)) => self.queue.write_buffer(b, offset, data),
            None => warn!("WgpuDevice: update_buffer on a destroyed buffer"),
        }
    }

    fn transition(&mut self, _resource: ResourceRef, _state: ResourceState) {
        // wgpu tracks resource usage itself.
    }

    fn submit(&mut self) {
        self.drain_compiled();
        let commands = std::mem::take(&mut self.commands);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Strata Frame Encoder"),
            });

        let mut state = ReplayState::default();
        let mut staged: SmallVec<[TextureHandle; 4]> = SmallVec::new();
        let mut i = 0;
        while i < commands.len() {
            match &commands[i] {
                Recorded::SetRenderTargets(colors, depth) => {
                    state.colors.clone_from(colors);
                    state.depth = *depth;
                    i += 1;
                }
                Recorded::ClearColor(..) | Recorded::ClearDepth(..) => {
                    self.encode_clear(&mut encoder, &commands[i]);
                    i += 1;
                }
                Recorded::Copy(src, dst) => {
                    self.encode_copy(&mut encoder, *src, *dst);
                    i += 1;
                }
                Recorded::CopyTexel(src, x, y, staging) => {
                    if self.encode_texel_copy(&mut encoder, *src, *x, *y, *staging) {
                        staged.push(*staging);
                    }
                    i += 1;
                }
                _ => {
                    let end = commands[i..]
                        .iter()
                        .position(|c| !c.is_pass_command())
                        .map_or(commands.len(), |offset| i + offset);
                    let run = &commands[i..end];
                    if run.iter().any(|c| matches!(c, Recorded::Draw(..))) {
                        self.encode_pass(&mut encoder, &mut state, run);
                    } else {
                        // State-only run: remember it for the next pass.
                        for command in run {
                            match command {
                                Recorded::Viewport(v) => state.viewport = Some(*v),
                                Recorded::StencilReference(r) => state.stencil_reference = Some(*r),
                                Recorded::Pipeline(p) => state.pipeline = Some(*p),
                                Recorded::Bind(group, binding, offsets) => {
                                    if let Some(slot) = state.binds.get_mut(*group as usize) {
                                        *slot = Some((*binding, offsets.clone()));
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    i = end;
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));

        for handle in staged {
            let Some(buffer) = self.textures.get(handle).and_then(|t| t.staging.as_ref()) else {
                continue;
            };
            let tx = self.map_tx.clone();
            buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send((handle, result.is_ok()));
            });
        }
    }

    fn read_staging(&mut self, staging: TextureHandle) -> Option<SmallVec<[u8; 16]>> {
        let _ = self.device.poll(wgpu::PollType::Poll);
        while let Ok((handle, ok)) = self.map_rx.try_recv() {
            if ok {
                self.mapped.insert(handle);
            } else {
                warn!("WgpuDevice: staging map failed");
            }
        }
        if !self.mapped.remove(&staging) {
            return None;
        }

        let entry = self.textures.get(staging)?;
        let buffer = entry.staging.as_ref()?;
        let texel_size = entry.desc.format.block_copy_size(None).unwrap_or(4) as usize;
        let data = {
            let mapped = buffer.slice(..).get_mapped_range();
            mapped[..texel_size.min(16)].iter().copied().collect()
        };
        buffer.unmap();
        Some(data)
    }
}
