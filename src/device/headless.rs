//! Headless Device
//!
//! A CPU-only [`GpuDevice`] that validates handles and records every command.
//! It backs tests, benches and dry runs of graph configurations on machines
//! without a GPU.
//!
//! Behaviour that mirrors a real device:
//!
//! - Texture requests larger than [`HeadlessDevice::max_texture_dimension`]
//!   are refused.
//! - Pipelines report `Pending` for a configurable number of polls before
//!   becoming `Ready` (asynchronous compilation). Shaders can be marked as
//!   failing to compile.
//! - Staging copies complete a configurable number of submissions after they
//!   were recorded.

use log::{trace, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;
use smallvec::SmallVec;

use super::{
    BindingDesc, BindingEntry, BindingHandle, BufferDesc, BufferHandle, BufferKind, GpuDevice, PipelineDesc,
    PipelineHandle, PipelineStatus, ResourceRef, ResourceState, TextureDesc, TextureHandle,
    TextureKind, TextureView, Viewport,
};
use crate::errors::DeviceError;

/// One recorded device command.
#[derive(Clone, PartialEq, Debug)]
pub enum DeviceCommand {
    SetRenderTargets {
        colors: SmallVec<[TextureView; 8]>,
        depth: Option<TextureView>,
    },
    ClearRenderTarget {
        view: TextureView,
        color: wgpu::Color,
    },
    ClearDepthStencil {
        view: TextureView,
        depth: f32,
        stencil: u32,
    },
    SetViewport(Viewport),
    SetStencilReference(u32),
    SetPipeline(PipelineHandle),
    Bind {
        group: u32,
        binding: BindingHandle,
        dynamic_offsets: SmallVec<[u32; 4]>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    CopyTexture {
        src: TextureHandle,
        dst: TextureHandle,
    },
    CopyTexelToStaging {
        src: TextureHandle,
        x: u32,
        y: u32,
        staging: TextureHandle,
    },
    UpdateBuffer {
        buffer: BufferHandle,
        offset: u64,
        len: usize,
    },
    Transition {
        resource: ResourceRef,
        state: ResourceState,
    },
    Submit,
}

struct HeadlessPipeline {
    desc: PipelineDesc,
    polls_remaining: u32,
    failed: bool,
}

struct HeadlessBuffer {
    desc: BufferDesc,
    contents: Vec<u8>,
}

struct StagingCopy {
    ready_at_submission: u64,
    data: SmallVec<[u8; 16]>,
}

/// CPU-only validation backend.
pub struct HeadlessDevice {
    textures: SlotMap<TextureHandle, TextureDesc>,
    buffers: SlotMap<BufferHandle, HeadlessBuffer>,
    pipelines: SlotMap<PipelineHandle, HeadlessPipeline>,
    bindings: SlotMap<BindingHandle, BindingDesc>,

    commands: Vec<DeviceCommand>,
    staging: FxHashMap<TextureHandle, StagingCopy>,
    texel_fill: FxHashMap<String, SmallVec<[u8; 16]>>,
    failing_shaders: FxHashSet<&'static str>,

    current_pipeline: Option<PipelineHandle>,
    submissions: u64,
    textures_created: u64,
    validation_errors: u64,

    /// Largest width/height the device accepts.
    pub max_texture_dimension: u32,
    /// Polls a new pipeline reports `Pending` before it becomes `Ready`.
    pub pipeline_latency: u32,
    /// Submissions between a staging copy and its data becoming readable.
    pub readback_latency: u64,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            textures: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            bindings: SlotMap::with_key(),
            commands: Vec::with_capacity(256),
            staging: FxHashMap::default(),
            texel_fill: FxHashMap::default(),
            failing_shaders: FxHashSet::default(),
            current_pipeline: None,
            submissions: 0,
            textures_created: 0,
            validation_errors: 0,
            max_texture_dimension: 8192,
            pipeline_latency: 0,
            readback_latency: 1,
        }
    }

    /// Makes every pipeline using `shader` fail to compile.
    pub fn fail_shader(&mut self, shader: &'static str) {
        self.failing_shaders.insert(shader);
    }

    /// Sets the texel value staging copies read from textures labelled `label`.
    pub fn fill_texels(&mut self, label: impl Into<String>, bytes: &[u8]) {
        self.texel_fill.insert(label.into(), bytes.iter().copied().collect());
    }

    // ── Inspection ─────────────────────────────────────────────────────────

    /// Every command recorded since construction (or the last [`clear_commands`](Self::clear_commands)).
    #[must_use]
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Number of draw commands in the log.
    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::Draw { .. }))
            .count()
    }

    /// Total number of textures ever created.
    #[must_use]
    pub fn textures_created(&self) -> u64 {
        self.textures_created
    }

    #[must_use]
    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Commands that referenced stale handles or drew without a ready pipeline.
    #[must_use]
    pub fn validation_errors(&self) -> u64 {
        self.validation_errors
    }

    #[must_use]
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    /// Shader name of a pipeline, for asserting which pipelines were bound.
    #[must_use]
    pub fn pipeline_shader(&self, pipeline: PipelineHandle) -> Option<&'static str> {
        self.pipelines.get(pipeline).map(|p| p.desc.shader)
    }

    #[must_use]
    pub fn texture_label(&self, texture: TextureHandle) -> Option<&str> {
        self.textures.get(texture).map(|d| d.label.as_str())
    }

    /// Bytes last written to a buffer.
    #[must_use]
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(buffer).map(|b| b.contents.as_slice())
    }

    /// Shader names of every `SetPipeline` in the log, in order.
    #[must_use]
    pub fn bound_shaders(&self) -> Vec<&'static str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::SetPipeline(p) => self.pipeline_shader(*p),
                _ => None,
            })
            .collect()
    }

    // ── Validation ─────────────────────────────────────────────────────────

    fn check_view(&mut self, view: TextureView, what: &str) {
        if !self.textures.contains_key(view.texture) {
            warn!("HeadlessDevice: {what} references a destroyed texture");
            self.validation_errors += 1;
        }
    }

    fn record(&mut self, command: DeviceCommand) {
        trace!("HeadlessDevice: {command:?}");
        self.commands.push(command);
    }
}

impl GpuDevice for HeadlessDevice {
    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, DeviceError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(DeviceError::TextureCreation {
                label: desc.label.clone(),
                reason: "zero-sized extent".to_string(),
            });
        }
        if desc.width > self.max_texture_dimension || desc.height > self.max_texture_dimension {
            return Err(DeviceError::TextureCreation {
                label: desc.label.clone(),
                reason: format!(
                    "{}x{} exceeds the device limit of {}",
                    desc.width, desc.height, self.max_texture_dimension
                ),
            });
        }
        self.textures_created += 1;
        Ok(self.textures.insert(desc.clone()))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(texture);
        self.staging.remove(&texture);
    }

    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(texture).cloned()
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError> {
        if desc.size == 0 {
            return Err(DeviceError::BufferCreation {
                label: desc.label.clone(),
                reason: "zero-sized buffer".to_string(),
            });
        }
        // Storage buffers are GPU-written only; their contents are not mirrored.
        let contents = match desc.kind {
            BufferKind::Storage => Vec::new(),
            BufferKind::Uniform | BufferKind::Vertex => vec![0; desc.size as usize],
        };
        Ok(self.buffers.insert(HeadlessBuffer {
            desc: desc.clone(),
            contents,
        }))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(buffer);
    }

    fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(buffer).map(|b| b.desc.size)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, DeviceError> {
        Ok(self.pipelines.insert(HeadlessPipeline {
            desc: desc.clone(),
            polls_remaining: self.pipeline_latency,
            failed: self.failing_shaders.contains(desc.shader),
        }))
    }

    fn pipeline_status(&mut self, pipeline: PipelineHandle) -> PipelineStatus {
        let Some(p) = self.pipelines.get_mut(pipeline) else {
            return PipelineStatus::Failed;
        };
        if p.failed {
            return PipelineStatus::Failed;
        }
        if p.polls_remaining > 0 {
            p.polls_remaining -= 1;
            return PipelineStatus::Pending;
        }
        PipelineStatus::Ready
    }

    fn create_binding(&mut self, desc: &BindingDesc) -> Result<BindingHandle, DeviceError> {
        match self.pipelines.get(desc.pipeline) {
            None => return Err(DeviceError::InvalidHandle("pipeline")),
            Some(p) if p.failed || p.polls_remaining > 0 => {
                return Err(DeviceError::PipelineNotReady(p.desc.label.clone()));
            }
            Some(_) => {}
        }
        for entry in &desc.entries {
            let live = match entry {
                BindingEntry::Texture(view) => self.textures.contains_key(view.texture),
                BindingEntry::Buffer { buffer, .. } => self.buffers.contains_key(*buffer),
                BindingEntry::Sampler(_) => true,
            };
            if !live {
                return Err(DeviceError::BindingCreation {
                    label: desc.label.clone(),
                    reason: "entry references a destroyed resource".to_string(),
                });
            }
        }
        Ok(self.bindings.insert(desc.clone()))
    }

    fn destroy_binding(&mut self, binding: BindingHandle) {
        self.bindings.remove(binding);
    }

    fn set_render_targets(&mut self, colors: &[TextureView], depth: Option<TextureView>) {
        for view in colors {
            self.check_view(*view, "set_render_targets");
        }
        if let Some(view) = depth {
            self.check_view(view, "set_render_targets");
        }
        self.record(DeviceCommand::SetRenderTargets {
            colors: colors.iter().copied().collect(),
            depth,
        });
    }

    fn clear_render_target(&mut self, view: TextureView, color: wgpu::Color) {
        self.check_view(view, "clear_render_target");
        self.record(DeviceCommand::ClearRenderTarget { view, color });
    }

    fn clear_depth_stencil(&mut self, view: TextureView, depth: f32, stencil: u32) {
        self.check_view(view, "clear_depth_stencil");
        self.record(DeviceCommand::ClearDepthStencil { view, depth, stencil });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.record(DeviceCommand::SetViewport(viewport));
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.record(DeviceCommand::SetStencilReference(reference));
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.current_pipeline = Some(pipeline);
        self.record(DeviceCommand::SetPipeline(pipeline));
    }

    fn bind(&mut self, group: u32, binding: BindingHandle, dynamic_offsets: &[u32]) {
        if !self.bindings.contains_key(binding) {
            warn!("HeadlessDevice: bind references a destroyed binding");
            self.validation_errors += 1;
        }
        self.record(DeviceCommand::Bind {
            group,
            binding,
            dynamic_offsets: dynamic_offsets.iter().copied().collect(),
        });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        let ready = self
            .current_pipeline
            .and_then(|p| self.pipelines.get(p))
            .is_some_and(|p| !p.failed && p.polls_remaining == 0);
        if !ready {
            warn!("HeadlessDevice: draw without a ready pipeline");
            self.validation_errors += 1;
        }
        self.record(DeviceCommand::Draw { vertex_count, instance_count });
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) {
        match (self.textures.get(src), self.textures.get(dst)) {
            (Some(s), Some(d)) => {
                if s.width != d.width || s.height != d.height || s.format != d.format {
                    warn!(
                        "HeadlessDevice: copy_texture between mismatched textures '{}' -> '{}'",
                        s.label, d.label
                    );
                    self.validation_errors += 1;
                }
            }
            _ => {
                warn!("HeadlessDevice: copy_texture references a destroyed texture");
                self.validation_errors += 1;
            }
        }
        self.record(DeviceCommand::CopyTexture { src, dst });
    }

    fn copy_texel_to_staging(&mut self, src: TextureHandle, x: u32, y: u32, staging: TextureHandle) {
        let Some(src_desc) = self.textures.get(src) else {
            warn!("HeadlessDevice: staging copy from a destroyed texture");
            self.validation_errors += 1;
            return;
        };
        if !matches!(self.textures.get(staging), Some(d) if d.kind == TextureKind::Staging) {
            warn!("HeadlessDevice: staging copy into a non-staging texture");
            self.validation_errors += 1;
            return;
        }
        let data = self
            .texel_fill
            .get(&src_desc.label)
            .cloned()
            .unwrap_or_else(|| SmallVec::from_elem(0, 4));
        self.staging.insert(
            staging,
            StagingCopy {
                ready_at_submission: self.submissions + self.readback_latency,
                data,
            },
        );
        self.record(DeviceCommand::CopyTexelToStaging { src, x, y, staging });
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        match self.buffers.get_mut(buffer) {
            Some(b) if offset + data.len() as u64 <= b.desc.size => {
                let start = offset as usize;
                if let Some(dst) = b.contents.get_mut(start..start + data.len()) {
                    dst.copy_from_slice(data);
                }
            }
            Some(b) => {
                warn!(
                    "HeadlessDevice: update of {} bytes at {offset} overflows buffer '{}'",
                    data.len(),
                    b.desc.label
                );
                self.validation_errors += 1;
            }
            None => {
                warn!("HeadlessDevice: update_buffer references a destroyed buffer");
                self.validation_errors += 1;
            }
        }
        self.record(DeviceCommand::UpdateBuffer { buffer, offset, len: data.len() });
    }

    fn transition(&mut self, resource: ResourceRef, state: ResourceState) {
        self.record(DeviceCommand::Transition { resource, state });
    }

    fn submit(&mut self) {
        self.submissions += 1;
        self.current_pipeline = None;
        self.record(DeviceCommand::Submit);
    }

    fn read_staging(&mut self, staging: TextureHandle) -> Option<SmallVec<[u8; 16]>> {
        let copy = self.staging.get(&staging)?;
        if copy.ready_at_submission > self.submissions {
            return None;
        }
        self.staging.remove(&staging).map(|c| c.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_oversized_textures() {
        let mut device = HeadlessDevice::new();
        device.max_texture_dimension = 64;
        let desc = TextureDesc::render_target("big", 128, 32, wgpu::TextureFormat::Rgba8Unorm);
        assert!(matches!(
            device.create_texture(&desc),
            Err(DeviceError::TextureCreation { .. })
        ));
        assert_eq!(device.textures_created(), 0);
    }

    #[test]
    fn pipeline_latency_counts_polls() {
        let mut device = HeadlessDevice::new();
        device.pipeline_latency = 2;
        let desc = PipelineDesc::fullscreen("p", "test", &[wgpu::TextureFormat::Rgba8Unorm]);
        let pipeline = device.create_pipeline(&desc).unwrap();
        assert_eq!(device.pipeline_status(pipeline), PipelineStatus::Pending);
        assert_eq!(device.pipeline_status(pipeline), PipelineStatus::Pending);
        assert_eq!(device.pipeline_status(pipeline), PipelineStatus::Ready);
    }

    #[test]
    fn staging_reads_complete_after_submission() {
        let mut device = HeadlessDevice::new();
        let src = device
            .create_texture(&TextureDesc::render_target("ids", 8, 8, wgpu::TextureFormat::R32Uint))
            .unwrap();
        let staging = device
            .create_texture(&TextureDesc::staging("s", wgpu::TextureFormat::R32Uint))
            .unwrap();
        device.fill_texels("ids", &7u32.to_le_bytes());
        device.copy_texel_to_staging(src, 1, 1, staging);
        assert!(device.read_staging(staging).is_none());
        device.submit();
        assert_eq!(device.read_staging(staging).unwrap().as_slice(), &7u32.to_le_bytes());
        assert_eq!(device.validation_errors(), 0);
    }

    #[test]
    fn draw_without_pipeline_is_a_validation_error() {
        let mut device = HeadlessDevice::new();
        device.draw(3, 1);
        assert_eq!(device.validation_errors(), 1);
    }
}
