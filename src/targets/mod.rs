//! Render Target Set
//!
//! Owns every long-lived offscreen texture of the graph, addressed by logical
//! [`TargetSlot`]s that tasks register once and re-resolve every frame.
//!
//! # Resolution
//!
//! ```text
//!  resolve(slot, format, output)
//!    format == None            → inactive, no view
//!    output missing / stale    → error!, no view
//!    backing matches request   → same view (no allocation)
//!    otherwise                 → create, destroy old, info!, new view
//! ```
//!
//! Slots hold `(format, width, height, layers)` next to the texture so the
//! check is a plain comparison. Temporal history pairs swap slot contents
//! through [`RenderTargetSet::swap`] or are tracked with [`PingPong`].

mod ping_pong;

use log::{error, info};
use slotmap::SlotMap;

use crate::device::{GpuDevice, TextureDesc, TextureHandle, TextureView};

pub use ping_pong::PingPong;

slotmap::new_key_type! {
    /// Stable identity of a logical render target.
    pub struct TargetSlot;
}

/// Requested shape of a target.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct TargetShape {
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    layers: u32,
}

#[derive(Debug)]
struct RenderTarget {
    name: &'static str,
    texture: Option<TextureHandle>,
    shape: Option<TargetShape>,
    view: Option<TextureView>,
}

/// Lazily (re)allocated, format/size-tracked render targets.
#[derive(Debug, Default)]
pub struct RenderTargetSet {
    slots: SlotMap<TargetSlot, RenderTarget>,
    allocations: u64,
}

impl RenderTargetSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an empty placeholder slot.
    pub fn register(&mut self, name: &'static str) -> TargetSlot {
        self.slots.insert(RenderTarget {
            name,
            texture: None,
            shape: None,
            view: None,
        })
    }

    /// Resolves `slot` to `format` at the output target's size.
    pub fn resolve(
        &mut self,
        device: &mut dyn GpuDevice,
        slot: TargetSlot,
        format: Option<wgpu::TextureFormat>,
        output: Option<TextureView>,
    ) -> Option<TextureView> {
        let format = format?;
        let name = self.slots.get(slot).map_or("<unregistered>", |t| t.name);

        let Some(output) = output else {
            error!("RenderTargetSet: cannot size '{name}', no output target");
            return None;
        };
        let Some(desc) = device.texture_desc(output.texture) else {
            error!("RenderTargetSet: cannot size '{name}', output texture is gone");
            return None;
        };
        self.resolve_sized(device, slot, Some(format), desc.width, desc.height, 1)
    }

    /// Resolves `slot` to an explicit size and layer count.
    pub fn resolve_sized(
        &mut self,
        device: &mut dyn GpuDevice,
        slot: TargetSlot,
        format: Option<wgpu::TextureFormat>,
        width: u32,
        height: u32,
        layers: u32,
    ) -> Option<TextureView> {
        let format = format?;
        let Some(target) = self.slots.get_mut(slot) else {
            error!("RenderTargetSet: resolve on an unregistered slot");
            return None;
        };

        let shape = TargetShape {
            format,
            width,
            height,
            layers: layers.max(1),
        };
        if target.shape == Some(shape)
            && let Some(view) = target.view
            && target.texture.is_some_and(|t| device.texture_desc(t).is_some())
        {
            return Some(view);
        }

        let desc = TextureDesc::render_target(target.name, width, height, format).with_layers(shape.layers);
        let texture = match device.create_texture(&desc) {
            Ok(texture) => texture,
            Err(e) => {
                error!("RenderTargetSet: {e}");
                return None;
            }
        };
        if let Some(old) = target.texture.replace(texture) {
            device.destroy_texture(old);
        }
        let view = TextureView::default_for(texture, format);
        target.shape = Some(shape);
        target.view = Some(view);
        self.allocations += 1;
        info!(
            "RenderTargetSet: allocated '{}' {}x{}x{} {:?}",
            target.name, width, height, shape.layers, format
        );
        Some(view)
    }

    /// Default view of the current backing texture.
    #[must_use]
    pub fn view(&self, slot: TargetSlot) -> Option<TextureView> {
        self.slots.get(slot)?.view
    }

    #[must_use]
    pub fn texture(&self, slot: TargetSlot) -> Option<TextureHandle> {
        self.slots.get(slot)?.texture
    }

    /// `(width, height)` of the backing texture.
    #[must_use]
    pub fn extent(&self, slot: TargetSlot) -> Option<(u32, u32)> {
        let shape = self.slots.get(slot)?.shape?;
        Some((shape.width, shape.height))
    }

    #[must_use]
    pub fn name(&self, slot: TargetSlot) -> Option<&'static str> {
        self.slots.get(slot).map(|t| t.name)
    }

    /// Exchanges the backing textures of two slots without touching data.
    pub fn swap(&mut self, a: TargetSlot, b: TargetSlot) {
        let Some([ta, tb]) = self.slots.get_disjoint_mut([a, b]) else {
            return;
        };
        std::mem::swap(&mut ta.texture, &mut tb.texture);
        std::mem::swap(&mut ta.shape, &mut tb.shape);
        std::mem::swap(&mut ta.view, &mut tb.view);
    }

    /// Number of textures created since construction.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.allocations
    }

    /// Destroys the backing texture of `slot`, keeping the slot registered.
    pub fn release(&mut self, device: &mut dyn GpuDevice, slot: TargetSlot) {
        if let Some(target) = self.slots.get_mut(slot) {
            if let Some(texture) = target.texture.take() {
                device.destroy_texture(texture);
            }
            target.shape = None;
            target.view = None;
        }
    }

    /// Destroys every backing texture. Returns how many were freed.
    pub fn release_all(&mut self, device: &mut dyn GpuDevice) -> usize {
        let mut freed = 0;
        for target in self.slots.values_mut() {
            if let Some(texture) = target.texture.take() {
                device.destroy_texture(texture);
                freed += 1;
            }
            target.shape = None;
            target.view = None;
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    const RGBA16: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

    fn output(device: &mut HeadlessDevice, width: u32, height: u32) -> TextureView {
        let desc = TextureDesc::render_target("output", width, height, wgpu::TextureFormat::Rgba8Unorm);
        let texture = device.create_texture(&desc).unwrap();
        TextureView::default_for(texture, desc.format)
    }

    #[test]
    fn identical_requests_reuse_the_texture() {
        let mut device = HeadlessDevice::new();
        let out = output(&mut device, 64, 32);
        let mut set = RenderTargetSet::new();
        let slot = set.register("scene color");

        let first = set.resolve(&mut device, slot, Some(RGBA16), Some(out));
        let second = set.resolve(&mut device, slot, Some(RGBA16), Some(out));
        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(set.allocation_count(), 1);
        assert_eq!(set.extent(slot), Some((64, 32)));
    }

    #[test]
    fn format_change_reallocates_and_frees() {
        let mut device = HeadlessDevice::new();
        let out = output(&mut device, 16, 16);
        let mut set = RenderTargetSet::new();
        let slot = set.register("normal");

        let a = set.resolve(&mut device, slot, Some(RGBA16), Some(out)).unwrap();
        let b = set
            .resolve(&mut device, slot, Some(wgpu::TextureFormat::Rgba8Unorm), Some(out))
            .unwrap();
        assert_ne!(a, b);
        assert!(device.texture_desc(a.texture).is_none());
        assert_eq!(set.allocation_count(), 2);
    }

    #[test]
    fn width_change_reallocates_and_frees() {
        let mut device = HeadlessDevice::new();
        let mut set = RenderTargetSet::new();
        let slot = set.register("mesh id");
        let format = Some(wgpu::TextureFormat::R32Uint);

        let a = set.resolve_sized(&mut device, slot, format, 64, 32, 1).unwrap();
        let b = set.resolve_sized(&mut device, slot, format, 80, 32, 1).unwrap();
        assert_ne!(a, b);
        assert!(device.texture_desc(a.texture).is_none());
        assert_eq!(set.extent(slot), Some((80, 32)));
        assert_eq!(set.allocation_count(), 2);

        set.resolve_sized(&mut device, slot, format, 80, 32, 1);
        assert_eq!(set.allocation_count(), 2);
    }

    #[test]
    fn unknown_format_is_inactive() {
        let mut device = HeadlessDevice::new();
        let out = output(&mut device, 16, 16);
        let mut set = RenderTargetSet::new();
        let slot = set.register("ibl");
        assert_eq!(set.resolve(&mut device, slot, None, Some(out)), None);
        assert_eq!(set.allocation_count(), 0);
    }

    #[test]
    fn missing_output_or_refused_texture_yields_none() {
        let mut device = HeadlessDevice::new();
        device.max_texture_dimension = 128;
        let mut set = RenderTargetSet::new();
        let slot = set.register("material");

        assert_eq!(set.resolve(&mut device, slot, Some(RGBA16), None), None);
        assert_eq!(
            set.resolve_sized(&mut device, slot, Some(RGBA16), 256, 256, 1),
            None
        );
        assert_eq!(set.allocation_count(), 0);
    }

    #[test]
    fn swap_exchanges_identities() {
        let mut device = HeadlessDevice::new();
        let out = output(&mut device, 8, 8);
        let mut set = RenderTargetSet::new();
        let a = set.register("depth 0");
        let b = set.register("depth 1");
        let depth = Some(wgpu::TextureFormat::Depth24PlusStencil8);
        let va = set.resolve(&mut device, a, depth, Some(out)).unwrap();
        let vb = set.resolve(&mut device, b, depth, Some(out)).unwrap();

        set.swap(a, b);
        assert_eq!(set.view(a), Some(vb));
        assert_eq!(set.view(b), Some(va));
        // Swapped contents still match the request: no reallocation.
        set.resolve(&mut device, a, depth, Some(out));
        assert_eq!(set.allocation_count(), 2);
    }
}
