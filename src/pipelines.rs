//! Lazily created pipelines and cached bindings.
//!
//! Tasks build pipelines on first use and rebuild them only when the
//! descriptor changes (a target format changed, the render mode switched).
//! Bindings are cached per named slot and replaced when their entries change.

use std::hash::{Hash, Hasher};

use log::{debug, error};
use rustc_hash::{FxHashMap, FxHasher};

use crate::device::{
    BindingDesc, BindingHandle, GpuDevice, PipelineDesc, PipelineHandle, PipelineStatus,
};

// ─── Lazy Pipeline ────────────────────────────────────────────────────────────

/// One pipeline slot, recreated when its descriptor changes.
#[derive(Debug, Default)]
pub struct LazyPipeline {
    desc: Option<PipelineDesc>,
    handle: Option<PipelineHandle>,
    failed: bool,
}

impl LazyPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules compilation of `desc` unless the same descriptor is already
    /// scheduled. A descriptor the device refused is not retried.
    pub fn ensure(&mut self, device: &mut dyn GpuDevice, desc: PipelineDesc) {
        if self.desc.as_ref() == Some(&desc) {
            return;
        }
        match device.create_pipeline(&desc) {
            Ok(handle) => {
                debug!("LazyPipeline: scheduled '{}'", desc.label);
                self.handle = Some(handle);
                self.failed = false;
            }
            Err(e) => {
                error!("LazyPipeline: {e}");
                self.handle = None;
                self.failed = true;
            }
        }
        self.desc = Some(desc);
    }

    /// The pipeline handle once compilation finished, `None` while pending
    /// or after a failure.
    pub fn ready(&mut self, device: &mut dyn GpuDevice) -> Option<PipelineHandle> {
        let handle = self.handle?;
        match device.pipeline_status(handle) {
            PipelineStatus::Ready => Some(handle),
            PipelineStatus::Pending => None,
            PipelineStatus::Failed => {
                if !self.failed {
                    let label = self.desc.as_ref().map_or("<unknown>", |d| d.label.as_str());
                    error!("LazyPipeline: '{label}' failed to compile");
                    self.failed = true;
                }
                None
            }
        }
    }

    #[must_use]
    pub fn handle(&self) -> Option<PipelineHandle> {
        self.handle
    }

    #[must_use]
    pub fn desc(&self) -> Option<&PipelineDesc> {
        self.desc.as_ref()
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed
    }
}

// ─── Binding Cache ────────────────────────────────────────────────────────────

struct CachedBinding {
    hash: u64,
    handle: BindingHandle,
}

/// Bindings keyed by a caller-chosen slot name and a hash of their entries.
#[derive(Default)]
pub struct BindingCache {
    slots: FxHashMap<&'static str, CachedBinding>,
    created: u64,
}

impl BindingCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached binding for `slot` if `desc` is unchanged, otherwise
    /// destroys the old one and creates a new one.
    pub fn get(
        &mut self,
        device: &mut dyn GpuDevice,
        slot: &'static str,
        desc: &BindingDesc,
    ) -> Option<BindingHandle> {
        let mut hasher = FxHasher::default();
        desc.hash(&mut hasher);
        let hash = hasher.finish();

        if let Some(cached) = self.slots.get(slot)
            && cached.hash == hash
        {
            return Some(cached.handle);
        }

        if let Some(old) = self.slots.remove(slot) {
            device.destroy_binding(old.handle);
        }
        match device.create_binding(desc) {
            Ok(handle) => {
                self.created += 1;
                self.slots.insert(slot, CachedBinding { hash, handle });
                Some(handle)
            }
            Err(e) => {
                error!("BindingCache: {e}");
                None
            }
        }
    }

    /// Drops the binding of one slot.
    pub fn invalidate(&mut self, device: &mut dyn GpuDevice, slot: &'static str) {
        if let Some(old) = self.slots.remove(slot) {
            device.destroy_binding(old.handle);
        }
    }

    pub fn clear(&mut self, device: &mut dyn GpuDevice) {
        for (_, cached) in self.slots.drain() {
            device.destroy_binding(cached.handle);
        }
    }

    /// Bindings created since construction.
    #[must_use]
    pub fn created_count(&self) -> u64 {
        self.created
    }
}
