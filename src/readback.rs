//! Readback Ring
//!
//! A small recycling queue of 1×1 staging textures used to read single texels
//! (the primitive id under the cursor) back to the CPU without stalling:
//!
//! ```text
//!  acquire ──► copy_texel_to_staging ──► submit(frame)
//!     ▲                                       │
//!     │                               pending (FIFO)
//!     └──────── recycle ◄── first_completed ◄─┘
//! ```
//!
//! Copies complete in submission order, so only the oldest pending entry is
//! ever polled. When every staging texture is in flight, [`ReadbackRing::acquire`]
//! returns `None` and the caller skips the read for that frame.

use std::collections::VecDeque;

use log::{error, info, trace};
use smallvec::SmallVec;

use crate::device::{GpuDevice, TextureDesc, TextureHandle};

/// Completed readback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Readback {
    pub staging: TextureHandle,
    /// Frame in which the copy was recorded.
    pub frame: u64,
    pub bytes: SmallVec<[u8; 16]>,
}

pub struct ReadbackRing {
    label: &'static str,
    format: wgpu::TextureFormat,
    capacity: usize,
    free: Vec<TextureHandle>,
    pending: VecDeque<(TextureHandle, u64)>,
    allocated: usize,
}

impl ReadbackRing {
    #[must_use]
    pub fn new(label: &'static str, format: wgpu::TextureFormat, capacity: usize) -> Self {
        Self {
            label,
            format,
            capacity: capacity.max(1),
            free: Vec::new(),
            pending: VecDeque::new(),
            allocated: 0,
        }
    }

    /// A free staging texture, created on demand up to the ring capacity.
    pub fn acquire(&mut self, device: &mut dyn GpuDevice) -> Option<TextureHandle> {
        if let Some(staging) = self.free.pop() {
            return Some(staging);
        }
        if self.allocated >= self.capacity {
            trace!("ReadbackRing '{}': all {} staging textures in flight", self.label, self.capacity);
            return None;
        }
        match device.create_texture(&TextureDesc::staging(self.label, self.format)) {
            Ok(staging) => {
                self.allocated += 1;
                info!("ReadbackRing '{}': allocated staging texture {}/{}", self.label, self.allocated, self.capacity);
                Some(staging)
            }
            Err(e) => {
                error!("ReadbackRing '{}': {e}", self.label);
                None
            }
        }
    }

    /// Queues a staging texture whose copy was recorded in `frame`.
    pub fn submit(&mut self, staging: TextureHandle, frame: u64) {
        self.pending.push_back((staging, frame));
    }

    /// The oldest pending readback if its data has arrived. The staging
    /// texture stays checked out until [`recycle`](Self::recycle).
    pub fn first_completed(&mut self, device: &mut dyn GpuDevice) -> Option<Readback> {
        let &(staging, frame) = self.pending.front()?;
        let bytes = device.read_staging(staging)?;
        self.pending.pop_front();
        Some(Readback { staging, frame, bytes })
    }

    /// Returns a staging texture to the free list.
    pub fn recycle(&mut self, staging: TextureHandle) {
        self.free.push(staging);
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn release(&mut self, device: &mut dyn GpuDevice) {
        for staging in self.free.drain(..).chain(self.pending.drain(..).map(|(s, _)| s)) {
            device.destroy_texture(staging);
        }
        self.allocated = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    fn source(device: &mut HeadlessDevice) -> TextureHandle {
        device
            .create_texture(&TextureDesc::render_target("mesh id", 4, 4, wgpu::TextureFormat::R32Uint))
            .unwrap()
    }

    #[test]
    fn ring_recycles_after_completion() {
        let mut device = HeadlessDevice::new();
        device.fill_texels("mesh id", &8u32.to_le_bytes());
        let src = source(&mut device);
        let mut ring = ReadbackRing::new("pick", wgpu::TextureFormat::R32Uint, 2);

        let a = ring.acquire(&mut device).unwrap();
        device.copy_texel_to_staging(src, 1, 1, a);
        ring.submit(a, 1);
        assert!(ring.first_completed(&mut device).is_none());

        device.submit();
        let done = ring.first_completed(&mut device).unwrap();
        assert_eq!(done.staging, a);
        assert_eq!(done.frame, 1);
        assert_eq!(done.bytes.as_slice(), &8u32.to_le_bytes());
        ring.recycle(done.staging);

        assert_eq!(ring.acquire(&mut device), Some(a));
        assert_eq!(ring.allocated(), 1);
    }

    #[test]
    fn exhausted_ring_refuses() {
        let mut device = HeadlessDevice::new();
        let src = source(&mut device);
        let mut ring = ReadbackRing::new("pick", wgpu::TextureFormat::R32Uint, 1);

        let a = ring.acquire(&mut device).unwrap();
        device.copy_texel_to_staging(src, 0, 0, a);
        ring.submit(a, 1);
        assert!(ring.acquire(&mut device).is_none());

        ring.release(&mut device);
        assert_eq!(device.live_texture_count(), 1);
    }
}
