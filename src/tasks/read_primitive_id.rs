//! Read Primitive Id Task
//!
//! Picking without stalls. Each frame the task first harvests the oldest
//! readback that has completed, then (if a pick location is set) records a
//! one-texel copy of the mesh-id target into a free staging texture.
//!
//! The mesh-id target stores `primitive + 1`; zero is background. The
//! decoded result therefore lags the request by the readback latency.

use log::{debug, trace};

use super::require;
use crate::device::{ResourceRef, ResourceState};
use crate::graph::{
    DirtyBits, ExecuteContext, FrameContext, FrameKey, PickParams, Task, TaskParams,
    report_unexpected, report_wrong_params,
};
use crate::readback::ReadbackRing;
use crate::scene::PrimitiveId;

const NAME: &str = "ReadPrimitiveId";

pub struct ReadPrimitiveIdTask {
    location: Option<[u32; 2]>,
    ring: Option<ReadbackRing>,
    latest: Option<PrimitiveId>,
    latest_frame: Option<u64>,
}

impl ReadPrimitiveIdTask {
    /// `format` is the mesh-id format; `None` disables picking.
    #[must_use]
    pub fn new(format: Option<wgpu::TextureFormat>, capacity: usize) -> Self {
        Self {
            location: None,
            ring: format.map(|format| ReadbackRing::new("primitive id readback", format, capacity)),
            latest: None,
            latest_frame: None,
        }
    }

    /// Primitive under the pick location as of the last completed readback.
    #[must_use]
    pub fn latest(&self) -> Option<PrimitiveId> {
        self.latest
    }

    /// Frame in which the last completed readback was recorded.
    #[must_use]
    pub fn latest_frame(&self) -> Option<u64> {
        self.latest_frame
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.ring.as_ref().map_or(0, ReadbackRing::pending_len)
    }

    /// Decodes a mesh-id texel: `0` is background, otherwise `id + 1`.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<PrimitiveId> {
        let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        u32::from_le_bytes(raw).checked_sub(1)
    }
}

impl Task for ReadPrimitiveIdTask {
    fn name(&self) -> &str {
        NAME
    }

    fn sync(&mut self, params: &TaskParams, _frame: &mut FrameContext, dirty: &mut DirtyBits) {
        let TaskParams::ReadPrimitiveId(PickParams { location }) = params else {
            report_wrong_params(NAME, params, dirty);
            return;
        };
        self.location = *location;
        *dirty = DirtyBits::empty();
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        let Some(ring) = self.ring.as_mut() else {
            return;
        };

        // =====================================================================
        // 1. Harvest
        // =====================================================================
        if let Some(done) = ring.first_completed(&mut *ctx.device) {
            self.latest = Self::decode(&done.bytes);
            self.latest_frame = Some(done.frame);
            trace!("{NAME}: frame {} picked {:?}", done.frame, self.latest);
            ring.recycle(done.staging);
        }

        // =====================================================================
        // 2. Request
        // =====================================================================
        let Some([x, y]) = self.location else {
            return;
        };
        let Some(mesh_id) = require(NAME, ctx.frame.view(FrameKey::MeshId)) else {
            return;
        };
        let Some(desc) = ctx.device.texture_desc(mesh_id.texture) else {
            report_unexpected(NAME, "mesh id texture is gone");
            return;
        };
        let Some(staging) = ring.acquire(&mut *ctx.device) else {
            debug!("{NAME}: no free staging texture, skipping this frame");
            return;
        };

        let x = x.min(desc.width.saturating_sub(1));
        let y = y.min(desc.height.saturating_sub(1));
        ctx.device.transition(ResourceRef::Texture(mesh_id.texture), ResourceState::CopySource);
        ctx.device.copy_texel_to_staging(mesh_id.texture, x, y, staging);
        ctx.device.transition(ResourceRef::Texture(mesh_id.texture), ResourceState::ShaderResource);
        ring.submit(staging, ctx.params.frame_number);
    }

    fn release(&mut self, device: &mut dyn crate::device::GpuDevice) {
        if let Some(ring) = self.ring.as_mut() {
            ring.release(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_offsets_by_one() {
        assert_eq!(ReadPrimitiveIdTask::decode(&0u32.to_le_bytes()), None);
        assert_eq!(ReadPrimitiveIdTask::decode(&1u32.to_le_bytes()), Some(0));
        assert_eq!(ReadPrimitiveIdTask::decode(&43u32.to_le_bytes()), Some(42));
        assert_eq!(ReadPrimitiveIdTask::decode(&[1, 2]), None);
    }
}
