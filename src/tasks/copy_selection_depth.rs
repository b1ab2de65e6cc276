//! Copy Selection Depth Task
//!
//! Snapshots the depth buffer right after the selected opaque geometry was
//! drawn. The snapshot is the depth target of the transparent-selected pass
//! and the seed of the selection outline.
//!
//! The selected opaque pass draws into the main depth buffer, so the copy
//! runs main depth ──► selection depth. Right after that pass both buffers
//! hold only selected geometry, so this is the same end state as drawing into
//! the selection depth and copying it back; unselected geometry then keeps
//! depth-testing against the main buffer.

use super::require;
use crate::device::{ResourceRef, ResourceState};
use crate::graph::{ExecuteContext, FrameKey, Task};

const NAME: &str = "CopySelectionDepth";

#[derive(Debug, Default, Clone, Copy)]
pub struct CopySelectionDepthTask;

impl Task for CopySelectionDepthTask {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        let Some(depth) = require(NAME, ctx.frame.view(FrameKey::DepthCurrent)) else {
            return;
        };
        let Some(selection) = require(NAME, ctx.frame.view(FrameKey::SelectionDepth)) else {
            return;
        };

        let (src, dst) = (depth.texture, selection.texture);
        ctx.device.transition(ResourceRef::Texture(src), ResourceState::CopySource);
        ctx.device.transition(ResourceRef::Texture(dst), ResourceState::CopyDest);
        ctx.device.copy_texture(src, dst);
        ctx.device.transition(ResourceRef::Texture(src), ResourceState::DepthWrite);
        ctx.device.transition(ResourceRef::Texture(dst), ResourceState::DepthWrite);
    }
}
