//! Begin Main Pass Task
//!
//! Hands the shadow atlas over to sampling and re-binds the G-buffer after
//! the shadow task bound its own targets.

use log::trace;

use super::require;
use crate::device::{ResourceRef, ResourceState};
use crate::graph::{ExecuteContext, FrameKey, Task, report_unexpected};

const NAME: &str = "BeginMainPass";

#[derive(Debug, Default, Clone, Copy)]
pub struct BeginMainPassTask;

impl Task for BeginMainPassTask {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        // Optional: absent when shadows are disabled or nothing casts.
        if let Ok(atlas) = ctx.frame.view(FrameKey::ShadowAtlas) {
            ctx.device.transition(ResourceRef::Texture(atlas.texture), ResourceState::ShaderResource);
        } else {
            trace!("{NAME}: no shadow atlas this frame");
        }

        let Some(depth) = require(NAME, ctx.frame.view(FrameKey::DepthCurrent)) else {
            return;
        };
        ctx.device.transition(ResourceRef::Texture(depth.texture), ResourceState::DepthWrite);

        let Some(id) = require(NAME, ctx.frame.pass(FrameKey::OpaqueSelectedPass)) else {
            return;
        };
        let Some(pass) = ctx.passes.get(id) else {
            report_unexpected(NAME, "opaque-selected pass state missing");
            return;
        };
        for color in pass.colors() {
            ctx.device.transition(ResourceRef::Texture(color.view.texture), ResourceState::RenderTarget);
        }
        if let Err(e) = pass.commit(&mut *ctx.device, ctx.params.frame_number) {
            report_unexpected(NAME, e);
        }
    }
}
