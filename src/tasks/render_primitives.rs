//! Render Primitives Task
//!
//! Draws one collection, filtered by material tag and selection state, into
//! one named pass. The standard graph has six of these:
//!
//! | Id | Tag | Selection | Pass |
//! |----|-----|-----------|------|
//! | `render_opaque_selected` | opaque | selected | opaque-selected |
//! | `render_opaque` | opaque | unselected | main |
//! | `render_transparent` | translucent | unselected | main |
//! | `render_additive` | additive | all | main |
//! | `render_transparent_selected` | translucent | selected | transparent-selected |
//! | `render_oit` | oit | all | OIT |

use log::debug;

use super::require;
use crate::graph::{
    DirtyBits, ExecuteContext, FrameContext, FrameFlags, GeometryRequest, RenderPrimitivesParams,
    Task, TaskParams, report_unexpected, report_wrong_params,
};

const NAME: &str = "RenderPrimitives";

pub struct RenderPrimitivesTask {
    params: RenderPrimitivesParams,
    synced: bool,
    last_draw_items: u32,
}

impl RenderPrimitivesTask {
    #[must_use]
    pub fn new(params: RenderPrimitivesParams) -> Self {
        Self {
            params,
            synced: false,
            last_draw_items: 0,
        }
    }

    #[must_use]
    pub fn params(&self) -> &RenderPrimitivesParams {
        &self.params
    }

    /// Draw items reported by the geometry renderer last frame.
    #[must_use]
    pub fn last_draw_items(&self) -> u32 {
        self.last_draw_items
    }
}

impl Task for RenderPrimitivesTask {
    fn name(&self) -> &str {
        NAME
    }

    fn sync(&mut self, params: &TaskParams, frame: &mut FrameContext, dirty: &mut DirtyBits) {
        let mut suspend = dirty.intersects(DirtyBits::COLLECTION | DirtyBits::RENDER_TAGS | DirtyBits::VISIBILITY);

        if dirty.contains(DirtyBits::PARAMS) {
            match params {
                TaskParams::RenderPrimitives(params) => {
                    let retargeted = params.collection != self.params.collection
                        || params.material_tag != self.params.material_tag;
                    // The first block only confirms what the constructor set.
                    if self.synced && retargeted {
                        debug!(
                            "{NAME}: now drawing '{}' ({:?})",
                            params.collection, params.material_tag
                        );
                        suspend = true;
                    }
                    self.params = params.clone();
                    self.synced = true;
                }
                other => report_wrong_params(NAME, other, dirty),
            }
        }

        if suspend {
            frame.set_flags(FrameFlags::SUSPEND_SUPERSAMPLING);
        }
        *dirty = DirtyBits::empty();
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) {
        self.last_draw_items = 0;
        let Some(id) = require(NAME, ctx.frame.pass(self.params.pass.frame_key())) else {
            return;
        };
        let Some(pass) = ctx.passes.get_mut(id) else {
            report_unexpected(NAME, "pass state missing from registry");
            return;
        };
        if let Err(e) = pass.commit(&mut *ctx.device, ctx.params.frame_number) {
            report_unexpected(NAME, e);
            return;
        }

        let request = GeometryRequest {
            task: NAME,
            collection: &self.params.collection,
            material_tag: self.params.material_tag,
            selection: self.params.selection,
            pass: &*pass,
            shadow_light: None,
            scene: ctx.scene,
            frame: &*ctx.frame,
        };
        let count = ctx.geometry.render(&mut *ctx.device, &request);
        pass.record_draw_items(count);
        self.last_draw_items = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MaterialTag, PassSelector, SelectionFilter};

    fn params(collection: &str, tag: MaterialTag) -> RenderPrimitivesParams {
        RenderPrimitivesParams {
            collection: collection.to_string(),
            material_tag: tag,
            selection: SelectionFilter::All,
            pass: PassSelector::Main,
        }
    }

    #[test]
    fn first_sync_does_not_suspend() {
        let mut task = RenderPrimitivesTask::new(params("scene", MaterialTag::Opaque));
        let mut frame = FrameContext::new();
        let mut dirty = DirtyBits::PARAMS;
        task.sync(&TaskParams::RenderPrimitives(params("scene", MaterialTag::Masked)), &mut frame, &mut dirty);
        assert!(dirty.is_empty());
        assert!(!frame.flags().contains(FrameFlags::SUSPEND_SUPERSAMPLING));
    }

    #[test]
    fn retargeting_suspends_supersampling() {
        let mut task = RenderPrimitivesTask::new(params("scene", MaterialTag::Opaque));
        let mut frame = FrameContext::new();
        let mut dirty = DirtyBits::PARAMS;
        task.sync(&TaskParams::RenderPrimitives(params("scene", MaterialTag::Opaque)), &mut frame, &mut dirty);

        frame.clear();
        let mut dirty = DirtyBits::PARAMS;
        task.sync(&TaskParams::RenderPrimitives(params("props", MaterialTag::Opaque)), &mut frame, &mut dirty);
        assert!(frame.flags().contains(FrameFlags::SUSPEND_SUPERSAMPLING));
        assert_eq!(task.params().collection, "props");
    }

    #[test]
    fn visibility_change_suspends_supersampling() {
        let mut task = RenderPrimitivesTask::new(params("scene", MaterialTag::Opaque));
        let mut frame = FrameContext::new();
        let mut dirty = DirtyBits::VISIBILITY;
        task.sync(&TaskParams::None, &mut frame, &mut dirty);
        assert!(dirty.is_empty());
        assert!(frame.flags().contains(FrameFlags::SUSPEND_SUPERSAMPLING));
    }
}
