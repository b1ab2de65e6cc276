//! Task Graph Manager
//!
//! Owns the task instances, their order and every piece of state shared
//! between them (render parameters, render targets, pass states, frame
//! context) and drives one frame at a time:
//!
//! ```text
//!  clear FrameContext
//!  for task in order (enabled):  sync     if dirty
//!  for task in order (enabled):  prepare
//!  for task in order (enabled):  execute
//!  device.submit()
//!  record published keys, clear FrameContext
//! ```
//!
//! The order is explicit and fixed; nothing is inferred from reads and
//! writes. [`TaskGraph::set_order`] replaces it wholesale.

use std::any::Any;

use log::{debug, info, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use super::frame_context::{FrameContext, FrameKey};
use super::id::TaskId;
use super::params::{DirtyBits, SceneDelta, TaskParams};
use super::render_params::RenderParams;
use super::task::{ExecuteContext, GeometryRenderer, PrepareContext, Task, report_unexpected};
use crate::device::GpuDevice;
use crate::errors::{Result, StrataError};
use crate::pass_state::PassStateRegistry;
use crate::scene::SceneIndex;
use crate::targets::RenderTargetSet;

struct TaskEntry {
    task: Box<dyn Task>,
    enabled: bool,
}

/// Outcome of one [`TaskGraph::render_frame`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub frame_number: u64,
    /// Tasks whose `execute` ran, in order.
    pub executed: Vec<TaskId>,
    /// Disabled tasks, in order.
    pub skipped: Vec<TaskId>,
    /// Frame context keys published before the context was cleared.
    pub published: Vec<FrameKey>,
}

impl FrameSummary {
    /// Position of `task` in the execute order.
    #[must_use]
    pub fn position(&self, task: TaskId) -> Option<usize> {
        self.executed.iter().position(|id| *id == task)
    }

    #[must_use]
    pub fn published(&self, key: FrameKey) -> bool {
        self.published.contains(&key)
    }
}

/// Ordered collection of tasks plus the state they share.
#[derive(Default)]
pub struct TaskGraph {
    tasks: FxHashMap<TaskId, TaskEntry>,
    order: Vec<TaskId>,
    delta: SceneDelta,
    frame: FrameContext,
    params: RenderParams,
    targets: RenderTargetSet,
    passes: PassStateRegistry,
}

impl TaskGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Construction ───────────────────────────────────────────────────────

    /// Appends a task to the end of the order.
    pub fn insert(&mut self, id: TaskId, task: impl Task) -> Result<()> {
        self.insert_boxed(id, Box::new(task), None)
    }

    /// Inserts a task directly after `anchor`.
    pub fn insert_after(&mut self, anchor: TaskId, id: TaskId, task: impl Task) -> Result<()> {
        self.insert_boxed(id, Box::new(task), Some(anchor))
    }

    fn insert_boxed(&mut self, id: TaskId, mut task: Box<dyn Task>, anchor: Option<TaskId>) -> Result<()> {
        if self.tasks.contains_key(&id) {
            return Err(StrataError::DuplicateTask(id));
        }
        let position = match anchor {
            Some(anchor) => {
                let index = self
                    .order
                    .iter()
                    .position(|t| *t == anchor)
                    .ok_or(StrataError::UnknownTask(anchor))?;
                index + 1
            }
            None => self.order.len(),
        };

        task.register(&mut self.targets, &mut self.passes);
        debug!("TaskGraph: registered '{id}' ({})", task.name());
        self.order.insert(position, id);
        self.tasks.insert(id, TaskEntry { task, enabled: true });
        Ok(())
    }

    /// Removes a task and returns it. Its render-target slots stay in the set
    /// until [`release`](Self::release).
    pub fn remove(&mut self, id: TaskId) -> Result<Box<dyn Task>> {
        let entry = self.tasks.remove(&id).ok_or(StrataError::UnknownTask(id))?;
        self.order.retain(|t| *t != id);
        self.delta.forget(id);
        Ok(entry.task)
    }

    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    // ── Ordering ───────────────────────────────────────────────────────────

    /// Current execution order, including disabled tasks.
    #[must_use]
    pub fn order(&self) -> &[TaskId] {
        &self.order
    }

    /// Enabled tasks in execution order.
    #[must_use]
    pub fn enabled_order(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.tasks.get(id).is_some_and(|e| e.enabled))
            .collect()
    }

    /// Replaces the execution order. `order` must name every registered task
    /// exactly once.
    pub fn set_order(&mut self, order: Vec<TaskId>) -> Result<()> {
        if order.len() != self.tasks.len() {
            return Err(StrataError::InvalidOrder(format!(
                "expected {} tasks, got {}",
                self.tasks.len(),
                order.len()
            )));
        }
        let mut seen = FxHashSet::default();
        for id in &order {
            if !self.tasks.contains_key(id) {
                return Err(StrataError::UnknownTask(*id));
            }
            if !seen.insert(*id) {
                return Err(StrataError::InvalidOrder(format!("'{id}' listed twice")));
            }
        }
        self.order = order;
        Ok(())
    }

    // ── Enable / Parameters ────────────────────────────────────────────────

    pub fn set_enabled(&mut self, id: TaskId, enabled: bool) -> Result<()> {
        let entry = self.tasks.get_mut(&id).ok_or(StrataError::UnknownTask(id))?;
        entry.enabled = enabled;
        Ok(())
    }

    pub fn enable(&mut self, id: TaskId) -> Result<()> {
        self.set_enabled(id, true)
    }

    pub fn disable(&mut self, id: TaskId) -> Result<()> {
        self.set_enabled(id, false)
    }

    #[must_use]
    pub fn is_enabled(&self, id: TaskId) -> bool {
        self.tasks.get(&id).is_some_and(|e| e.enabled)
    }

    /// Replaces a task's parameter block; the task syncs on the next frame.
    pub fn set_params(&mut self, id: TaskId, params: TaskParams) -> Result<()> {
        if !self.tasks.contains_key(&id) {
            return Err(StrataError::UnknownTask(id));
        }
        self.delta.set_params(id, params);
        Ok(())
    }

    #[must_use]
    pub fn task_params(&self, id: TaskId) -> Option<&TaskParams> {
        self.delta.params(id)
    }

    pub fn mark_dirty(&mut self, id: TaskId, bits: DirtyBits) -> Result<()> {
        if !self.tasks.contains_key(&id) {
            return Err(StrataError::UnknownTask(id));
        }
        self.delta.mark_dirty(id, bits);
        Ok(())
    }

    // ── Access ─────────────────────────────────────────────────────────────

    /// Typed access to a task.
    #[must_use]
    pub fn task<T: Task>(&self, id: TaskId) -> Option<&T> {
        let task: &dyn Any = self.tasks.get(&id)?.task.as_ref();
        task.downcast_ref::<T>()
    }

    #[must_use]
    pub fn task_mut<T: Task>(&mut self, id: TaskId) -> Option<&mut T> {
        let task: &mut dyn Any = self.tasks.get_mut(&id)?.task.as_mut();
        task.downcast_mut::<T>()
    }

    #[must_use]
    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut RenderParams {
        &mut self.params
    }

    #[must_use]
    pub fn targets(&self) -> &RenderTargetSet {
        &self.targets
    }

    #[must_use]
    pub fn passes(&self) -> &PassStateRegistry {
        &self.passes
    }

    // ── Frame ──────────────────────────────────────────────────────────────

    /// Runs Sync, Prepare and Execute over the enabled tasks and submits.
    pub fn render_frame(
        &mut self,
        device: &mut dyn GpuDevice,
        scene: &SceneIndex,
        geometry: &mut dyn GeometryRenderer,
    ) -> FrameSummary {
        let mut summary = FrameSummary::default();
        self.frame.clear();

        // Sync
        for id in &self.order {
            let Some(entry) = self.tasks.get_mut(id) else {
                continue;
            };
            if !entry.enabled {
                continue;
            }
            let Some(dirty) = self.delta.dirty.get_mut(id) else {
                continue;
            };
            if dirty.is_empty() {
                continue;
            }
            trace!("TaskGraph: sync '{id}' ({dirty:?})");
            let params = self.delta.params.get(id).unwrap_or(&TaskParams::None);
            entry.task.sync(params, &mut self.frame, dirty);
            if !dirty.is_empty() {
                report_unexpected(entry.task.name(), format_args!("dirty bits {dirty:?} left after sync"));
                *dirty = DirtyBits::empty();
            }
        }

        // Prepare
        for id in &self.order {
            let Some(entry) = self.tasks.get_mut(id) else {
                continue;
            };
            if !entry.enabled {
                continue;
            }
            let mut ctx = PrepareContext {
                device: &mut *device,
                scene,
                params: &mut self.params,
                frame: &mut self.frame,
                targets: &mut self.targets,
                passes: &mut self.passes,
            };
            entry.task.prepare(&mut ctx);
        }

        // Execute
        for id in &self.order {
            let Some(entry) = self.tasks.get_mut(id) else {
                continue;
            };
            if !entry.enabled {
                trace!("TaskGraph: '{id}' disabled");
                summary.skipped.push(*id);
                continue;
            }
            let mut ctx = ExecuteContext {
                device: &mut *device,
                scene,
                params: &self.params,
                frame: &mut self.frame,
                targets: &self.targets,
                passes: &mut self.passes,
                geometry: &mut *geometry,
            };
            entry.task.execute(&mut ctx);
            summary.executed.push(*id);
        }

        device.submit();

        summary.frame_number = self.params.frame_number;
        summary.published = self.frame.written_keys().to_vec();
        self.frame.clear();
        summary
    }

    /// Frees every device resource held by the graph and its tasks.
    pub fn release(&mut self, device: &mut dyn GpuDevice) {
        for entry in self.tasks.values_mut() {
            entry.task.release(device);
        }
        let freed = self.targets.release_all(device);
        info!("TaskGraph: released {freed} render targets");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::device::HeadlessDevice;
    use crate::graph::NoGeometry;

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Task for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn sync(&mut self, _params: &TaskParams, _frame: &mut FrameContext, dirty: &mut DirtyBits) {
            self.log.borrow_mut().push(format!("sync:{}", self.name));
            dirty.remove(DirtyBits::PARAMS);
        }

        fn prepare(&mut self, _ctx: &mut PrepareContext<'_>) {
            self.log.borrow_mut().push(format!("prepare:{}", self.name));
        }

        fn execute(&mut self, _ctx: &mut ExecuteContext<'_>) {
            self.log.borrow_mut().push(format!("execute:{}", self.name));
        }
    }

    struct Idle;

    impl Task for Idle {
        fn name(&self) -> &str {
            "idle"
        }

        fn execute(&mut self, _ctx: &mut ExecuteContext<'_>) {}
    }

    fn graph_with(names: &[&'static str]) -> (TaskGraph, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut graph = TaskGraph::new();
        for &name in names {
            let recorder = Recorder {
                name,
                log: Rc::clone(&log),
            };
            graph.insert(TaskId::new(name), recorder).unwrap();
        }
        (graph, log)
    }

    #[test]
    fn phases_run_in_order_over_enabled_tasks() {
        let (mut graph, log) = graph_with(&["task_a", "task_b", "task_c"]);
        graph.disable(TaskId::new("task_b")).unwrap();
        graph.set_params(TaskId::new("task_c"), TaskParams::None).unwrap();

        let mut device = HeadlessDevice::new();
        let summary = graph.render_frame(&mut device, &SceneIndex::new(), &mut NoGeometry);

        assert_eq!(
            *log.borrow(),
            vec![
                "sync:task_c",
                "prepare:task_a",
                "prepare:task_c",
                "execute:task_a",
                "execute:task_c",
            ]
        );
        assert_eq!(summary.skipped, vec![TaskId::new("task_b")]);
        assert_eq!(device.submissions(), 1);
    }

    #[test]
    fn sync_only_runs_when_dirty() {
        let (mut graph, log) = graph_with(&["task_dirty"]);
        let id = TaskId::new("task_dirty");
        graph.mark_dirty(id, DirtyBits::PARAMS | DirtyBits::COLLECTION).unwrap();

        let mut device = HeadlessDevice::new();
        let scene = SceneIndex::new();
        graph.render_frame(&mut device, &scene, &mut NoGeometry);
        graph.render_frame(&mut device, &scene, &mut NoGeometry);

        let syncs = log.borrow().iter().filter(|l| l.starts_with("sync")).count();
        assert_eq!(syncs, 1);
        assert!(graph.delta.dirty(id).is_empty());
    }

    #[test]
    fn insert_after_and_duplicates() {
        let (mut graph, log) = graph_with(&["task_first", "task_last"]);
        let middle = Recorder {
            name: "task_middle",
            log: Rc::clone(&log),
        };
        graph
            .insert_after(TaskId::new("task_first"), TaskId::new("task_middle"), middle)
            .unwrap();
        assert_eq!(
            graph.order(),
            &[
                TaskId::new("task_first"),
                TaskId::new("task_middle"),
                TaskId::new("task_last")
            ]
        );

        let again = Recorder { name: "task_last", log };
        assert!(matches!(
            graph.insert(TaskId::new("task_last"), again),
            Err(StrataError::DuplicateTask(_))
        ));
    }

    #[test]
    fn set_order_requires_a_permutation() {
        let (mut graph, _log) = graph_with(&["perm_a", "perm_b"]);
        let a = TaskId::new("perm_a");
        let b = TaskId::new("perm_b");

        assert!(matches!(graph.set_order(vec![a]), Err(StrataError::InvalidOrder(_))));
        assert!(matches!(graph.set_order(vec![a, a]), Err(StrataError::InvalidOrder(_))));
        assert!(matches!(
            graph.set_order(vec![a, TaskId::new("perm_unknown")]),
            Err(StrataError::UnknownTask(_))
        ));

        graph.set_order(vec![b, a]).unwrap();
        assert_eq!(graph.order(), &[b, a]);
    }

    #[test]
    fn typed_access_downcasts() {
        let (mut graph, _log) = graph_with(&["task_typed"]);
        let id = TaskId::new("task_typed");
        assert_eq!(graph.task::<Recorder>(id).map(|p| p.name), Some("task_typed"));
        assert!(graph.task::<Idle>(id).is_none());
        graph.insert(TaskId::new("task_idle"), Idle).unwrap();
        assert!(graph.task::<Idle>(TaskId::new("task_idle")).is_some());
        graph.remove(TaskId::new("task_idle")).unwrap();

        let removed = graph.remove(id).unwrap();
        assert_eq!(removed.name(), "task_typed");
        assert!(graph.is_empty());
    }
}
