//! # TaskEntry: cached registry view over a task instance.
//!
//! The registry indexes entries, not instances. An entry keeps the identity
//! fields it is indexed by, so table bookkeeping never has to dereference the
//! task. After [`cleanup`](TaskEntry::cleanup) every accessor degrades to
//! `None`/`false`.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::tasks::{TaskBadge, TaskId, TaskInstance, TaskObserver, ThreadUid};

/// Table entry of one task.
#[derive(Debug)]
pub struct TaskEntry {
    inst: RwLock<Option<Arc<TaskInstance>>>,
    id: TaskId,
    name: Arc<str>,
    thread_uid: ThreadUid,
}

impl TaskEntry {
    pub(crate) fn new(inst: Arc<TaskInstance>) -> Self {
        let badge = inst.badge();
        Self {
            id: badge.id(),
            name: badge.name_arc(),
            thread_uid: badge.thread_uid(),
            inst: RwLock::new(Some(inst)),
        }
    }

    fn with_inst<T>(&self, f: impl FnOnce(&TaskInstance) -> T) -> Option<T> {
        self.inst.read().as_deref().map(f)
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.with_inst(|_| self.id)
    }

    pub fn task_name(&self) -> Option<Arc<str>> {
        self.with_inst(|_| Arc::clone(&self.name))
    }

    pub fn thread_uid(&self) -> Option<ThreadUid> {
        self.with_inst(|_| self.thread_uid)
    }

    pub fn task_badge(&self) -> Option<TaskBadge> {
        self.with_inst(|i| i.badge().clone())
    }

    pub fn task_inst(&self) -> Option<Arc<TaskInstance>> {
        self.inst.read().clone()
    }

    pub fn is_auto_enclosed_entry(&self) -> bool {
        self.with_inst(|i| i.badge().is_auto_enclosed())
            .unwrap_or(false)
    }

    /// Joinable from another thread: has a dedicated worker thread.
    pub fn is_joinable_entry(&self) -> bool {
        self.with_inst(|i| i.badge().has_dedicated_thread())
            .unwrap_or(false)
    }

    pub fn is_xtask_entry(&self) -> bool {
        self.with_inst(|i| i.badge().is_xtask()).unwrap_or(false)
    }

    pub fn is_driving_external_task(&self) -> bool {
        self.with_inst(|i| i.badge().is_driving_external_task())
            .unwrap_or(false)
    }

    /// Per-task observer hook.
    pub fn ut_agent(&self) -> Option<Arc<dyn TaskObserver>> {
        self.with_inst(|i| i.observer()).flatten()
    }

    /// Cached id, valid also after cleanup (table removal key).
    pub(crate) fn key_id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn key_name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn key_thread(&self) -> ThreadUid {
        self.thread_uid
    }

    /// Drops the instance reference; idempotent.
    pub fn cleanup(&self) {
        self.inst.write().take();
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.inst.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;
    use crate::events::Bus;
    use crate::tasks::instance::InstanceInit;
    use crate::tasks::{TaskKind, TaskRights, TaskState, TaskTypeFlags};

    fn entry() -> TaskEntry {
        let badge = TaskBadge::new(
            TaskId::new(3),
            Arc::from("e"),
            ThreadUid::allocate(),
            TaskKind::XTask,
            TaskTypeFlags::empty(),
            TaskRights::default(),
        );
        TaskEntry::new(TaskInstance::new(InstanceInit {
            badge,
            payload: None,
            state: TaskState::Initialized,
            observer: None,
            delayed_start: None,
            registry: Weak::new(),
            bus: Bus::default(),
        }))
    }

    #[test]
    fn accessors_degrade_after_cleanup() {
        let e = entry();
        assert_eq!(e.task_id(), Some(TaskId::new(3)));
        assert_eq!(e.task_name().as_deref(), Some("e"));
        assert!(e.is_joinable_entry());
        assert!(e.is_xtask_entry());

        e.cleanup();
        e.cleanup();
        assert!(e.is_cleaned_up());
        assert_eq!(e.task_id(), None);
        assert!(e.task_badge().is_none());
        assert!(!e.is_joinable_entry());
        assert!(e.ut_agent().is_none());
        assert_eq!(e.key_id(), TaskId::new(3));
    }
}
