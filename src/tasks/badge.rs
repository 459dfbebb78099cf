//! # Task identity and capabilities.
//!
//! A [`TaskBadge`] is the immutable snapshot of a task taken when it is created:
//! its [`TaskId`], name, thread, [`TaskKind`] and capability flags. Lookups and
//! lifecycle bookkeeping work on badges, never on live task objects.
//!
//! ## Kinds
//! ```text
//!              framework-owned     application-owned
//! general      FwTask              XTask
//! main         FwMainTask          MainXTask
//! ```

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::lc::LcComponent;
use crate::tasks::ThreadUid;

/// Process-unique positive task id, assigned monotonically at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    /// Wraps a raw id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T#{}", self.0)
    }
}

/// Closed set of task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Framework-internal task.
    FwTask,
    /// The framework main task (one per instance).
    FwMainTask,
    /// Application task.
    XTask,
    /// The application main task (at most one live).
    MainXTask,
}

impl TaskKind {
    /// Lifecycle component a task of this kind reports as.
    pub const fn component(self) -> LcComponent {
        match self {
            TaskKind::FwTask => LcComponent::FwComponent,
            TaskKind::FwMainTask => LcComponent::FwMain,
            TaskKind::XTask => LcComponent::XTask,
            TaskKind::MainXTask => LcComponent::MainXTask,
        }
    }

    /// Framework-owned kinds.
    pub const fn is_framework(self) -> bool {
        matches!(self, TaskKind::FwTask | TaskKind::FwMainTask)
    }

    /// Singular "main" kinds.
    pub const fn is_main(self) -> bool {
        matches!(self, TaskKind::FwMainTask | TaskKind::MainXTask)
    }

    /// Short label.
    pub const fn as_str(self) -> &'static str {
        match self {
            TaskKind::FwTask => "FwTask",
            TaskKind::FwMainTask => "FwMainTask",
            TaskKind::XTask => "XTask",
            TaskKind::MainXTask => "MainXTask",
        }
    }
}

bitflags! {
    /// How a task is bound to its thread.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TaskTypeFlags: u8 {
        /// Runs in-line on a caller-supplied thread.
        const ENCLOSING_THREAD = 0b0000_0001;
        /// Synthetic wrapper for a foreign thread.
        const AUTO_ENCLOSED    = 0b0000_0010;
        /// Attached explicitly to drive an externally running task.
        const DRIVES_EXTERNAL  = 0b0000_0100;
        /// Light-weight thread payload instead of a full task.
        const THREAD           = 0b0000_1000;
    }
}

bitflags! {
    /// What a task is allowed to do through its context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TaskRights: u8 {
        /// Receives the lifecycle proxy when it becomes available.
        const PROXY_CLIENT     = 0b0000_0001;
        /// May request a framework stop.
        const REQUEST_SHUTDOWN = 0b0000_0010;
        /// Owns an internal message queue.
        const INTERNAL_QUEUE   = 0b0000_0100;
        /// Accepts messages from outside the framework.
        const EXTERNAL_QUEUE   = 0b0000_1000;
    }
}

impl Default for TaskRights {
    fn default() -> Self {
        TaskRights::PROXY_CLIENT | TaskRights::INTERNAL_QUEUE
    }
}

/// Immutable identity and capability snapshot of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBadge {
    id: TaskId,
    name: Arc<str>,
    thread_uid: ThreadUid,
    kind: TaskKind,
    flags: TaskTypeFlags,
    rights: TaskRights,
}

impl TaskBadge {
    pub(crate) fn new(
        id: TaskId,
        name: Arc<str>,
        thread_uid: ThreadUid,
        kind: TaskKind,
        flags: TaskTypeFlags,
        rights: TaskRights,
    ) -> Self {
        Self {
            id,
            name,
            thread_uid,
            kind,
            flags,
            rights,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn thread_uid(&self) -> ThreadUid {
        self.thread_uid
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn flags(&self) -> TaskTypeFlags {
        self.flags
    }

    pub fn rights(&self) -> TaskRights {
        self.rights
    }

    pub fn is_framework_task(&self) -> bool {
        self.kind.is_framework()
    }

    /// Application task (general or main).
    pub fn is_xtask(&self) -> bool {
        !self.kind.is_framework()
    }

    pub fn is_enclosing_thread(&self) -> bool {
        self.flags.contains(TaskTypeFlags::ENCLOSING_THREAD)
    }

    pub fn is_auto_enclosed(&self) -> bool {
        self.flags.contains(TaskTypeFlags::AUTO_ENCLOSED)
    }

    pub fn is_driving_external_task(&self) -> bool {
        self.flags.contains(TaskTypeFlags::DRIVES_EXTERNAL)
    }

    pub fn is_thread(&self) -> bool {
        self.flags.contains(TaskTypeFlags::THREAD)
    }

    pub fn supports_internal_queue(&self) -> bool {
        self.rights.contains(TaskRights::INTERNAL_QUEUE)
    }

    pub fn supports_external_queue(&self) -> bool {
        self.rights.contains(TaskRights::EXTERNAL_QUEUE)
    }

    /// Tasks with their own worker thread can be joined from another thread.
    pub fn has_dedicated_thread(&self) -> bool {
        !self
            .flags
            .intersects(TaskTypeFlags::ENCLOSING_THREAD | TaskTypeFlags::AUTO_ENCLOSED)
    }

    /// Lifecycle component this task reports as.
    pub fn component(&self) -> LcComponent {
        self.kind.component()
    }
}

impl fmt::Display for TaskBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}({})", self.name, self.id, self.kind.as_str())
    }
}
