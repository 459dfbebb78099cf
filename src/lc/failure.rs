//! # Fatal errors and failure records.
//!
//! A [`FatalError`] is the value that travels with a fail transition. When the
//! transition is applied, [`LcState`](crate::LcState) stores a *clone* of it in
//! a [`FailureRecord`], keyed by component plus reporting task (or thread).
//!
//! ## Keying
//! ```text
//! key = (component, task id)          task known
//!     = (component, thread uid)       anonymous thread (task not registered yet)
//! ```
//! A record first seeded by an anonymous thread is back-filled in place when
//! the task identity becomes known, rather than duplicated.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TaskError;
use crate::lc::LcComponent;
use crate::tasks::{TaskBadge, TaskId, ThreadUid};

static NEXT_FATAL_ID: AtomicU64 = AtomicU64::new(1);

/// A fatal error reported to the lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    unique_id: u64,
    code: i32,
    short_msg: String,
    details: Option<String>,
    origin: Option<TaskId>,
    is_clone: bool,
}

impl FatalError {
    pub fn new(code: i32, short_msg: impl Into<String>) -> Self {
        Self {
            unique_id: NEXT_FATAL_ID.fetch_add(1, Ordering::Relaxed),
            code,
            short_msg: short_msg.into(),
            details: None,
            origin: None,
            is_clone: false,
        }
    }

    /// Builds the fatal error of a task whose body returned `err`.
    pub fn from_task_error(err: &TaskError, origin: Option<TaskId>) -> Self {
        let mut fe = FatalError::new(err.code(), err.to_string());
        fe.origin = origin;
        fe
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_origin(mut self, origin: TaskId) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Record copy; keeps the unique id so the two can be matched.
    pub fn clone_for_record(&self) -> Self {
        Self {
            is_clone: true,
            ..self.clone()
        }
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn short_msg(&self) -> &str {
        &self.short_msg
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn origin(&self) -> Option<TaskId> {
        self.origin
    }

    pub fn is_clone(&self) -> bool {
        self.is_clone
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (uid={})", self.code, self.short_msg, self.unique_id)
    }
}

/// Who reported a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReporterKind {
    /// A thread not (yet) known to the registry.
    AnonymousThread,
    /// A framework thread (lifecycle guard, startup thread).
    FwThread,
    /// A registered task.
    FwTask,
}

/// One failure attributed to a component (and optionally a task).
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub component: LcComponent,
    pub error: FatalError,
    pub reporter_kind: ReporterKind,
    pub task_id: Option<TaskId>,
    pub task_name: Option<String>,
    pub thread_uid: ThreadUid,
    /// Reported by a thread that is not the failing task.
    pub foreign: bool,
}

impl FailureRecord {
    pub(crate) fn new(
        component: LcComponent,
        error: &FatalError,
        reporter: Option<&TaskBadge>,
        thread_uid: ThreadUid,
    ) -> Self {
        let error = if error.is_clone() {
            error.clone()
        } else {
            error.clone_for_record()
        };
        let foreign = match (reporter, error.origin()) {
            (Some(badge), Some(origin)) => badge.id() != origin,
            _ => false,
        };
        Self {
            component,
            reporter_kind: match reporter {
                Some(b) if b.is_framework_task() || b.is_xtask() => ReporterKind::FwTask,
                Some(_) => ReporterKind::FwThread,
                None => ReporterKind::AnonymousThread,
            },
            task_id: reporter.map(|b| b.id()),
            task_name: reporter.map(|b| b.name().to_string()),
            thread_uid: reporter.map(|b| b.thread_uid()).unwrap_or(thread_uid),
            foreign,
            error,
        }
    }

    /// Stable key used in duplicate diagnostics.
    pub fn reporter_key(&self) -> String {
        match self.task_id {
            Some(id) => format!("{}:{id}", self.component),
            None => format!("{}:{}", self.component, self.thread_uid),
        }
    }

    fn matches(&self, component: LcComponent, task: Option<TaskId>, thread: ThreadUid) -> bool {
        if self.component != component {
            return false;
        }
        match (self.task_id, task) {
            (Some(a), Some(b)) => a == b,
            (None, _) => self.thread_uid == thread,
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.component, self.error)?;
        if let (Some(name), Some(id)) = (self.task_name.as_deref(), self.task_id) {
            write!(f, " task={name}:{id}")?;
        }
        if self.foreign {
            f.write_str(" (foreign)")?;
        }
        Ok(())
    }
}

/// Keyed collection of failure records.
#[derive(Debug, Default)]
pub struct FailureRecordManager {
    records: Vec<FailureRecord>,
}

impl FailureRecordManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Finds the record of `component` reported by `task` (or by `thread`
    /// for anonymous records).
    ///
    /// An anonymous record matched through `thread` is back-filled with the
    /// task identity, if one is given.
    pub fn find(
        &mut self,
        component: LcComponent,
        task: Option<&TaskBadge>,
        thread: ThreadUid,
    ) -> Option<&FailureRecord> {
        let task_id = task.map(|b| b.id());
        let idx = self
            .records
            .iter()
            .position(|r| r.matches(component, task_id, thread))?;
        if let Some(badge) = task {
            self.backfill_at(idx, badge);
        }
        self.records.get(idx)
    }

    /// Adds a record. The caller has checked for duplicates.
    pub(crate) fn add(&mut self, record: FailureRecord) {
        self.records.push(record);
    }

    /// Drops records added after the first `len` (rollback of a failed apply).
    pub(crate) fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    /// Back-fills anonymous records of `badge`'s thread with its identity.
    pub fn backfill_task(&mut self, badge: &TaskBadge) -> usize {
        let idxs: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.task_id.is_none() && r.thread_uid == badge.thread_uid())
            .map(|(i, _)| i)
            .collect();
        for i in &idxs {
            self.backfill_at(*i, badge);
        }
        idxs.len()
    }

    fn backfill_at(&mut self, idx: usize, badge: &TaskBadge) {
        if let Some(r) = self.records.get_mut(idx) {
            if r.task_id.is_none() {
                r.task_id = Some(badge.id());
                r.task_name = Some(badge.name().to_string());
                r.reporter_kind = ReporterKind::FwTask;
            }
        }
    }

    /// Records of `component`, optionally narrowed to one task.
    pub fn view(&self, component: LcComponent, task: Option<TaskId>) -> Vec<FailureRecord> {
        self.records
            .iter()
            .filter(|r| r.component == component)
            .filter(|r| task.is_none() || r.task_id == task)
            .cloned()
            .collect()
    }

    pub fn has_component(&self, component: LcComponent) -> bool {
        self.records.iter().any(|r| r.component == component)
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    /// Multi-line listing, one record per line.
    pub fn aggregate(&self) -> String {
        self.records
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tasks::{TaskKind, TaskRights, TaskTypeFlags};

    fn badge(id: u32, uid: ThreadUid) -> TaskBadge {
        TaskBadge::new(
            TaskId::new(id),
            Arc::from("worker"),
            uid,
            TaskKind::XTask,
            TaskTypeFlags::empty(),
            TaskRights::default(),
        )
    }

    #[test]
    fn record_holds_a_clone() {
        let fe = FatalError::new(7, "boom");
        let rec = FailureRecord::new(LcComponent::XTask, &fe, None, ThreadUid::allocate());
        assert!(rec.error.is_clone());
        assert_eq!(rec.error.unique_id(), fe.unique_id());
        assert_eq!(rec.reporter_kind, ReporterKind::AnonymousThread);
    }

    #[test]
    fn anonymous_record_is_backfilled() {
        let uid = ThreadUid::allocate();
        let mut frm = FailureRecordManager::new();
        frm.add(FailureRecord::new(
            LcComponent::XTask,
            &FatalError::new(1, "x"),
            None,
            uid,
        ));

        let b = badge(5, uid);
        let rec = frm.find(LcComponent::XTask, Some(&b), uid).expect("record");
        assert_eq!(rec.task_id, Some(TaskId::new(5)));
        assert_eq!(frm.len(), 1);
        assert_eq!(frm.view(LcComponent::XTask, Some(TaskId::new(5))).len(), 1);
    }

    #[test]
    fn foreign_flag_set_when_reporter_differs_from_origin() {
        let uid = ThreadUid::allocate();
        let fe = FatalError::new(3, "x").with_origin(TaskId::new(9));
        let rec = FailureRecord::new(LcComponent::XTask, &fe, Some(&badge(2, uid)), uid);
        assert!(rec.foreign);
        assert!(rec.to_string().contains("(foreign)"));
    }
}
