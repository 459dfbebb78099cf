//! # Failure classification of task errors.
//!
//! Every error surfacing on behalf of a task goes through
//! [`TaskRegistry::handle_task_failure`]. The root cause is decided by the
//! [`ApiBookmark`] that was in flight and the state the task was in:
//!
//! ```text
//! state before error     bookmark        task kind       cause          lifecycle component
//! ─────────────────────  ──────────────  ──────────────  ─────────────  ───────────────────
//! ceasing / terminated   any             any             System         (logged only)
//! active                 Run / Idle      auto-enclosed   Client         MiscComponent
//! active                 Run / Idle      other           Client         badge.component()
//! active                 Start / Join    framework       Framework      FwComponent
//! active                 Start / Join    application     TaskManager    TaskMgr
//! ```

use crate::error::TaskError;
use crate::lc::{FatalError, LcComponent};
use crate::logif::{log_fatal, log_warning};
use crate::registry::TaskRegistry;
use crate::tasks::{ApiBookmark, TaskBadge, TaskState};

/// Root cause of a task error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    Framework,
    TaskManager,
    Client,
    /// Surfaced while the task was already stopping; not escalated.
    System,
}

impl FailureCause {
    /// Component the failure is escalated to.
    pub fn component(self, badge: &TaskBadge) -> Option<LcComponent> {
        match self {
            FailureCause::Framework => Some(LcComponent::FwComponent),
            FailureCause::TaskManager => Some(LcComponent::TaskMgr),
            FailureCause::Client if badge.is_auto_enclosed() => Some(LcComponent::MiscComponent),
            FailureCause::Client => Some(badge.component()),
            FailureCause::System => None,
        }
    }
}

/// Classifies an error of `badge` raised under `bookmark` in state `prev`.
pub fn classify(badge: &TaskBadge, bookmark: ApiBookmark, prev: TaskState) -> FailureCause {
    if prev.is_ceasing() || prev.is_terminated() {
        return FailureCause::System;
    }
    match bookmark {
        ApiBookmark::Run | ApiBookmark::Idle => FailureCause::Client,
        ApiBookmark::Start | ApiBookmark::Join if badge.is_framework_task() => {
            FailureCause::Framework
        }
        ApiBookmark::Start | ApiBookmark::Join => FailureCause::TaskManager,
    }
}

impl TaskRegistry {
    /// Classifies a task error and escalates it to the lifecycle state.
    pub(crate) fn handle_task_failure(
        &self,
        badge: &TaskBadge,
        err: &TaskError,
        bookmark: ApiBookmark,
        prev: TaskState,
    ) {
        let cause = classify(badge, bookmark, prev);
        let Some(component) = cause.component(badge) else {
            log_warning!(
                1501,
                task = %badge,
                error = %err,
                "task error while stopping; not escalated"
            );
            return;
        };

        log_fatal!(
            1502,
            task = %badge,
            error = %err,
            cause = ?cause,
            %component,
            "task failure"
        );
        let fe = FatalError::from_task_error(err, Some(badge.id()));
        if let Some(proxy) = self.lc_proxy() {
            proxy.notify_lc_failure(component, &fe, Some(badge));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tasks::{TaskId, TaskKind, TaskRights, TaskTypeFlags, ThreadUid};

    fn badge(kind: TaskKind, flags: TaskTypeFlags) -> TaskBadge {
        TaskBadge::new(
            TaskId::new(2),
            Arc::from("t"),
            ThreadUid::allocate(),
            kind,
            flags,
            TaskRights::default(),
        )
    }

    #[test]
    fn classification_table() {
        let x = badge(TaskKind::XTask, TaskTypeFlags::empty());
        let fw = badge(TaskKind::FwTask, TaskTypeFlags::empty());
        let auto = badge(TaskKind::XTask, TaskTypeFlags::AUTO_ENCLOSED);

        assert_eq!(classify(&x, ApiBookmark::Run, TaskState::Running), FailureCause::Client);
        assert_eq!(
            classify(&x, ApiBookmark::Run, TaskState::PendingStopRequest),
            FailureCause::System
        );
        assert_eq!(
            classify(&x, ApiBookmark::Start, TaskState::PendingRun),
            FailureCause::TaskManager
        );
        assert_eq!(
            classify(&fw, ApiBookmark::Join, TaskState::Running),
            FailureCause::Framework
        );

        assert_eq!(FailureCause::Client.component(&x), Some(LcComponent::XTask));
        assert_eq!(
            FailureCause::Client.component(&auto),
            Some(LcComponent::MiscComponent)
        );
        assert_eq!(FailureCause::System.component(&x), None);
    }
}
