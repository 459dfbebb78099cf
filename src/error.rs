//! Error types used by the task registry, the lifecycle state machine and the
//! lifecycle manager.
//!
//! - [`TaskError`]: errors raised by individual task bodies.
//! - [`ProfileError`]: a task profile failed validation.
//! - [`RegistryError`]: the registry refused to create or admit a task.
//! - [`LcStateError`]: a lifecycle transition was vetoed by a rule check.
//! - [`LcError`]: bootstrap/shutdown failures of the lifecycle manager.
//!
//! All enums provide `as_label` (stable snake_case for logs/metrics).

use std::time::Duration;

use thiserror::Error;

use crate::lc::{LcComponent, LcScope, TransitionKind};
use crate::tasks::{TaskId, ThreadUid};

/// # Errors produced by task execution.
///
/// Returned from [`Runnable::run`](crate::Runnable::run) and thread closures.
/// Every variant except [`TaskError::Canceled`] ends the task in
/// [`TaskState::Failed`](crate::TaskState::Failed) and is escalated as a
/// lifecycle failure of the task's component.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Task execution failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable fatal error with an application error code.
    #[error("fatal error [{code}]: {error}")]
    Fatal {
        /// Application error code.
        code: i32,
        /// The underlying error message.
        error: String,
    },

    /// Task body panicked; caught at the thread boundary.
    #[error("task panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// Task observed a cancel request and gave up.
    #[error("task cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`TaskError::Fatal`].
    pub fn fatal(code: i32, error: impl Into<String>) -> Self {
        TaskError::Fatal {
            code,
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskmgr::TaskError;
    ///
    /// let err = TaskError::fail("boom");
    /// assert_eq!(err.as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Returns the error code carried into a failure record.
    pub fn code(&self) -> i32 {
        match self {
            TaskError::Fatal { code, .. } => *code,
            TaskError::Fail { .. } => 1,
            TaskError::Panicked { .. } => 2,
            TaskError::Canceled => 0,
        }
    }

    /// Returns `true` if the error does not represent a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}

/// # Task profile validation errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    /// Explicit task name is empty.
    #[error("task name must not be empty")]
    EmptyName,

    /// An enclosing-thread task runs in-line and cannot be delayed.
    #[error("enclosing-thread task cannot have a delayed start")]
    DelayedEnclosing,

    /// Framework task kinds can only be created by the framework itself.
    #[error("profile of kind {kind} was not issued by the framework")]
    Foreign {
        /// Offending kind label.
        kind: &'static str,
    },

    /// Framework tasks always run on a dedicated thread.
    #[error("framework task cannot enclose a caller thread")]
    EnclosingFrameworkTask,
}

impl ProfileError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProfileError::EmptyName => "profile_empty_name",
            ProfileError::DelayedEnclosing => "profile_delayed_enclosing",
            ProfileError::Foreign { .. } => "profile_foreign",
            ProfileError::EnclosingFrameworkTask => "profile_enclosing_fw_task",
        }
    }
}

/// # Errors produced by the task registry while creating or admitting tasks.
///
/// Start/stop/join requests report through `bool` and the `logif` channel; only
/// construction-like operations return typed errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Registry was invalidated or the framework left normal operating mode.
    #[error("task registry is not operable")]
    Inoperable,

    /// Profile rejected before any side effect.
    #[error("invalid task profile: {0}")]
    InvalidProfile(#[from] ProfileError),

    /// A task with this id is already in the table.
    #[error("duplicate task id {0}")]
    DuplicateTaskId(TaskId),

    /// The thread is already bound to another (non auto-enclosed) task.
    #[error("thread {uid} is already bound to task {owner}")]
    ThreadCollision {
        /// Thread in question.
        uid: ThreadUid,
        /// Task currently bound to it.
        owner: TaskId,
    },

    /// An enclosing-thread task must be created from the thread it encloses.
    #[error("enclosing thread {expected} is not the calling thread {actual}")]
    EnclosingThreadMismatch {
        /// Thread the task would enclose.
        expected: ThreadUid,
        /// Thread issuing the request.
        actual: ThreadUid,
    },

    /// A main task of this kind is already registered.
    #[error("a main task is already registered as {0}")]
    MainTaskExists(TaskId),

    /// Starting the freshly created task failed; it was rolled back.
    #[error("task {0} could not be started")]
    StartFailed(TaskId),
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::Inoperable => "registry_inoperable",
            RegistryError::InvalidProfile(_) => "registry_invalid_profile",
            RegistryError::DuplicateTaskId(_) => "registry_duplicate_id",
            RegistryError::ThreadCollision { .. } => "registry_thread_collision",
            RegistryError::EnclosingThreadMismatch { .. } => "registry_enclosing_mismatch",
            RegistryError::MainTaskExists(_) => "registry_main_task_exists",
            RegistryError::StartFailed(_) => "registry_start_failed",
        }
    }
}

/// # Lifecycle transition vetoes.
///
/// Every variant corresponds to one rule check of the transition pipeline in
/// [`LcState::set_lc_state`](crate::LcState::set_lc_state). They represent
/// programming errors of the caller, except [`LcStateError::Inconsistent`]
/// which is a framework bug (reported on `vlogif`).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LcStateError {
    /// Lifecycle already reached its stopped state; nothing may change.
    #[error("lifecycle already stopped; rejected {kind:?} for {component}")]
    AlreadyStopped {
        /// Component of the rejected request.
        component: LcComponent,
        /// Requested transition.
        kind: TransitionKind,
    },

    /// Start requested for a component that already stopped or failed.
    #[error("start requested for {component} after it stopped or failed")]
    StartAfterStopOrFail {
        /// Component of the rejected request.
        component: LcComponent,
    },

    /// Stop requested for a component that already failed.
    #[error("stop requested for {component} after it failed")]
    StopAfterFail {
        /// Component of the rejected request.
        component: LcComponent,
    },

    /// Failure reported for a component that already stopped.
    #[error("failure reported for {component} after it stopped")]
    FailAfterStop {
        /// Component of the rejected request.
        component: LcComponent,
    },

    /// A failure record for this (component, task) pair already exists.
    #[error("duplicate failure for {component} (reporter {reporter})")]
    DuplicateFailure {
        /// Component of the rejected request.
        component: LcComponent,
        /// Reporter key of the existing record.
        reporter: String,
    },

    /// Post-conditions of the update did not hold; the bitmask was rolled back.
    #[error("inconsistent lifecycle update: {detail}")]
    Inconsistent {
        /// What did not hold.
        detail: String,
    },
}

impl LcStateError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LcStateError::AlreadyStopped { .. } => "lc_already_stopped",
            LcStateError::StartAfterStopOrFail { .. } => "lc_start_after_stop_or_fail",
            LcStateError::StopAfterFail { .. } => "lc_stop_after_fail",
            LcStateError::FailAfterStop { .. } => "lc_fail_after_stop",
            LcStateError::DuplicateFailure { .. } => "lc_duplicate_failure",
            LcStateError::Inconsistent { .. } => "lc_inconsistent",
        }
    }
}

/// # Errors produced by the lifecycle manager.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LcError {
    /// The lifecycle guard thread could not be spawned.
    #[error("failed to spawn lifecycle guard: {0}")]
    GuardSpawn(#[from] std::io::Error),

    /// The guard did not report back within the wait bound.
    #[error("lifecycle guard did not report within {0:?}")]
    GuardTimeout(Duration),

    /// Setup failed; the framework was stopped and joined again.
    #[error("setup failed at scope {scope} (target {target}): {summary}")]
    SetupFailed {
        /// Scope reached before the failure.
        scope: LcScope,
        /// Configured target scope.
        target: LcScope,
        /// Aggregated failure listing (may be empty).
        summary: String,
    },

    /// Join requested from a thread that is attached to the framework.
    #[error("join refused: calling thread is attached to task {0}")]
    JoinFromAttachedThread(TaskId),

    /// Join requested from the lifecycle guard thread (inside custom setup).
    #[error("join refused: calling thread is the lifecycle guard")]
    JoinFromGuardThread,
}

impl LcError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LcError::GuardSpawn(_) => "lc_guard_spawn",
            LcError::GuardTimeout(_) => "lc_guard_timeout",
            LcError::SetupFailed { .. } => "lc_setup_failed",
            LcError::JoinFromAttachedThread(_) => "lc_join_refused",
            LcError::JoinFromGuardThread => "lc_join_from_guard",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_labels_and_codes() {
        assert_eq!(TaskError::fatal(42, "x").code(), 42);
        assert_eq!(TaskError::fatal(42, "x").as_label(), "task_fatal");
        assert_eq!(TaskError::Canceled.as_label(), "task_canceled");
        assert!(TaskError::Canceled.is_cancellation());
        assert!(!TaskError::fail("boom").is_cancellation());
    }

    #[test]
    fn profile_error_converts_into_registry_error() {
        let err: RegistryError = ProfileError::EmptyName.into();
        assert_eq!(err.as_label(), "registry_invalid_profile");
        assert!(err.to_string().contains("must not be empty"));
    }
}
