//! # Task states and operation precheck.
//!
//! Every start/stop/cancel/join request goes through [`precheck`] before the
//! registry touches the task. The precheck classifies the request as
//! **applicable** (proceed, synchronously or asynchronously), **ignorable**
//! (no-op success) or **not applicable** (failure).
//!
//! ## State flow
//! ```text
//! Initialized ──start──► PendingRun ──thread runs──► Running ──body returns──► Done
//!      │                     │                          │                    Failed
//!      │                     └───────── stop/cancel ────┤
//!      │                                                ▼
//!      │                                  PendingStopRequest ──► Done
//!      │                                  PendingCancelRequest ──► Cancelled
//!      └──stop (never started)──► Done
//! ```
//!
//! ## Precheck table
//! ```text
//!                  Start          Stop/Cancel              Join
//! Initialized      Applicable*    Applicable(sync)         NotApplicable
//! PendingRun       Ignorable      Applicable*              Applicable(sync)
//! Running          Ignorable      Applicable*              Applicable(sync)
//! PendingStop      NotApplicable  Ignorable / escalate†    Applicable(sync)
//! PendingCancel    NotApplicable  Ignorable                Applicable(sync)
//! terminated       NotApplicable  Applicable(sync)‡        Ignorable
//!
//! *  sync/async depends on the thread binding (see `precheck`)
//! †  Cancel on a stop-pending task escalates to cancel
//! ‡  degenerates to "remove the entry"
//! ```
//! Self-join and joining a never-started or auto-enclosed task are not applicable.

use std::fmt;

/// Execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created, not started.
    Initialized,
    /// Start accepted, body not entered yet (thread spinning up or delayed start).
    PendingRun,
    /// Body is executing.
    Running,
    /// Stop requested, body still executing.
    PendingStopRequest,
    /// Cancel requested, body still executing.
    PendingCancelRequest,
    /// Finished after a cancel request.
    Cancelled,
    /// Finished with an error.
    Failed,
    /// Finished normally.
    Done,
}

impl TaskState {
    /// The task has finished and will not run again.
    pub fn is_terminated(self) -> bool {
        matches!(self, TaskState::Cancelled | TaskState::Failed | TaskState::Done)
    }

    /// The task accepted a start and has not finished yet.
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            TaskState::PendingRun
                | TaskState::Running
                | TaskState::PendingStopRequest
                | TaskState::PendingCancelRequest
        )
    }

    /// A stop or cancel request is pending.
    pub fn is_ceasing(self) -> bool {
        matches!(
            self,
            TaskState::PendingStopRequest | TaskState::PendingCancelRequest
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Initialized => "Initialized",
            TaskState::PendingRun => "PendingRun",
            TaskState::Running => "Running",
            TaskState::PendingStopRequest => "PendingStopRequest",
            TaskState::PendingCancelRequest => "PendingCancelRequest",
            TaskState::Cancelled => "Cancelled",
            TaskState::Failed => "Failed",
            TaskState::Done => "Done",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation requested on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskOperation {
    Start,
    Stop,
    Cancel,
    Join,
}

/// Whether the caller blocks until the operation has taken effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecMode {
    /// Runs in-line or waits for the handoff/termination.
    Sync,
    /// Hands off and returns.
    Async,
}

/// Outcome of [`precheck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precheck {
    /// Proceed with the operation.
    Applicable(ExecMode),
    /// No-op given the current state; report success.
    Ignorable,
    /// Illegal given the current state; report failure.
    NotApplicable,
}

impl Precheck {
    pub fn is_applicable(self) -> bool {
        matches!(self, Precheck::Applicable(_))
    }
}

/// Facts about the target task the precheck needs.
#[derive(Debug, Clone, Copy)]
pub struct PrecheckInput {
    /// Current state.
    pub state: TaskState,
    /// Task runs on a worker thread it owns.
    pub dedicated_thread: bool,
    /// Task is a synthetic wrapper of a foreign thread.
    pub auto_enclosed: bool,
    /// Calling thread is the task's own thread.
    pub on_task_thread: bool,
}

/// Classifies `op` against the task described by `input`.
pub fn precheck(op: TaskOperation, input: &PrecheckInput) -> Precheck {
    use TaskState::*;

    match op {
        TaskOperation::Start => match input.state {
            Initialized if input.dedicated_thread => Precheck::Applicable(ExecMode::Async),
            Initialized if input.on_task_thread => Precheck::Applicable(ExecMode::Sync),
            Initialized => Precheck::NotApplicable,
            PendingRun | Running => Precheck::Ignorable,
            PendingStopRequest | PendingCancelRequest | Cancelled | Failed | Done => {
                Precheck::NotApplicable
            }
        },
        TaskOperation::Stop | TaskOperation::Cancel => match input.state {
            Initialized | Cancelled | Failed | Done => Precheck::Applicable(ExecMode::Sync),
            PendingCancelRequest => Precheck::Ignorable,
            PendingStopRequest if op == TaskOperation::Stop => Precheck::Ignorable,
            PendingRun | Running | PendingStopRequest => Precheck::Applicable(stop_mode(input)),
        },
        TaskOperation::Join => {
            if input.on_task_thread || input.auto_enclosed {
                return Precheck::NotApplicable;
            }
            match input.state {
                Initialized => Precheck::NotApplicable,
                Cancelled | Failed | Done => Precheck::Ignorable,
                PendingRun | Running | PendingStopRequest | PendingCancelRequest => {
                    Precheck::Applicable(ExecMode::Sync)
                }
            }
        }
    }
}

fn stop_mode(input: &PrecheckInput) -> ExecMode {
    if input.auto_enclosed {
        // nothing runs on behalf of the wrapper; degenerate stop
        ExecMode::Sync
    } else if input.on_task_thread || !input.dedicated_thread {
        ExecMode::Async
    } else {
        ExecMode::Sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dedicated(state: TaskState) -> PrecheckInput {
        PrecheckInput {
            state,
            dedicated_thread: true,
            auto_enclosed: false,
            on_task_thread: false,
        }
    }

    #[test]
    fn start_table() {
        use TaskState::*;
        assert_eq!(
            precheck(TaskOperation::Start, &dedicated(Initialized)),
            Precheck::Applicable(ExecMode::Async)
        );
        assert_eq!(precheck(TaskOperation::Start, &dedicated(Running)), Precheck::Ignorable);
        assert_eq!(precheck(TaskOperation::Start, &dedicated(PendingRun)), Precheck::Ignorable);
        for s in [PendingStopRequest, PendingCancelRequest, Cancelled, Failed, Done] {
            assert_eq!(precheck(TaskOperation::Start, &dedicated(s)), Precheck::NotApplicable);
        }
    }

    #[test]
    fn start_enclosing_requires_own_thread() {
        let mut input = PrecheckInput {
            state: TaskState::Initialized,
            dedicated_thread: false,
            auto_enclosed: false,
            on_task_thread: false,
        };
        assert_eq!(precheck(TaskOperation::Start, &input), Precheck::NotApplicable);
        input.on_task_thread = true;
        assert_eq!(
            precheck(TaskOperation::Start, &input),
            Precheck::Applicable(ExecMode::Sync)
        );
    }

    #[test]
    fn stop_table() {
        use TaskState::*;
        assert_eq!(
            precheck(TaskOperation::Stop, &dedicated(Running)),
            Precheck::Applicable(ExecMode::Sync)
        );
        assert_eq!(
            precheck(TaskOperation::Stop, &dedicated(PendingStopRequest)),
            Precheck::Ignorable
        );
        assert_eq!(
            precheck(TaskOperation::Cancel, &dedicated(PendingStopRequest)),
            Precheck::Applicable(ExecMode::Sync)
        );
        assert_eq!(
            precheck(TaskOperation::Stop, &dedicated(PendingCancelRequest)),
            Precheck::Ignorable
        );
        assert_eq!(
            precheck(TaskOperation::Stop, &dedicated(Done)),
            Precheck::Applicable(ExecMode::Sync)
        );
    }

    #[test]
    fn self_stop_is_async() {
        let input = PrecheckInput {
            on_task_thread: true,
            ..dedicated(TaskState::Running)
        };
        assert_eq!(
            precheck(TaskOperation::Stop, &input),
            Precheck::Applicable(ExecMode::Async)
        );
    }

    #[test]
    fn join_table() {
        use TaskState::*;
        assert_eq!(precheck(TaskOperation::Join, &dedicated(Initialized)), Precheck::NotApplicable);
        assert_eq!(
            precheck(TaskOperation::Join, &dedicated(Running)),
            Precheck::Applicable(ExecMode::Sync)
        );
        assert_eq!(precheck(TaskOperation::Join, &dedicated(Done)), Precheck::Ignorable);

        let self_join = PrecheckInput {
            on_task_thread: true,
            ..dedicated(Running)
        };
        assert_eq!(precheck(TaskOperation::Join, &self_join), Precheck::NotApplicable);

        let auto = PrecheckInput {
            auto_enclosed: true,
            dedicated_thread: false,
            ..dedicated(Running)
        };
        assert_eq!(precheck(TaskOperation::Join, &auto), Precheck::NotApplicable);
    }

    #[test]
    fn state_predicates() {
        assert!(TaskState::Failed.is_terminated());
        assert!(TaskState::PendingRun.is_alive());
        assert!(TaskState::PendingCancelRequest.is_ceasing());
        assert!(!TaskState::Initialized.is_alive());
    }
}
