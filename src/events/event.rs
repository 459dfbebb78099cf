//! # Runtime events emitted by the registry, the tasks and the lifecycle manager.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Task events**: creation, start, stop requests, termination, join, removal
//! - **Lifecycle events**: state bitmask changes, scope changes, phase entries
//! - **Shutdown events**: stop/join requests and final completion
//! - **Subscriber events**: overflow and panic of a subscriber worker
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use taskmgr::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskFailed)
//!     .with_task("worker")
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::TaskFailed);
//! assert_eq!(ev.task.as_deref(), Some("worker"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::lc::LcComponent;
use crate::tasks::TaskId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Task events ===
    /// Task admitted to the registry table.
    ///
    /// Sets: `task`, `task_id`
    TaskCreated,

    /// A foreign thread was transparently admitted as auto-enclosed task.
    ///
    /// Sets: `task`, `task_id`
    TaskAutoEnclosed,

    /// Task began running (worker handoff completed or in-line run entered).
    ///
    /// Sets: `task`, `task_id`
    TaskStarted,

    /// Stop or cancel was requested for a running task.
    ///
    /// Sets: `task`, `task_id`, `reason` (`"stop"` or `"cancel"`)
    TaskStopRequested,

    /// Task finished (done or cancelled).
    ///
    /// Sets: `task`, `task_id`, `state`
    TaskStopped,

    /// Task finished with an error.
    ///
    /// Sets: `task`, `task_id`, `reason`
    TaskFailed,

    /// A join on the task completed.
    ///
    /// Sets: `task`, `task_id`
    TaskJoined,

    /// Task entry removed from the registry table.
    ///
    /// Sets: `task`, `task_id`
    TaskRemoved,

    // === Lifecycle events ===
    /// Lifecycle bitmask changed.
    ///
    /// Sets: `component`, `state` (canonical state string)
    LcStateChanged,

    /// Lifecycle scope moved one step.
    ///
    /// Sets: `state` (`"src -> dst"`)
    ScopeChanged,

    /// Lifecycle manager entered an execution phase.
    ///
    /// Sets: `state` (phase name)
    PhaseEntered,

    // === Shutdown events ===
    /// Stop of the framework requested.
    ///
    /// Sets: `reason` (origin and mode)
    StopRequested,

    /// Join of the framework requested.
    ///
    /// Sets: `reason` (origin)
    JoinRequested,

    /// Final event of a framework instance; the listener exits after it.
    ///
    /// Sets: `state` (`"passed"` or `"failed"`)
    ShutdownCompleted,

    // === Subscriber events ===
    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `task` (subscriber name), `reason`
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `task` (subscriber name), `reason`
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Task (or subscriber) name, if applicable.
    pub task: Option<Arc<str>>,
    /// Task id, if applicable.
    pub task_id: Option<TaskId>,
    /// Lifecycle component, if applicable.
    pub component: Option<LcComponent>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// State rendering (task state, lifecycle state string, scope, phase).
    pub state: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            task_id: None,
            component: None,
            reason: None,
            state: None,
        }
    }

    /// Attaches a task name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a task id.
    #[inline]
    pub fn with_task_id(mut self, id: TaskId) -> Self {
        self.task_id = Some(id);
        self
    }

    /// Attaches a lifecycle component.
    #[inline]
    pub fn with_component(mut self, component: LcComponent) -> Self {
        self.component = Some(component);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a state rendering.
    #[inline]
    pub fn with_state(mut self, state: impl Into<Arc<str>>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::new(EventKind::TaskCreated);
        let b = Event::new(EventKind::TaskCreated);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::new(EventKind::LcStateChanged)
            .with_component(LcComponent::TaskMgr)
            .with_state("LcStarted|TMgrStarted")
            .with_task_id(TaskId::new(3));
        assert_eq!(ev.component, Some(LcComponent::TaskMgr));
        assert_eq!(ev.state.as_deref(), Some("LcStarted|TMgrStarted"));
        assert_eq!(ev.task_id, Some(TaskId::new(3)));
    }
}
