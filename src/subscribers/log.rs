//! # LogWriter: event renderer
//!
//! A minimal subscriber that renders incoming [`Event`]s through `tracing`
//! (target `taskmgr::events`).
//!
//! ## Example output
//! ```text
//! [created] task="worker" id=T#4
//! [started] task="worker" id=T#4
//! [stop-requested] task="worker" id=T#4 mode="stop"
//! [stopped] task="worker" id=T#4 state="Done"
//! [lc-state] component=TaskMgr state="LcStarted|TMgrStarted"
//! [shutdown-completed] result="passed"
//! ```

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Renders one event as a single line.
    pub fn render(e: &Event) -> String {
        let task = e.task.as_deref().unwrap_or("-");
        let id = e
            .task_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let state = e.state.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");

        match e.kind {
            EventKind::TaskCreated => format!("[created] task={task:?} id={id}"),
            EventKind::TaskAutoEnclosed => format!("[auto-enclosed] task={task:?} id={id}"),
            EventKind::TaskStarted => format!("[started] task={task:?} id={id}"),
            EventKind::TaskStopRequested => {
                format!("[stop-requested] task={task:?} id={id} mode={reason:?}")
            }
            EventKind::TaskStopped => format!("[stopped] task={task:?} id={id} state={state:?}"),
            EventKind::TaskFailed => format!("[failed] task={task:?} id={id} err={reason:?}"),
            EventKind::TaskJoined => format!("[joined] task={task:?} id={id}"),
            EventKind::TaskRemoved => format!("[removed] task={task:?} id={id}"),
            EventKind::LcStateChanged => {
                let comp = e
                    .component
                    .map(|c| c.as_str())
                    .unwrap_or("-");
                format!("[lc-state] component={comp} state={state:?}")
            }
            EventKind::ScopeChanged => format!("[scope] {state}"),
            EventKind::PhaseEntered => format!("[phase] {state}"),
            EventKind::StopRequested => format!("[stop-fw] {reason}"),
            EventKind::JoinRequested => format!("[join-fw] {reason}"),
            EventKind::ShutdownCompleted => format!("[shutdown-completed] result={state:?}"),
            EventKind::SubscriberOverflow => {
                format!("[subscriber-overflow] subscriber={task:?} reason={reason:?}")
            }
            EventKind::SubscriberPanicked => {
                format!("[subscriber-panicked] subscriber={task} info={reason}")
            }
        }
    }
}

impl Subscribe for LogWriter {
    fn on_event(&self, e: &Event) {
        let line = Self::render(e);
        match e.kind {
            EventKind::TaskFailed | EventKind::SubscriberPanicked => {
                tracing::warn!(target: "taskmgr::events", seq = e.seq, "{line}")
            }
            _ => tracing::info!(target: "taskmgr::events", seq = e.seq, "{line}"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lc::LcComponent;
    use crate::tasks::TaskId;

    #[test]
    fn renders_task_and_lifecycle_events() {
        let ev = Event::new(EventKind::TaskStopped)
            .with_task("worker")
            .with_task_id(TaskId::new(4))
            .with_state("Done");
        assert_eq!(
            LogWriter::render(&ev),
            "[stopped] task=\"worker\" id=T#4 state=\"Done\""
        );

        let ev = Event::new(EventKind::LcStateChanged)
            .with_component(LcComponent::TaskMgr)
            .with_state("LcStarted");
        assert_eq!(
            LogWriter::render(&ev),
            "[lc-state] component=TaskMgr state=\"LcStarted\""
        );
    }
}
