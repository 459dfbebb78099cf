//! # Task bodies.
//!
//! Two payload shapes exist:
//! - a full task: [`Runnable`] with `setup` → `run` → `teardown`, shared as [`RunnableRef`]
//! - a light thread: a one-shot closure ([`ThreadFn`])
//!
//! Both receive a [`TaskContext`] and should poll
//! [`TaskContext::is_stop_requested`] (or block in
//! [`TaskContext::wait_for_stop`]) to finish cooperatively. There is no
//! cancellation token: a stop request is a state transition the body observes.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use taskmgr::{RunnableRef, TaskContext, TaskError, TaskFn};
//!
//! let t: RunnableRef = TaskFn::arc(|ctx: &TaskContext| {
//!     while !ctx.wait_for_stop(Duration::from_millis(10)) {
//!         // do work...
//!     }
//!     Ok::<_, TaskError>(())
//! });
//! ```

use std::sync::Arc;

use crate::error::TaskError;
use crate::tasks::{TaskBadge, TaskContext, TaskState};

/// A full task body.
pub trait Runnable: Send + Sync + 'static {
    /// Runs on the task's thread before [`run`](Runnable::run).
    fn setup(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// Main body; returns when done or when a stop was observed.
    fn run(&self, ctx: &TaskContext) -> Result<(), TaskError>;

    /// Runs after [`run`](Runnable::run), also if it failed.
    fn teardown(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Shared handle to a [`Runnable`].
pub type RunnableRef = Arc<dyn Runnable>;

/// One-shot body of a light thread.
pub type ThreadFn = Box<dyn FnOnce(&TaskContext) -> Result<(), TaskError> + Send + 'static>;

/// Closure-backed [`Runnable`].
#[derive(Debug)]
pub struct TaskFn<F> {
    f: F,
}

impl<F> TaskFn<F>
where
    F: Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the task and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<F> Runnable for TaskFn<F>
where
    F: Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync + 'static,
{
    fn run(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        (self.f)(ctx)
    }
}

/// Body of a task instance.
pub(crate) enum Payload {
    Task(RunnableRef),
    Thread(ThreadFn),
}

impl Payload {
    pub(crate) fn execute(self, ctx: &TaskContext) -> Result<(), TaskError> {
        match self {
            Payload::Task(r) => {
                r.setup(ctx)?;
                let res = r.run(ctx);
                let td = r.teardown(ctx);
                res.and(td)
            }
            Payload::Thread(f) => f(ctx),
        }
    }
}

/// Per-task hook notified of every state transition.
///
/// Called on the thread performing the transition, after the state lock was
/// released.
pub trait TaskObserver: Send + Sync + 'static {
    fn on_state_change(&self, badge: &TaskBadge, old: TaskState, new: TaskState);
}
