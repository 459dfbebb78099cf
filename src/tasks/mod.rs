//! # Tasks: identity, state, bodies and the running instance.
//!
//! - [`ThreadUid`] thread identity (thread-local slot)
//! - [`TaskId`], [`TaskKind`], [`TaskBadge`] immutable task identity
//! - [`TaskState`], [`precheck`] state table of start/stop/cancel/join
//! - [`TaskProfile`] creation parameters
//! - [`Runnable`], [`TaskFn`], [`ThreadFn`] task bodies
//! - [`TaskInstance`], [`TaskContext`] the running object and the body's view of it
//! - [`TaskEntry`] registry table entry

mod badge;
mod entry;
mod instance;
mod profile;
mod runnable;
mod semaphore;
mod state;
mod thread;

pub use badge::{TaskBadge, TaskId, TaskKind, TaskRights, TaskTypeFlags};
pub use entry::TaskEntry;
pub use instance::{ApiBookmark, TaskContext, TaskInstance};
pub use profile::TaskProfile;
pub use runnable::{Runnable, RunnableRef, TaskFn, TaskObserver, ThreadFn};
pub use semaphore::BinarySemaphore;
pub use state::{ExecMode, Precheck, PrecheckInput, TaskOperation, TaskState, precheck};
pub use thread::ThreadUid;

pub(crate) use instance::{InstanceInit, StopRequest};
pub(crate) use runnable::Payload;
