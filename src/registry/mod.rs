//! # Task registry.
//!
//! [`TaskRegistry`] owns every task of the process: it hands out ids, binds
//! tasks to threads, drives start/stop/join through the per-task precheck
//! table and classifies task errors into lifecycle failures.
//!
//! ```text
//!  create_task / create_thread / attach_current_thread
//!            │
//!            ▼
//!  ┌────────────────────────────────────────────┐
//!  │ TaskRegistry                                │
//!  │   ma: API lock     md: three-index table    │
//!  │   proxy ──► LcProxy (failures, transitions) │
//!  └──────┬──────────────────────────────┬───────┘
//!         ▼                              ▼
//!   TaskInstance (worker thread)   TaskInstance (enclosing / auto-enclosed)
//! ```
//!
//! - `table`: the id/thread/name indices and retired records
//! - `failure`: error classification and escalation

mod failure;
mod table;
mod task_registry;

pub use failure::{FailureCause, classify};
pub use table::RetiredTask;
pub use task_registry::{FailedTask, MessagePeer, TaskKey, TaskRegistry};
