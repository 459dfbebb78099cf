//! # taskmgr
//!
//! **taskmgr** is a thread-backed task registry with a lifecycle state machine
//! for application frameworks.
//!
//! It tracks every task of the process (dedicated worker threads, caller
//! threads running a task in-line, foreign threads that merely call into the
//! framework), drives start/stop/join through an explicit precheck table and
//! escalates task failures into a composable lifecycle bitmask that decides
//! about coordinated shutdown.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │  Runnable    │   │ thread fn    │   │ foreign      │
//!     │ (full task)  │   │ (light task) │   │ thread       │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼ create_task      ▼ create_thread    ▼ get_cur_task_badge(auto_enclose)
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  TaskRegistry                                                     │
//! │  - by_id / by_thread / by_name indices (data lock)                │
//! │  - precheck → start / stop / cancel / join (API lock)             │
//! │  - failure classification by API bookmark                         │
//! └──────┬──────────────────────────────────────────────┬─────────────┘
//!        ▼                                              │ LcProxy
//!     ┌──────────────┐  worker thread / in-line         ▼
//!     │ TaskInstance │  setup → run → teardown   ┌─────────────────────┐
//!     └──────┬───────┘                           │ LcState (bitmask)   │
//!            │ Publishes                         │ + failure records   │
//!            │ TaskCreated, TaskStarted,         └──────────┬──────────┘
//!            │ TaskStopped, TaskFailed, ...                 │ core failure
//!            ▼                                              ▼
//! ┌────────────────────────────────────────┐  ┌─────────────────────────┐
//! │ Bus (broadcast channel)                │  │ LcManager (guard thread)│
//! │ (capacity: StartupPolicy::bus_capacity)│◄─│ scopes, phases, stop,   │
//! └──────────────────┬─────────────────────┘  │ join, final report      │
//!                    ▼                        └─────────────────────────┘
//!            lc-events listener
//!                    ▼
//!              SubscriberSet
//!          (per-sub queues/threads)
//! ```
//!
//! ### Lifecycle
//! ```text
//! LcManager::builder(policy).build()
//!   Idle ─► PreIpc      LcMgr Started
//!        ─► SemiIpc     registry + proxy, TaskMgr Started
//!        ─► FullIpc     framework main task, FwMain Started
//!
//! application: create / start / stop / join tasks
//!
//! stop_fw()  ─► guard halts: FullIpc ─► SemiIpc ─► PreIpc (tasks stopped newest first)
//! join_fw()  ─► final join ─► LcMgr Stopped, Idle ─► one-time pass/fail report
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                         |
//! |-------------------|--------------------------------------------------------------|--------------------------------------------|
//! | **Tasks**         | Full tasks, light threads, enclosing and attached threads.   | [`Runnable`], [`TaskFn`], [`TaskProfile`]  |
//! | **Registry**      | Three-index table, precheck table, mass stop.                | [`TaskRegistry`], [`precheck`]             |
//! | **Lifecycle**     | Bitmask state machine with failure records.                  | [`LcState`], [`LcComponent`]               |
//! | **Manager**       | Bootstrap, scope escalation, coordinated shutdown.           | [`LcManager`], [`StartupPolicy`]           |
//! | **Subscriber API**| Hook into runtime events.                                    | [`Subscribe`], [`LogWriter`]               |
//! | **Errors**        | Typed errors for tasks, registry and lifecycle.              | [`TaskError`], [`RegistryError`], [`LcError`] |
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use taskmgr::{LcManager, StartupPolicy, TaskContext, TaskFn, TaskProfile};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mgr = LcManager::create(StartupPolicy::default())?;
//!     let reg = mgr.registry().expect("task registry");
//!
//!     reg.create_task(
//!         TaskFn::arc(|ctx: &TaskContext| {
//!             while !ctx.wait_for_stop(Duration::from_millis(100)) {
//!                 println!("{} working", ctx.name());
//!             }
//!             Ok(())
//!         }),
//!         TaskProfile::main_xtask().with_name("app"),
//!         true,
//!     )?;
//!
//!     mgr.stop_fw(false);
//!     mgr.join_fw()?;
//!     Ok(())
//! }
//! ```
mod config;
mod error;
mod events;
mod lc;
mod logif;
mod registry;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use config::{RegistryConfig, StartupPolicy};
pub use error::{LcError, LcStateError, ProfileError, RegistryError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use lc::{
    DependencyManager, ExecPhase, ExecutionHistory, FAILURE_BASE, FailureRecord,
    FailureRecordManager, FatalError, FinalReport, Interrupt, LcComponent, LcGroup, LcManager,
    LcManagerBuilder, LcMonitor, LcProxy, LcProxyImpl, LcScope, LcState, LcStateFlags,
    MAIN_XTASK, MonitorSnapshot, ProxyMode, ReporterKind, ScopeUpdate, ShutdownRequest,
    SignalWatcher, StopOrigin, StopRecord, TransitionKind, TransitionOutcome, TransitionRequest,
    convert_from_component, render_report, to_bit_flags_pair, wait_for_shutdown_signal,
};
pub use registry::{
    FailedTask, FailureCause, MessagePeer, RetiredTask, TaskKey, TaskRegistry, classify,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use tasks::{
    ApiBookmark, BinarySemaphore, ExecMode, Precheck, PrecheckInput, Runnable, RunnableRef,
    TaskBadge, TaskContext, TaskEntry, TaskFn, TaskId, TaskInstance, TaskKind, TaskObserver,
    TaskOperation, TaskProfile, TaskRights, TaskState, TaskTypeFlags, ThreadFn, ThreadUid,
    precheck,
};
