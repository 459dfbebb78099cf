//! # Lifecycle: state machine, scopes, phases and the manager.
//!
//! - [`LcState`] composable bitmask state machine with failure records
//! - [`DependencyManager`] lifecycle scope (`Idle ↔ PreIpc ↔ SemiIpc ↔ FullIpc`)
//! - [`ExecutionHistory`] accumulated manager phases
//! - [`LcProxy`] narrow interface used by the registry and tasks
//! - [`LcManager`] bootstrap, guard thread, stop/join
//!
//! ```text
//!             LcManager ──────────────► DependencyManager (scope)
//!           /     │     \─────────────► ExecutionHistory  (phases)
//!   LcMonitor  ShutdownRequest
//!       ▲         │
//!       │         ▼
//!   LcProxyImpl ──► LcState ──► FailureRecordManager
//!       ▲
//!       │  failures, task transitions, shutdown requests
//!   TaskRegistry / TaskInstance / TaskContext
//! ```

mod failure;
mod flags;
mod manager;
mod monitor;
mod phase;
mod proxy;
mod report;
mod scope;
mod shutdown;
mod signals;
mod state;

pub use failure::{FailureRecord, FailureRecordManager, FatalError, ReporterKind};
pub use flags::{
    FAILURE_BASE, LcComponent, LcGroup, LcStateFlags, TransitionKind, TransitionRequest,
    convert_from_component, to_bit_flags_pair,
};
pub use manager::{LcManager, LcManagerBuilder, MAIN_XTASK};
pub use monitor::{LcMonitor, MonitorSnapshot};
pub use phase::{ExecPhase, ExecutionHistory};
pub use proxy::{LcProxy, LcProxyImpl, ProxyMode};
pub use report::{FinalReport, render as render_report};
pub use scope::{DependencyManager, LcScope, ScopeUpdate};
pub use shutdown::{ShutdownRequest, StopOrigin, StopRecord};
pub use signals::{Interrupt, SignalWatcher, wait_for_shutdown_signal};
pub use state::{LcState, TransitionOutcome};
