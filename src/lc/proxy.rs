//! # Lifecycle proxy: the narrow interface between tasks/registry and the lifecycle.
//!
//! The registry and task instances never touch [`LcState`] or the manager
//! directly; they hold an `Arc<dyn LcProxy>` injected once the task manager
//! scope is reached.
//!
//! ```text
//! TaskInstance ── notify_task_transition ─┐
//! TaskRegistry ── notify_lc_failure ──────┼──► LcProxyImpl ──► LcState
//! TaskContext  ── process_shutdown_request┘          └──────► LcMonitor (wakes the guard)
//! ```
//!
//! ### Rules
//! - Outside [`ProxyMode::Normal`] the registry refuses to create or start tasks.
//! - A failure of a core component (`LcMgr`, `TaskMgr`, `FwMain`, `MainXTask`)
//!   requests a failure shutdown.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::lc::monitor::LcMonitor;
use crate::lc::{FatalError, LcComponent, LcState, TransitionOutcome};
use crate::logif::{log_debug, log_info, log_user_error};
use crate::registry::TaskRegistry;
use crate::tasks::{TaskBadge, TaskKind};

/// Operating mode of the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    Normal,
    /// A stop was requested; running tasks keep working.
    PreShutdown,
    /// The framework is being torn down.
    Shutdown,
}

/// Lifecycle services available to the registry and to tasks.
pub trait LcProxy: Send + Sync {
    fn is_proxy_mode_normal(&self) -> bool;

    /// Registry handle, while the task manager scope is reached.
    fn task_manager(&self) -> Option<Arc<TaskRegistry>>;

    /// A task asks the framework to stop; `true` if the request was accepted.
    fn process_shutdown_request(&self, forced: bool, requester: Option<&TaskBadge>) -> bool;

    /// Records a failure of `component`; `true` if it changed the lifecycle state.
    fn notify_lc_failure(
        &self,
        component: LcComponent,
        error: &FatalError,
        task: Option<&TaskBadge>,
    ) -> bool;

    /// A task entered (`started`) or left its running state.
    fn notify_task_transition(&self, badge: &TaskBadge, started: bool);
}

pub struct LcProxyImpl {
    lc_state: Arc<LcState>,
    monitor: Arc<LcMonitor>,
    registry: RwLock<Weak<TaskRegistry>>,
    mode: Mutex<ProxyMode>,
}

impl std::fmt::Debug for LcProxyImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LcProxyImpl")
            .field("mode", &self.mode())
            .finish()
    }
}

impl LcProxyImpl {
    pub fn new(lc_state: Arc<LcState>, monitor: Arc<LcMonitor>) -> Self {
        Self {
            lc_state,
            monitor,
            registry: RwLock::new(Weak::new()),
            mode: Mutex::new(ProxyMode::Normal),
        }
    }

    pub fn set_registry(&self, registry: &Arc<TaskRegistry>) {
        *self.registry.write() = Arc::downgrade(registry);
    }

    pub fn clear_registry(&self) {
        *self.registry.write() = Weak::new();
    }

    pub fn mode(&self) -> ProxyMode {
        *self.mode.lock()
    }

    /// Moves the mode forward; it never goes back to a less advanced mode.
    pub fn set_mode(&self, mode: ProxyMode) {
        let mut cur = self.mode.lock();
        let rank = |m: ProxyMode| match m {
            ProxyMode::Normal => 0,
            ProxyMode::PreShutdown => 1,
            ProxyMode::Shutdown => 2,
        };
        if rank(mode) > rank(*cur) {
            log_debug!(2301, from = ?*cur, to = ?mode, "proxy mode changed");
            *cur = mode;
        }
    }
}

impl LcProxy for LcProxyImpl {
    fn is_proxy_mode_normal(&self) -> bool {
        self.mode() == ProxyMode::Normal
    }

    fn task_manager(&self) -> Option<Arc<TaskRegistry>> {
        self.registry.read().upgrade()
    }

    fn process_shutdown_request(&self, forced: bool, requester: Option<&TaskBadge>) -> bool {
        if self.mode() == ProxyMode::Shutdown {
            log_user_error!(
                2302,
                requester = requester.map(|b| b.to_string()).unwrap_or_default(),
                "shutdown request while the framework is already shutting down"
            );
            return false;
        }
        log_info!(
            2303,
            forced,
            requester = requester.map(|b| b.to_string()).unwrap_or_default(),
            "shutdown requested by task"
        );
        self.monitor.request_task_stop(forced);
        true
    }

    fn notify_lc_failure(
        &self,
        component: LcComponent,
        error: &FatalError,
        task: Option<&TaskBadge>,
    ) -> bool {
        let applied = match self.lc_state.set_lc_state(component, None, Some(error), task) {
            Ok(TransitionOutcome::Applied) => true,
            Ok(_) => false,
            Err(err) => {
                log_debug!(2304, %component, error = %err, "failure not recorded");
                false
            }
        };
        if applied && component.is_core() {
            self.monitor.request_failure_shutdown();
        }
        applied
    }

    fn notify_task_transition(&self, badge: &TaskBadge, started: bool) {
        // framework main is driven by the manager itself
        if badge.kind() != TaskKind::MainXTask {
            return;
        }
        if let Err(err) = self.lc_state.set_lc_state(
            LcComponent::MainXTask,
            Some(started),
            None,
            Some(badge),
        ) {
            log_debug!(2305, task = %badge, error = %err, "main task transition not applied");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::events::Bus;

    fn proxy() -> (Arc<LcState>, Arc<LcMonitor>, LcProxyImpl) {
        let state = Arc::new(LcState::default());
        let monitor = Arc::new(LcMonitor::new());
        let p = LcProxyImpl::new(Arc::clone(&state), Arc::clone(&monitor));
        (state, monitor, p)
    }

    #[test]
    fn mode_only_advances() {
        let (_, _, p) = proxy();
        assert!(p.is_proxy_mode_normal());
        p.set_mode(ProxyMode::Shutdown);
        p.set_mode(ProxyMode::PreShutdown);
        assert_eq!(p.mode(), ProxyMode::Shutdown);
        assert!(!p.process_shutdown_request(false, None));
    }

    #[test]
    fn core_failure_requests_shutdown() {
        let (state, monitor, p) = proxy();
        assert!(p.notify_lc_failure(LcComponent::XTask, &FatalError::new(5, "x"), None));
        assert!(!monitor.is_failure_shutdown_requested());

        assert!(p.notify_lc_failure(LcComponent::TaskMgr, &FatalError::new(6, "tm"), None));
        assert!(monitor.is_failure_shutdown_requested());
        assert!(state.is_task_manager_failed());
    }

    #[test]
    fn registry_handle_is_weak() {
        let (_, _, p) = proxy();
        let reg = TaskRegistry::new(RegistryConfig::default(), Bus::default());
        p.set_registry(&reg);
        assert!(p.task_manager().is_some());
        drop(reg);
        assert!(p.task_manager().is_none());
    }
}
