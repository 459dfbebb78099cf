//! # LcManager: bootstrap, runtime guard and coordinated shutdown.
//!
//! ## Bootstrap
//! ```text
//! caller thread                               lc-guard thread
//! ─────────────                               ───────────────
//! build(): PreConfig
//!   registry constructed (caller = entry #1)
//!   spawn guard ────────────────────────────► release sem ("guard started")
//! acquire sem (handoff bound)                 set_up():
//!                                               Config, Idle → PreIpc, LcMgr Started
//!                                               boost SemiIpc: proxy + registry, TaskMgr Started
//!                                               boost FullIpc: FwMain task, FwMain Started
//!                                               custom setup
//! acquire sem ◄────────────────────────────── release sem ("setup finished")
//!   failed? stop + join, Err(SetupFailed)     runtime loop (wait for wakeups)
//! ```
//!
//! ## Shutdown
//! ```text
//! stop_fw ──► ShutdownRequest (first wins) ──► monitor: coordinated shutdown
//!                                                   │
//! guard: halt ◄─────────────────────────────────────┘
//!   proxy Shutdown, stop FwMain, FullIpc → SemiIpc
//!   stop_all_tasks (newest first), TaskMgr Stopped, SemiIpc → PreIpc
//! join_fw: [pending-shutdown loop] → join guard → final join → LcMgr Stopped, PreIpc → Idle
//!          → ShutdownCompleted → one-time report
//! ```
//!
//! ### Rules
//! - Scope moves one step at a time, up during setup and down during halt.
//! - `join_fw` refuses to run on a thread bound to a running task or on the
//!   guard thread (custom setup); it would wait for itself.
//! - A join without a prior stop issues exactly one stop (pending-shutdown loop).
//! - A raised [`Interrupt`] is converted into a forced stop at every wait point.
//! - Setup steps short-circuit on the first failure; rollback and cleanup still run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;

use crate::config::StartupPolicy;
use crate::error::{LcError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::lc::monitor::LcMonitor;
use crate::lc::proxy::{LcProxy, LcProxyImpl, ProxyMode};
use crate::lc::report::FinalReport;
use crate::lc::shutdown::{ShutdownRequest, StopOrigin, StopRecord};
use crate::lc::signals::{Interrupt, SignalWatcher};
use crate::lc::{
    DependencyManager, ExecPhase, ExecutionHistory, FatalError, LcComponent, LcScope, LcState,
};
use crate::logif::{
    log_debug, log_error, log_fatal, log_info, log_user_error, log_warning, vlog_error, vlog_fatal,
};
use crate::registry::{MessagePeer, TaskKey, TaskRegistry};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tasks::{
    BinarySemaphore, Runnable, TaskContext, TaskId, TaskKind, TaskProfile, ThreadUid,
};

/// Pending-shutdown loop cadence.
const PENDING_SR_CYCLE: Duration = Duration::from_millis(50);
/// `join_xtasks` poll cadence.
const JOIN_X_UNITS_CYCLE: Duration = Duration::from_millis(50);
/// Final join poll cadence for the task on the startup thread.
const FINAL_JOIN_CYCLE: Duration = Duration::from_millis(20);
/// Settle time before the guard is joined.
const JOIN_SETTLE: Duration = Duration::from_millis(10);
/// Guard runtime loop and guard-join poll cadence.
const GUARD_CYCLE: Duration = Duration::from_millis(20);
/// Interval of "still waiting" diagnostics in the pending-shutdown loop.
const PENDING_SR_REPORT: Duration = Duration::from_secs(5);
/// The guard's stop semaphore is allocated but never waited for.
const STOP_SYNC_NEEDED: bool = false;

/// Placeholder id resolved to the running main application task.
pub const MAIN_XTASK: TaskId = TaskId::new(0);

type CustomSetup = Box<dyn FnOnce(&LcManager) -> Result<(), TaskError> + Send>;

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoostFault {
    /// FullIpc boost fails; the registry stays valid.
    FullIpc,
    /// FullIpc boost fails after the registry became unavailable.
    FullIpcRegistryLost,
}

/// Builder of an [`LcManager`].
pub struct LcManagerBuilder {
    policy: StartupPolicy,
    subscribers: Vec<Arc<dyn Subscribe>>,
    signals: bool,
    custom_setup: Option<CustomSetup>,
}

impl LcManagerBuilder {
    pub fn new(policy: StartupPolicy) -> Self {
        Self {
            policy,
            subscribers: Vec::new(),
            signals: false,
            custom_setup: None,
        }
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive runtime events through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Installs a watcher turning SIGINT/SIGTERM/SIGQUIT into an interrupt.
    pub fn with_signal_handler(mut self) -> Self {
        self.signals = true;
        self
    }

    /// Runs `f` on the guard thread as the last setup step.
    ///
    /// `f` must not call [`LcManager::join_fw`]; the guard would wait on
    /// itself, so the call returns [`LcError::JoinFromGuardThread`].
    pub fn with_custom_setup<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&LcManager) -> Result<(), TaskError> + Send + 'static,
    {
        self.custom_setup = Some(Box::new(f));
        self
    }

    /// Bootstraps the framework; blocks until setup finished.
    ///
    /// On failure the framework was stopped and joined again before returning.
    pub fn build(self) -> Result<Arc<LcManager>, LcError> {
        let mgr = self.assemble();
        mgr.start_guard()?;
        if mgr.setup_ok.load(Ordering::SeqCst) {
            return Ok(mgr);
        }

        let scope = mgr.dep.current();
        mgr.submit_stop(StopOrigin::Internal, false, true);
        mgr.join_impl(StopOrigin::Internal);
        Err(LcError::SetupFailed {
            scope,
            target: mgr.policy.target_scope,
            summary: mgr.lc_state.failure_summary(),
        })
    }

    fn assemble(self) -> Arc<LcManager> {
        let bus = Bus::new(self.policy.bus_capacity_clamped());
        let lc_state = Arc::new(LcState::new(Some(bus.clone())));
        let monitor = Arc::new(LcMonitor::new());
        let interrupt = Interrupt::new();

        let history = ExecutionHistory::new();
        history.add(ExecPhase::PRE_CONFIG);

        let listener = if self.subscribers.is_empty() {
            None
        } else {
            spawn_listener(self.subscribers, bus.clone())
        };

        let signals = if self.signals {
            match SignalWatcher::spawn(interrupt.clone(), Arc::clone(&monitor)) {
                Ok(w) => Some(w),
                Err(err) => {
                    log_error!(2502, error = %err, "signal watcher not installed");
                    None
                }
            }
        } else {
            None
        };

        let registry = (self.policy.target_scope >= LcScope::SemiIpc)
            .then(|| TaskRegistry::new(self.policy.registry_config(), bus.clone()));

        Arc::new(LcManager {
            dep: DependencyManager::new(self.policy.target_scope),
            policy: self.policy,
            bus,
            lc_state,
            history,
            monitor,
            sr: ShutdownRequest::new(),
            api: Mutex::new(()),
            registry: RwLock::new(registry),
            proxy: RwLock::new(None),
            fw_main: Mutex::new(None),
            residual: Mutex::new(Vec::new()),
            guard: Mutex::new(None),
            guard_thread: Mutex::new(None),
            guard_sem: BinarySemaphore::new(),
            guard_stop_sem: BinarySemaphore::new(),
            setup_ok: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            custom_setup: Mutex::new(self.custom_setup),
            listener: Mutex::new(listener),
            signals: Mutex::new(signals),
            interrupt,
            report: FinalReport::new(),
            #[cfg(test)]
            fault: Mutex::new(None),
        })
    }
}

/// Forwards bus events to the subscriber set until `ShutdownCompleted`.
fn spawn_listener(subscribers: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Option<JoinHandle<()>> {
    let mut rx = bus.subscribe();
    let set = SubscriberSet::new(subscribers, bus);
    let spawned = std::thread::Builder::new()
        .name("lc-events".into())
        .spawn(move || {
            loop {
                match rx.blocking_recv() {
                    Ok(ev) => {
                        let done = ev.kind == EventKind::ShutdownCompleted;
                        set.emit(&ev);
                        if done {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
            set.shutdown();
        });
    match spawned {
        Ok(h) => Some(h),
        Err(err) => {
            log_error!(2503, error = %err, "event listener not started");
            None
        }
    }
}

/// Lifecycle manager of one framework instance.
pub struct LcManager {
    policy: StartupPolicy,
    bus: Bus,
    lc_state: Arc<LcState>,
    history: ExecutionHistory,
    dep: DependencyManager,
    monitor: Arc<LcMonitor>,
    sr: ShutdownRequest,
    api: Mutex<()>,
    registry: RwLock<Option<Arc<TaskRegistry>>>,
    proxy: RwLock<Option<Arc<LcProxyImpl>>>,
    fw_main: Mutex<Option<TaskId>>,
    residual: Mutex<Vec<TaskId>>,
    guard: Mutex<Option<JoinHandle<()>>>,
    guard_thread: Mutex<Option<ThreadId>>,
    guard_sem: BinarySemaphore,
    guard_stop_sem: BinarySemaphore,
    setup_ok: AtomicBool,
    finalized: AtomicBool,
    custom_setup: Mutex<Option<CustomSetup>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    signals: Mutex<Option<SignalWatcher>>,
    interrupt: Interrupt,
    report: FinalReport,
    #[cfg(test)]
    fault: Mutex<Option<BoostFault>>,
}

impl std::fmt::Debug for LcManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LcManager")
            .field("scope", &self.dep.current())
            .field("state", &self.lc_state.to_state_string())
            .field("phases", &self.history.current())
            .finish()
    }
}

impl LcManager {
    pub fn builder(policy: StartupPolicy) -> LcManagerBuilder {
        LcManagerBuilder::new(policy)
    }

    /// Bootstraps a framework with `policy` and no extras.
    pub fn create(policy: StartupPolicy) -> Result<Arc<Self>, LcError> {
        LcManagerBuilder::new(policy).build()
    }

    pub fn policy(&self) -> &StartupPolicy {
        &self.policy
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn lc_state(&self) -> &Arc<LcState> {
        &self.lc_state
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    pub fn dependency_manager(&self) -> &DependencyManager {
        &self.dep
    }

    pub fn scope(&self) -> LcScope {
        self.dep.current()
    }

    /// Task registry; `None` below the `SemiIpc` target scope.
    pub fn registry(&self) -> Option<Arc<TaskRegistry>> {
        self.registry.read().clone()
    }

    /// Lifecycle proxy, once the task manager scope was reached.
    pub fn lc_proxy(&self) -> Option<Arc<dyn LcProxy>> {
        self.proxy().map(|p| p as Arc<dyn LcProxy>)
    }

    fn proxy(&self) -> Option<Arc<LcProxyImpl>> {
        self.proxy.read().clone()
    }

    /// Id of the framework main task, while it runs.
    pub fn fw_main_task(&self) -> Option<TaskId> {
        *self.fw_main.lock()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.sr.is_stop_requested()
    }

    pub fn is_join_requested(&self) -> bool {
        self.sr.is_join_requested()
    }

    /// First accepted stop request.
    pub fn stop_record(&self) -> Option<StopRecord> {
        self.sr.stop_record()
    }

    /// Join completed and resources were released.
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Raises the process interrupt, as a termination signal would.
    pub fn interrupt(&self) {
        self.interrupt.raise();
        self.monitor.notify();
    }

    // ---- guard ----

    fn start_guard(self: &Arc<Self>) -> Result<(), LcError> {
        let mgr = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("lc-guard".into())
            .spawn(move || mgr.guard_main())?;
        *self.guard.lock() = Some(handle);

        let bound = self.policy.start_handoff_opt();
        if !self.guard_sem.acquire_timeout(bound) {
            let waited = bound.unwrap_or_default();
            log_fatal!(2504, ?waited, "lifecycle guard did not report");
            self.submit_stop(StopOrigin::Internal, false, true);
            self.join_impl(StopOrigin::Internal);
            return Err(LcError::GuardTimeout(waited));
        }
        let _ = self.guard_sem.acquire_timeout(None);
        Ok(())
    }

    fn guard_main(self: Arc<Self>) {
        *self.guard_thread.lock() = Some(std::thread::current().id());
        self.guard_sem.release();
        let ok = self.set_up();
        self.setup_ok.store(ok, Ordering::SeqCst);
        self.guard_sem.release();

        if ok {
            self.run_guard_loop();
        }
        self.halt();
    }

    fn run_guard_loop(&self) {
        loop {
            let snap = self.monitor.wait_for_wakeup(GUARD_CYCLE);
            if snap.coordinated_shutdown {
                break;
            }
            if self.interrupt.is_raised() {
                log_info!(2505, "interrupt received");
                self.submit_stop(StopOrigin::Internal, false, true);
            } else if snap.failure_shutdown {
                log_fatal!(
                    2506,
                    state = %self.lc_state.to_state_string(),
                    "core component failed; shutting down"
                );
                self.submit_stop(StopOrigin::Internal, false, true);
            } else if let Some(forced) = self.monitor.take_task_stop() {
                self.submit_stop(StopOrigin::Internal, false, forced);
            }
        }
    }

    // ---- setup ----

    fn set_up(&self) -> bool {
        let _api = self.api.lock();
        let target = self.policy.target_scope;

        let mut res = self.history.add(ExecPhase::CONFIG);
        res = res && self.update_scope(LcScope::Idle, LcScope::PreIpc);
        res = res && self.mark_started(LcComponent::LcMgr);
        if res && target >= LcScope::SemiIpc {
            res = self.boost_semi_ipc();
        }
        if res && target >= LcScope::FullIpc {
            res = self.boost_full_ipc();
        }
        if res {
            res = self.run_custom_setup();
        }

        if res {
            self.history.add(ExecPhase::SETUP_PASSED);
            self.history.add(ExecPhase::RUNTIME);
            log_info!(2507, scope = %self.dep.current(), "framework setup passed");
            self.bus.publish(
                Event::new(EventKind::PhaseEntered).with_state(ExecPhase::RUNTIME.to_string()),
            );
        } else {
            if !self.lc_state.has_lc_any_failure_state() {
                let fe = FatalError::new(
                    2508,
                    format!("setup failed at scope {}", self.dep.current()),
                );
                let _ = self.lc_state.set_lc_state(LcComponent::LcMgr, None, Some(&fe), None);
            }
            log_fatal!(
                2509,
                scope = %self.dep.current(),
                target = %target,
                "framework setup failed"
            );
        }
        res
    }

    fn boost_semi_ipc(&self) -> bool {
        self.history.add(ExecPhase::SEMI_BOOST);
        let mut res = self.dep.current() == LcScope::PreIpc
            && !self.lc_state.is_task_manager_started();
        let reg = self.registry();
        res = res && reg.is_some();

        if let (true, Some(reg)) = (res, reg.as_ref()) {
            let proxy = Arc::new(LcProxyImpl::new(
                Arc::clone(&self.lc_state),
                Arc::clone(&self.monitor),
            ));
            proxy.set_registry(reg);
            *self.proxy.write() = Some(Arc::clone(&proxy));
            reg.inject_lc_proxy(Some(proxy.clone() as Arc<dyn LcProxy>));
            res = proxy.task_manager().is_some() && reg.is_operable();
        }
        res = res && self.mark_started(LcComponent::TaskMgr);
        res = res && self.update_scope(LcScope::PreIpc, LcScope::SemiIpc);

        if !res {
            vlog_error!(2510, "task manager scope not reached");
            self.mark_stopped(LcComponent::TaskMgr);
        }
        res
    }

    fn boost_full_ipc(&self) -> bool {
        self.history.add(ExecPhase::FULL_BOOST);
        let mut res =
            self.dep.current() == LcScope::SemiIpc && self.lc_state.is_task_manager_started();
        let reg = self.registry();

        #[cfg(test)]
        if res {
            match *self.fault.lock() {
                Some(BoostFault::FullIpc) => res = false,
                Some(BoostFault::FullIpcRegistryLost) => {
                    if let Some(r) = &reg {
                        r.invalidate();
                    }
                    res = false;
                }
                None => {}
            }
        }

        if let (true, Some(r)) = (res, reg.as_ref()) {
            let body = Arc::new(FwMainLoop {
                registry: Arc::downgrade(r),
                cycle: self.policy.run_cycle,
            });
            match r.create_task(body, TaskProfile::framework(TaskKind::FwMainTask), true) {
                Ok(id) => *self.fw_main.lock() = Some(id),
                Err(err) => {
                    log_fatal!(2511, error = %err, "framework main task not started");
                    res = false;
                }
            }
        }
        res = res && self.mark_started(LcComponent::FwMain);
        res = res && self.update_scope(LcScope::SemiIpc, LcScope::FullIpc);

        if !res {
            if let (Some(id), Some(r)) = (self.fw_main.lock().take(), reg.as_ref()) {
                r.stop_task(id, true, false, true);
                r.join_task(id, Some(self.policy.shutdown_wait), false, None);
            }
            self.mark_stopped(LcComponent::FwMain);

            let registry_available = reg.as_ref().is_some_and(|r| r.is_valid())
                && self.proxy().is_some_and(|p| p.task_manager().is_some());
            if !registry_available {
                self.mark_stopped(LcComponent::TaskMgr);
            }
        }
        res
    }

    fn run_custom_setup(&self) -> bool {
        let Some(f) = self.custom_setup.lock().take() else {
            return true;
        };
        self.history.add(ExecPhase::CUSTOM_SETUP);
        match f(self) {
            Ok(()) => true,
            Err(err) => {
                log_fatal!(2512, error = %err, "custom setup failed");
                let fe = FatalError::from_task_error(&err, None).with_details("custom setup");
                let _ = self.lc_state.set_lc_state(LcComponent::LcMgr, None, Some(&fe), None);
                false
            }
        }
    }

    // ---- lifecycle helpers ----

    fn update_scope(&self, src: LcScope, dst: LcScope) -> bool {
        if !self.dep.update_scope(src, dst) {
            return false;
        }
        if self.dep.current() != dst {
            vlog_fatal!(2513, %src, %dst, current = %self.dep.current(), "scope update not observable");
            return false;
        }
        self.bus
            .publish(Event::new(EventKind::ScopeChanged).with_state(dst.as_str()));
        true
    }

    fn mark_started(&self, c: LcComponent) -> bool {
        match self.lc_state.set_lc_state(c, Some(true), None, None) {
            Ok(_) => true,
            Err(err) => {
                vlog_error!(2514, component = %c, error = %err, "start transition rejected");
                false
            }
        }
    }

    /// Stops `c` if it is started and did not fail.
    fn mark_stopped(&self, c: LcComponent) {
        if !self.lc_state.is_started(c) || self.lc_state.is_failed(c) {
            return;
        }
        if let Err(err) = self.lc_state.set_lc_state(c, Some(false), None, None) {
            log_debug!(2515, component = %c, error = %err, "stop transition rejected");
        }
    }

    // ---- stop ----

    /// Requests the framework to stop; `forced` cancels tasks instead of stopping them.
    ///
    /// Returns `false` if a stop was already requested.
    pub fn stop_fw(&self, forced: bool) -> bool {
        self.submit_stop(StopOrigin::External, false, forced)
    }

    fn submit_stop(&self, origin: StopOrigin, auto: bool, forced: bool) -> bool {
        let rec = StopRecord {
            origin,
            forced,
            auto,
        };
        if let Err(prev) = self.sr.submit_stop(rec) {
            if origin == StopOrigin::Internal && prev.origin == StopOrigin::External {
                log_debug!(2516, "internal stop while an external stop is pending");
            } else {
                log_debug!(2517, ?origin, "stop already requested");
            }
            return false;
        }

        self.history.add(ExecPhase::STOP);
        log_info!(2518, ?origin, forced, auto, "framework stop requested");
        self.bus.publish(
            Event::new(EventKind::StopRequested).with_reason(match (origin, forced) {
                (StopOrigin::External, false) => "external",
                (StopOrigin::External, true) => "external_forced",
                (StopOrigin::Internal, false) => "internal",
                (StopOrigin::Internal, true) => "internal_forced",
            }),
        );
        self.monitor.enable_coordinated_shutdown();
        if origin == StopOrigin::External {
            if let Some(p) = self.proxy() {
                p.set_mode(ProxyMode::PreShutdown);
            }
        }
        if STOP_SYNC_NEEDED {
            let _ = self
                .guard_stop_sem
                .acquire_timeout(self.policy.shutdown_wait_opt());
        }
        true
    }

    /// Runs on the guard thread once a stop was requested (or setup failed).
    fn halt(&self) {
        let cancel = self.sr.stop_record().map_or(true, |r| r.forced);
        self.history.add(ExecPhase::SHUTDOWN);
        if let Some(p) = self.proxy() {
            p.set_mode(ProxyMode::Shutdown);
        }
        let reg = self.registry();

        if let (Some(id), Some(r)) = (self.fw_main.lock().take(), reg.as_ref()) {
            r.stop_task(id, cancel, false, true);
            if !r.join_task(id, Some(self.policy.shutdown_wait), false, None) {
                log_warning!(2519, task = %id, "framework main task did not finish");
            }
        }
        self.mark_stopped(LcComponent::FwMain);
        if self.dep.current() == LcScope::FullIpc {
            self.update_scope(LcScope::FullIpc, LcScope::SemiIpc);
        }

        if let Some(r) = reg.as_ref() {
            if let Some(failed) = r.stop_all_tasks(true, cancel, &[]) {
                for t in &failed {
                    log_warning!(2520, task = %t.id, name = %t.name, state = %t.state, "task still running after stop");
                }
                *self.residual.lock() = failed.into_iter().map(|t| t.id).collect();
            }
            r.invalidate();
        }
        self.mark_stopped(LcComponent::TaskMgr);
        if self.dep.current() == LcScope::SemiIpc {
            self.update_scope(LcScope::SemiIpc, LcScope::PreIpc);
        }

        self.history.add(ExecPhase::STOP_PASSED);
        self.guard_stop_sem.release();
    }

    // ---- join ----

    /// Blocks until the framework shut down.
    ///
    /// Without a prior stop the pending-shutdown loop decides when to stop,
    /// following `terminal_mode`, `auto_stop` and `force_stop`.
    pub fn join_fw(&self) -> Result<(), LcError> {
        if *self.guard_thread.lock() == Some(std::thread::current().id()) {
            log_user_error!(2530, "join from the lifecycle guard thread");
            return Err(LcError::JoinFromGuardThread);
        }
        if let Some(reg) = self.registry() {
            if let Some(inst) = reg.get_task_by_thread(ThreadUid::current()) {
                let badge = inst.badge();
                if !badge.is_auto_enclosed() && !inst.state().is_terminated() {
                    log_user_error!(2521, task = %badge, "join from a thread bound to a running task");
                    return Err(LcError::JoinFromAttachedThread(badge.id()));
                }
            }
        }
        self.join_impl(StopOrigin::External);
        Ok(())
    }

    fn join_impl(&self, origin: StopOrigin) {
        let _api = self.api.lock();
        if self.is_finalized() {
            return;
        }
        if self.sr.submit_join() {
            self.history.add(ExecPhase::JOIN);
            self.bus.publish(Event::new(EventKind::JoinRequested));
        }

        if !self.sr.is_stop_requested() {
            match origin {
                StopOrigin::Internal => {
                    vlog_error!(2522, "internal join without prior stop");
                    self.submit_stop(StopOrigin::Internal, false, true);
                }
                StopOrigin::External => self.enter_pending_sr(),
            }
        }

        std::thread::sleep(JOIN_SETTLE);
        self.join_guard();
        let residual = std::mem::take(&mut *self.residual.lock());
        self.final_join(residual);
        self.finalize();
    }

    fn enter_pending_sr(&self) {
        let mut last_report = Instant::now();
        loop {
            if self.sr.is_stop_requested() {
                break;
            }
            if self.interrupt.is_raised() {
                self.submit_stop(StopOrigin::Internal, false, true);
                break;
            }

            if self.policy.terminal_mode || !self.policy.auto_stop {
                if last_report.elapsed() >= PENDING_SR_REPORT {
                    let joinable = self
                        .registry()
                        .map(|r| r.running_xtasks())
                        .unwrap_or_default();
                    log_info!(2523, ?joinable, "waiting for a stop request");
                    last_report = Instant::now();
                }
                self.sr.wait_stop(PENDING_SR_CYCLE);
                continue;
            }

            let (_, outstanding) = self.join_x_units(None, Some(PENDING_SR_CYCLE));
            if outstanding.is_none() {
                self.submit_stop(StopOrigin::Internal, true, self.policy.force_stop);
                break;
            }
        }
    }

    /// Waits for application tasks to finish.
    ///
    /// `tasks = None` waits for all running application tasks; [`MAIN_XTASK`]
    /// stands for the main application task. Returns the number of tasks
    /// joined and the ones still running (`None` if all finished). Returns
    /// early once a stop was requested.
    pub fn join_xtasks(
        &self,
        tasks: Option<Vec<TaskId>>,
        timeout: Option<Duration>,
    ) -> (usize, Option<Vec<TaskId>>) {
        self.join_x_units(tasks, timeout)
    }

    fn join_x_units(
        &self,
        tasks: Option<Vec<TaskId>>,
        timeout: Option<Duration>,
    ) -> (usize, Option<Vec<TaskId>>) {
        let Some(reg) = self.registry() else {
            return (0, None);
        };
        let mut pending: Vec<TaskId> = match tasks {
            None => reg.running_xtasks(),
            Some(list) => list
                .into_iter()
                .filter_map(|id| {
                    if id == MAIN_XTASK {
                        reg.get_task_id(TaskKey::Peer(MessagePeer::MainXTask))
                    } else {
                        Some(id)
                    }
                })
                .collect(),
        };

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut joined = 0;
        loop {
            pending.retain(|id| {
                let done = reg
                    .get_task(*id)
                    .map_or(true, |inst| inst.state().is_terminated());
                if done && reg.join_task(*id, Some(Duration::ZERO), false, None) {
                    joined += 1;
                }
                !done
            });
            if pending.is_empty() {
                return (joined, None);
            }
            if self.monitor.is_coordinated_shutdown_enabled() || self.sr.is_stop_requested() {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            std::thread::sleep(JOIN_X_UNITS_CYCLE);
        }
        (joined, Some(pending))
    }

    fn join_guard(&self) {
        let Some(handle) = self.guard.lock().take() else {
            return;
        };
        while !handle.is_finished() {
            if self.interrupt.is_raised() {
                self.submit_stop(StopOrigin::Internal, false, true);
            }
            std::thread::sleep(GUARD_CYCLE);
        }
        if handle.join().is_err() {
            vlog_fatal!(2524, "lifecycle guard panicked");
        }
    }

    fn final_join(&self, residual: Vec<TaskId>) {
        let Some(reg) = self.registry() else {
            return;
        };
        let startup = reg.startup_thread();
        for id in residual {
            let Some(inst) = reg.get_task(id) else {
                continue;
            };
            if inst.badge().thread_uid() == startup {
                if !inst.is_on_own_thread() {
                    self.join_startup_thread_task(&inst);
                }
            } else if !reg.join_task(id, Some(self.policy.shutdown_wait), false, None) {
                log_warning!(2525, task = %inst.badge(), "task not joined");
            }
        }
    }

    fn join_startup_thread_task(&self, inst: &crate::tasks::TaskInstance) {
        let warn_after = self.policy.shutdown_wait * 2;
        let mut since = Instant::now();
        while !inst.state().is_terminated() {
            if self.interrupt.is_raised() {
                log_warning!(2526, task = %inst.badge(), "join of startup thread task interrupted");
                return;
            }
            if since.elapsed() >= warn_after {
                log_warning!(2527, task = %inst.badge(), "startup thread task still running");
                since = Instant::now();
            }
            std::thread::sleep(FINAL_JOIN_CYCLE);
        }
    }

    fn finalize(&self) {
        self.history.add(ExecPhase::JOIN_PASSED);
        if !self.lc_state.is_lc_failed() {
            self.mark_stopped(LcComponent::LcMgr);
        }
        if self.dep.current() == LcScope::PreIpc {
            self.update_scope(LcScope::PreIpc, LcScope::Idle);
        }
        self.finalized.store(true, Ordering::SeqCst);
        log_info!(2528, state = %self.lc_state.to_state_string(), "framework shut down");

        self.bus.publish(Event::new(EventKind::ShutdownCompleted));
        if let Some(h) = self.listener.lock().take() {
            let _ = h.join();
        }
        if let Some(w) = self.signals.lock().take() {
            w.shutdown();
        }
        self.report.print_once(
            &self.lc_state,
            self.history.current(),
            self.policy.release_mode,
        );
    }
}

/// Body of the framework main task: housekeeping once per run cycle.
struct FwMainLoop {
    registry: Weak<TaskRegistry>,
    cycle: Duration,
}

impl Runnable for FwMainLoop {
    fn run(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        while !ctx.wait_for_stop(self.cycle) {
            let Some(reg) = self.registry.upgrade() else {
                break;
            };
            let removed = reg.remove_cleaned_up_entries();
            if removed > 0 {
                log_debug!(2529, removed, "stale task entries removed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{TaskFn, TaskRights};

    fn policy(scope: LcScope) -> StartupPolicy {
        StartupPolicy {
            shutdown_wait: Duration::from_secs(2),
            ..StartupPolicy::with_target(scope)
        }
    }

    #[test]
    fn pre_ipc_runs_without_registry() {
        let mgr = LcManager::create(policy(LcScope::PreIpc)).expect("setup");
        assert!(mgr.registry().is_none());
        assert_eq!(mgr.scope(), LcScope::PreIpc);
        assert!(mgr.lc_state().is_lc_started());

        assert!(mgr.stop_fw(false));
        assert!(!mgr.stop_fw(true));
        mgr.join_fw().expect("join");

        assert!(mgr.lc_state().is_lc_stopped());
        assert_eq!(mgr.scope(), LcScope::Idle);
        assert_eq!(mgr.history().addition_count(ExecPhase::STOP), 1);
        assert!(mgr.is_finalized());
    }

    #[test]
    fn full_ipc_boots_and_halts_in_scope_order() {
        let mgr = LcManager::create(policy(LcScope::FullIpc)).expect("setup");
        assert!(mgr.lc_state().is_lc_operable());
        assert!(mgr.fw_main_task().is_some());

        mgr.stop_fw(false);
        mgr.join_fw().expect("join");

        let steps: Vec<_> = mgr
            .dependency_manager()
            .history()
            .iter()
            .map(|u| (u.src, u.dst))
            .collect();
        assert_eq!(
            steps,
            vec![
                (LcScope::Idle, LcScope::PreIpc),
                (LcScope::PreIpc, LcScope::SemiIpc),
                (LcScope::SemiIpc, LcScope::FullIpc),
                (LcScope::FullIpc, LcScope::SemiIpc),
                (LcScope::SemiIpc, LcScope::PreIpc),
                (LcScope::PreIpc, LcScope::Idle),
            ]
        );
        assert!(mgr.lc_state().is_task_manager_stopped());
        assert!(mgr.lc_state().is_fw_main_stopped());
        assert!(!mgr.lc_state().has_lc_any_failure_state());
    }

    #[test]
    fn full_ipc_failure_keeps_task_manager_while_registry_valid() {
        let mgr = LcManagerBuilder::new(policy(LcScope::FullIpc)).assemble();
        *mgr.fault.lock() = Some(BoostFault::FullIpc);

        assert!(!mgr.set_up());
        assert!(mgr.lc_state().is_task_manager_started());
        assert!(!mgr.lc_state().is_fw_main_started());
        assert_eq!(mgr.scope(), LcScope::SemiIpc);
        mgr.halt();
    }

    #[test]
    fn full_ipc_failure_stops_task_manager_when_registry_lost() {
        let mgr = LcManagerBuilder::new(policy(LcScope::FullIpc)).assemble();
        *mgr.fault.lock() = Some(BoostFault::FullIpcRegistryLost);

        assert!(!mgr.set_up());
        assert!(!mgr.lc_state().is_task_manager_started());
        assert!(mgr.lc_state().is_task_manager_stopped());
        mgr.halt();
    }

    #[test]
    fn failed_setup_is_reported_and_joined() {
        let err = LcManager::builder(policy(LcScope::SemiIpc))
            .with_custom_setup(|_| Err(TaskError::fatal(77, "no config")))
            .build()
            .expect_err("setup must fail");
        match err {
            LcError::SetupFailed { target, summary, .. } => {
                assert_eq!(target, LcScope::SemiIpc);
                assert!(summary.contains("no config"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn task_shutdown_request_stops_framework() {
        let mgr = LcManager::create(policy(LcScope::SemiIpc)).expect("setup");
        let reg = mgr.registry().expect("registry");
        reg.create_task(
            TaskFn::arc(|ctx: &TaskContext| {
                assert!(ctx.request_fw_shutdown(true));
                ctx.wait_for_stop(Duration::from_secs(5));
                Ok(())
            }),
            TaskProfile::xtask().with_rights(TaskRights::default() | TaskRights::REQUEST_SHUTDOWN),
            true,
        )
        .expect("create");

        mgr.join_fw().expect("join");
        let rec = mgr.stop_record().expect("stop issued");
        assert_eq!(rec.origin, StopOrigin::Internal);
        assert!(rec.forced);
    }

    #[test]
    fn interrupt_ends_terminal_mode_wait() {
        let mgr = LcManager::create(StartupPolicy {
            terminal_mode: true,
            ..policy(LcScope::SemiIpc)
        })
        .expect("setup");

        let m = Arc::clone(&mgr);
        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            m.interrupt();
        });
        mgr.join_fw().expect("join");
        h.join().unwrap();
        assert!(mgr.stop_record().is_some_and(|r| r.forced));
    }

    #[test]
    fn join_inside_custom_setup_is_refused() {
        let seen: Arc<Mutex<Option<Result<(), LcError>>>> = Arc::new(Mutex::new(None));
        let mgr = {
            let seen = Arc::clone(&seen);
            LcManager::builder(policy(LcScope::SemiIpc))
                .with_custom_setup(move |m| {
                    *seen.lock() = Some(m.join_fw());
                    Ok(())
                })
                .build()
                .expect("setup")
        };
        assert!(matches!(*seen.lock(), Some(Err(LcError::JoinFromGuardThread))));
        assert!(!mgr.is_join_requested());

        mgr.stop_fw(false);
        mgr.join_fw().expect("join");
    }
}
