//! # Task instance: the running object behind a registry entry.
//!
//! A [`TaskInstance`] owns the task body, its state and the synchronization
//! with its thread. The registry drives it; task bodies see it through a
//! [`TaskContext`].
//!
//! ## Dedicated worker thread
//! ```text
//! caller (registry)                      worker thread
//! ─────────────────                      ─────────────
//! start_async(): state=PendingRun
//!   spawn ───────────────────────────►   adopt thread uid
//! wait_started(handoff) ◄──── start_sem  release
//!   (no lock held while waiting)         delayed start? wait (stop-aware)
//!                                        state=Running, bookmark=Run
//!                                        setup → run → teardown   (catch_unwind)
//!                                        state=Done|Cancelled|Failed
//! wait_stopped(bound) ◄─────── stop_sem  release
//! ```
//!
//! ## Enclosing thread
//! The body runs in-line on the creating thread when started; `start` returns
//! after the body finished.
//!
//! ### Rules
//! - Observers and events are notified after the state lock was released.
//! - A failing body is routed to the registry's failure classification,
//!   tagged with the [`ApiBookmark`] that was in flight.
//! - `stop_sem` is a latch: once the worker released it, every waiter passes.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::lc::LcProxy;
use crate::logif::{log_error, log_fatal};
use crate::registry::TaskRegistry;
use crate::subscribers::panic_info;
use crate::tasks::semaphore::BinarySemaphore;
use crate::tasks::thread::ThreadLiveness;
use crate::tasks::{
    Payload, PrecheckInput, TaskBadge, TaskId, TaskObserver, TaskRights, TaskState, ThreadUid,
};

/// Framework API phase in flight on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiBookmark {
    Idle,
    /// Worker spawn and handoff.
    Start,
    /// Body executing.
    Run,
    /// Reaping the worker thread.
    Join,
}

/// Outcome of a stop/cancel request on the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopRequest {
    /// Nothing runs (never started, already finished, auto-enclosed); marked terminated.
    Degenerate,
    /// Stop state entered; the body has to observe it.
    Requested,
    /// A stop/cancel is already pending.
    AlreadyCeasing,
}

struct Control {
    state: TaskState,
    error: Option<TaskError>,
    bookmark: ApiBookmark,
}

pub(crate) struct InstanceInit {
    pub badge: TaskBadge,
    pub payload: Option<Payload>,
    pub state: TaskState,
    pub observer: Option<Arc<dyn TaskObserver>>,
    pub delayed_start: Option<Duration>,
    pub registry: Weak<TaskRegistry>,
    pub bus: Bus,
}

/// Running object of one task.
pub struct TaskInstance {
    badge: TaskBadge,
    payload: Mutex<Option<Payload>>,
    ctl: Mutex<Control>,
    cv: Condvar,
    start_sem: BinarySemaphore,
    stop_sem: BinarySemaphore,
    handle: Mutex<Option<JoinHandle<()>>>,
    proxy: RwLock<Option<Arc<dyn LcProxy>>>,
    registry: Weak<TaskRegistry>,
    observer: Option<Arc<dyn TaskObserver>>,
    delayed_start: Option<Duration>,
    liveness: Mutex<Option<Arc<ThreadLiveness>>>,
    bus: Bus,
}

impl std::fmt::Debug for TaskInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInstance")
            .field("badge", &self.badge)
            .field("state", &self.state())
            .finish()
    }
}

impl TaskInstance {
    pub(crate) fn new(init: InstanceInit) -> Arc<Self> {
        Arc::new(Self {
            badge: init.badge,
            payload: Mutex::new(init.payload),
            ctl: Mutex::new(Control {
                state: init.state,
                error: None,
                bookmark: ApiBookmark::Idle,
            }),
            cv: Condvar::new(),
            start_sem: BinarySemaphore::new(),
            stop_sem: BinarySemaphore::new(),
            handle: Mutex::new(None),
            proxy: RwLock::new(None),
            registry: init.registry,
            observer: init.observer,
            delayed_start: init.delayed_start,
            liveness: Mutex::new(None),
            bus: init.bus,
        })
    }

    pub fn badge(&self) -> &TaskBadge {
        &self.badge
    }

    pub fn id(&self) -> TaskId {
        self.badge.id()
    }

    pub fn state(&self) -> TaskState {
        self.ctl.lock().state
    }

    /// Error the body finished with, if it failed.
    pub fn error(&self) -> Option<TaskError> {
        self.ctl.lock().error.clone()
    }

    pub fn bookmark(&self) -> ApiBookmark {
        self.ctl.lock().bookmark
    }

    pub(crate) fn observer(&self) -> Option<Arc<dyn TaskObserver>> {
        self.observer.clone()
    }

    /// Calling thread is the thread this task is bound to.
    pub fn is_on_own_thread(&self) -> bool {
        ThreadUid::current() == self.badge.thread_uid()
    }

    pub(crate) fn precheck_input(&self) -> PrecheckInput {
        PrecheckInput {
            state: self.state(),
            dedicated_thread: self.badge.has_dedicated_thread(),
            auto_enclosed: self.badge.is_auto_enclosed(),
            on_task_thread: self.is_on_own_thread(),
        }
    }

    /// Binds the calling thread's liveness flag (auto-enclosed and attached tasks).
    pub(crate) fn bind_current_thread(&self) {
        *self.liveness.lock() = Some(ThreadUid::current_liveness());
    }

    /// The thread this task is bound to has exited.
    pub(crate) fn is_thread_gone(&self) -> bool {
        self.liveness
            .lock()
            .as_ref()
            .is_some_and(|l| !l.is_running())
    }

    pub(crate) fn inject_proxy(&self, proxy: Arc<dyn LcProxy>) {
        if self.badge.rights().contains(TaskRights::PROXY_CLIENT) {
            *self.proxy.write() = Some(proxy);
        }
    }

    pub(crate) fn proxy(&self) -> Option<Arc<dyn LcProxy>> {
        self.proxy.read().clone()
    }

    pub(crate) fn registry(&self) -> Option<Arc<TaskRegistry>> {
        self.registry.upgrade()
    }

    /// Context handed to the body.
    pub(crate) fn context(self: &Arc<Self>) -> TaskContext {
        TaskContext {
            inst: Arc::clone(self),
        }
    }

    fn transition(&self, ctl: &mut Control, new: TaskState) -> TaskState {
        let old = ctl.state;
        ctl.state = new;
        self.cv.notify_all();
        old
    }

    fn notify_observer(&self, old: TaskState, new: TaskState) {
        if old == new {
            return;
        }
        if let Some(obs) = &self.observer {
            obs.on_state_change(&self.badge, old, new);
        }
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_task(self.badge.name_arc())
            .with_task_id(self.badge.id())
    }

    /// Spawns the worker thread. The caller waits for the handoff with
    /// [`wait_started`](Self::wait_started).
    pub(crate) fn start_async(self: &Arc<Self>) -> io::Result<()> {
        let old = {
            let mut ctl = self.ctl.lock();
            ctl.bookmark = ApiBookmark::Start;
            self.transition(&mut ctl, TaskState::PendingRun)
        };
        self.notify_observer(old, TaskState::PendingRun);

        let inst = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(self.badge.name().to_string())
            .spawn(move || inst.worker_main());

        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                let old = {
                    let mut ctl = self.ctl.lock();
                    ctl.error = Some(TaskError::fail(err.to_string()));
                    self.transition(&mut ctl, TaskState::Failed)
                };
                self.notify_observer(old, TaskState::Failed);
                self.stop_sem.release();
                Err(err)
            }
        }
    }

    /// Waits for the worker handoff (`None` = unbounded).
    pub(crate) fn wait_started(&self, timeout: Option<Duration>) -> bool {
        self.start_sem.acquire_timeout(timeout)
    }

    /// Runs the body in-line on the calling thread.
    pub(crate) fn run_inline(self: &Arc<Self>) {
        let old = {
            let mut ctl = self.ctl.lock();
            ctl.bookmark = ApiBookmark::Start;
            self.transition(&mut ctl, TaskState::PendingRun)
        };
        self.notify_observer(old, TaskState::PendingRun);
        self.bind_current_thread();
        self.execute();
        self.stop_sem.release();
    }

    /// Marks an auto-enclosed or attached task as running without a body.
    pub(crate) fn mark_running(&self) {
        let old = {
            let mut ctl = self.ctl.lock();
            self.transition(&mut ctl, TaskState::Running)
        };
        self.notify_observer(old, TaskState::Running);
    }

    fn worker_main(self: Arc<Self>) {
        if !ThreadUid::adopt(self.badge.thread_uid()) {
            log_error!(
                1401,
                task = %self.badge,
                "worker thread already had a thread uid"
            );
        }
        self.bind_current_thread();
        self.start_sem.release();

        if let Some(delay) = self.delayed_start {
            let mut ctl = self.ctl.lock();
            let _ = self
                .cv
                .wait_while_for(&mut ctl, |c| !c.state.is_ceasing(), delay);
        }
        self.execute();
        self.stop_sem.release();
    }

    fn execute(self: &Arc<Self>) {
        let entered = {
            let mut ctl = self.ctl.lock();
            if ctl.state == TaskState::PendingRun {
                ctl.bookmark = ApiBookmark::Run;
                self.transition(&mut ctl, TaskState::Running);
                true
            } else {
                false
            }
        };
        if !entered {
            // stopped before the body was entered
            self.finish(Ok(()));
            return;
        }

        self.notify_observer(TaskState::PendingRun, TaskState::Running);
        self.bus.publish(self.event(EventKind::TaskStarted));
        if let Some(proxy) = self.proxy() {
            proxy.notify_task_transition(&self.badge, true);
        }

        let ctx = self.context();
        let payload = self.payload.lock().take();
        let res = match payload {
            Some(p) => panic::catch_unwind(AssertUnwindSafe(|| p.execute(&ctx))).unwrap_or_else(
                |e| {
                    Err(TaskError::Panicked {
                        info: panic_info(&*e),
                    })
                },
            ),
            None => Ok(()),
        };
        self.finish(res);
    }

    fn finish(&self, res: Result<(), TaskError>) {
        let (old, new, bookmark) = {
            let mut ctl = self.ctl.lock();
            let cancel = ctl.state == TaskState::PendingCancelRequest;
            let new = match &res {
                Ok(()) if cancel => TaskState::Cancelled,
                Ok(()) => TaskState::Done,
                Err(e) if e.is_cancellation() => TaskState::Cancelled,
                Err(_) => TaskState::Failed,
            };
            if let Err(e) = &res {
                if !e.is_cancellation() {
                    ctl.error = Some(e.clone());
                }
            }
            let bookmark = ctl.bookmark;
            ctl.bookmark = ApiBookmark::Idle;
            let old = self.transition(&mut ctl, new);
            (old, new, bookmark)
        };
        self.notify_observer(old, new);

        match res {
            Err(err) if new == TaskState::Failed => {
                self.bus.publish(
                    self.event(EventKind::TaskFailed)
                        .with_reason(err.to_string()),
                );
                match self.registry() {
                    Some(reg) => reg.handle_task_failure(&self.badge, &err, bookmark, old),
                    None => log_fatal!(1402, task = %self.badge, error = %err, "task failed"),
                }
            }
            _ => {
                self.bus
                    .publish(self.event(EventKind::TaskStopped).with_state(new.as_str()));
                if let Some(proxy) = self.proxy() {
                    proxy.notify_task_transition(&self.badge, false);
                }
            }
        }
    }

    /// Requests a stop (or cancel) of the task.
    pub(crate) fn request_stop(&self, cancel: bool) -> StopRequest {
        let (outcome, old, new) = {
            let mut ctl = self.ctl.lock();
            let state = ctl.state;
            let degenerate = if cancel {
                TaskState::Cancelled
            } else {
                TaskState::Done
            };
            match state {
                TaskState::Initialized => {
                    let old = self.transition(&mut ctl, degenerate);
                    (StopRequest::Degenerate, old, degenerate)
                }
                s if s.is_terminated() => (StopRequest::Degenerate, s, s),
                TaskState::Running if self.badge.is_auto_enclosed() => {
                    let old = self.transition(&mut ctl, TaskState::Done);
                    (StopRequest::Degenerate, old, TaskState::Done)
                }
                TaskState::PendingCancelRequest => (StopRequest::AlreadyCeasing, state, state),
                TaskState::PendingStopRequest if !cancel => {
                    (StopRequest::AlreadyCeasing, state, state)
                }
                _ => {
                    let new = if cancel {
                        TaskState::PendingCancelRequest
                    } else {
                        TaskState::PendingStopRequest
                    };
                    let old = self.transition(&mut ctl, new);
                    (StopRequest::Requested, old, new)
                }
            }
        };
        self.notify_observer(old, new);
        match outcome {
            StopRequest::Requested => self.bus.publish(
                self.event(EventKind::TaskStopRequested)
                    .with_reason(if cancel { "cancel" } else { "stop" }),
            ),
            StopRequest::Degenerate if old != new => self
                .bus
                .publish(self.event(EventKind::TaskStopped).with_state(new.as_str())),
            _ => {}
        }
        outcome
    }

    /// Waits for the body to finish after a stop request.
    ///
    /// `None` does not wait and reports the current state.
    pub(crate) fn wait_stopped(&self, timeout: Option<Duration>) -> bool {
        let Some(timeout) = timeout else {
            return self.state().is_terminated();
        };
        if self.badge.has_dedicated_thread() {
            if self.stop_sem.acquire_timeout(Some(timeout)) {
                self.stop_sem.release();
            }
            return self.state().is_terminated();
        }
        self.wait_terminated(Some(timeout))
    }

    fn wait_terminated(&self, timeout: Option<Duration>) -> bool {
        let mut ctl = self.ctl.lock();
        match timeout {
            Some(t) => {
                let deadline = Instant::now() + t;
                while !ctl.state.is_terminated() {
                    if self.cv.wait_until(&mut ctl, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !ctl.state.is_terminated() {
                    self.cv.wait(&mut ctl);
                }
            }
        }
        ctl.state.is_terminated()
    }

    /// Blocks until the task finished (`None` = unbounded), then reaps its thread.
    pub fn join(&self, timeout: Option<Duration>) -> bool {
        if !self.wait_terminated(timeout) {
            return false;
        }
        let handle = self.handle.lock().take();
        if let Some(h) = handle {
            if let Err(e) = h.join() {
                let err = TaskError::Panicked {
                    info: panic_info(&*e),
                };
                log_error!(1403, task = %self.badge, "worker thread panicked outside the body");
                if let Some(reg) = self.registry() {
                    reg.handle_task_failure(&self.badge, &err, ApiBookmark::Join, self.state());
                }
            }
        }
        true
    }

    /// Worker thread finished (or there is none to wait for).
    pub fn is_thread_finished(&self) -> bool {
        match self.handle.lock().as_ref() {
            Some(h) => h.is_finished(),
            None => self.state().is_terminated() || !self.badge.has_dedicated_thread(),
        }
    }

    /// Ends an attached or auto-enclosed task.
    pub(crate) fn mark_detached(&self) {
        let old = {
            let mut ctl = self.ctl.lock();
            if ctl.state.is_terminated() {
                return;
            }
            self.transition(&mut ctl, TaskState::Done)
        };
        self.notify_observer(old, TaskState::Done);
        self.stop_sem.release();
    }
}

/// View of its own task handed to a task body.
#[derive(Clone)]
pub struct TaskContext {
    inst: Arc<TaskInstance>,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TaskContext").field(&self.inst.badge).finish()
    }
}

impl TaskContext {
    pub fn id(&self) -> TaskId {
        self.inst.id()
    }

    pub fn name(&self) -> &str {
        self.inst.badge.name()
    }

    pub fn badge(&self) -> &TaskBadge {
        &self.inst.badge
    }

    pub fn state(&self) -> TaskState {
        self.inst.state()
    }

    /// A stop or cancel request is pending.
    pub fn is_stop_requested(&self) -> bool {
        self.inst.state().is_ceasing()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inst.state() == TaskState::PendingCancelRequest
    }

    /// Blocks up to `timeout` for a stop request; returns whether one is pending.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let mut ctl = self.inst.ctl.lock();
        let _ = self
            .inst
            .cv
            .wait_while_for(&mut ctl, |c| !c.state.is_ceasing(), timeout);
        ctl.state.is_ceasing()
    }

    /// Lifecycle proxy, once injected.
    pub fn lc_proxy(&self) -> Option<Arc<dyn LcProxy>> {
        self.inst.proxy()
    }

    /// Registry the task belongs to.
    pub fn task_manager(&self) -> Option<Arc<TaskRegistry>> {
        self.inst.registry()
    }

    /// Asks the framework to stop; requires [`TaskRights::REQUEST_SHUTDOWN`].
    pub fn request_fw_shutdown(&self, forced: bool) -> bool {
        if !self.inst.badge.rights().contains(TaskRights::REQUEST_SHUTDOWN) {
            crate::logif::log_user_error!(
                1404,
                task = %self.inst.badge,
                "task lacks the right to request a framework shutdown"
            );
            return false;
        }
        match self.inst.proxy() {
            Some(proxy) => proxy.process_shutdown_request(forced, Some(&self.inst.badge)),
            None => false,
        }
    }
}
