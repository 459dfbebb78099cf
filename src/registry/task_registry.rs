//! # TaskRegistry: create/start/stop/join and table management.
//!
//! ## Locks
//! ```text
//! ma  (API lock)   sequences precheck → hand-off of start/stop requests;
//!                  released before any blocking wait (handoff, stop wait, join)
//! md  (data lock)  guards the three-index table; never held across a blocking call
//! order: ma → md → task state lock
//! ```
//!
//! ## Start protocol
//! ```text
//! start_task(id)
//!   ma.lock
//!   precheck(Start) ─ Ignorable ─► true
//!                   ─ NotApplicable ─► false
//!                   ─ Applicable(Async) ─► spawn worker, ma.unlock, wait handoff (bounded)
//!                   ─ Applicable(Sync)  ─► ma.unlock, run body in-line
//!   failure ─► entry rolled back (removed from all indices, retired)
//! ```
//!
//! ## Stop protocol
//! ```text
//! stop_task(id, cancel, remove_on_success)
//!   retired id ─► true
//!   ma.lock, precheck(Stop|Cancel), request stop on the instance, ma.unlock
//!   Sync  ─► wait up to stop_wait for the body to finish
//!   finished && remove_on_success ─► remove entry
//! ```
//!
//! ### Rules
//! - Create and start fail closed when the registry is invalid or the lifecycle
//!   proxy is not in normal mode; stop and join always work.
//! - Observers attached to tasks must not call back into the registry.
//! - The thread that constructs the registry becomes its first, auto-enclosed entry.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::lc::LcProxy;
use crate::logif::{log_debug, log_error, log_info, log_user_error, vlog_error};
use crate::registry::table::{RetiredTask, TaskTable};
#[cfg(test)]
use crate::registry::table::RETIRED_CAPACITY;
use crate::tasks::{
    ExecMode, InstanceInit, Payload, Precheck, RunnableRef, StopRequest, TaskBadge, TaskContext,
    TaskEntry, TaskId, TaskInstance, TaskKind, TaskOperation, TaskProfile, TaskRights, TaskState,
    TaskTypeFlags, ThreadUid, precheck,
};

/// Special lookup targets resolved by scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePeer {
    /// The framework main task.
    FwMain,
    /// The application main task.
    MainXTask,
}

/// Lookup key of the `get_*` family.
#[derive(Debug, Clone, Copy)]
pub enum TaskKey<'a> {
    Id(TaskId),
    Name(&'a str),
    Peer(MessagePeer),
}

impl From<TaskId> for TaskKey<'_> {
    fn from(id: TaskId) -> Self {
        TaskKey::Id(id)
    }
}

impl<'a> From<&'a str> for TaskKey<'a> {
    fn from(name: &'a str) -> Self {
        TaskKey::Name(name)
    }
}

/// A task `stop_all_tasks` could not clean up.
#[derive(Debug, Clone)]
pub struct FailedTask {
    pub id: TaskId,
    pub name: Arc<str>,
    pub state: TaskState,
}

/// Process-wide table of tasks.
pub struct TaskRegistry {
    me: Weak<TaskRegistry>,
    ma: Mutex<()>,
    md: Mutex<TaskTable>,
    next_id: AtomicU32,
    valid: AtomicBool,
    proxy: RwLock<Option<Arc<dyn LcProxy>>>,
    cfg: RegistryConfig,
    bus: Bus,
    startup_thread: ThreadUid,
    #[cfg(test)]
    handoff_fault: AtomicBool,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.md.lock().by_id.len())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl TaskRegistry {
    /// Creates a registry and auto-encloses the calling thread as entry #1.
    pub fn new(cfg: RegistryConfig, bus: Bus) -> Arc<Self> {
        let reg = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            ma: Mutex::new(()),
            md: Mutex::new(TaskTable::default()),
            next_id: AtomicU32::new(1),
            valid: AtomicBool::new(true),
            proxy: RwLock::new(None),
            cfg,
            bus,
            startup_thread: ThreadUid::current(),
            #[cfg(test)]
            handoff_fault: AtomicBool::new(false),
        });
        if reg.get_cur_task_badge(true).is_none() {
            vlog_error!(1301, "startup thread could not be auto-enclosed");
        }
        reg
    }

    pub fn config(&self) -> RegistryConfig {
        self.cfg
    }

    /// Thread that constructed the registry.
    pub fn startup_thread(&self) -> ThreadUid {
        self.startup_thread
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Marks the registry unusable for create/start.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Valid and the lifecycle proxy (if any) is in normal mode.
    pub fn is_operable(&self) -> bool {
        self.is_valid() && self.lc_proxy().map_or(true, |p| p.is_proxy_mode_normal())
    }

    pub(crate) fn lc_proxy(&self) -> Option<Arc<dyn LcProxy>> {
        self.proxy.read().clone()
    }

    /// Propagates `proxy` to every registered proxy-client task.
    pub fn inject_lc_proxy(&self, proxy: Option<Arc<dyn LcProxy>>) {
        *self.proxy.write() = proxy.clone();
        let Some(proxy) = proxy else {
            return;
        };
        let insts: Vec<_> = self
            .md
            .lock()
            .by_id
            .values()
            .filter_map(|e| e.task_inst())
            .collect();
        for inst in insts {
            inst.inject_proxy(Arc::clone(&proxy));
        }
    }

    fn next_task_id(&self) -> TaskId {
        TaskId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn instance(&self, id: TaskId) -> Option<Arc<TaskInstance>> {
        self.md.lock().by_id.get(&id).and_then(|e| e.task_inst())
    }

    fn is_retired(&self, id: TaskId) -> bool {
        self.md.lock().retired.contains_key(&id)
    }

    // ---- create ----

    /// Creates a full task; starts it if `start` is set.
    ///
    /// An enclosing-thread task started here runs in-line; the call returns
    /// after its body finished.
    pub fn create_task(
        &self,
        runnable: RunnableRef,
        profile: TaskProfile,
        start: bool,
    ) -> Result<TaskId, RegistryError> {
        self.create(Payload::Task(runnable), profile, TaskTypeFlags::empty(), start)
    }

    /// Creates a light thread running `f` once.
    pub fn create_thread<F>(
        &self,
        f: F,
        profile: TaskProfile,
        start: bool,
    ) -> Result<TaskId, RegistryError>
    where
        F: FnOnce(&TaskContext) -> Result<(), TaskError> + Send + 'static,
    {
        self.create(
            Payload::Thread(Box::new(f)),
            profile,
            TaskTypeFlags::THREAD,
            start,
        )
    }

    fn create(
        &self,
        payload: Payload,
        profile: TaskProfile,
        extra: TaskTypeFlags,
        start: bool,
    ) -> Result<TaskId, RegistryError> {
        if !self.is_operable() {
            log_user_error!(1302, "task creation refused: registry not operable");
            return Err(RegistryError::Inoperable);
        }
        profile.validate()?;

        let id = {
            let _api = self.ma.lock();
            self.check_main_task(profile.kind())?;

            let cur = ThreadUid::current();
            let (uid, mut flags) = if profile.is_enclosing() {
                self.release_auto_enclosed(cur)?;
                (cur, TaskTypeFlags::ENCLOSING_THREAD)
            } else {
                (ThreadUid::allocate(), TaskTypeFlags::empty())
            };
            flags |= extra;

            let id = self.next_task_id();
            let badge = TaskBadge::new(
                id,
                profile.resolve_name(id.get()),
                uid,
                profile.kind(),
                flags,
                profile.rights(),
            );
            let inst = TaskInstance::new(InstanceInit {
                badge,
                payload: Some(payload),
                state: TaskState::Initialized,
                observer: profile.observer(),
                delayed_start: profile.delayed_start(),
                registry: self.me.clone(),
                bus: self.bus.clone(),
            });
            if let Some(p) = self.lc_proxy() {
                inst.inject_proxy(p);
            }
            self.add_task_entry(Arc::new(TaskEntry::new(Arc::clone(&inst))))?;
            id
        };

        if start && !self.start_task(id, true) {
            self.rollback_entry(id);
            return Err(RegistryError::StartFailed(id));
        }
        Ok(id)
    }

    fn check_main_task(&self, kind: TaskKind) -> Result<(), RegistryError> {
        if !kind.is_main() {
            return Ok(());
        }
        let table = self.md.lock();
        let existing = table.by_id.values().find_map(|e| {
            let inst = e.task_inst()?;
            (inst.badge().kind() == kind && !inst.state().is_terminated()).then(|| inst.id())
        });
        match existing {
            Some(id) => Err(RegistryError::MainTaskExists(id)),
            None => Ok(()),
        }
    }

    /// Frees `cur` for a new enclosing task if it is only auto-enclosed.
    fn release_auto_enclosed(&self, cur: ThreadUid) -> Result<(), RegistryError> {
        let owner = {
            let table = self.md.lock();
            table.by_thread.get(&cur).cloned()
        };
        let Some(owner) = owner else {
            return Ok(());
        };
        if !owner.is_auto_enclosed_entry() {
            return Err(RegistryError::ThreadCollision {
                uid: cur,
                owner: owner.key_id(),
            });
        }
        if let Some(inst) = owner.task_inst() {
            inst.mark_detached();
        }
        self.remove_entry(owner.key_id());
        Ok(())
    }

    /// Admits an entry into all three indices.
    pub(crate) fn add_task_entry(&self, entry: Arc<TaskEntry>) -> Result<(), RegistryError> {
        let Some(badge) = entry.task_badge() else {
            return Err(RegistryError::Inoperable);
        };
        let cur = ThreadUid::current();
        if badge.is_enclosing_thread() && badge.thread_uid() != cur {
            return Err(RegistryError::EnclosingThreadMismatch {
                expected: badge.thread_uid(),
                actual: cur,
            });
        }

        self.md.lock().insert(entry)?;
        self.bus.publish(
            Event::new(if badge.is_auto_enclosed() {
                EventKind::TaskAutoEnclosed
            } else {
                EventKind::TaskCreated
            })
            .with_task(badge.name_arc())
            .with_task_id(badge.id()),
        );
        Ok(())
    }

    /// Admits the calling thread as a task that drives an externally running job.
    ///
    /// The caller polls the returned context for stop requests and ends the
    /// task with [`detach_task`](Self::detach_task).
    pub fn attach_current_thread(
        &self,
        profile: TaskProfile,
    ) -> Result<TaskContext, RegistryError> {
        if !self.is_operable() {
            return Err(RegistryError::Inoperable);
        }
        profile.validate()?;

        let inst = {
            let _api = self.ma.lock();
            self.check_main_task(profile.kind())?;
            let cur = ThreadUid::current();
            self.release_auto_enclosed(cur)?;

            let id = self.next_task_id();
            let badge = TaskBadge::new(
                id,
                profile.resolve_name(id.get()),
                cur,
                profile.kind(),
                TaskTypeFlags::ENCLOSING_THREAD | TaskTypeFlags::DRIVES_EXTERNAL,
                profile.rights(),
            );
            let inst = TaskInstance::new(InstanceInit {
                badge,
                payload: None,
                state: TaskState::Initialized,
                observer: profile.observer(),
                delayed_start: None,
                registry: self.me.clone(),
                bus: self.bus.clone(),
            });
            inst.bind_current_thread();
            if let Some(p) = self.lc_proxy() {
                inst.inject_proxy(p);
            }
            self.add_task_entry(Arc::new(TaskEntry::new(Arc::clone(&inst))))?;
            inst
        };

        inst.mark_running();
        if let Some(p) = inst.proxy() {
            p.notify_task_transition(inst.badge(), true);
        }
        Ok(inst.context())
    }

    /// Ends an attached or auto-enclosed task and removes its entry.
    pub fn detach_task(&self, id: TaskId) -> bool {
        let Some(inst) = self.instance(id) else {
            return self.is_retired(id);
        };
        let badge = inst.badge();
        if !(badge.is_driving_external_task() || badge.is_auto_enclosed()) {
            log_user_error!(1303, task = %badge, "only attached or auto-enclosed tasks can be detached");
            return false;
        }
        let was_running = !inst.state().is_terminated();
        inst.mark_detached();
        if was_running && badge.is_driving_external_task() {
            if let Some(p) = inst.proxy() {
                p.notify_task_transition(badge, false);
            }
        }
        self.remove_entry(id).is_some()
    }

    // ---- start / stop / join ----

    /// Starts task `id`. See the module docs for the protocol.
    pub fn start_task(&self, id: TaskId, check: bool) -> bool {
        let Some(inst) = self.instance(id) else {
            log_user_error!(1304, task = %id, "start of an unknown task");
            return false;
        };
        if !self.is_operable() {
            log_user_error!(1305, task = %id, "start refused: registry not operable");
            return false;
        }

        let api = self.ma.lock();
        let pc = if check {
            precheck(TaskOperation::Start, &inst.precheck_input())
        } else if inst.badge().has_dedicated_thread() {
            Precheck::Applicable(ExecMode::Async)
        } else {
            Precheck::Applicable(ExecMode::Sync)
        };

        match pc {
            Precheck::Ignorable => true,
            Precheck::NotApplicable => {
                log_user_error!(
                    1306,
                    task = %inst.badge(),
                    state = %inst.state(),
                    "start not applicable"
                );
                false
            }
            Precheck::Applicable(ExecMode::Async) => {
                let spawned = inst.start_async();
                drop(api);
                if let Err(err) = spawned {
                    log_error!(1307, task = %inst.badge(), error = %err, "worker spawn failed");
                    self.handle_task_failure(
                        inst.badge(),
                        &TaskError::fail(err.to_string()),
                        crate::tasks::ApiBookmark::Start,
                        TaskState::PendingRun,
                    );
                    self.rollback_entry(id);
                    return false;
                }
                if !inst.wait_started(self.cfg.start_handoff) || self.handoff_fault() {
                    log_error!(1308, task = %inst.badge(), "worker did not report back in time");
                    self.rollback_entry(id);
                    return false;
                }
                true
            }
            Precheck::Applicable(ExecMode::Sync) => {
                drop(api);
                inst.run_inline();
                true
            }
        }
    }

    /// Stops (or cancels) task `id`; `true` if the request was accepted.
    pub fn stop_task(&self, id: TaskId, cancel: bool, remove_on_success: bool, check: bool) -> bool {
        let Some(inst) = self.instance(id) else {
            if self.is_retired(id) {
                return true;
            }
            log_user_error!(1309, task = %id, "stop of an unknown task");
            return false;
        };

        let api = self.ma.lock();
        let op = if cancel {
            TaskOperation::Cancel
        } else {
            TaskOperation::Stop
        };
        let pc = if check {
            precheck(op, &inst.precheck_input())
        } else {
            Precheck::Applicable(ExecMode::Sync)
        };
        let mode = match pc {
            Precheck::Ignorable => return true,
            Precheck::NotApplicable => {
                log_user_error!(1310, task = %inst.badge(), state = %inst.state(), "stop not applicable");
                return false;
            }
            Precheck::Applicable(mode) => mode,
        };

        let outcome = inst.request_stop(cancel);
        drop(api);

        let finished = match (outcome, mode) {
            (StopRequest::Degenerate, _) => true,
            (_, ExecMode::Sync) => inst.wait_stopped(self.cfg.stop_wait),
            (_, ExecMode::Async) => inst.state().is_terminated(),
        };
        if finished && remove_on_success {
            self.remove_entry(id);
        }
        true
    }

    /// Blocks until task `id` finished (`timeout = None` waits without bound).
    ///
    /// `cur` is the calling task, if known; joining oneself is refused.
    pub fn join_task(
        &self,
        id: TaskId,
        timeout: Option<Duration>,
        check: bool,
        cur: Option<TaskId>,
    ) -> bool {
        let Some(inst) = self.instance(id) else {
            if self.is_retired(id) {
                return true;
            }
            log_user_error!(1311, task = %id, "join of an unknown task");
            return false;
        };
        if cur == Some(id) {
            log_user_error!(1312, task = %inst.badge(), "task cannot join itself");
            return false;
        }
        if check {
            match precheck(TaskOperation::Join, &inst.precheck_input()) {
                Precheck::Ignorable => {
                    inst.join(Some(Duration::ZERO));
                    return true;
                }
                Precheck::NotApplicable => {
                    log_user_error!(1313, task = %inst.badge(), state = %inst.state(), "join not applicable");
                    return false;
                }
                Precheck::Applicable(_) => {}
            }
        }
        let joined = inst.join(timeout);
        if joined {
            self.bus.publish(
                Event::new(EventKind::TaskJoined)
                    .with_task(inst.badge().name_arc())
                    .with_task_id(id),
            );
        }
        joined
    }

    fn is_startup_entry(&self, e: &TaskEntry) -> bool {
        e.key_thread() == self.startup_thread && e.is_auto_enclosed_entry()
    }

    /// Stops all tasks (except the startup thread's auto-enclosed entry and `skip`), newest first.
    /// With `cancel` the tasks are cancelled instead.
    ///
    /// Returns the tasks that could not be cleaned up, or `None` if all were.
    pub fn stop_all_tasks(
        &self,
        cleanup: bool,
        cancel: bool,
        skip: &[TaskId],
    ) -> Option<Vec<FailedTask>> {
        let snapshot: Vec<Arc<TaskInstance>> = {
            let table = self.md.lock();
            table
                .by_id
                .values()
                .rev()
                .filter(|e| !skip.contains(&e.key_id()) && !self.is_startup_entry(e))
                .filter_map(|e| e.task_inst())
                .collect()
        };

        for inst in &snapshot {
            self.stop_task(inst.id(), cancel, false, true);
        }

        let mut failed = Vec::new();
        let mut removed = Vec::new();
        {
            let _api = self.ma.lock();
            let mut table = self.md.lock();
            for inst in &snapshot {
                let state = inst.state();
                if cleanup && state.is_terminated() {
                    if let Some(e) = table.remove(inst.id()) {
                        removed.push(e);
                    }
                } else if !state.is_terminated() {
                    failed.push(FailedTask {
                        id: inst.id(),
                        name: inst.badge().name_arc(),
                        state,
                    });
                }
            }
        }
        for e in removed {
            self.finish_removal(&e);
        }

        if failed.is_empty() {
            None
        } else {
            log_info!(1314, count = failed.len(), "tasks still pending after stop-all");
            Some(failed)
        }
    }

    // ---- removal ----

    fn remove_entry(&self, id: TaskId) -> Option<Arc<TaskEntry>> {
        let entry = self.md.lock().remove(id)?;
        self.finish_removal(&entry);
        Some(entry)
    }

    fn finish_removal(&self, entry: &TaskEntry) {
        entry.cleanup();
        self.bus.publish(
            Event::new(EventKind::TaskRemoved)
                .with_task(Arc::clone(entry.key_name()))
                .with_task_id(entry.key_id()),
        );
    }

    #[cfg(test)]
    fn handoff_fault(&self) -> bool {
        self.handoff_fault.swap(false, Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn handoff_fault(&self) -> bool {
        false
    }

    /// Cancels a task whose creation or start failed and drops its entry.
    fn rollback_entry(&self, id: TaskId) {
        if let Some(inst) = self.instance(id) {
            inst.request_stop(true);
        }
        if self.remove_entry(id).is_some() {
            log_debug!(1315, task = %id, "entry rolled back");
        }
    }

    /// Drops cleaned-up entries and auto-enclosed entries of exited threads.
    pub fn remove_cleaned_up_entries(&self) -> usize {
        let mut table = self.md.lock();
        let stale: Vec<TaskId> = table
            .by_id
            .values()
            .filter(|e| match e.task_inst() {
                None => true,
                Some(inst) => inst.badge().is_auto_enclosed() && inst.is_thread_gone(),
            })
            .map(|e| e.key_id())
            .collect();
        let removed: Vec<_> = stale.iter().filter_map(|id| table.remove(*id)).collect();
        drop(table);
        for e in &removed {
            self.finish_removal(e);
        }
        removed.len()
    }

    // ---- lookup ----

    fn entry(&self, key: TaskKey<'_>) -> Option<Arc<TaskEntry>> {
        let table = self.md.lock();
        match key {
            TaskKey::Id(id) => table.by_id.get(&id).cloned(),
            TaskKey::Name(name) => table.by_name_first(name).cloned(),
            TaskKey::Peer(peer) => {
                let kind = match peer {
                    MessagePeer::FwMain => TaskKind::FwMainTask,
                    MessagePeer::MainXTask => TaskKind::MainXTask,
                };
                table
                    .by_id
                    .values()
                    .find(|e| {
                        e.task_inst()
                            .is_some_and(|i| i.badge().kind() == kind && !i.state().is_terminated())
                    })
                    .cloned()
            }
        }
    }

    pub fn get_task<'a>(&self, key: impl Into<TaskKey<'a>>) -> Option<Arc<TaskInstance>> {
        self.entry(key.into())?.task_inst()
    }

    pub fn get_task_badge<'a>(&self, key: impl Into<TaskKey<'a>>) -> Option<TaskBadge> {
        self.entry(key.into())?.task_badge()
    }

    pub fn get_task_id<'a>(&self, key: impl Into<TaskKey<'a>>) -> Option<TaskId> {
        self.entry(key.into())?.task_id()
    }

    /// Error a task finished with; retired tasks included.
    pub fn get_task_error<'a>(&self, key: impl Into<TaskKey<'a>>) -> Option<TaskError> {
        let key = key.into();
        if let Some(inst) = self.entry(key).and_then(|e| e.task_inst()) {
            return inst.error();
        }
        let table = self.md.lock();
        match key {
            TaskKey::Id(id) => table.retired.get(&id).and_then(|r| r.error.clone()),
            TaskKey::Name(name) => table
                .retired
                .values()
                .rev()
                .find(|r| &*r.name == name)
                .and_then(|r| r.error.clone()),
            TaskKey::Peer(_) => None,
        }
    }

    /// Current state; retired tasks report their final state.
    pub fn get_task_state(&self, id: TaskId) -> Option<TaskState> {
        if let Some(inst) = self.instance(id) {
            return Some(inst.state());
        }
        self.md.lock().retired.get(&id).map(|r| r.state)
    }

    /// Final record of a removed task.
    pub fn get_retired(&self, id: TaskId) -> Option<RetiredTask> {
        self.md.lock().retired.get(&id).cloned()
    }

    /// Entry bound to thread `uid`.
    pub fn get_task_by_thread(&self, uid: ThreadUid) -> Option<Arc<TaskInstance>> {
        self.md.lock().by_thread.get(&uid).and_then(|e| e.task_inst())
    }

    /// Badge of the task bound to the calling thread.
    ///
    /// With `auto_enclose`, a thread without a task is admitted exactly once
    /// as an auto-enclosed task. A nested call on the same thread while the
    /// enclosure is in progress returns `None`.
    pub fn get_cur_task_badge(&self, auto_enclose: bool) -> Option<TaskBadge> {
        let cur = ThreadUid::current();
        {
            let mut table = self.md.lock();
            if let Some(e) = table.by_thread.get(&cur) {
                return e.task_badge();
            }
            if !auto_enclose || !table.enclosing.insert(cur) {
                return None;
            }
        }

        let id = self.next_task_id();
        let name: Arc<str> = match std::thread::current().name() {
            Some(n) => Arc::from(format!("{n}_{:03}", id.get())),
            None => Arc::from(format!("Thread_{:03}", id.get())),
        };
        let badge = TaskBadge::new(
            id,
            name,
            cur,
            TaskKind::XTask,
            TaskTypeFlags::AUTO_ENCLOSED,
            TaskRights::PROXY_CLIENT,
        );
        let inst = TaskInstance::new(InstanceInit {
            badge: badge.clone(),
            payload: None,
            state: TaskState::Running,
            observer: None,
            delayed_start: None,
            registry: self.me.clone(),
            bus: self.bus.clone(),
        });
        inst.bind_current_thread();
        if let Some(p) = self.lc_proxy() {
            inst.inject_proxy(p);
        }

        {
            let mut table = self.md.lock();
            table.enclosing.remove(&cur);
            if let Some(e) = table.by_thread.get(&cur) {
                return e.task_badge();
            }
            if let Err(err) = table.insert(Arc::new(TaskEntry::new(inst))) {
                vlog_error!(1316, error = %err, "auto-enclosed entry rejected");
                return None;
            }
        }

        self.bus.publish(
            Event::new(EventKind::TaskAutoEnclosed)
                .with_task(badge.name_arc())
                .with_task_id(id),
        );
        Some(badge)
    }

    // ---- introspection ----

    /// Ids of all tasks in the table, ascending.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.md.lock().by_id.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.md.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Application tasks that still run and can be waited for.
    pub fn running_xtasks(&self) -> Vec<TaskId> {
        self.md
            .lock()
            .by_id
            .values()
            .filter_map(|e| e.task_inst())
            .filter(|i| {
                let b = i.badge();
                b.is_xtask() && !b.is_auto_enclosed() && i.state().is_alive()
            })
            .map(|i| i.id())
            .collect()
    }

    /// All three indices agree.
    pub fn is_consistent(&self) -> bool {
        self.md.lock().is_consistent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskFn;

    fn registry() -> Arc<TaskRegistry> {
        TaskRegistry::new(RegistryConfig::default(), Bus::default())
    }

    #[test]
    fn startup_thread_is_first_entry() {
        let reg = registry();
        let badge = reg.get_cur_task_badge(false).expect("startup entry");
        assert_eq!(badge.id(), TaskId::new(1));
        assert!(badge.is_auto_enclosed());
        assert_eq!(reg.startup_thread(), ThreadUid::current());
    }

    #[test]
    fn create_start_stop_removes_entry() {
        let reg = registry();
        let id = reg
            .create_task(
                TaskFn::arc(|ctx: &TaskContext| {
                    while !ctx.wait_for_stop(Duration::from_millis(5)) {}
                    Ok(())
                }),
                TaskProfile::xtask().with_name("loop"),
                true,
            )
            .expect("create");
        assert!(reg.get_task_state(id).is_some_and(|s| s.is_alive()));
        assert!(reg.stop_task(id, false, true, true));
        assert!(reg.get_task(id).is_none());
        assert_eq!(reg.get_task_state(id), Some(TaskState::Done));
        assert!(reg.is_consistent());
    }

    #[test]
    fn second_main_task_is_rejected() {
        let reg = registry();
        let first = reg
            .create_task(
                TaskFn::arc(|ctx: &TaskContext| {
                    ctx.wait_for_stop(Duration::from_secs(5));
                    Ok(())
                }),
                TaskProfile::main_xtask(),
                true,
            )
            .expect("first main");
        let err = reg
            .create_task(TaskFn::arc(|_: &TaskContext| Ok(())), TaskProfile::main_xtask(), false)
            .expect_err("second main");
        assert!(matches!(err, RegistryError::MainTaskExists(id) if id == first));
        assert!(reg.stop_all_tasks(true, false, &[]).is_none());
    }

    #[test]
    fn invalid_registry_refuses_creation() {
        let reg = registry();
        reg.invalidate();
        let err = reg
            .create_task(TaskFn::arc(|_: &TaskContext| Ok(())), TaskProfile::xtask(), true)
            .expect_err("inoperable");
        assert_eq!(err.as_label(), "registry_inoperable");
    }

    #[test]
    fn enclosing_task_replaces_auto_enclosed_thread() {
        let reg = registry();
        let startup = reg.get_cur_task_badge(false).expect("startup").id();
        let id = reg
            .create_task(
                TaskFn::arc(|_: &TaskContext| Ok(())),
                TaskProfile::xtask().with_enclosing_thread(true),
                true,
            )
            .expect("enclosing");
        assert!(reg.get_task(startup).is_none());
        assert_eq!(reg.get_task_state(id), Some(TaskState::Done));
        assert_eq!(reg.get_cur_task_badge(false).map(|b| b.id()), Some(id));
    }

    #[test]
    fn late_handoff_rolls_the_entry_back() {
        let reg = registry();
        reg.handoff_fault.store(true, Ordering::SeqCst);
        let err = reg
            .create_task(
                TaskFn::arc(|ctx: &TaskContext| {
                    while !ctx.wait_for_stop(Duration::from_millis(5)) {}
                    Ok(())
                }),
                TaskProfile::xtask().with_name("late"),
                true,
            )
            .expect_err("handoff missed");
        let RegistryError::StartFailed(id) = err else {
            panic!("unexpected error: {err:?}");
        };
        assert!(reg.get_task(id).is_none());
        assert!(reg.get_task("late").is_none());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.md.lock().by_thread.len(), 1);
        assert!(reg.is_consistent());
    }

    #[test]
    fn retired_records_are_bounded() {
        let reg = registry();
        let total = RETIRED_CAPACITY + 8;
        let mut first = None;
        for _ in 0..total {
            let id = reg
                .create_task(TaskFn::arc(|_: &TaskContext| Ok(())), TaskProfile::xtask(), false)
                .expect("create");
            first.get_or_insert(id);
            assert!(reg.stop_task(id, false, true, true));
        }
        let oldest = first.expect("at least one task");
        assert_eq!(reg.md.lock().retired.len(), RETIRED_CAPACITY);
        assert!(reg.get_retired(oldest).is_none());
        assert_eq!(reg.len(), 1);
    }
}
