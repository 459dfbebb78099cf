//! # LcState: the lifecycle state machine.
//!
//! The full bitmask *is* the state. Per-component started/stopped/failed
//! sub-states coexist in one [`LcStateFlags`] value; the initial state is empty
//! ("Idle") and termination is recognized by the `LcStopped` bit.
//!
//! ## Transition pipeline
//! ```text
//! set_lc_state(component, start|stop|fail, error?, task?)
//!   1. LcStopped already set                  → Err(AlreadyStopped)
//!   2. start, stop/fail bit already seeded     → Err(StartAfterStopOrFail)
//!   3. stop,  fail bit already seeded          → Err(StopAfterFail)
//!   4. fail,  stop bit already seeded          → Err(FailAfterStop)
//!   5. start/stop of FwComponent/XTask/Misc    → Ok(Ignored)
//!   6. fail,  record for (component, task)     → Err(DuplicateFailure)
//!      start/stop, target bit already set      → Ok(AlreadySeeded)
//!   7. apply: clear inverse, set target, record failure, verify
//!      verification failed                     → rollback, Err(Inconsistent)
//! ```
//!
//! ### Rules
//! - One re-entrant lock guards the mask and the failure records; applying a
//!   transition is the only write path.
//! - Failure bits and failure records always agree: a component has its
//!   failure bit set iff at least one record for it exists.
//! - A fail of a group that already failed through a *different* task adds a
//!   record without changing the mask.

use std::cell::RefCell;

use parking_lot::ReentrantMutex;

use crate::error::LcStateError;
use crate::events::{Bus, Event, EventKind};
use crate::lc::failure::{FailureRecord, FailureRecordManager};
use crate::lc::flags::{LcComponent, LcStateFlags, TransitionKind, convert_from_component, to_bit_flags_pair};
use crate::lc::FatalError;
use crate::logif::{log_debug, vlog_fatal};
use crate::tasks::{TaskBadge, ThreadUid};

/// Result of an accepted transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Mask (or failure records) changed.
    Applied,
    /// Not an officially driven transition; nothing changed.
    Ignored,
    /// Same transition was already seeded; nothing changed.
    AlreadySeeded,
}

#[derive(Debug, Default)]
struct Inner {
    mask: LcStateFlags,
    frm: FailureRecordManager,
    last_known: String,
}

/// Lifecycle state machine of one framework instance.
pub struct LcState {
    inner: ReentrantMutex<RefCell<Inner>>,
    bus: Option<Bus>,
}

impl std::fmt::Debug for LcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LcState")
            .field("state", &self.to_state_string())
            .finish()
    }
}

impl Default for LcState {
    fn default() -> Self {
        Self::new(None)
    }
}

impl LcState {
    /// Creates an idle state; transitions are published on `bus` if given.
    pub fn new(bus: Option<Bus>) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(Inner {
                last_known: LcStateFlags::empty().render(),
                ..Inner::default()
            })),
            bus,
        }
    }

    /// Requests a transition of `component`.
    ///
    /// `start_stop` is `Some(true)` for start, `Some(false)` for stop, `None`
    /// for fail. `error` accompanies a fail (a generic one is synthesized if
    /// missing); `task` identifies the reporter.
    pub fn set_lc_state(
        &self,
        component: LcComponent,
        start_stop: Option<bool>,
        error: Option<&FatalError>,
        task: Option<&TaskBadge>,
    ) -> Result<TransitionOutcome, LcStateError> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();

        let req = convert_from_component(component, start_stop);
        let (target, inverse) = to_bit_flags_pair(req, component);
        let mask = inner.mask;

        if mask.contains(LcStateFlags::LC_STOPPED) {
            return Err(LcStateError::AlreadyStopped {
                component,
                kind: req.kind,
            });
        }
        match req.kind {
            TransitionKind::Start
                if mask.intersects(component.stopped_bit() | component.failed_bit()) =>
            {
                return Err(LcStateError::StartAfterStopOrFail { component });
            }
            TransitionKind::Stop if mask.contains(component.failed_bit()) => {
                return Err(LcStateError::StopAfterFail { component });
            }
            TransitionKind::Fail if mask.contains(component.stopped_bit()) => {
                return Err(LcStateError::FailAfterStop { component });
            }
            _ => {}
        }

        if req.kind != TransitionKind::Fail
            && matches!(
                component,
                LcComponent::FwComponent | LcComponent::XTask | LcComponent::MiscComponent
            )
        {
            log_debug!(2201, %component, kind = ?req.kind, "unsupported lifecycle transition ignored");
            return Ok(TransitionOutcome::Ignored);
        }

        let thread = ThreadUid::current();
        if req.kind == TransitionKind::Fail {
            if let Some(rec) = inner.frm.find(component, task, thread) {
                return Err(LcStateError::DuplicateFailure {
                    component,
                    reporter: rec.reporter_key(),
                });
            }
        } else if mask.contains(target) {
            return Ok(TransitionOutcome::AlreadySeeded);
        }

        // apply
        let group_already_failed = req.kind == TransitionKind::Fail && mask.contains(target);
        let mut next = mask;
        if let Some(inv) = inverse {
            next.remove(inv);
        }
        next.insert(target);

        let mut detail = None;
        if inverse.is_some_and(|inv| next.contains(inv)) {
            detail = Some(format!("inverse bit of {component} did not clear"));
        } else if !next.contains(target) {
            detail = Some(format!("target bit of {component} did not set"));
        } else if next == mask && !group_already_failed {
            detail = Some(format!("transition of {component} did not change the mask"));
        }

        let records_before = inner.frm.len();
        if detail.is_none() {
            inner.mask = next;
            if req.kind == TransitionKind::Fail {
                let fe = match error {
                    Some(fe) => fe.clone(),
                    None => FatalError::new(0, format!("unspecified failure of {component}")),
                };
                inner
                    .frm
                    .add(FailureRecord::new(component, &fe, task, thread));
            }
            detail = verify_records(&inner);
        }

        if let Some(detail) = detail {
            inner.mask = mask;
            inner.frm.truncate(records_before);
            vlog_fatal!(2202, %component, kind = ?req.kind, detail = %detail, "lifecycle update rolled back");
            return Err(LcStateError::Inconsistent { detail });
        }

        let rendered = inner.mask.render();
        inner.last_known = rendered.clone();
        drop(inner);
        drop(guard);

        if let Some(bus) = &self.bus {
            let mut ev = Event::new(EventKind::LcStateChanged)
                .with_component(component)
                .with_state(rendered);
            if let Some(b) = task {
                ev = ev.with_task(b.name_arc()).with_task_id(b.id());
            }
            bus.publish(ev);
        }
        Ok(TransitionOutcome::Applied)
    }

    /// Current mask.
    pub fn flags(&self) -> LcStateFlags {
        self.inner.lock().borrow().mask
    }

    /// Canonical rendering of the current mask.
    pub fn to_state_string(&self) -> String {
        self.flags().render()
    }

    /// Snapshot pushed after the last applied transition.
    pub fn last_known(&self) -> String {
        self.inner.lock().borrow().last_known.clone()
    }

    /// `LcStarted ∧ TMgrStarted ∧ FwMainStarted ∧ ¬anyFailed`
    pub fn is_lc_operable(&self) -> bool {
        self.is_lc_core_operable() && !self.has_lc_any_failure_state()
    }

    /// `LcStarted ∧ TMgrStarted ∧ FwMainStarted`
    pub fn is_lc_core_operable(&self) -> bool {
        self.flags().contains(
            LcStateFlags::LC_STARTED | LcStateFlags::TMGR_STARTED | LcStateFlags::FW_MAIN_STARTED,
        )
    }

    pub fn has_lc_any_failure_state(&self) -> bool {
        self.flags().has_any_failure()
    }

    pub fn is_started(&self, component: LcComponent) -> bool {
        self.flags().contains(component.started_bit())
    }

    pub fn is_stopped(&self, component: LcComponent) -> bool {
        self.flags().contains(component.stopped_bit())
    }

    pub fn is_failed(&self, component: LcComponent) -> bool {
        self.flags().contains(component.failed_bit())
    }

    pub fn is_lc_started(&self) -> bool {
        self.is_started(LcComponent::LcMgr)
    }

    pub fn is_lc_stopped(&self) -> bool {
        self.is_stopped(LcComponent::LcMgr)
    }

    pub fn is_lc_failed(&self) -> bool {
        self.is_failed(LcComponent::LcMgr)
    }

    pub fn is_task_manager_started(&self) -> bool {
        self.is_started(LcComponent::TaskMgr)
    }

    pub fn is_task_manager_stopped(&self) -> bool {
        self.is_stopped(LcComponent::TaskMgr)
    }

    pub fn is_task_manager_failed(&self) -> bool {
        self.is_failed(LcComponent::TaskMgr)
    }

    pub fn is_fw_main_started(&self) -> bool {
        self.is_started(LcComponent::FwMain)
    }

    pub fn is_fw_main_stopped(&self) -> bool {
        self.is_stopped(LcComponent::FwMain)
    }

    pub fn is_fw_main_failed(&self) -> bool {
        self.is_failed(LcComponent::FwMain)
    }

    pub fn is_main_xtask_started(&self) -> bool {
        self.is_started(LcComponent::MainXTask)
    }

    pub fn is_main_xtask_failed(&self) -> bool {
        self.is_failed(LcComponent::MainXTask)
    }

    pub fn is_xtask_failed(&self) -> bool {
        self.is_failed(LcComponent::XTask)
    }

    /// Failure records of `component`, optionally narrowed to one task.
    pub fn get_lc_comp_frc_view(
        &self,
        component: LcComponent,
        task: Option<&TaskBadge>,
    ) -> Vec<FailureRecord> {
        self.inner
            .lock()
            .borrow()
            .frm
            .view(component, task.map(|b| b.id()))
    }

    pub fn has_lc_comp_frc(&self, component: LcComponent, task: Option<&TaskBadge>) -> bool {
        !self.get_lc_comp_frc_view(component, task).is_empty()
    }

    /// Back-fills anonymous failure records once `badge` is known.
    pub fn backfill_task(&self, badge: &TaskBadge) -> usize {
        self.inner.lock().borrow_mut().frm.backfill_task(badge)
    }

    /// All failure records.
    pub fn failure_records(&self) -> Vec<FailureRecord> {
        self.inner.lock().borrow().frm.records().to_vec()
    }

    /// Multi-line listing of all failure records.
    pub fn failure_summary(&self) -> String {
        self.inner.lock().borrow().frm.aggregate()
    }
}

fn verify_records(inner: &Inner) -> Option<String> {
    for c in LcComponent::ALL {
        let bit = inner.mask.contains(c.failed_bit());
        let rec = inner.frm.has_component(c);
        if bit != rec {
            return Some(format!(
                "failure bit of {c} is {bit} but failure record presence is {rec}"
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tasks::{TaskId, TaskKind, TaskRights, TaskTypeFlags};

    fn badge(id: u32) -> TaskBadge {
        TaskBadge::new(
            TaskId::new(id),
            Arc::from(format!("t{id}")),
            ThreadUid::allocate(),
            TaskKind::XTask,
            TaskTypeFlags::empty(),
            TaskRights::default(),
        )
    }

    #[test]
    fn start_stop_sequence() {
        let s = LcState::default();
        assert_eq!(
            s.set_lc_state(LcComponent::LcMgr, Some(true), None, None),
            Ok(TransitionOutcome::Applied)
        );
        assert_eq!(
            s.set_lc_state(LcComponent::LcMgr, Some(true), None, None),
            Ok(TransitionOutcome::AlreadySeeded)
        );
        assert!(s.is_lc_started());
        s.set_lc_state(LcComponent::TaskMgr, Some(true), None, None)
            .expect("tmgr start");
        s.set_lc_state(LcComponent::FwMain, Some(true), None, None)
            .expect("fw main start");
        assert!(s.is_lc_operable());

        s.set_lc_state(LcComponent::TaskMgr, Some(false), None, None)
            .expect("tmgr stop");
        assert!(s.is_task_manager_stopped());
        assert!(!s.is_task_manager_started());
        assert_eq!(s.last_known(), "LcStarted|TMgrStopped|FwMainStarted");
    }

    #[test]
    fn stop_then_fail_or_start_is_illegal() {
        let s = LcState::default();
        s.set_lc_state(LcComponent::TaskMgr, Some(true), None, None)
            .expect("start");
        s.set_lc_state(LcComponent::TaskMgr, Some(false), None, None)
            .expect("stop");

        assert!(matches!(
            s.set_lc_state(LcComponent::TaskMgr, None, None, None),
            Err(LcStateError::FailAfterStop { .. })
        ));
        assert!(matches!(
            s.set_lc_state(LcComponent::TaskMgr, Some(true), None, None),
            Err(LcStateError::StartAfterStopOrFail { .. })
        ));
    }

    #[test]
    fn stop_after_fail_is_illegal() {
        let s = LcState::default();
        s.set_lc_state(LcComponent::FwMain, Some(true), None, None)
            .expect("start");
        s.set_lc_state(LcComponent::FwMain, None, Some(&FatalError::new(5, "x")), None)
            .expect("fail");
        assert!(s.is_fw_main_failed());
        assert!(!s.is_fw_main_started());
        assert!(matches!(
            s.set_lc_state(LcComponent::FwMain, Some(false), None, None),
            Err(LcStateError::StopAfterFail { .. })
        ));
    }

    #[test]
    fn lc_stopped_freezes_everything() {
        let s = LcState::default();
        s.set_lc_state(LcComponent::LcMgr, Some(true), None, None)
            .expect("start");
        s.set_lc_state(LcComponent::LcMgr, Some(false), None, None)
            .expect("stop");
        assert!(matches!(
            s.set_lc_state(LcComponent::TaskMgr, Some(true), None, None),
            Err(LcStateError::AlreadyStopped { .. })
        ));
    }

    #[test]
    fn general_components_ignore_start_stop() {
        let s = LcState::default();
        assert_eq!(
            s.set_lc_state(LcComponent::XTask, Some(true), None, None),
            Ok(TransitionOutcome::Ignored)
        );
        assert!(s.flags().is_empty());
    }

    #[test]
    fn at_most_one_failure_per_component_and_task() {
        let s = LcState::default();
        let t1 = badge(1);
        let t2 = badge(2);
        let fe = FatalError::new(9, "boom");

        s.set_lc_state(LcComponent::XTask, None, Some(&fe), Some(&t1))
            .expect("first failure");
        assert!(matches!(
            s.set_lc_state(LcComponent::XTask, None, Some(&fe), Some(&t1)),
            Err(LcStateError::DuplicateFailure { .. })
        ));

        assert_eq!(
            s.set_lc_state(LcComponent::XTask, None, Some(&fe), Some(&t2)),
            Ok(TransitionOutcome::Applied)
        );
        assert_eq!(s.get_lc_comp_frc_view(LcComponent::XTask, None).len(), 2);
        assert!(s.has_lc_comp_frc(LcComponent::XTask, Some(&t2)));
        assert!(!s.has_lc_comp_frc(LcComponent::TaskMgr, None));
        assert!(s.has_lc_any_failure_state());
        assert!(s.failure_summary().contains("boom"));
    }

    #[test]
    fn failure_record_is_clone_of_reported_error() {
        let s = LcState::default();
        let fe = FatalError::new(4, "x");
        s.set_lc_state(LcComponent::MainXTask, None, Some(&fe), None)
            .expect("fail");
        let recs = s.failure_records();
        assert_eq!(recs.len(), 1);
        assert!(recs[0].error.is_clone());
        assert!(!fe.is_clone());
        assert_eq!(recs[0].error.unique_id(), fe.unique_id());
    }

    #[test]
    fn transitions_are_published() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let s = LcState::new(Some(bus));
        s.set_lc_state(LcComponent::LcMgr, Some(true), None, None)
            .expect("start");
        let ev = rx.try_recv().expect("event");
        assert_eq!(ev.kind, EventKind::LcStateChanged);
        assert_eq!(ev.state.as_deref(), Some("LcStarted"));
    }
}
