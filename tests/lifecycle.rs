use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use taskmgr::{
    Event, EventKind, ExecPhase, FatalError, LcComponent, LcError, LcManager, LcScope, LcState,
    LcStateError, MAIN_XTASK, StartupPolicy, StopOrigin, Subscribe, TaskContext, TaskError,
    TaskBadge, TaskFn, TaskId, TaskObserver, TaskProfile, TaskState, render_report,
};

mod common;

fn policy(scope: LcScope) -> StartupPolicy {
    common::init_tracing();
    StartupPolicy {
        shutdown_wait: Duration::from_secs(2),
        release_mode: true,
        ..StartupPolicy::with_target(scope)
    }
}

#[derive(Default)]
struct Recorder {
    kinds: Mutex<Vec<EventKind>>,
}

impl Subscribe for Recorder {
    fn on_event(&self, event: &Event) {
        self.kinds.lock().push(event.kind);
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[test]
fn join_without_stop_issues_exactly_one_stop() {
    let mgr = LcManager::create(policy(LcScope::FullIpc)).unwrap();
    let reg = mgr.registry().unwrap();
    reg.create_task(
        TaskFn::arc(|ctx: &TaskContext| {
            ctx.wait_for_stop(Duration::from_millis(100));
            Ok(())
        }),
        TaskProfile::main_xtask().with_name("app"),
        true,
    )
    .unwrap();

    mgr.join_fw().unwrap();

    assert_eq!(mgr.history().addition_count(ExecPhase::STOP), 1);
    let rec = mgr.stop_record().expect("self-triggered stop");
    assert_eq!(rec.origin, StopOrigin::Internal);
    assert!(rec.auto);
    assert!(!rec.forced);
    assert!(mgr.is_finalized());
    assert_eq!(mgr.scope(), LcScope::Idle);
    assert!(!mgr.lc_state().has_lc_any_failure_state());
}

#[test]
fn join_xtasks_resolves_the_main_task() {
    let mgr = LcManager::create(policy(LcScope::SemiIpc)).unwrap();
    let reg = mgr.registry().unwrap();
    reg.create_thread(
        |ctx: &TaskContext| {
            ctx.wait_for_stop(Duration::from_millis(50));
            Ok(())
        },
        TaskProfile::main_xtask(),
        true,
    )
    .unwrap();

    let (joined, pending) = mgr.join_xtasks(Some(vec![MAIN_XTASK]), Some(Duration::from_secs(2)));
    assert_eq!(joined, 1);
    assert!(pending.is_none());

    mgr.stop_fw(false);
    mgr.join_fw().unwrap();
}

#[test]
fn main_task_failure_shuts_the_framework_down() {
    colored::control::set_override(false);
    let mgr = LcManager::create(policy(LcScope::SemiIpc)).unwrap();
    let reg = mgr.registry().unwrap();
    reg.create_thread(
        |_ctx: &TaskContext| Err(TaskError::fatal(9, "lost upstream")),
        TaskProfile::main_xtask(),
        true,
    )
    .unwrap();

    mgr.join_fw().unwrap();

    assert!(mgr.lc_state().is_main_xtask_failed());
    let rec = mgr.stop_record().expect("failure shutdown");
    assert_eq!(rec.origin, StopOrigin::Internal);

    let text = render_report(mgr.lc_state(), mgr.history().current(), true);
    assert!(text.contains("FAILED"));
    assert!(text.contains("lost upstream"));
}

#[test]
fn join_from_attached_thread_is_refused() {
    let mgr = LcManager::create(policy(LcScope::SemiIpc)).unwrap();
    let reg = mgr.registry().unwrap();

    let refused = {
        let mgr = Arc::clone(&mgr);
        let reg = Arc::clone(&reg);
        std::thread::spawn(move || {
            let ctx = reg.attach_current_thread(TaskProfile::xtask()).unwrap();
            let res = mgr.join_fw();
            reg.detach_task(ctx.id());
            res
        })
        .join()
        .unwrap()
    };
    assert!(matches!(refused, Err(LcError::JoinFromAttachedThread(_))));
    assert!(!mgr.is_join_requested());

    mgr.stop_fw(false);
    mgr.join_fw().unwrap();
}

#[test]
fn join_after_enclosing_main_task_finished() {
    let mgr = LcManager::create(policy(LcScope::SemiIpc)).unwrap();
    let reg = mgr.registry().unwrap();
    let id = reg
        .create_thread(
            |_ctx: &TaskContext| Ok(()),
            TaskProfile::main_xtask().with_enclosing_thread(true),
            true,
        )
        .unwrap();
    assert_eq!(reg.get_task_state(id), Some(TaskState::Done));

    mgr.stop_fw(false);
    mgr.join_fw().unwrap();
    assert!(mgr.is_finalized());
}

#[derive(Default)]
struct CancelSeen {
    ids: Mutex<Vec<TaskId>>,
}

impl TaskObserver for CancelSeen {
    fn on_state_change(&self, badge: &TaskBadge, _old: TaskState, new: TaskState) {
        if new == TaskState::PendingCancelRequest {
            self.ids.lock().push(badge.id());
        }
    }
}

#[test]
fn forced_stop_cancels_application_tasks() {
    let mgr = LcManager::create(policy(LcScope::SemiIpc)).unwrap();
    let reg = mgr.registry().unwrap();
    let seen = Arc::new(CancelSeen::default());
    let id = reg
        .create_task(
            TaskFn::arc(|ctx: &TaskContext| {
                while !ctx.wait_for_stop(Duration::from_millis(5)) {}
                Ok(())
            }),
            TaskProfile::xtask().with_observer(seen.clone()),
            true,
        )
        .unwrap();

    assert!(mgr.stop_fw(true));
    mgr.join_fw().unwrap();

    assert_eq!(*seen.ids.lock(), vec![id]);
    assert!(mgr.stop_record().is_some_and(|r| r.forced));
}

#[test]
fn subscribers_see_the_whole_run() {
    let rec = Arc::new(Recorder::default());
    let mgr = LcManager::builder(policy(LcScope::SemiIpc))
        .with_subscribers(vec![rec.clone() as Arc<dyn Subscribe>])
        .build()
        .unwrap();
    let reg = mgr.registry().unwrap();
    reg.create_task(
        TaskFn::arc(|ctx: &TaskContext| {
            while !ctx.wait_for_stop(Duration::from_millis(5)) {}
            Ok(())
        }),
        TaskProfile::xtask(),
        true,
    )
    .unwrap();

    mgr.stop_fw(false);
    mgr.join_fw().unwrap();

    let kinds = rec.kinds.lock().clone();
    for kind in [
        EventKind::ScopeChanged,
        EventKind::TaskCreated,
        EventKind::TaskStarted,
        EventKind::StopRequested,
        EventKind::TaskStopped,
        EventKind::JoinRequested,
    ] {
        assert!(kinds.contains(&kind), "missing {kind:?}");
    }
    assert_eq!(kinds.last(), Some(&EventKind::ShutdownCompleted));
}

#[test]
fn lifecycle_rules_reject_out_of_order_transitions() {
    let state = LcState::new(None);
    state
        .set_lc_state(LcComponent::FwMain, Some(true), None, None)
        .unwrap();
    state
        .set_lc_state(LcComponent::FwMain, Some(false), None, None)
        .unwrap();

    let err = state
        .set_lc_state(
            LcComponent::FwMain,
            None,
            Some(&FatalError::new(3, "late failure")),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, LcStateError::FailAfterStop { component } if component == LcComponent::FwMain));

    let err = state
        .set_lc_state(LcComponent::FwMain, Some(true), None, None)
        .unwrap_err();
    assert!(matches!(err, LcStateError::StartAfterStopOrFail { .. }));
    assert!(!state.has_lc_any_failure_state());
}
