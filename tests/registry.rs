use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use taskmgr::{
    Bus, RegistryConfig, RegistryError, RunnableRef, TaskBadge, TaskContext, TaskError, TaskFn, TaskId,
    TaskObserver, TaskProfile, TaskRegistry, TaskState,
};

mod common;

fn registry() -> Arc<TaskRegistry> {
    common::init_tracing();
    TaskRegistry::new(RegistryConfig::default(), Bus::new(256))
}

fn looping() -> RunnableRef {
    TaskFn::arc(|ctx: &TaskContext| {
        while !ctx.wait_for_stop(Duration::from_millis(5)) {}
        Ok(())
    })
}

#[derive(Default)]
struct StopOrder {
    seen: Mutex<Vec<TaskId>>,
}

impl TaskObserver for StopOrder {
    fn on_state_change(&self, badge: &TaskBadge, _old: TaskState, new: TaskState) {
        if new == TaskState::PendingStopRequest {
            self.seen.lock().push(badge.id());
        }
    }
}

#[test]
fn lookups_agree_and_vanish_after_removal() {
    let reg = registry();
    let id = reg
        .create_task(looping(), TaskProfile::xtask().with_name("worker"), true)
        .unwrap();

    let by_id = reg.get_task(id).expect("by id");
    let by_name = reg.get_task("worker").expect("by name");
    let by_thread = reg.get_task_by_thread(by_id.badge().thread_uid()).expect("by thread");
    assert_eq!(by_name.id(), id);
    assert_eq!(by_thread.id(), id);
    assert_eq!(reg.get_task_id("worker"), Some(id));
    assert!(reg.is_consistent());

    assert!(reg.stop_task(id, false, true, true));
    assert!(reg.get_task(id).is_none());
    assert!(reg.get_task("worker").is_none());
    assert!(reg.get_task_by_thread(by_id.badge().thread_uid()).is_none());
    assert_eq!(reg.get_task_state(id), Some(TaskState::Done));
    assert!(reg.get_retired(id).is_some());
    assert!(reg.is_consistent());
}

#[test]
fn stopping_twice_is_accepted() {
    let reg = registry();
    let id = reg.create_task(looping(), TaskProfile::xtask(), true).unwrap();

    assert!(reg.stop_task(id, false, true, true));
    assert!(reg.stop_task(id, false, true, true));
    assert!(reg.join_task(id, Some(Duration::from_secs(1)), true, None));
}

#[test]
fn rejected_creation_leaves_no_entry() {
    let reg = registry();
    let before = reg.task_ids();

    let main = reg
        .create_task(looping(), TaskProfile::main_xtask(), true)
        .unwrap();
    let after_main = reg.len();
    let err = reg
        .create_task(looping(), TaskProfile::main_xtask(), false)
        .unwrap_err();
    assert!(matches!(err, RegistryError::MainTaskExists(id) if id == main));
    assert_eq!(reg.len(), after_main);

    let err = reg
        .create_task(
            looping(),
            TaskProfile::xtask()
                .with_enclosing_thread(true)
                .with_delayed_start(Duration::from_millis(10)),
            false,
        )
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidProfile(_)));
    assert_eq!(reg.len(), after_main);

    // first enclosing task replaces the auto-enclosed wrapper, the second collides
    let enclosing = reg
        .create_task(looping(), TaskProfile::xtask().with_enclosing_thread(true), false)
        .unwrap();
    let err = reg
        .create_task(looping(), TaskProfile::xtask().with_enclosing_thread(true), false)
        .unwrap_err();
    assert!(matches!(err, RegistryError::ThreadCollision { owner, .. } if owner == enclosing));
    assert!(reg.is_consistent());

    assert!(reg.stop_task(main, false, true, true));
    assert!(reg.stop_task(enclosing, false, true, true));
    assert!(reg.task_ids().iter().all(|id| !before.contains(id)));
}

#[test]
fn foreign_thread_is_enclosed_once() {
    let reg = registry();
    let created = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let reg = Arc::clone(&reg);
            let created = Arc::clone(&created);
            std::thread::spawn(move || {
                let first = reg.get_cur_task_badge(true).expect("auto-enclosed");
                let again = reg.get_cur_task_badge(true).expect("same wrapper");
                assert_eq!(first.id(), again.id());
                assert!(first.is_auto_enclosed());
                created.fetch_add(1, Ordering::SeqCst);
                first.id()
            })
        })
        .collect();

    let mut ids: Vec<TaskId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    assert_eq!(created.load(Ordering::SeqCst), 4);

    // wrappers of exited threads are swept
    assert_eq!(reg.remove_cleaned_up_entries(), 4);
    assert_eq!(reg.len(), 1);
}

#[test]
fn lookup_without_enclosure_does_not_register() {
    let reg = registry();
    let handle = {
        let reg = Arc::clone(&reg);
        std::thread::spawn(move || reg.get_cur_task_badge(false))
    };
    assert!(handle.join().unwrap().is_none());
    assert_eq!(reg.len(), 1);
}

#[test]
fn mass_stop_runs_newest_first() {
    let reg = registry();
    let order = Arc::new(StopOrder::default());

    let ids: Vec<TaskId> = (0..5)
        .map(|i| {
            reg.create_task(
                looping(),
                TaskProfile::xtask()
                    .with_name(format!("w{i}"))
                    .with_observer(order.clone()),
                true,
            )
            .unwrap()
        })
        .collect();

    // punch holes into the id sequence
    assert!(reg.stop_task(ids[1], false, true, true));
    assert!(reg.stop_task(ids[3], false, true, true));
    order.seen.lock().clear();

    assert!(reg.stop_all_tasks(true, false, &[]).is_none());
    assert_eq!(*order.seen.lock(), vec![ids[4], ids[2], ids[0]]);
    assert_eq!(reg.len(), 1);
}

#[test]
fn skipped_tasks_survive_mass_stop() {
    let reg = registry();
    let keep = reg.create_task(looping(), TaskProfile::xtask(), true).unwrap();
    let drop_me = reg.create_task(looping(), TaskProfile::xtask(), true).unwrap();

    assert!(reg.stop_all_tasks(true, false, &[keep]).is_none());
    assert!(reg.get_task(drop_me).is_none());
    assert_eq!(reg.get_task_state(keep), Some(TaskState::Running));

    assert!(reg.stop_task(keep, false, true, true));
}

#[test]
fn failed_task_error_outlives_its_entry() {
    let reg = registry();
    let id = reg
        .create_thread(
            |_ctx: &TaskContext| Err(TaskError::fatal(42, "no disk")),
            TaskProfile::xtask(),
            true,
        )
        .unwrap();

    assert!(reg.join_task(id, Some(Duration::from_secs(1)), true, None));
    assert_eq!(reg.get_task_state(id), Some(TaskState::Failed));
    assert!(reg.stop_task(id, false, true, true));

    assert!(reg.get_task(id).is_none());
    assert_eq!(reg.get_task_error(id), Some(TaskError::fatal(42, "no disk")));
}

#[test]
fn attached_thread_polls_for_stop_and_detaches() {
    let reg = registry();
    let (tx, rx) = std::sync::mpsc::channel();

    let worker = {
        let reg = Arc::clone(&reg);
        std::thread::spawn(move || {
            let ctx = reg
                .attach_current_thread(TaskProfile::xtask().with_name("driver"))
                .unwrap();
            tx.send(ctx.id()).unwrap();
            while !ctx.wait_for_stop(Duration::from_millis(5)) {}
            reg.detach_task(ctx.id())
        })
    };

    let id = rx.recv().unwrap();
    assert_eq!(reg.get_task_state(id), Some(TaskState::Running));
    assert!(reg.stop_task(id, false, false, true));
    assert!(worker.join().unwrap());
    assert!(reg.get_task("driver").is_none());
}
