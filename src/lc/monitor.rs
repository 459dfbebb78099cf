//! # LcMonitor: wakeup source of the lifecycle guard.
//!
//! ```text
//! stop_fw()                    ──► enable_coordinated_shutdown ─┐
//! proxy: core failure          ──► request_failure_shutdown    ─┼─► guard: wait_for_wakeup
//! proxy: task shutdown request ──► request_task_stop(forced)   ─┤
//! signal watcher               ──► notify                      ─┘
//! ```
//!
//! Flags only ever go from unset to set, except the task stop request which
//! the guard consumes with [`take_task_stop`](LcMonitor::take_task_stop).

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSnapshot {
    /// Stop issued; the guard proceeds to halt the framework.
    pub coordinated_shutdown: bool,
    /// A core component failed.
    pub failure_shutdown: bool,
    /// A task asked for a framework stop (`Some(forced)`).
    pub task_stop: Option<bool>,
}

#[derive(Debug, Default)]
pub struct LcMonitor {
    flags: Mutex<MonitorSnapshot>,
    cv: Condvar,
}

impl LcMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_coordinated_shutdown(&self) {
        self.flags.lock().coordinated_shutdown = true;
        self.cv.notify_all();
    }

    pub fn is_coordinated_shutdown_enabled(&self) -> bool {
        self.flags.lock().coordinated_shutdown
    }

    pub fn request_failure_shutdown(&self) {
        self.flags.lock().failure_shutdown = true;
        self.cv.notify_all();
    }

    pub fn is_failure_shutdown_requested(&self) -> bool {
        self.flags.lock().failure_shutdown
    }

    /// Records a task's stop request; a forced request wins over a graceful one.
    pub fn request_task_stop(&self, forced: bool) {
        let mut flags = self.flags.lock();
        flags.task_stop = Some(flags.task_stop.unwrap_or(false) || forced);
        self.cv.notify_all();
    }

    pub fn take_task_stop(&self) -> Option<bool> {
        self.flags.lock().task_stop.take()
    }

    /// Wakes the guard without changing any flag.
    pub fn notify(&self) {
        self.cv.notify_all();
    }

    /// Blocks up to `timeout` for any flag to be set; returns the current flags.
    pub fn wait_for_wakeup(&self, timeout: Duration) -> MonitorSnapshot {
        let mut flags = self.flags.lock();
        let _ = self.cv.wait_while_for(
            &mut flags,
            |f| !f.coordinated_shutdown && !f.failure_shutdown && f.task_stop.is_none(),
            timeout,
        );
        *flags
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn wakeup_reports_flags() {
        let m = Arc::new(LcMonitor::new());
        assert_eq!(
            m.wait_for_wakeup(Duration::from_millis(5)),
            MonitorSnapshot::default()
        );

        let m2 = Arc::clone(&m);
        let h = std::thread::spawn(move || m2.request_task_stop(false));
        let snap = m.wait_for_wakeup(Duration::from_secs(5));
        h.join().unwrap();
        assert_eq!(snap.task_stop, Some(false));

        m.request_task_stop(true);
        m.request_task_stop(false);
        assert_eq!(m.take_task_stop(), Some(true));
        assert_eq!(m.take_task_stop(), None);
    }
}
