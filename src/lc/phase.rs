//! # Execution phases of the lifecycle manager.
//!
//! Phases are flags that accumulate; "have we ever reached X" stays answerable
//! after a later phase was rolled back. The log counts every addition so that
//! "phase X was entered exactly once" can be checked.

use std::fmt;

use bitflags::bitflags;
use parking_lot::Mutex;

bitflags! {
    /// Coarse phases of one framework instance.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExecPhase: u16 {
        const PRE_CONFIG   = 1 << 0;
        const CONFIG       = 1 << 1;
        const SEMI_BOOST   = 1 << 2;
        const FULL_BOOST   = 1 << 3;
        const CUSTOM_SETUP = 1 << 4;
        const SETUP_PASSED = 1 << 5;
        const RUNTIME      = 1 << 6;
        const JOIN         = 1 << 7;
        const STOP         = 1 << 8;
        const SHUTDOWN     = 1 << 9;
        const STOP_PASSED  = 1 << 10;
        const JOIN_PASSED  = 1 << 11;
    }
}

impl fmt::Display for ExecPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

/// Accumulated phase flags plus the log of additions.
#[derive(Debug, Default)]
pub struct ExecutionHistory {
    inner: Mutex<HistoryInner>,
}

#[derive(Debug, Default)]
struct HistoryInner {
    flags: ExecPhase,
    log: Vec<ExecPhase>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `phase`; returns `false` if it was already present.
    pub fn add(&self, phase: ExecPhase) -> bool {
        let mut inner = self.inner.lock();
        if inner.flags.contains(phase) {
            return false;
        }
        inner.flags.insert(phase);
        inner.log.push(phase);
        true
    }

    /// Rolls `phase` back (failure-unwind paths only).
    pub fn remove(&self, phase: ExecPhase) {
        self.inner.lock().flags.remove(phase);
    }

    pub fn has(&self, phase: ExecPhase) -> bool {
        self.inner.lock().flags.contains(phase)
    }

    pub fn has_passed_setup_phase(&self) -> bool {
        self.has(ExecPhase::SETUP_PASSED)
    }

    /// How often `phase` was added over the whole lifetime.
    pub fn addition_count(&self, phase: ExecPhase) -> usize {
        self.inner.lock().log.iter().filter(|p| **p == phase).count()
    }

    pub fn current(&self) -> ExecPhase {
        self.inner.lock().flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn additions_are_counted_once() {
        let h = ExecutionHistory::new();
        assert!(h.add(ExecPhase::STOP));
        assert!(!h.add(ExecPhase::STOP));
        assert_eq!(h.addition_count(ExecPhase::STOP), 1);
    }

    #[test]
    fn rollback_keeps_log() {
        let h = ExecutionHistory::new();
        h.add(ExecPhase::FULL_BOOST);
        h.remove(ExecPhase::FULL_BOOST);
        assert!(!h.has(ExecPhase::FULL_BOOST));
        assert!(h.add(ExecPhase::FULL_BOOST));
        assert_eq!(h.addition_count(ExecPhase::FULL_BOOST), 2);
    }
}
