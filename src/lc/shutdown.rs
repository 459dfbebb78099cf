//! Stop/join request bookkeeping of the lifecycle manager.
//!
//! Kept behind its own lock so that checking "was a stop requested" never
//! contends with the manager's API lock.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Who issued a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOrigin {
    /// The framework itself (pending-shutdown loop, failure, task request, interrupt).
    Internal,
    /// Application code.
    External,
}

/// First accepted stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopRecord {
    pub origin: StopOrigin,
    /// Tasks are cancelled instead of stopped.
    pub forced: bool,
    /// Self-triggered by the pending-shutdown loop.
    pub auto: bool,
}

#[derive(Debug, Default)]
struct Requests {
    stop: Option<StopRecord>,
    join: bool,
}

#[derive(Debug, Default)]
pub struct ShutdownRequest {
    ld: Mutex<Requests>,
    cv: Condvar,
}

impl ShutdownRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `rec` if no stop was submitted yet.
    ///
    /// Returns the already recorded stop otherwise.
    pub fn submit_stop(&self, rec: StopRecord) -> Result<(), StopRecord> {
        let mut ld = self.ld.lock();
        if let Some(prev) = ld.stop {
            return Err(prev);
        }
        ld.stop = Some(rec);
        self.cv.notify_all();
        Ok(())
    }

    /// Records a join request; `false` if one was already submitted.
    pub fn submit_join(&self) -> bool {
        let mut ld = self.ld.lock();
        !std::mem::replace(&mut ld.join, true)
    }

    pub fn stop_record(&self) -> Option<StopRecord> {
        self.ld.lock().stop
    }

    pub fn is_stop_requested(&self) -> bool {
        self.ld.lock().stop.is_some()
    }

    pub fn is_join_requested(&self) -> bool {
        self.ld.lock().join
    }

    /// Blocks up to `timeout` for a stop request.
    pub fn wait_stop(&self, timeout: Duration) -> bool {
        let mut ld = self.ld.lock();
        let _ = self.cv.wait_while_for(&mut ld, |r| r.stop.is_none(), timeout);
        ld.stop.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_stop_wins() {
        let sr = ShutdownRequest::new();
        let ext = StopRecord {
            origin: StopOrigin::External,
            forced: false,
            auto: false,
        };
        let int = StopRecord {
            origin: StopOrigin::Internal,
            forced: true,
            auto: true,
        };
        assert!(!sr.wait_stop(Duration::from_millis(1)));
        assert_eq!(sr.submit_stop(ext), Ok(()));
        assert_eq!(sr.submit_stop(int), Err(ext));
        assert_eq!(sr.stop_record(), Some(ext));

        assert!(sr.submit_join());
        assert!(!sr.submit_join());
        assert!(sr.is_join_requested());
    }
}
