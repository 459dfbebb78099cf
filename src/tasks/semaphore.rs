//! Binary handoff semaphore.
//!
//! Used between a caller and a freshly spawned worker ("did the thread begin
//! running?") and between the lifecycle manager and its guard thread.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A semaphore with at most one permit.
#[derive(Debug, Default)]
pub struct BinarySemaphore {
    permit: Mutex<bool>,
    cv: Condvar,
}

impl BinarySemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the permit available; extra releases collapse into one.
    pub fn release(&self) {
        let mut permit = self.permit.lock();
        *permit = true;
        self.cv.notify_one();
    }

    /// Takes the permit, waiting at most `timeout` (`None` = unbounded).
    ///
    /// Returns `false` on timeout.
    pub fn acquire_timeout(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut permit = self.permit.lock();
        while !*permit {
            match deadline {
                Some(d) => {
                    if self.cv.wait_until(&mut permit, d).timed_out() && !*permit {
                        return false;
                    }
                }
                None => self.cv.wait(&mut permit),
            }
        }
        *permit = false;
        true
    }

    /// Takes the permit without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut permit = self.permit.lock();
        std::mem::replace(&mut *permit, false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn handoff_between_threads() {
        let sem = Arc::new(BinarySemaphore::new());
        let s = Arc::clone(&sem);
        let h = std::thread::spawn(move || s.release());
        assert!(sem.acquire_timeout(Some(Duration::from_secs(5))));
        h.join().expect("thread");
    }

    #[test]
    fn times_out_without_permit() {
        let sem = BinarySemaphore::new();
        assert!(!sem.acquire_timeout(Some(Duration::from_millis(10))));
        sem.release();
        sem.release();
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
    }
}
