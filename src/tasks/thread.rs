//! # Thread identity.
//!
//! Every thread that touches the framework gets a process-unique [`ThreadUid`],
//! stored in a thread-local slot. The uid is independent of the OS thread id.
//!
//! - Foreign threads get a uid lazily on first [`ThreadUid::current`].
//! - Worker threads spawned by the registry get a uid **before** they exist
//!   ([`ThreadUid::allocate`]) so the task badge is complete at creation time;
//!   the worker adopts it as the first thing it does.
//!
//! The slot owns a [`ThreadLiveness`] flag. When the thread exits, the slot's
//! `Drop` marks the flag terminated, which lets the registry sweep
//! auto-enclosed entries of threads that vanished without detaching.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_THREAD_UID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<ThreadSlot>> = const { RefCell::new(None) };
}

/// Unique identifier of a worker or enclosed thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadUid(u64);

impl ThreadUid {
    /// Returns the uid of the calling thread, assigning one if needed.
    pub fn current() -> ThreadUid {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            slot.get_or_insert_with(|| ThreadSlot::new(ThreadUid::allocate()))
                .uid
        })
    }

    /// Reserves a fresh uid for a thread that is about to be spawned.
    pub(crate) fn allocate() -> ThreadUid {
        ThreadUid(NEXT_THREAD_UID.fetch_add(1, Ordering::Relaxed))
    }

    /// Binds a reserved uid to the calling thread.
    ///
    /// Returns `false` if the thread already had a uid; the existing one is kept.
    pub(crate) fn adopt(uid: ThreadUid) -> bool {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_some() {
                return false;
            }
            *slot = Some(ThreadSlot::new(uid));
            true
        })
    }

    /// Liveness flag of the calling thread.
    pub(crate) fn current_liveness() -> Arc<ThreadLiveness> {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            Arc::clone(
                &slot
                    .get_or_insert_with(|| ThreadSlot::new(ThreadUid::allocate()))
                    .liveness,
            )
        })
    }

    /// Raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TH#{}", self.0)
    }
}

/// Whether a thread is still alive.
#[derive(Debug)]
pub(crate) struct ThreadLiveness {
    running: AtomicBool,
}

impl ThreadLiveness {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn mark_terminated(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

struct ThreadSlot {
    uid: ThreadUid,
    liveness: Arc<ThreadLiveness>,
}

impl ThreadSlot {
    fn new(uid: ThreadUid) -> Self {
        Self {
            uid,
            liveness: Arc::new(ThreadLiveness::new()),
        }
    }
}

impl Drop for ThreadSlot {
    fn drop(&mut self) {
        self.liveness.mark_terminated();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_stable_per_thread() {
        let a = ThreadUid::current();
        let b = ThreadUid::current();
        assert_eq!(a, b);

        let other = std::thread::spawn(ThreadUid::current).join().expect("thread");
        assert_ne!(a, other);
    }

    #[test]
    fn spawned_thread_adopts_reserved_uid() {
        let reserved = ThreadUid::allocate();
        let seen = std::thread::spawn(move || {
            assert!(ThreadUid::adopt(reserved));
            assert!(!ThreadUid::adopt(ThreadUid::allocate()));
            ThreadUid::current()
        })
        .join()
        .expect("thread");
        assert_eq!(seen, reserved);
    }

    #[test]
    fn liveness_flips_when_thread_exits() {
        let liveness = std::thread::spawn(ThreadUid::current_liveness)
            .join()
            .expect("thread");
        assert!(!liveness.is_running());
        assert!(ThreadUid::current_liveness().is_running());
    }
}
