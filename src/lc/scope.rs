//! # Lifecycle scope and the dependency manager.
//!
//! ```text
//!   Idle ◄──► PreIpc ◄──► SemiIpc ◄──► FullIpc
//!                           ▲
//!                           └── task registry becomes available here
//! ```
//!
//! ### Rules
//! - Scope moves exactly one step per update, never skipping an intermediate value.
//! - A same-scope update is a finalize/reinject call and is accepted.

use std::fmt;

use parking_lot::Mutex;

use crate::logif::vlog_error;

/// Escalation level of subsystem activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LcScope {
    Idle = 0,
    /// Single-threaded mode: no task registry.
    PreIpc = 1,
    /// Task registry available.
    SemiIpc = 2,
    /// Framework main task running.
    FullIpc = 3,
}

impl LcScope {
    pub const fn value(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            LcScope::Idle => "Idle",
            LcScope::PreIpc => "PreIpc",
            LcScope::SemiIpc => "SemiIpc",
            LcScope::FullIpc => "FullIpc",
        }
    }
}

impl fmt::Display for LcScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded scope update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeUpdate {
    pub src: LcScope,
    pub dst: LcScope,
}

/// Tracks the current scope and the history of scope updates.
#[derive(Debug)]
pub struct DependencyManager {
    target: LcScope,
    inner: Mutex<ScopeTrack>,
}

#[derive(Debug)]
struct ScopeTrack {
    current: LcScope,
    history: Vec<ScopeUpdate>,
}

impl DependencyManager {
    pub fn new(target: LcScope) -> Self {
        Self {
            target,
            inner: Mutex::new(ScopeTrack {
                current: LcScope::Idle,
                history: Vec::new(),
            }),
        }
    }

    pub fn target(&self) -> LcScope {
        self.target
    }

    pub fn current(&self) -> LcScope {
        self.inner.lock().current
    }

    /// Moves the scope from `src` to `dst`.
    ///
    /// Returns `false` (and changes nothing) if `src` is not the current scope
    /// or the update would skip a scope.
    pub fn update_scope(&self, src: LcScope, dst: LcScope) -> bool {
        let mut track = self.inner.lock();
        if track.current != src {
            vlog_error!(
                3101,
                current = %track.current,
                %src,
                %dst,
                "scope update from a scope that is not current"
            );
            return false;
        }
        if src.value().abs_diff(dst.value()) > 1 {
            vlog_error!(3102, %src, %dst, "scope update skips an intermediate scope");
            return false;
        }
        track.current = dst;
        track.history.push(ScopeUpdate { src, dst });
        true
    }

    /// All updates applied so far.
    pub fn history(&self) -> Vec<ScopeUpdate> {
        self.inner.lock().history.clone()
    }
}
