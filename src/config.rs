//! # Startup policy.
//!
//! Provides [`StartupPolicy`], the read-only configuration consumed by the
//! [`LcManager`](crate::LcManager) and (through [`RegistryConfig`]) by the
//! [`TaskRegistry`](crate::TaskRegistry).
//!
//! ## Sentinel values
//! - `shutdown_wait = 0s` → do not wait for tasks on a stop request
//! - `start_handoff_timeout = 0s` → wait for the worker handoff without bound
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

use crate::lc::LcScope;

/// Configuration of one framework instance.
///
/// ## Field semantics
/// - `target_scope`: highest lifecycle scope setup escalates to
/// - `release_mode`: drops debug-only details from the final summary
/// - `run_cycle`: cadence of the framework main task loop
/// - `terminal_mode`: an external join without a prior stop waits indefinitely
/// - `auto_stop`: an external join without a prior stop stops the framework
///   once no external task is outstanding
/// - `force_stop`: such a self-triggered stop cancels tasks instead of stopping them
/// - `shutdown_wait`: per-shutdown-request wait timespan
/// - `start_handoff_timeout`: bound on waiting for a new worker thread to begin running
/// - `bus_capacity`: event bus ring buffer size
#[derive(Clone, Debug)]
pub struct StartupPolicy {
    /// Configured scope ceiling.
    ///
    /// `PreIpc` runs without task registry (single-threaded mode), `SemiIpc`
    /// makes the task registry available, `FullIpc` additionally starts the
    /// framework main task.
    pub target_scope: LcScope,

    /// Release-mode flag.
    pub release_mode: bool,

    /// Loop cycle of the framework main task.
    pub run_cycle: Duration,

    /// Wait indefinitely in the pending-shutdown loop.
    pub terminal_mode: bool,

    /// Self-trigger stop in the pending-shutdown loop.
    pub auto_stop: bool,

    /// Self-triggered stops are forced (cancel requests).
    pub force_stop: bool,

    /// Per-shutdown-request wait timespan.
    ///
    /// Bounds the synchronous wait of a stop request for the task to finish and
    /// each sequential join of the final join.
    pub shutdown_wait: Duration,

    /// Bound on the start handoff with a new worker thread.
    pub start_handoff_timeout: Duration,

    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
}

impl StartupPolicy {
    /// Returns the shutdown wait as an `Option` (`None` = do not wait).
    #[inline]
    pub fn shutdown_wait_opt(&self) -> Option<Duration> {
        if self.shutdown_wait == Duration::ZERO {
            None
        } else {
            Some(self.shutdown_wait)
        }
    }

    /// Returns the start handoff bound as an `Option` (`None` = unbounded).
    #[inline]
    pub fn start_handoff_opt(&self) -> Option<Duration> {
        if self.start_handoff_timeout == Duration::ZERO {
            None
        } else {
            Some(self.start_handoff_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the registry slice of this policy.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            start_handoff: self.start_handoff_opt(),
            stop_wait: self.shutdown_wait_opt(),
        }
    }

    /// Returns a policy targeting `scope` with all other fields defaulted.
    pub fn with_target(scope: LcScope) -> Self {
        Self {
            target_scope: scope,
            ..Self::default()
        }
    }
}

impl Default for StartupPolicy {
    /// Default policy:
    ///
    /// - `target_scope = FullIpc`
    /// - `run_cycle = 50ms`
    /// - `auto_stop = true`, `terminal_mode = false`, `force_stop = false`
    /// - `shutdown_wait = 5s`, `start_handoff_timeout = 5s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            target_scope: LcScope::FullIpc,
            release_mode: false,
            run_cycle: Duration::from_millis(50),
            terminal_mode: false,
            auto_stop: true,
            force_stop: false,
            shutdown_wait: Duration::from_secs(5),
            start_handoff_timeout: Duration::from_secs(5),
            bus_capacity: 1024,
        }
    }
}

/// Registry settings derived from [`StartupPolicy`].
///
/// The registry is usable standalone (without lifecycle manager) with
/// `RegistryConfig::default()`.
#[derive(Clone, Copy, Debug)]
pub struct RegistryConfig {
    /// Bound on waiting for a worker thread to begin running (`None` = unbounded).
    pub start_handoff: Option<Duration>,
    /// Bound on the synchronous part of a stop request (`None` = no wait).
    pub stop_wait: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        StartupPolicy::default().registry_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sentinels_map_to_none() {
        let policy = StartupPolicy {
            shutdown_wait: Duration::ZERO,
            start_handoff_timeout: Duration::ZERO,
            bus_capacity: 0,
            ..StartupPolicy::default()
        };
        assert_eq!(policy.shutdown_wait_opt(), None);
        assert_eq!(policy.start_handoff_opt(), None);
        assert_eq!(policy.bus_capacity_clamped(), 1);

        let reg = policy.registry_config();
        assert!(reg.start_handoff.is_none());
        assert!(reg.stop_wait.is_none());
    }

    #[test]
    fn defaults_target_full_ipc() {
        let policy = StartupPolicy::default();
        assert_eq!(policy.target_scope, LcScope::FullIpc);
        assert!(policy.auto_stop);
        assert_eq!(
            StartupPolicy::with_target(LcScope::PreIpc).target_scope,
            LcScope::PreIpc
        );
    }
}
