//! # Diagnostic channels.
//!
//! Two independently classified log channels sit on top of [`tracing`]:
//!
//! ```text
//!   logif   (target = "taskmgr::logif")   expected operational conditions:
//!                                          user errors, fatal errors, warnings, info
//!   vlogif  (target = "taskmgr::vlogif")  internal-consistency violations:
//!                                          conditions that indicate a framework bug
//! ```
//!
//! Every call site passes a distinct numeric `code`. The code only exists for
//! traceability of a message back to its origin; nothing branches on it.
//!
//! The crate never installs a subscriber. Filter with e.g.
//! `RUST_LOG=taskmgr::vlogif=error,taskmgr::logif=warn`.

/// Caller supplied an inapplicable request.
macro_rules! log_user_error {
    ($code:expr, $($arg:tt)+) => {
        ::tracing::warn!(target: "taskmgr::logif", code = $code, kind = "user_error", $($arg)+)
    };
}

/// Operational error without lifecycle impact.
macro_rules! log_error {
    ($code:expr, $($arg:tt)+) => {
        ::tracing::error!(target: "taskmgr::logif", code = $code, kind = "error", $($arg)+)
    };
}

/// Fatal error that is (or is about to be) recorded as a failure.
macro_rules! log_fatal {
    ($code:expr, $($arg:tt)+) => {
        ::tracing::error!(target: "taskmgr::logif", code = $code, kind = "fatal", $($arg)+)
    };
}

macro_rules! log_warning {
    ($code:expr, $($arg:tt)+) => {
        ::tracing::warn!(target: "taskmgr::logif", code = $code, $($arg)+)
    };
}

macro_rules! log_info {
    ($code:expr, $($arg:tt)+) => {
        ::tracing::info!(target: "taskmgr::logif", code = $code, $($arg)+)
    };
}

macro_rules! log_debug {
    ($code:expr, $($arg:tt)+) => {
        ::tracing::debug!(target: "taskmgr::logif", code = $code, $($arg)+)
    };
}

/// Internal-consistency violation (framework bug), non-recoverable for the
/// operation in progress.
macro_rules! vlog_fatal {
    ($code:expr, $($arg:tt)+) => {
        ::tracing::error!(target: "taskmgr::vlogif", code = $code, kind = "fatal", $($arg)+)
    };
}

/// Internal-consistency violation that the caller can tolerate.
macro_rules! vlog_error {
    ($code:expr, $($arg:tt)+) => {
        ::tracing::error!(target: "taskmgr::vlogif", code = $code, kind = "error", $($arg)+)
    };
}

pub(crate) use {
    log_debug, log_error, log_fatal, log_info, log_user_error, log_warning, vlog_error,
    vlog_fatal,
};
