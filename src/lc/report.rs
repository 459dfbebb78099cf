//! One-time pass/fail summary printed when the framework finished.

use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;

use crate::lc::{ExecPhase, LcState};

/// Prints the final summary at most once.
#[derive(Debug, Default)]
pub struct FinalReport {
    printed: AtomicBool,
}

impl FinalReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_printed(&self) -> bool {
        self.printed.load(Ordering::SeqCst)
    }

    /// Prints the summary unless it was printed before; returns whether it printed.
    pub fn print_once(&self, state: &LcState, phase: ExecPhase, release_mode: bool) -> bool {
        if self.printed.swap(true, Ordering::SeqCst) {
            return false;
        }
        println!("{}", render(state, phase, release_mode));
        true
    }
}

/// Renders the summary.
///
/// Failed runs list every failure record: component, short message, unique id
/// and error code. `release_mode` leaves out the phase trail.
pub fn render(state: &LcState, phase: ExecPhase, release_mode: bool) -> String {
    let failed = state.has_lc_any_failure_state();
    let verdict = if failed {
        "FAILED".red().bold()
    } else {
        "PASSED".green().bold()
    };

    let mut out = format!("[taskmgr] lifecycle {verdict}: {}", state.to_state_string());
    if !release_mode {
        out.push_str(&format!("\n  phases: {phase}"));
    }
    for rec in state.failure_records() {
        out.push_str(&format!(
            "\n  {} {} {} (uid={}, code={})",
            "✗".red(),
            rec.component.to_string().yellow(),
            rec.error.short_msg(),
            rec.error.unique_id(),
            rec.error.code(),
        ));
        if let (false, Some(name)) = (release_mode, rec.task_name.as_deref()) {
            out.push_str(&format!(" task={name}"));
        }
    }
    out
}
