//! # Lifecycle components and the transition bit algebra.
//!
//! Pure mapping functions, no mutable state. A transition request names a
//! component group and a kind (start, stop, fail); [`to_bit_flags_pair`] turns
//! it into the bit to set and, for stop/fail, the `Started` bit that has to be
//! cleared in the same validated update.
//!
//! ## Bit layout
//! ```text
//! bit   0/1     LcStarted       / LcStopped
//! bit   2/3     TMgrStarted     / TMgrStopped
//! bit   4/5     FwCompStarted   / FwCompStopped
//! bit   6/7     FwMainStarted   / FwMainStopped
//! bit   8/9     XTaskStarted    / XTaskStopped
//! bit  10/11    MainXTaskStarted/ MainXTaskStopped
//! bit  12/13    MiscStarted     / MiscStopped
//! bit  16..=22  <Component>Failed (same order)
//! ```
//! Failure bits live above [`FAILURE_BASE`], so "any failure" is `mask >= FAILURE_BASE`.
//!
//! ### Rules
//! - `FwMain`/`MainXTask` share a group with `FwComponent`/`XTask` but own their bits.
//! - `LcMgr` and `TaskMgr` are singular groups.

use std::fmt;

use bitflags::bitflags;

/// Lowest failure bit.
pub const FAILURE_BASE: u32 = 1 << 16;

/// Lifecycle component identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LcComponent {
    /// The lifecycle manager itself.
    LcMgr,
    /// The task registry.
    TaskMgr,
    /// Any framework component or framework task.
    FwComponent,
    /// The framework main task.
    FwMain,
    /// Any application task.
    XTask,
    /// The application main task.
    MainXTask,
    /// Anything else (foreign threads, helpers).
    MiscComponent,
}

/// Group a component belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LcGroup {
    Lc,
    TaskMgr,
    Fw,
    XTask,
    Misc,
}

impl LcComponent {
    pub const ALL: [LcComponent; 7] = [
        LcComponent::LcMgr,
        LcComponent::TaskMgr,
        LcComponent::FwComponent,
        LcComponent::FwMain,
        LcComponent::XTask,
        LcComponent::MainXTask,
        LcComponent::MiscComponent,
    ];

    pub const fn group(self) -> LcGroup {
        match self {
            LcComponent::LcMgr => LcGroup::Lc,
            LcComponent::TaskMgr => LcGroup::TaskMgr,
            LcComponent::FwComponent | LcComponent::FwMain => LcGroup::Fw,
            LcComponent::XTask | LcComponent::MainXTask => LcGroup::XTask,
            LcComponent::MiscComponent => LcGroup::Misc,
        }
    }

    /// Singular "main" component of a multi-member group.
    pub const fn is_main(self) -> bool {
        matches!(self, LcComponent::FwMain | LcComponent::MainXTask)
    }

    /// Failure of a core component forces a coordinated shutdown.
    pub const fn is_core(self) -> bool {
        matches!(
            self,
            LcComponent::LcMgr | LcComponent::TaskMgr | LcComponent::FwMain | LcComponent::MainXTask
        )
    }

    pub const fn started_bit(self) -> LcStateFlags {
        match self {
            LcComponent::LcMgr => LcStateFlags::LC_STARTED,
            LcComponent::TaskMgr => LcStateFlags::TMGR_STARTED,
            LcComponent::FwComponent => LcStateFlags::FW_COMP_STARTED,
            LcComponent::FwMain => LcStateFlags::FW_MAIN_STARTED,
            LcComponent::XTask => LcStateFlags::XTASK_STARTED,
            LcComponent::MainXTask => LcStateFlags::MAIN_XTASK_STARTED,
            LcComponent::MiscComponent => LcStateFlags::MISC_STARTED,
        }
    }

    pub const fn stopped_bit(self) -> LcStateFlags {
        match self {
            LcComponent::LcMgr => LcStateFlags::LC_STOPPED,
            LcComponent::TaskMgr => LcStateFlags::TMGR_STOPPED,
            LcComponent::FwComponent => LcStateFlags::FW_COMP_STOPPED,
            LcComponent::FwMain => LcStateFlags::FW_MAIN_STOPPED,
            LcComponent::XTask => LcStateFlags::XTASK_STOPPED,
            LcComponent::MainXTask => LcStateFlags::MAIN_XTASK_STOPPED,
            LcComponent::MiscComponent => LcStateFlags::MISC_STOPPED,
        }
    }

    pub const fn failed_bit(self) -> LcStateFlags {
        match self {
            LcComponent::LcMgr => LcStateFlags::LC_FAILED,
            LcComponent::TaskMgr => LcStateFlags::TMGR_FAILED,
            LcComponent::FwComponent => LcStateFlags::FW_COMP_FAILED,
            LcComponent::FwMain => LcStateFlags::FW_MAIN_FAILED,
            LcComponent::XTask => LcStateFlags::XTASK_FAILED,
            LcComponent::MainXTask => LcStateFlags::MAIN_XTASK_FAILED,
            LcComponent::MiscComponent => LcStateFlags::MISC_FAILED,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            LcComponent::LcMgr => "LcMgr",
            LcComponent::TaskMgr => "TaskMgr",
            LcComponent::FwComponent => "FwComponent",
            LcComponent::FwMain => "FwMain",
            LcComponent::XTask => "XTask",
            LcComponent::MainXTask => "MainXTask",
            LcComponent::MiscComponent => "MiscComponent",
        }
    }
}

impl fmt::Display for LcComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Composable lifecycle state: one bit per (component, transition) pair.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LcStateFlags: u32 {
        const LC_STARTED         = 1 << 0;
        const LC_STOPPED         = 1 << 1;
        const TMGR_STARTED       = 1 << 2;
        const TMGR_STOPPED       = 1 << 3;
        const FW_COMP_STARTED    = 1 << 4;
        const FW_COMP_STOPPED    = 1 << 5;
        const FW_MAIN_STARTED    = 1 << 6;
        const FW_MAIN_STOPPED    = 1 << 7;
        const XTASK_STARTED      = 1 << 8;
        const XTASK_STOPPED      = 1 << 9;
        const MAIN_XTASK_STARTED = 1 << 10;
        const MAIN_XTASK_STOPPED = 1 << 11;
        const MISC_STARTED       = 1 << 12;
        const MISC_STOPPED       = 1 << 13;

        const LC_FAILED          = 1 << 16;
        const TMGR_FAILED        = 1 << 17;
        const FW_COMP_FAILED     = 1 << 18;
        const FW_MAIN_FAILED     = 1 << 19;
        const XTASK_FAILED       = 1 << 20;
        const MAIN_XTASK_FAILED  = 1 << 21;
        const MISC_FAILED        = 1 << 22;
    }
}

const LABELS: [(LcStateFlags, &str); 21] = [
    (LcStateFlags::LC_STARTED, "LcStarted"),
    (LcStateFlags::LC_STOPPED, "LcStopped"),
    (LcStateFlags::TMGR_STARTED, "TMgrStarted"),
    (LcStateFlags::TMGR_STOPPED, "TMgrStopped"),
    (LcStateFlags::FW_COMP_STARTED, "FwCompStarted"),
    (LcStateFlags::FW_COMP_STOPPED, "FwCompStopped"),
    (LcStateFlags::FW_MAIN_STARTED, "FwMainStarted"),
    (LcStateFlags::FW_MAIN_STOPPED, "FwMainStopped"),
    (LcStateFlags::XTASK_STARTED, "XTaskStarted"),
    (LcStateFlags::XTASK_STOPPED, "XTaskStopped"),
    (LcStateFlags::MAIN_XTASK_STARTED, "MainXTaskStarted"),
    (LcStateFlags::MAIN_XTASK_STOPPED, "MainXTaskStopped"),
    (LcStateFlags::MISC_STARTED, "MiscStarted"),
    (LcStateFlags::MISC_STOPPED, "MiscStopped"),
    (LcStateFlags::LC_FAILED, "LcFailed"),
    (LcStateFlags::TMGR_FAILED, "TMgrFailed"),
    (LcStateFlags::FW_COMP_FAILED, "FwCompFailed"),
    (LcStateFlags::FW_MAIN_FAILED, "FwMainFailed"),
    (LcStateFlags::XTASK_FAILED, "XTaskFailed"),
    (LcStateFlags::MAIN_XTASK_FAILED, "MainXTaskFailed"),
    (LcStateFlags::MISC_FAILED, "MiscFailed"),
];

impl LcStateFlags {
    /// Any failure bit set.
    pub fn has_any_failure(self) -> bool {
        self.bits() >= FAILURE_BASE
    }

    /// Failure bits only.
    pub fn failures(self) -> LcStateFlags {
        LcStateFlags::from_bits_truncate(self.bits() & !(FAILURE_BASE - 1))
    }

    /// Components whose failure bit is set.
    pub fn failed_components(self) -> impl Iterator<Item = LcComponent> {
        LcComponent::ALL
            .into_iter()
            .filter(move |c| self.contains(c.failed_bit()))
    }

    /// Canonical rendering, e.g. `LcStarted|TMgrStarted`; `Idle` when empty.
    pub fn render(self) -> String {
        if self.is_empty() {
            return "Idle".to_string();
        }
        LABELS
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, label)| *label)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Kind of lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Start,
    Stop,
    Fail,
}

/// A (group, kind) transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionRequest {
    pub group: LcGroup,
    pub kind: TransitionKind,
}

/// Maps a component plus a start/stop/fail flag onto a request.
///
/// `Some(true)` is a start, `Some(false)` a stop, `None` a failure.
pub fn convert_from_component(component: LcComponent, start_stop: Option<bool>) -> TransitionRequest {
    let kind = match start_stop {
        Some(true) => TransitionKind::Start,
        Some(false) => TransitionKind::Stop,
        None => TransitionKind::Fail,
    };
    TransitionRequest {
        group: component.group(),
        kind,
    }
}

/// Returns the bit to set for `req` on behalf of `component`, plus the
/// `Started` bit to clear in the same update for stop/fail requests.
pub fn to_bit_flags_pair(
    req: TransitionRequest,
    component: LcComponent,
) -> (LcStateFlags, Option<LcStateFlags>) {
    match req.kind {
        TransitionKind::Start => (component.started_bit(), None),
        TransitionKind::Stop => (component.stopped_bit(), Some(component.started_bit())),
        TransitionKind::Fail => (component.failed_bit(), Some(component.started_bit())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_follows_flag() {
        let req = convert_from_component(LcComponent::FwMain, Some(true));
        assert_eq!(req.group, LcGroup::Fw);
        assert_eq!(req.kind, TransitionKind::Start);
        assert_eq!(
            convert_from_component(LcComponent::TaskMgr, Some(false)).kind,
            TransitionKind::Stop
        );
        assert_eq!(
            convert_from_component(LcComponent::XTask, None).kind,
            TransitionKind::Fail
        );
    }

    #[test]
    fn pairs_clear_started_bit_for_stop_and_fail() {
        let start = convert_from_component(LcComponent::MainXTask, Some(true));
        assert_eq!(
            to_bit_flags_pair(start, LcComponent::MainXTask),
            (LcStateFlags::MAIN_XTASK_STARTED, None)
        );

        let fail = convert_from_component(LcComponent::XTask, None);
        assert_eq!(
            to_bit_flags_pair(fail, LcComponent::XTask),
            (LcStateFlags::XTASK_FAILED, Some(LcStateFlags::XTASK_STARTED))
        );
        assert_eq!(
            to_bit_flags_pair(fail, LcComponent::MainXTask).0,
            LcStateFlags::MAIN_XTASK_FAILED
        );
    }

    #[test]
    fn failure_bits_sit_above_base() {
        for c in LcComponent::ALL {
            assert!(c.failed_bit().bits() >= FAILURE_BASE);
            assert!(c.started_bit().bits() < FAILURE_BASE);
            assert!(c.stopped_bit().bits() < FAILURE_BASE);
        }
        let mask = LcStateFlags::LC_STARTED | LcStateFlags::TMGR_FAILED;
        assert!(mask.has_any_failure());
        assert_eq!(mask.failures(), LcStateFlags::TMGR_FAILED);
        assert_eq!(mask.failed_components().collect::<Vec<_>>(), vec![LcComponent::TaskMgr]);
        assert!(!LcStateFlags::all().difference(LcStateFlags::all().failures()).has_any_failure());
    }

    #[test]
    fn render_is_canonical() {
        assert_eq!(LcStateFlags::empty().render(), "Idle");
        assert_eq!(
            (LcStateFlags::TMGR_STARTED | LcStateFlags::LC_STARTED).render(),
            "LcStarted|TMgrStarted"
        );
    }
}
