//! # Task profiles.
//!
//! A [`TaskProfile`] bundles everything the registry needs to create a task
//! besides its body: kind, optional name, thread binding, delayed start,
//! rights and an optional [`TaskObserver`].
//!
//! Application code builds profiles of the application kinds
//! ([`TaskProfile::xtask`], [`TaskProfile::main_xtask`]). Framework kinds are
//! only issued by the framework itself; a profile naming a framework kind from
//! outside is rejected as foreign.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use taskmgr::TaskProfile;
//!
//! let profile = TaskProfile::xtask()
//!     .with_name("poller")
//!     .with_delayed_start(Duration::from_millis(20));
//! assert!(profile.validate().is_ok());
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProfileError;
use crate::tasks::{TaskKind, TaskObserver, TaskRights};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfileOrigin {
    Framework,
    Application,
}

/// Creation parameters of a task.
#[derive(Clone)]
pub struct TaskProfile {
    name: Option<Arc<str>>,
    kind: TaskKind,
    enclosing: bool,
    delayed_start: Option<Duration>,
    rights: TaskRights,
    observer: Option<Arc<dyn TaskObserver>>,
    origin: ProfileOrigin,
}

impl fmt::Debug for TaskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskProfile")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("enclosing", &self.enclosing)
            .field("delayed_start", &self.delayed_start)
            .field("rights", &self.rights)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl TaskProfile {
    /// Profile of the given kind, issued by application code.
    pub fn new(kind: TaskKind) -> Self {
        Self {
            name: None,
            kind,
            enclosing: false,
            delayed_start: None,
            rights: TaskRights::default(),
            observer: None,
            origin: ProfileOrigin::Application,
        }
    }

    /// General application task.
    pub fn xtask() -> Self {
        Self::new(TaskKind::XTask)
    }

    /// Application main task.
    pub fn main_xtask() -> Self {
        Self::new(TaskKind::MainXTask)
    }

    pub(crate) fn framework(kind: TaskKind) -> Self {
        Self {
            origin: ProfileOrigin::Framework,
            ..Self::new(kind)
        }
    }

    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Runs the task in-line on the creating thread when started.
    pub fn with_enclosing_thread(mut self, enclosing: bool) -> Self {
        self.enclosing = enclosing;
        self
    }

    pub fn with_delayed_start(mut self, delay: Duration) -> Self {
        self.delayed_start = Some(delay);
        self
    }

    pub fn with_rights(mut self, rights: TaskRights) -> Self {
        self.rights = rights;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn is_enclosing(&self) -> bool {
        self.enclosing
    }

    pub fn delayed_start(&self) -> Option<Duration> {
        self.delayed_start
    }

    pub fn rights(&self) -> TaskRights {
        self.rights
    }

    pub(crate) fn observer(&self) -> Option<Arc<dyn TaskObserver>> {
        self.observer.clone()
    }

    /// Checks the profile before any side effect.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ProfileError::EmptyName);
        }
        if self.kind.is_framework() {
            if self.origin != ProfileOrigin::Framework {
                return Err(ProfileError::Foreign {
                    kind: self.kind.as_str(),
                });
            }
            if self.enclosing {
                return Err(ProfileError::EnclosingFrameworkTask);
            }
        }
        if self.enclosing && self.delayed_start.is_some() {
            return Err(ProfileError::DelayedEnclosing);
        }
        Ok(())
    }

    /// Name to use, generating `<Kind>_<seq>` when none was given.
    pub(crate) fn resolve_name(&self, seq: u32) -> Arc<str> {
        match &self.name {
            Some(n) => Arc::clone(n),
            None => Arc::from(format!("{}_{seq:03}", self.kind.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_profiles() {
        assert_eq!(
            TaskProfile::xtask().with_name(" ").validate(),
            Err(ProfileError::EmptyName)
        );
        assert_eq!(
            TaskProfile::xtask()
                .with_enclosing_thread(true)
                .with_delayed_start(Duration::from_millis(5))
                .validate(),
            Err(ProfileError::DelayedEnclosing)
        );
        assert!(matches!(
            TaskProfile::new(TaskKind::FwTask).validate(),
            Err(ProfileError::Foreign { kind: "FwTask" })
        ));
        assert_eq!(
            TaskProfile::framework(TaskKind::FwTask)
                .with_enclosing_thread(true)
                .validate(),
            Err(ProfileError::EnclosingFrameworkTask)
        );
        assert!(TaskProfile::framework(TaskKind::FwMainTask).validate().is_ok());
    }

    #[test]
    fn generated_names_carry_kind() {
        assert_eq!(&*TaskProfile::main_xtask().resolve_name(4), "MainXTask_004");
        assert_eq!(&*TaskProfile::xtask().with_name("w").resolve_name(4), "w");
    }
}
