//! # Event subscribers.
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   publisher ── publish(Event) ──► Bus ──► lc-events listener ──► SubscriberSet
//!                                                                    │
//!                                                    ┌───────────────┼──────────┐
//!                                                    ▼               ▼          ▼
//!                                                LogWriter        Metrics     Custom
//! ```
//!
//! Subscribers are registered on the [`LcManagerBuilder`](crate::LcManagerBuilder).

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub(crate) use set::panic_info;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
