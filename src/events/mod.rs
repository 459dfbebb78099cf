//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `TaskRegistry`, task worker threads, `LcState`, `LcManager`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the lifecycle manager's event listener thread, which fans
//!   out to the [`SubscriberSet`](crate::SubscriberSet).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
