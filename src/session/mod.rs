//! Hosted Session
//!
//! The authoritative session loop: a state machine over the waiting room and
//! the running match, the observable fields the view layer watches, and the
//! runner that ticks it.

pub mod observable;
pub mod runner;
pub mod state;

#[cfg(test)]
mod testing;

pub use observable::{SessionField, SessionObserver, SessionSnapshot, SubscriptionId};
pub use runner::SessionHandle;
pub use state::{HostSession, SessionError, SessionPhase, TickOutcome, Toggle};
