//! Reconnection
//!
//! Backoff policy and the supervisor loop that re-dials closed sessions.

mod policy;
mod supervisor;

pub use policy::{ReconnectConfig, ReconnectPolicy};
pub use supervisor::{ReconnectError, SessionSupervisor};
