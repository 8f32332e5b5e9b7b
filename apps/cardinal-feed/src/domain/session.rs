//! Stream Session State
//!
//! The lifecycle of one exchange streaming connection as an explicit state
//! machine. Transitions not listed in [`SessionState::can_transition_to`]
//! are rejected by the session.
//!
//! ```text
//! Disconnected ──► Authenticating ──► Connected ──► Degraded ──► Closed
//!      │                 │               ▲  │                      │
//!      │                 └─(dial error)──┼──┼──► Disconnected      │
//!      └─────────────────────────────────┘  └──────► Closed        │
//!      ▲                                                           │
//!      └─────────────────────── (reconnect) ───────────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Current state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No connection; initial state.
    #[default]
    Disconnected,
    /// Acquiring a listen key for an authenticated stream.
    Authenticating,
    /// Connection established, read loop running.
    Connected,
    /// A liveness or connection failure was detected; shutting down.
    Degraded,
    /// All background tasks stopped.
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Disconnected,
                Self::Authenticating | Self::Connected | Self::Closed
            ) | (
                Self::Authenticating,
                Self::Connected | Self::Disconnected | Self::Closed
            ) | (Self::Connected, Self::Degraded | Self::Closed)
                | (Self::Degraded | Self::Closed, Self::Closed)
                | (Self::Closed, Self::Disconnected)
        )
    }

    /// Whether the session currently owns a live connection or is acquiring one.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Authenticating | Self::Connected | Self::Degraded)
    }

    /// Whether `connect` may be called from this state.
    #[must_use]
    pub const fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Closed)
    }

    /// Lower-case state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }

    /// Numeric value used for the session state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Authenticating => 1.0,
            Self::Connected => 2.0,
            Self::Degraded => 3.0,
            Self::Closed => 4.0,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session's read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// Closed on request of the owner.
    Cancelled,
    /// The peer closed the connection or the transport failed.
    ConnectionLost(String),
    /// A liveness probe could not be answered in time, or the peer went silent.
    LivenessTimeout(Duration),
    /// The bus consumer dropped its reader.
    ConsumerGone,
}

impl SessionExit {
    /// Whether the exit was caused by a failure (as opposed to a requested close).
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Short label used as a metric dimension.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::ConnectionLost(_) => "connection_lost",
            Self::LivenessTimeout(_) => "liveness_timeout",
            Self::ConsumerGone => "consumer_gone",
        }
    }
}

impl fmt::Display for SessionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::ConnectionLost(reason) => write!(f, "connection lost: {reason}"),
            Self::LivenessTimeout(after) => write!(f, "liveness timeout after {after:?}"),
            Self::ConsumerGone => f.write_str("bus consumer gone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 5] = [
        SessionState::Disconnected,
        SessionState::Authenticating,
        SessionState::Connected,
        SessionState::Degraded,
        SessionState::Closed,
    ];

    #[test]
    fn happy_path_transitions_are_legal() {
        use SessionState::{Authenticating, Closed, Connected, Degraded, Disconnected};
        assert!(Disconnected.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Disconnected));
    }

    #[test]
    fn auth_is_skipped_for_public_streams() {
        assert!(SessionState::Disconnected.can_transition_to(SessionState::Connected));
    }

    #[test]
    fn read_loop_cannot_start_from_disconnected_states() {
        assert!(!SessionState::Disconnected.can_transition_to(SessionState::Degraded));
        assert!(!SessionState::Closed.can_transition_to(SessionState::Connected));
        assert!(!SessionState::Degraded.can_transition_to(SessionState::Connected));
    }

    #[test]
    fn every_state_can_reach_closed() {
        for state in ALL {
            assert!(
                state.can_transition_to(SessionState::Closed),
                "{state} cannot close"
            );
        }
    }

    #[test]
    fn connect_allowed_only_when_idle() {
        let allowed: Vec<_> = ALL.into_iter().filter(|s| s.can_connect()).collect();
        assert_eq!(
            allowed,
            vec![SessionState::Disconnected, SessionState::Closed]
        );
    }

    #[test]
    fn exit_failure_classification() {
        assert!(!SessionExit::Cancelled.is_failure());
        assert!(SessionExit::ConnectionLost("eof".into()).is_failure());
        assert!(SessionExit::LivenessTimeout(Duration::from_secs(1)).is_failure());
        assert!(SessionExit::ConsumerGone.is_failure());
    }

    #[test]
    fn exit_labels() {
        assert_eq!(SessionExit::Cancelled.label(), "cancelled");
        assert_eq!(
            SessionExit::ConnectionLost(String::new()).label(),
            "connection_lost"
        );
        assert_eq!(SessionExit::ConsumerGone.label(), "consumer_gone");
    }
}
