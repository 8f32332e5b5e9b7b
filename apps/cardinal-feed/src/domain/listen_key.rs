//! Listen Keys
//!
//! A listen key is a short-lived capability token that opens an
//! authenticated stream. The `Debug` and `Display` implementations redact
//! the value for safe logging.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// An acquired listen key.
#[derive(Clone, PartialEq, Eq)]
pub struct ListenKey {
    value: String,
    acquired_at: DateTime<Utc>,
}

impl ListenKey {
    /// Create a listen key acquired now.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self::acquired_at(value, Utc::now())
    }

    /// Create a listen key with an explicit acquisition time.
    #[must_use]
    pub fn acquired_at(value: impl Into<String>, acquired_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            acquired_at,
        }
    }

    /// The token value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// When the key was acquired.
    #[must_use]
    pub const fn acquired(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Time elapsed since acquisition.
    #[must_use]
    pub fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at).to_std().unwrap_or_default()
    }

    /// Whether `validity` has elapsed since acquisition.
    #[must_use]
    pub fn is_expired(&self, validity: Duration) -> bool {
        self.age() > validity
    }

    fn redacted(&self) -> String {
        let prefix: String = self.value.chars().take(4).collect();
        format!("{prefix}…")
    }
}

impl std::fmt::Debug for ListenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenKey")
            .field("value", &self.redacted())
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl std::fmt::Display for ListenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ListenKey({})", self.redacted())
    }
}
