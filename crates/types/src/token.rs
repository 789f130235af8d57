//! Access credential representation and refresh bookkeeping.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// A short-lived access credential derived from a refresh credential.
///
/// Credentials are never mutated in place; a refresh produces a new value
/// that supersedes the cached one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredential {
    pub value: String,
    /// Unix timestamp after which the credential should be refreshed.
    pub refresh_at: u64,
}

impl AccessCredential {
    /// Create a credential that becomes stale `ttl_secs` seconds from now.
    pub fn new(value: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            value: value.into(),
            refresh_at: unix_now() + ttl_secs,
        }
    }

    /// Return `true` once the refresh deadline has passed.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        unix_now() > self.refresh_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_credential() {
        let c = AccessCredential::new("tok", 300);
        assert!(!c.needs_refresh());
        assert_eq!(c.value, "tok");
    }

    #[test]
    fn test_past_deadline_needs_refresh() {
        let c = AccessCredential {
            value: "old".into(),
            refresh_at: unix_now().saturating_sub(10),
        };
        assert!(c.needs_refresh());
    }

    #[test]
    fn test_deadline_is_exclusive() {
        // Refresh only once `now > refresh_at`, not at the boundary second.
        let c = AccessCredential {
            value: "edge".into(),
            refresh_at: unix_now() + 1,
        };
        assert!(!c.needs_refresh());
    }
}
