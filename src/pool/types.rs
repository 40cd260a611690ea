//! Credential pool types

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// An API credential shared between runs
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    /// Stable identifier used as the pool key
    pub id: String,
    /// Secret token sent upstream
    pub token: String,
}

impl Credential {
    /// Create a credential
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("token", &"***")
            .finish()
    }
}

/// Remaining budget of one credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Budget {
    /// Calls left; `None` until the upstream reports it
    pub remaining: Option<u64>,
    /// When the budget refills
    pub reset_at: Option<DateTime<Utc>>,
    /// Callers currently holding the credential
    pub leases: usize,
}

impl Budget {
    /// Check if the credential can be handed out at `now`
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.remaining.map_or(true, |r| r > 0) || self.reset_at.is_some_and(|t| t <= now)
    }

    /// Whole seconds until the budget refills, zero if unknown or past
    pub fn seconds_to_reset(&self, now: DateTime<Utc>) -> u64 {
        self.reset_at
            .map_or(0, |t| (t - now).num_seconds().max(0) as u64)
    }
}

/// Pool behaviour when every credential is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Longest wait `acquire` sleeps through before failing
    pub short_wait: Duration,
    /// Minimum sleep between scans
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            short_wait: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}
