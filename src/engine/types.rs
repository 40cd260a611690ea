//! Engine types
//!
//! Page responses, parse outcomes, run modes and results.

use crate::activity::ActivityDraft;
use crate::checkpoint::{Checkpoint, EndpointId};
use crate::types::JsonValue;
use chrono::{DateTime, Utc};
use std::time::Duration;

// ============================================================================
// Fetch Results
// ============================================================================

/// Budget information returned by every fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateSignal {
    /// Calls left in the current window; `None` when the platform does not say
    pub remaining: Option<u64>,
    /// Seconds until the window resets
    pub seconds_until_reset: u64,
}

impl RateSignal {
    /// Signal for platforms without a budget
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Signal with a known remaining budget
    pub fn new(remaining: u64, seconds_until_reset: u64) -> Self {
        Self {
            remaining: Some(remaining),
            seconds_until_reset,
        }
    }

    /// Check if the remaining budget is at or below `threshold`
    pub fn at_or_below(&self, threshold: u64) -> bool {
        self.remaining.is_some_and(|r| r <= threshold)
    }
}

/// One fetched page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResponse {
    /// Raw platform records
    pub records: Vec<JsonValue>,
    /// Cursor for the next page; `None` or empty means no more pages
    pub next_page: Option<String>,
    pub rate: RateSignal,
}

impl PageResponse {
    /// Create a response
    pub fn new(records: Vec<JsonValue>, next_page: Option<String>, rate: RateSignal) -> Self {
        Self {
            records,
            next_page: next_page.filter(|p| !p.is_empty()),
            rate,
        }
    }

    /// Final page without budget information
    pub fn last(records: Vec<JsonValue>) -> Self {
        Self::new(records, None, RateSignal::unlimited())
    }
}

// ============================================================================
// Parse Outcome
// ============================================================================

/// The last parsed record of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastRecord {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
}

impl LastRecord {
    /// Take the last record from the tail of an activity list
    pub fn from_activities(activities: &[ActivityDraft]) -> Option<Self> {
        activities.last().map(|a| Self {
            source_id: a.source_id.clone(),
            timestamp: a.timestamp,
        })
    }
}

/// What parsing one page produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    /// `None` always ends the current endpoint
    pub last_record: Option<LastRecord>,
    pub record_count: usize,
    pub activities: Vec<ActivityDraft>,
    /// Endpoints to splice in directly after the current one, in order
    pub discovered: Vec<EndpointId>,
    /// Endpoints to append at the end of the working queue
    pub appended: Vec<EndpointId>,
    /// Units counted against the global limit
    pub quota_used: usize,
}

impl ParseOutcome {
    /// Outcome of a page with no records
    pub fn empty() -> Self {
        Self::default()
    }

    /// Outcome whose last record is the last activity
    pub fn from_activities(activities: Vec<ActivityDraft>) -> Self {
        Self {
            last_record: LastRecord::from_activities(&activities),
            record_count: activities.len(),
            activities,
            ..Self::default()
        }
    }

    /// Splice endpoints after the current one
    #[must_use]
    pub fn with_discovered(mut self, endpoints: Vec<EndpointId>) -> Self {
        self.discovered = endpoints;
        self
    }

    /// Append endpoints to the end of the queue
    #[must_use]
    pub fn with_appended(mut self, endpoints: Vec<EndpointId>) -> Self {
        self.appended = endpoints;
        self
    }

    /// Count units against the global limit
    #[must_use]
    pub fn with_quota_used(mut self, quota: usize) -> Self {
        self.quota_used = quota;
        self
    }
}

// ============================================================================
// Transition
// ============================================================================

/// Result of one transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Continue from this checkpoint
    Next(Checkpoint),
    /// Terminal; never transitions again
    Finished,
}

// ============================================================================
// Run Mode and Results
// ============================================================================

/// How the engine deals with exhausted budgets and time ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Hand off a continuation on limits; stop after `max_runtime`
    ShortLived { max_runtime: Duration },
    /// Sleep in place on limits; no time ceiling
    LongRunning,
}

impl RunMode {
    /// Default short-lived ceiling (12 minutes)
    pub const DEFAULT_MAX_RUNTIME: Duration = Duration::from_secs(12 * 60);

    /// Short-lived mode with the default ceiling
    pub fn short_lived_default() -> Self {
        Self::ShortLived {
            max_runtime: Self::DEFAULT_MAX_RUNTIME,
        }
    }

    /// Check if this is the long-running mode
    pub fn is_long_running(&self) -> bool {
        matches!(self, RunMode::LongRunning)
    }
}

impl Default for RunMode {
    fn default() -> Self {
        Self::short_lived_default()
    }
}

/// What a short-lived run passes to the invocation that resumes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    /// Next unprocessed state
    pub checkpoint: Checkpoint,
    pub wait_seconds: u64,
    /// Running count against the global limit, carried into the next run
    pub limit_count: usize,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every endpoint done (or the global limit was already met)
    Completed,
    /// Stopped early; `checkpoint` is the next unprocessed state
    LimitReached {
        checkpoint: Checkpoint,
        wait_seconds: u64,
    },
}

impl RunOutcome {
    /// Check if the run completed
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Statistics from one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationStats {
    /// Pages fetched
    pub pages: usize,
    /// Raw records received
    pub records: usize,
    /// Activities emitted
    pub activities: usize,
    /// In-place sleeps on exhausted budgets
    pub sleeps: usize,
    /// Running count against the global limit
    pub limit_count: usize,
    pub elapsed: Duration,
}

/// Result of [`iterate`](super::iterate)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub stats: IterationStats,
}
