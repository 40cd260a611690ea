//! Execution engine module
//!
//! The resumable pagination state machine.
//!
//! # Overview
//!
//! The engine module provides:
//! - `Iteration` - Working queue, page cursor and global-limit counter of one run
//! - `transition` - Pure next-state function
//! - `iterate` - Fetch, parse-and-write, transition loop driving a `PlatformAdapter`
//!
//! A run ends in one of three ways: every endpoint is done (the adapter's
//! `on_complete` fires), the response budget runs out, or the wall-clock
//! ceiling is hit. The last two hand the next unprocessed checkpoint and the
//! running limit count to the adapter's `on_limit_reached` in short-lived
//! mode; long-running mode sleeps through budget resets instead.

mod types;

pub use types::{
    Handoff, IterationStats, LastRecord, PageResponse, ParseOutcome, RateSignal, RunMode,
    RunOutcome, RunReport, Step,
};

use crate::adapter::PlatformAdapter;
use crate::checkpoint::{Checkpoint, EndpointId, EndpointQueue};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Padding applied to budget reset waits
pub const TIME_PADDING: f64 = 1.25;

/// Wait used when a reset time is already in the past
pub const PAST_RESET_WAIT_SECS: u64 = 180;

// ============================================================================
// Iteration State
// ============================================================================

/// State of one integration run
#[derive(Debug, Clone)]
pub struct Iteration {
    /// Remaining endpoints, current at the front
    queue: EndpointQueue,
    /// Page cursor of the current endpoint
    page: String,
    /// Full backfill: endpoints never finish by age
    onboarding: bool,
    global_limit: Option<usize>,
    limit_count: usize,
}

impl Iteration {
    /// Build the run state from the endpoint universe and a checkpoint.
    ///
    /// An empty checkpoint starts at the first endpoint with an empty page.
    /// Otherwise the queue is narrowed to start at `checkpoint.endpoint`
    /// (looked up in `checkpoint.endpoints`, then in the universe) and the
    /// saved page is kept.
    pub fn new(
        universe: Vec<EndpointId>,
        checkpoint: Checkpoint,
        onboarding: bool,
        global_limit: Option<usize>,
        limit_count: usize,
    ) -> Self {
        let universe = EndpointQueue::from(universe);
        let (queue, page) = Self::resume(&universe, checkpoint);

        Self {
            queue,
            page,
            onboarding,
            global_limit,
            limit_count,
        }
    }

    fn resume(universe: &EndpointQueue, checkpoint: Checkpoint) -> (EndpointQueue, String) {
        let Some(endpoint) = checkpoint.endpoint else {
            return (universe.clone(), String::new());
        };

        let saved = EndpointQueue::from(checkpoint.endpoints);
        let narrowed = saved
            .suffix_from(&endpoint)
            .or_else(|| universe.suffix_from(&endpoint));

        match narrowed {
            Some(queue) => (queue, checkpoint.page),
            None => {
                warn!(endpoint = %endpoint, "Checkpoint endpoint is unknown, starting over");
                (universe.clone(), String::new())
            }
        }
    }

    /// Current endpoint
    pub fn current(&self) -> Option<&EndpointId> {
        self.queue.front()
    }

    /// Current page cursor
    pub fn page(&self) -> &str {
        &self.page
    }

    /// Working queue
    pub fn queue(&self) -> &EndpointQueue {
        &self.queue
    }

    /// Check if this is an onboarding run
    pub fn onboarding(&self) -> bool {
        self.onboarding
    }

    /// Running count against the global limit
    pub fn limit_count(&self) -> usize {
        self.limit_count
    }

    /// Check if the global limit has been met
    pub fn global_limit_met(&self) -> bool {
        self.global_limit
            .is_some_and(|limit| self.limit_count >= limit)
    }

    /// Current state as a checkpoint
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            endpoints: self.queue.to_vec(),
            endpoint: self.current().cloned(),
            page: self.page.clone(),
        }
    }

    /// Fold a parse outcome into the working queue and limit counter
    pub fn absorb(&mut self, current: &EndpointId, outcome: &ParseOutcome) -> Result<()> {
        if !outcome.discovered.is_empty() {
            let inserted = self
                .queue
                .insert_all_after(current, outcome.discovered.iter().cloned())?;
            debug!(endpoint = %current, inserted, "Spliced discovered endpoints");
        }
        for endpoint in &outcome.appended {
            self.queue.push_back(endpoint.clone());
        }
        self.limit_count += outcome.quota_used;
        Ok(())
    }

    /// Endpoint-finished check with the onboarding and empty-page rules applied
    pub fn is_endpoint_finished<A>(
        &self,
        adapter: &A,
        endpoint: &EndpointId,
        outcome: &ParseOutcome,
    ) -> bool
    where
        A: PlatformAdapter + ?Sized,
    {
        match &outcome.last_record {
            None => true,
            Some(_) if self.onboarding => false,
            Some(last) => adapter.is_endpoint_finished(endpoint, last, &outcome.activities),
        }
    }

    /// Next step after processing the current page
    pub fn transition<A>(
        &self,
        adapter: &A,
        next_page: Option<&str>,
        outcome: &ParseOutcome,
    ) -> Result<Step>
    where
        A: PlatformAdapter + ?Sized,
    {
        transition(
            &self.queue,
            self.current(),
            next_page,
            self.global_limit_met(),
            |endpoint| self.is_endpoint_finished(adapter, endpoint, outcome),
        )
    }

    /// Move to a checkpoint produced by [`transition`]
    pub fn apply(&mut self, checkpoint: Checkpoint) {
        self.queue = EndpointQueue::from(checkpoint.endpoints);
        self.page = checkpoint.page;
    }
}

// ============================================================================
// Transition
// ============================================================================

/// Compute the next state.
///
/// Evaluated in order: empty current endpoint is a contract error; the
/// last endpoint without a next page, or a met global limit, is terminal;
/// a finished endpoint advances (terminal if it was last); a next page
/// stays on the endpoint; otherwise advance.
pub fn transition<F>(
    queue: &EndpointQueue,
    current: Option<&EndpointId>,
    next_page: Option<&str>,
    global_limit_met: bool,
    is_endpoint_finished: F,
) -> Result<Step>
where
    F: FnOnce(&EndpointId) -> bool,
{
    let current = current.ok_or_else(|| Error::contract("currentEndpoint is empty"))?;
    let next_page = next_page.filter(|p| !p.is_empty());

    let rest = queue.after(current).ok_or_else(|| {
        Error::contract(format!("endpoint {current} is not in the working queue"))
    })?;

    if (rest.is_empty() && next_page.is_none()) || global_limit_met {
        return Ok(Step::Finished);
    }

    if is_endpoint_finished(current) {
        return Ok(advance(rest));
    }

    if let Some(page) = next_page {
        return Ok(Step::Next(Checkpoint::at(
            current.clone(),
            page,
            queue.to_vec(),
        )));
    }

    Ok(advance(rest))
}

fn advance(rest: Vec<EndpointId>) -> Step {
    if rest.is_empty() {
        Step::Finished
    } else {
        Step::Next(Checkpoint::start(rest))
    }
}

// ============================================================================
// Iterate
// ============================================================================

/// Drive `adapter` from `iteration` until completion or a limit.
pub async fn iterate<A>(
    adapter: &mut A,
    mut iteration: Iteration,
    mode: RunMode,
) -> Result<RunReport>
where
    A: PlatformAdapter + ?Sized,
{
    let started = Instant::now();
    let platform = adapter.platform();
    let mut stats = IterationStats {
        limit_count: iteration.limit_count(),
        ..IterationStats::default()
    };

    if iteration.global_limit_met() {
        info!(
            %platform,
            limit_count = iteration.limit_count(),
            "Global limit reached before execution"
        );
        adapter.on_complete().await?;
        stats.elapsed = started.elapsed();
        return Ok(RunReport {
            outcome: RunOutcome::Completed,
            stats,
        });
    }

    loop {
        let current = iteration
            .current()
            .cloned()
            .ok_or_else(|| Error::contract("currentEndpoint is empty"))?;

        let response = adapter.get(&current, iteration.page()).await?;
        let record_count = response.records.len();
        stats.pages += 1;
        stats.records += record_count;

        let outcome = if response.records.is_empty() {
            ParseOutcome::empty()
        } else {
            adapter.parse_and_write(response.records, &current).await?
        };
        stats.activities += outcome.activities.len();

        iteration.absorb(&current, &outcome)?;
        stats.limit_count = iteration.limit_count();

        info!(
            %platform,
            endpoint = %current,
            records = record_count,
            remaining = ?response.rate.remaining,
            elapsed_secs = started.elapsed().as_secs(),
            limit_count = iteration.limit_count(),
            "Processed page"
        );

        let step = iteration.transition(&*adapter, response.next_page.as_deref(), &outcome)?;
        let next = match step {
            Step::Finished => {
                info!(%platform, pages = stats.pages, "Iteration finished");
                adapter.on_complete().await?;
                stats.elapsed = started.elapsed();
                return Ok(RunReport {
                    outcome: RunOutcome::Completed,
                    stats,
                });
            }
            Step::Next(checkpoint) => checkpoint,
        };

        if adapter.is_limit_reached(&response.rate) {
            let wait_seconds = response.rate.seconds_until_reset;
            match mode {
                RunMode::LongRunning => {
                    info!(%platform, wait_seconds, "Response limit reached, waiting");
                    stats.sleeps += 1;
                    tokio::time::sleep(Duration::from_secs(wait_seconds)).await;
                }
                RunMode::ShortLived { .. } => {
                    info!(%platform, wait_seconds, "Response limit reached, handing off");
                    return hand_off(adapter, &iteration, next, wait_seconds, stats, started).await;
                }
            }
        }

        if let RunMode::ShortLived { max_runtime } = mode {
            if started.elapsed() >= max_runtime {
                info!(%platform, "Time limit reached, handing off");
                return hand_off(adapter, &iteration, next, 0, stats, started).await;
            }
        }

        iteration.apply(next);
    }
}

async fn hand_off<A>(
    adapter: &mut A,
    iteration: &Iteration,
    checkpoint: Checkpoint,
    wait_seconds: u64,
    mut stats: IterationStats,
    started: Instant,
) -> Result<RunReport>
where
    A: PlatformAdapter + ?Sized,
{
    let handoff = Handoff {
        checkpoint,
        wait_seconds,
        limit_count: iteration.limit_count(),
    };
    adapter.on_limit_reached(&handoff).await?;
    stats.elapsed = started.elapsed();
    Ok(RunReport {
        outcome: RunOutcome::LimitReached {
            checkpoint: handoff.checkpoint,
            wait_seconds,
        },
        stats,
    })
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Check if `last` is older than `max_retrospect` relative to `started_at`
pub fn is_retrospect_over(
    last: &LastRecord,
    started_at: DateTime<Utc>,
    max_retrospect: Duration,
) -> bool {
    let age = started_at.timestamp() - last.timestamp.timestamp();
    age > max_retrospect.as_secs() as i64
}

/// Seconds to wait until `reset_at`, padded by 25%.
///
/// Returns 180 when `reset_at` is already in the past.
pub fn seconds_until(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let now_ts = now.timestamp();
    let reset_ts = reset_at.timestamp();
    if now_ts > reset_ts {
        return PAST_RESET_WAIT_SECS;
    }
    ((reset_ts - now_ts) as f64 * TIME_PADDING).floor() as u64
}
