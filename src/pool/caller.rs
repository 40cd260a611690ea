//! Retry wrapper for pooled network calls

use super::{Credential, CredentialPool, DEFAULT_COOLDOWN_SECS};
use crate::engine::{PageResponse, RateSignal};
use crate::error::{Error, Result};
use crate::http::RetryPolicy;
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Dedicated status call reporting a credential's budget
#[async_trait]
pub trait BudgetProbe: Send + Sync {
    /// Current budget of `credential`
    async fn probe(&self, credential: &Credential) -> Result<RateSignal>;
}

/// Runs single network calls against a leased credential.
///
/// Gateway errors are retried with the policy's fixed delay. Rate-limit
/// signals rotate to another credential when the caller has priority,
/// otherwise they propagate. Once every credential in the pool has been
/// rotated away from during one call, the call fails with
/// `PoolExhausted` carrying the upstream wait. After a successful call the budget is
/// re-derived from the response, or from the probe when the response
/// carries none, and the credential goes back to the pool.
#[derive(Clone)]
pub struct PooledCaller {
    pool: CredentialPool,
    retry: RetryPolicy,
    probe: Option<Arc<dyn BudgetProbe>>,
    owner: String,
    priority: bool,
}

impl PooledCaller {
    /// Create a caller that leases from `pool` on behalf of `owner`
    pub fn new(pool: CredentialPool, owner: impl Into<String>) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
            probe: None,
            owner: owner.into(),
            priority: true,
        }
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the budget probe
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn BudgetProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Allow or deny credential rotation
    #[must_use]
    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// The shared pool
    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Run `f` with a leased credential
    pub async fn call<F, Fut>(&self, operation: &str, mut f: F) -> Result<PageResponse>
    where
        F: FnMut(Credential) -> Fut + Send,
        Fut: Future<Output = Result<PageResponse>> + Send,
    {
        let mut credential = self.pool.acquire(&self.owner).await?;
        let max_rotations = self.pool.len().await.max(1);
        let mut attempt = 0;
        let mut rotations = 0;

        loop {
            attempt += 1;
            match f(credential.clone()).await {
                Ok(response) => {
                    self.refresh_budget(&credential, &response.rate).await;
                    self.pool.release(&credential).await;
                    return Ok(response);
                }
                Err(e) if e.is_gateway() => {
                    if attempt >= self.retry.max_attempts {
                        warn!(operation, attempts = attempt, error = %e, "Giving up");
                        self.pool.release(&credential).await;
                        return Err(Error::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                        });
                    }
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Gateway error, retrying in {:?}",
                        self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) if e.is_rate_limit_signal() => {
                    warn!(operation, credential = %credential.id, "Credential rate limited");
                    rotations += 1;
                    if self.priority && rotations > max_rotations {
                        let wait_seconds = e.retry_after().unwrap_or(DEFAULT_COOLDOWN_SECS);
                        warn!(operation, rotations, wait_seconds, "Every credential rate limited");
                        self.pool.retire(&credential, wait_seconds).await;
                        return Err(Error::PoolExhausted { wait_seconds });
                    }
                    credential = self
                        .pool
                        .rotate(&self.owner, &credential, self.priority, e)
                        .await?;
                    attempt = 0;
                }
                Err(e) => {
                    self.pool.release(&credential).await;
                    return Err(e);
                }
            }
        }
    }

    async fn refresh_budget(&self, credential: &Credential, rate: &RateSignal) {
        let signal = match (rate.remaining, &self.probe) {
            (Some(_), _) => Some(*rate),
            (None, Some(probe)) => match probe.probe(credential).await {
                Ok(signal) => Some(signal),
                Err(e) => {
                    warn!(credential = %credential.id, error = %e, "Budget probe failed");
                    None
                }
            },
            (None, None) => None,
        };

        if let Some(RateSignal {
            remaining: Some(remaining),
            seconds_until_reset,
        }) = signal
        {
            let reset_at = Utc::now() + chrono::Duration::seconds(seconds_until_reset as i64);
            debug!(credential = %credential.id, remaining, "Updated credential budget");
            self.pool.update_budget(credential, remaining, reset_at).await;
        }
    }
}

impl std::fmt::Debug for PooledCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledCaller")
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .field("retry", &self.retry)
            .field("has_probe", &self.probe.is_some())
            .finish_non_exhaustive()
    }
}
