//! Credential pool module
//!
//! Process-wide budget tracking for adapters that multiplex several API
//! credentials. The pool is an injected component; clones share state.
//!
//! # Overview
//!
//! The pool module provides:
//! - `CredentialPool` - Mutex-guarded budget map with acquire/release/rotate
//! - `PooledCaller` - Retry wrapper that rotates credentials on rate-limit signals
//! - `BudgetProbe` - Optional status call used to re-derive a budget

mod caller;
mod types;

pub use caller::{BudgetProbe, PooledCaller};
pub use types::{Budget, Credential, PoolConfig};

use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Cool-down applied when a rate-limit signal carries no wait
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

#[derive(Debug)]
struct Slot {
    credential: Credential,
    budget: Budget,
}

/// Shared per-credential budgets
#[derive(Debug)]
pub struct CredentialPool {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    config: PoolConfig,
}

impl CredentialPool {
    /// Create an empty pool
    pub fn new(config: PoolConfig) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Create a pool holding `credentials`
    pub fn with_credentials(
        credentials: impl IntoIterator<Item = Credential>,
        config: PoolConfig,
    ) -> Self {
        let slots = credentials
            .into_iter()
            .map(|credential| {
                (
                    credential.id.clone(),
                    Slot {
                        credential,
                        budget: Budget::default(),
                    },
                )
            })
            .collect();

        Self {
            slots: Arc::new(Mutex::new(slots)),
            config,
        }
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Register a credential
    pub async fn add(&self, credential: Credential) {
        let mut slots = self.slots.lock().await;
        slots.entry(credential.id.clone()).or_insert(Slot {
            credential,
            budget: Budget::default(),
        });
    }

    /// Number of credentials
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Check if the pool has no credentials
    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    /// Current budget of a credential
    pub async fn budget(&self, credential_id: &str) -> Option<Budget> {
        self.slots.lock().await.get(credential_id).map(|s| s.budget)
    }

    /// Lease a credential with budget left.
    ///
    /// Prefers the least-leased credential. When all are exhausted, sleeps
    /// through waits up to `short_wait`; longer waits fail with
    /// `PoolExhausted` carrying the recommended wait.
    pub async fn acquire(&self, owner: &str) -> Result<Credential> {
        loop {
            let wait_seconds = {
                let mut slots = self.slots.lock().await;
                if slots.is_empty() {
                    return Err(Error::config("credential pool is empty"));
                }

                let now = Utc::now();
                let picked = slots
                    .values_mut()
                    .filter(|s| s.budget.is_available(now))
                    .min_by(|a, b| {
                        a.budget
                            .leases
                            .cmp(&b.budget.leases)
                            .then_with(|| a.credential.id.cmp(&b.credential.id))
                    });

                if let Some(slot) = picked {
                    if slot.budget.reset_at.is_some_and(|t| t <= now) {
                        slot.budget.remaining = None;
                        slot.budget.reset_at = None;
                    }
                    slot.budget.leases += 1;
                    debug!(owner, credential = %slot.credential.id, "Leased credential");
                    return Ok(slot.credential.clone());
                }

                slots
                    .values()
                    .map(|s| s.budget.seconds_to_reset(now))
                    .min()
                    .unwrap_or(0)
            };

            if Duration::from_secs(wait_seconds) > self.config.short_wait {
                warn!(owner, wait_seconds, "Every credential is exhausted");
                return Err(Error::PoolExhausted { wait_seconds });
            }

            info!(owner, wait_seconds, "Every credential is exhausted, waiting");
            tokio::time::sleep(Duration::from_secs(wait_seconds).max(self.config.poll_interval))
                .await;
            self.refresh_earliest().await;
        }
    }

    /// Mark the credential with the earliest reset as refilled
    async fn refresh_earliest(&self) {
        let mut slots = self.slots.lock().await;
        let now = Utc::now();
        if let Some(slot) = slots
            .values_mut()
            .min_by_key(|s| (s.budget.seconds_to_reset(now), s.credential.id.clone()))
        {
            slot.budget.remaining = None;
            slot.budget.reset_at = None;
        }
    }

    /// Return a leased credential
    pub async fn release(&self, credential: &Credential) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&credential.id) {
            slot.budget.leases = slot.budget.leases.saturating_sub(1);
        }
    }

    /// Record the budget reported for a credential
    pub async fn update_budget(
        &self,
        credential: &Credential,
        remaining: u64,
        reset_at: chrono::DateTime<Utc>,
    ) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&credential.id) {
            slot.budget.remaining = Some(remaining);
            slot.budget.reset_at = Some(reset_at);
        }
    }

    /// Swap an exhausted credential for another.
    ///
    /// Callers without priority get `cause` back untouched.
    pub async fn rotate(
        &self,
        owner: &str,
        current: &Credential,
        priority: bool,
        cause: Error,
    ) -> Result<Credential> {
        if !priority {
            self.release(current).await;
            return Err(cause);
        }

        self.retire(current, cause.retry_after().unwrap_or(DEFAULT_COOLDOWN_SECS))
            .await;
        info!(owner, from = %current.id, "Rotating credential");
        self.acquire(owner).await
    }

    /// Mark a leased credential spent for `wait_seconds` and return it
    pub async fn retire(&self, credential: &Credential, wait_seconds: u64) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&credential.id) {
            slot.budget.remaining = Some(0);
            slot.budget.reset_at =
                Some(Utc::now() + chrono::Duration::seconds(wait_seconds as i64));
            slot.budget.leases = slot.budget.leases.saturating_sub(1);
        }
    }
}

impl Clone for CredentialPool {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests;
