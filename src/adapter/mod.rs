//! Platform adapter module
//!
//! Per-integration policy objects consumed by [`iterate`](crate::engine::iterate).
//!
//! # Overview
//!
//! The adapter module provides:
//! - `PlatformAdapter` - The capability set the engine drives
//! - `PlatformSource` - Fetch contract over the platform gateway
//! - `AdapterContext` - Tenant, run flags and the downstream collaborators
//! - Adapters: chat, social, article comments, reach refresh, repository events
//!
//! # Example
//!
//! ```rust,ignore
//! use activity_sync::adapter::{AdapterContext, ChatAdapter};
//!
//! let ctx = AdapterContext::new("tenant-1", sink, queue, store).with_onboarding(true);
//! let adapter = ChatAdapter::load(ctx, source, "guild-1").await?;
//! ```

mod article;
mod chat;
mod reach;
mod repo;
mod social;
mod types;

pub use article::ArticleAdapter;
pub use chat::ChatAdapter;
pub use reach::{batch_endpoints, ReachAdapter, MAX_BATCH_SIZE, MAX_USERNAME_LENGTH};
pub use repo::{RepoAdapter, RepoEvent};
pub use social::SocialAdapter;
pub use types::{ArticleInfo, ChannelInfo, FetchRequest, RepoInfo};

use crate::activity::ActivityDraft;
use crate::checkpoint::EndpointId;
use crate::engine::{Handoff, LastRecord, PageResponse, ParseOutcome, RateSignal};
use crate::error::Result;
use crate::queue::{ContinuationQueue, IntegrationArgs, TriggerMessage};
use crate::store::{ActivitySink, BulkOperation, IntegrationSettings, IntegrationStore};
use crate::types::{Integration, JsonValue, Platform};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// Traits
// ============================================================================

/// Platform-specific policy driven by the engine
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Platform the activities come from
    fn platform(&self) -> Platform;

    /// Full endpoint list at construction time
    fn universe(&self) -> Vec<EndpointId>;

    /// Effective global limit given the configured one
    fn global_limit(&self, configured: Option<usize>) -> Option<usize> {
        configured
    }

    /// Fetch one page of `endpoint`
    async fn get(&self, endpoint: &EndpointId, page: &str) -> Result<PageResponse>;

    /// Turn records into activities and write them downstream
    async fn parse_and_write(
        &mut self,
        records: Vec<JsonValue>,
        endpoint: &EndpointId,
    ) -> Result<ParseOutcome>;

    /// Check if the response budget is spent
    fn is_limit_reached(&self, rate: &RateSignal) -> bool;

    /// Platform "caught up" policy for a non-empty page outside onboarding
    fn is_endpoint_finished(
        &self,
        endpoint: &EndpointId,
        last: &LastRecord,
        activities: &[ActivityDraft],
    ) -> bool;

    /// Hand the next unprocessed checkpoint to a future invocation
    async fn on_limit_reached(&mut self, handoff: &Handoff) -> Result<()>;

    /// Called once after every endpoint is done
    async fn on_complete(&mut self) -> Result<()>;
}

/// Fetch contract of the platform gateway
#[async_trait]
pub trait PlatformSource: Send + Sync {
    /// Run one usecase call
    async fn fetch(&self, request: FetchRequest) -> Result<PageResponse>;
}

// ============================================================================
// Adapter Context
// ============================================================================

/// What every adapter needs besides its own policy
#[derive(Clone)]
pub struct AdapterContext {
    pub tenant: String,
    /// Integration row the run belongs to, echoed in continuations
    pub integration_id: Option<String>,
    pub onboarding: bool,
    /// Reference time for retrospect windows
    pub started_at: DateTime<Utc>,
    sink: Arc<dyn ActivitySink>,
    queue: Arc<dyn ContinuationQueue>,
    store: Arc<dyn IntegrationStore>,
}

impl AdapterContext {
    /// Create a context for `tenant`
    pub fn new(
        tenant: impl Into<String>,
        sink: Arc<dyn ActivitySink>,
        queue: Arc<dyn ContinuationQueue>,
        store: Arc<dyn IntegrationStore>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            integration_id: None,
            onboarding: false,
            started_at: Utc::now(),
            sink,
            queue,
            store,
        }
    }

    /// Set the onboarding flag
    #[must_use]
    pub fn with_onboarding(mut self, onboarding: bool) -> Self {
        self.onboarding = onboarding;
        self
    }

    /// Set the integration id
    #[must_use]
    pub fn with_integration_id(mut self, id: impl Into<String>) -> Self {
        self.integration_id = Some(id.into());
        self
    }

    /// Set the reference time
    #[must_use]
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Send a bulk operation to the sink
    pub async fn write(&self, operation: BulkOperation) -> Result<()> {
        if operation.is_empty() {
            return Ok(());
        }
        debug!(tenant = %self.tenant, kind = operation.kind(), items = operation.len(), "Writing");
        self.sink.bulk(&self.tenant, operation).await
    }

    /// Publish a continuation carrying the handoff state
    pub async fn dispatch(
        &self,
        integration: Integration,
        handoff: &Handoff,
        args: IntegrationArgs,
    ) -> Result<()> {
        let message = TriggerMessage {
            integration,
            state: handoff.checkpoint.clone(),
            tenant: self.tenant.clone(),
            sleep: handoff.wait_seconds,
            onboarding: self.onboarding,
            integration_id: self.integration_id.clone(),
            limit_count: handoff.limit_count,
            args,
        };

        info!(
            group = %message.group_key(),
            wait_seconds = handoff.wait_seconds,
            limit_count = handoff.limit_count,
            endpoint = ?handoff.checkpoint.endpoint.as_ref().map(ToString::to_string),
            "Dispatching continuation"
        );
        self.queue.publish(message).await
    }

    /// Settings saved by the last completed run
    pub async fn load_settings(&self, integration: Integration) -> Result<IntegrationSettings> {
        self.store.load_settings(&self.tenant, integration).await
    }

    /// Persist settings
    pub async fn save_settings(
        &self,
        integration: Integration,
        settings: &IntegrationSettings,
    ) -> Result<()> {
        self.store
            .save_settings(&self.tenant, integration, settings)
            .await
    }

    /// Record the integration run as done
    pub async fn mark_done(&self, integration: Integration) -> Result<()> {
        info!(tenant = %self.tenant, %integration, "Integration done");
        self.store.mark_done(&self.tenant, integration).await
    }
}

impl std::fmt::Debug for AdapterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterContext")
            .field("tenant", &self.tenant)
            .field("integration_id", &self.integration_id)
            .field("onboarding", &self.onboarding)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Record Helpers
// ============================================================================

/// Read a record timestamp given as RFC 3339, or as (possibly fractional)
/// unix seconds in a number or string.
pub(crate) fn record_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().and_then(from_unix_seconds)),
        JsonValue::Number(n) => n.as_f64().and_then(from_unix_seconds),
        _ => None,
    }
}

fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.trunc();
    let nanos = ((secs - whole) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Decode a raw record into its typed shape
pub(crate) fn decode_record<T: serde::de::DeserializeOwned>(
    record: JsonValue,
    what: &str,
) -> Result<T> {
    serde_json::from_value(record)
        .map_err(|e| crate::error::Error::decode(format!("malformed {what} record: {e}")))
}

#[cfg(test)]
mod tests;
