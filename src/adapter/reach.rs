//! Follower-count refresh adapter
//!
//! Endpoints are pre-chunked batches of members; each batch is looked up in
//! one profiles call and only changed counts are written back.

use super::{decode_record, AdapterContext, FetchRequest, PlatformAdapter, PlatformSource};
use crate::activity::{ActivityDraft, MemberUpdate};
use crate::checkpoint::{CompositeEndpoint, EndpointId, ReachSubject};
use crate::engine::{Handoff, LastRecord, PageResponse, ParseOutcome, RateSignal};
use crate::error::{Error, Result};
use crate::http::RetryPolicy;
use crate::queue::IntegrationArgs;
use crate::store::BulkOperation;
use crate::types::{Integration, JsonValue, Platform};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Usernames this long or longer are not valid on the platform
pub const MAX_USERNAME_LENGTH: usize = 15;

/// Profiles looked up per call
pub const MAX_BATCH_SIZE: usize = 99;

const LIMIT_THRESHOLD: u64 = 2;

/// Chunk members into batch endpoints.
///
/// Usernames are lowercased; members whose username is too long are
/// dropped.
pub fn batch_endpoints(subjects: Vec<ReachSubject>) -> Vec<EndpointId> {
    let valid: Vec<ReachSubject> = subjects
        .into_iter()
        .filter(|s| s.username.chars().count() < MAX_USERNAME_LENGTH)
        .map(|s| ReachSubject {
            username: s.username.to_lowercase(),
            ..s
        })
        .collect();

    valid
        .chunks(MAX_BATCH_SIZE)
        .map(|chunk| {
            EndpointId::composite(CompositeEndpoint::Batch {
                subjects: chunk.to_vec(),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileRecord {
    username: String,
    #[serde(default)]
    followers_count: i64,
}

/// Adapter refreshing member follower counts
pub struct ReachAdapter {
    ctx: AdapterContext,
    source: Arc<dyn PlatformSource>,
    profile_id: String,
    batches: Vec<EndpointId>,
    retry: RetryPolicy,
}

impl ReachAdapter {
    /// Create an adapter over already batched endpoints
    pub fn new(
        ctx: AdapterContext,
        source: Arc<dyn PlatformSource>,
        profile_id: impl Into<String>,
        batches: Vec<EndpointId>,
    ) -> Self {
        Self {
            ctx,
            source,
            profile_id: profile_id.into(),
            batches,
            retry: RetryPolicy::default(),
        }
    }

    /// Create an adapter batching `subjects`
    pub fn from_subjects(
        ctx: AdapterContext,
        source: Arc<dyn PlatformSource>,
        profile_id: impl Into<String>,
        subjects: Vec<ReachSubject>,
    ) -> Self {
        Self::new(ctx, source, profile_id, batch_endpoints(subjects))
    }

    /// Set the gateway retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn subjects<'a>(endpoint: &'a EndpointId) -> Result<&'a [ReachSubject]> {
        match endpoint.as_composite() {
            Some(CompositeEndpoint::Batch { subjects }) => Ok(subjects),
            _ => Err(Error::contract(format!(
                "reach adapter cannot walk endpoint {endpoint}"
            ))),
        }
    }
}

#[async_trait]
impl PlatformAdapter for ReachAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn universe(&self) -> Vec<EndpointId> {
        self.batches.clone()
    }

    async fn get(&self, endpoint: &EndpointId, page: &str) -> Result<PageResponse> {
        let usernames: Vec<JsonValue> = Self::subjects(endpoint)?
            .iter()
            .map(|s| JsonValue::from(s.username.clone()))
            .collect();
        let request = FetchRequest::new(Platform::Twitter, "profiles")
            .with_arg(usernames)
            .with_page(page);

        let source = &self.source;
        self.retry
            .run("profiles fetch", move || source.fetch(request.clone()))
            .await
    }

    async fn parse_and_write(
        &mut self,
        records: Vec<JsonValue>,
        endpoint: &EndpointId,
    ) -> Result<ParseOutcome> {
        let subjects = Self::subjects(endpoint)?;
        let record_count = records.len();

        let mut updates = Vec::new();
        for record in records {
            let profile: ProfileRecord = decode_record(record, "profile")?;
            let username = profile.username.to_lowercase();
            let Some(subject) = subjects.iter().find(|s| s.username == username) else {
                continue;
            };
            if subject.reach != profile.followers_count {
                updates.push(MemberUpdate {
                    member_id: subject.id.clone(),
                    platform: Platform::Twitter,
                    reach: profile.followers_count,
                });
            }
        }

        let last_record = updates.last().map(|u| LastRecord {
            source_id: u.member_id.clone(),
            timestamp: self.ctx.started_at,
        });

        self.ctx.write(BulkOperation::UpdateMembers(updates)).await?;

        Ok(ParseOutcome {
            last_record,
            record_count,
            ..ParseOutcome::default()
        })
    }

    fn is_limit_reached(&self, rate: &RateSignal) -> bool {
        rate.at_or_below(LIMIT_THRESHOLD)
    }

    fn is_endpoint_finished(
        &self,
        _endpoint: &EndpointId,
        _last: &LastRecord,
        _activities: &[ActivityDraft],
    ) -> bool {
        true
    }

    async fn on_limit_reached(&mut self, handoff: &Handoff) -> Result<()> {
        let args = IntegrationArgs {
            profile_id: Some(self.profile_id.clone()),
            ..IntegrationArgs::default()
        };
        self.ctx
            .dispatch(Integration::TwitterReach, handoff, args)
            .await
    }

    async fn on_complete(&mut self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for ReachAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachAdapter")
            .field("ctx", &self.ctx)
            .field("profile_id", &self.profile_id)
            .field("batches", &self.batches.len())
            .finish_non_exhaustive()
    }
}
