//! Social feed adapter
//!
//! Endpoints are `followers`, `mentions` and one `hashtag/<tag>` per tracked
//! hashtag. Posts count against the global limit, which is reduced during
//! onboarding to leave room in the shared platform quota.

use super::{
    decode_record, record_timestamp, AdapterContext, FetchRequest, PlatformAdapter, PlatformSource,
};
use crate::activity::{
    generate_source_id_hash, strip_html, ActivityDraft, MemberDraft, ScoreRule,
};
use crate::checkpoint::EndpointId;
use crate::engine::{
    is_retrospect_over, Handoff, LastRecord, PageResponse, ParseOutcome, RateSignal,
};
use crate::error::{Error, Result};
use crate::queue::IntegrationArgs;
use crate::store::{BulkOperation, IntegrationSettings};
use crate::types::{Integration, JsonValue, Platform};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub const FOLLOWERS_ENDPOINT: &str = "followers";
pub const MENTIONS_ENDPOINT: &str = "mentions";
const HASHTAG_PREFIX: &str = "hashtag/";

const FOLLOW: ScoreRule = ScoreRule::new(2, false);
const MENTION: ScoreRule = ScoreRule::new(6, true);
const HASHTAG: ScoreRule = ScoreRule::new(6, true);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FollowerRecord {
    id: String,
    username: String,
    #[serde(default)]
    followers_count: Option<i64>,
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostAuthor {
    id: String,
    username: String,
    #[serde(default)]
    followers_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord {
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    created_at: JsonValue,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    attachments: Vec<JsonValue>,
    author: PostAuthor,
}

enum Feed<'a> {
    Followers,
    Mentions,
    Hashtag(&'a str),
}

fn feed(endpoint: &EndpointId) -> Result<Feed<'_>> {
    match endpoint.as_simple() {
        Some(FOLLOWERS_ENDPOINT) => Ok(Feed::Followers),
        Some(MENTIONS_ENDPOINT) => Ok(Feed::Mentions),
        Some(id) => id
            .strip_prefix(HASHTAG_PREFIX)
            .map(|tag| Feed::Hashtag(tag.trim_start_matches('#')))
            .ok_or_else(|| Error::contract(format!("unknown social endpoint {id}"))),
        None => Err(Error::contract(format!(
            "social adapter cannot walk endpoint {endpoint}"
        ))),
    }
}

fn profile_url(username: &str) -> String {
    format!("https://twitter.com/{username}")
}

/// Adapter for a social profile
pub struct SocialAdapter {
    ctx: AdapterContext,
    source: Arc<dyn PlatformSource>,
    profile_id: String,
    hashtags: Vec<String>,
    settings: IntegrationSettings,
    /// Followers first seen in this run, including earlier invocations
    new_followers: BTreeSet<String>,
    caught_up: bool,
    post_count: usize,
    max_retrospect: Duration,
}

impl SocialAdapter {
    /// Default retrospect window
    pub const DEFAULT_MAX_RETROSPECT: Duration = Duration::from_secs(7380);

    /// Global limit when none is configured
    pub const DEFAULT_GLOBAL_LIMIT: usize = 10_000;

    /// Share of the global limit used while onboarding
    pub const ONBOARDING_LIMIT_FACTOR: f64 = 0.7;

    /// Budget at or below which the run hands off
    pub const LIMIT_THRESHOLD: u64 = 2;

    pub fn new(
        ctx: AdapterContext,
        source: Arc<dyn PlatformSource>,
        profile_id: impl Into<String>,
        hashtags: Vec<String>,
        settings: IntegrationSettings,
    ) -> Self {
        Self {
            ctx,
            source,
            profile_id: profile_id.into(),
            hashtags,
            settings,
            new_followers: BTreeSet::new(),
            caught_up: false,
            post_count: 0,
            max_retrospect: Self::DEFAULT_MAX_RETROSPECT,
        }
    }

    /// Create an adapter with the follower set read from the integration store
    pub async fn load(
        ctx: AdapterContext,
        source: Arc<dyn PlatformSource>,
        profile_id: impl Into<String>,
        hashtags: Vec<String>,
    ) -> Result<Self> {
        let settings = ctx.load_settings(Integration::Twitter).await?;
        Ok(Self::new(ctx, source, profile_id, hashtags, settings))
    }

    /// Set the retrospect window
    #[must_use]
    pub fn with_max_retrospect(mut self, max_retrospect: Duration) -> Self {
        self.max_retrospect = max_retrospect;
        self
    }

    /// Merge followers a previous invocation of this run saw before handing off
    #[must_use]
    pub fn with_seen_followers(mut self, followers: BTreeSet<String>) -> Self {
        self.settings.followers.extend(followers.iter().cloned());
        self.new_followers.extend(followers);
        self
    }

    /// Follower ids seen so far
    pub fn followers(&self) -> &BTreeSet<String> {
        &self.settings.followers
    }

    /// Posts parsed in this run
    pub fn post_count(&self) -> usize {
        self.post_count
    }

    fn after_date(&self) -> Option<String> {
        if self.ctx.onboarding {
            return None;
        }
        let window = chrono::Duration::from_std(self.max_retrospect).ok()?;
        Some((Utc::now() - window).to_rfc3339())
    }

    fn follow_timestamp(&self) -> DateTime<Utc> {
        if self.ctx.onboarding {
            DateTime::UNIX_EPOCH
        } else {
            Utc::now()
        }
    }

    fn parse_followers(&mut self, records: Vec<JsonValue>) -> Result<ParseOutcome> {
        let record_count = records.len();
        let timestamp = self.follow_timestamp();
        let epoch = DateTime::<Utc>::UNIX_EPOCH.timestamp().to_string();

        let followers = records
            .into_iter()
            .map(|record| decode_record::<FollowerRecord>(record, "follower"))
            .collect::<Result<Vec<_>>>()?;

        let known = &self.settings.followers;
        self.caught_up = !followers.is_empty() && followers.iter().all(|f| known.contains(&f.id));

        let mut activities = Vec::new();
        for follower in followers {
            if !self.settings.followers.insert(follower.id.clone()) {
                continue;
            }
            self.new_followers.insert(follower.id.clone());
            let source_id = generate_source_id_hash(
                &follower.username,
                "follow",
                &epoch,
                Platform::Twitter.as_str(),
            )?;
            let url = profile_url(&follower.username);

            let mut member = MemberDraft::new(follower.username.clone())
                .with_platform_id(follower.id)
                .with_attribute("url", url.clone());
            if let Some(image_url) = follower.image_url {
                member = member.with_attribute("imageUrl", image_url);
            }
            if let Some(count) = follower.followers_count {
                member = member.with_reach(count);
            }

            activities.push(
                ActivityDraft::new(
                    Platform::Twitter,
                    "follow",
                    source_id,
                    timestamp,
                    member,
                    FOLLOW,
                )
                .with_attribute("url", url),
            );
        }

        Ok(ParseOutcome {
            record_count,
            ..ParseOutcome::from_activities(activities)
        })
    }

    fn parse_posts(
        &mut self,
        records: Vec<JsonValue>,
        hashtag: Option<&str>,
    ) -> Result<ParseOutcome> {
        let record_count = records.len();
        let (activity_type, rule) = match hashtag {
            Some(_) => ("hashtag", HASHTAG),
            None => ("mention", MENTION),
        };

        let mut activities = Vec::with_capacity(records.len());
        for record in records {
            let post: PostRecord = decode_record(record, "post")?;
            let timestamp = record_timestamp(&post.created_at).ok_or_else(|| {
                Error::decode(format!("post {} has no usable timestamp", post.id))
            })?;

            let url = profile_url(&post.author.username);
            let mut member = MemberDraft::new(post.author.username)
                .with_platform_id(post.author.id)
                .with_attribute("url", url);
            if let Some(count) = post.author.followers_count {
                member = member.with_reach(count);
            }

            let mut activity = ActivityDraft::new(
                Platform::Twitter,
                activity_type,
                post.id.clone(),
                timestamp,
                member,
                rule,
            )
            .with_attribute("sourceId", post.id)
            .with_attribute("body", strip_html(post.text.as_deref().unwrap_or_default()))
            .with_attribute("url", post.url.unwrap_or_default())
            .with_attribute("attachments", post.attachments);
            if let Some(tag) = hashtag {
                activity = activity.with_attribute("hashtag", tag);
            }
            activities.push(activity);
        }

        self.post_count += activities.len();
        let quota = activities.len();
        Ok(ParseOutcome {
            record_count,
            ..ParseOutcome::from_activities(activities)
        }
        .with_quota_used(quota))
    }
}

#[async_trait]
impl PlatformAdapter for SocialAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn universe(&self) -> Vec<EndpointId> {
        [FOLLOWERS_ENDPOINT, MENTIONS_ENDPOINT]
            .into_iter()
            .map(EndpointId::simple)
            .chain(
                self.hashtags
                    .iter()
                    .map(|tag| EndpointId::simple(format!("{HASHTAG_PREFIX}{tag}"))),
            )
            .collect()
    }

    fn global_limit(&self, configured: Option<usize>) -> Option<usize> {
        let limit = configured.unwrap_or(Self::DEFAULT_GLOBAL_LIMIT);
        if self.ctx.onboarding {
            Some((limit as f64 * Self::ONBOARDING_LIMIT_FACTOR) as usize)
        } else {
            Some(limit)
        }
    }

    async fn get(&self, endpoint: &EndpointId, page: &str) -> Result<PageResponse> {
        let request = match feed(endpoint)? {
            Feed::Followers => FetchRequest::new(Platform::Twitter, "followers")
                .with_arg(self.profile_id.clone()),
            Feed::Mentions => FetchRequest::new(Platform::Twitter, "mentions")
                .with_arg(self.profile_id.clone()),
            Feed::Hashtag(tag) => FetchRequest::new(Platform::Twitter, "hashtag").with_arg(tag),
        }
        .with_page(page);

        let request = match self.after_date() {
            Some(after) => request.with_param("afterDate", after),
            None => request,
        };

        self.source.fetch(request).await
    }

    async fn parse_and_write(
        &mut self,
        records: Vec<JsonValue>,
        endpoint: &EndpointId,
    ) -> Result<ParseOutcome> {
        let outcome = match feed(endpoint)? {
            Feed::Followers => self.parse_followers(records)?,
            Feed::Mentions => self.parse_posts(records, None)?,
            Feed::Hashtag(tag) => self.parse_posts(records, Some(tag))?,
        };

        self.ctx
            .write(BulkOperation::UpsertActivitiesWithMembers(
                outcome.activities.clone(),
            ))
            .await?;
        Ok(outcome)
    }

    fn is_limit_reached(&self, rate: &RateSignal) -> bool {
        rate.at_or_below(Self::LIMIT_THRESHOLD)
    }

    fn is_endpoint_finished(
        &self,
        endpoint: &EndpointId,
        last: &LastRecord,
        _activities: &[ActivityDraft],
    ) -> bool {
        match feed(endpoint) {
            Ok(Feed::Followers) => self.caught_up,
            Ok(_) => is_retrospect_over(last, self.ctx.started_at, self.max_retrospect),
            Err(_) => true,
        }
    }

    async fn on_limit_reached(&mut self, handoff: &Handoff) -> Result<()> {
        let args = IntegrationArgs {
            profile_id: Some(self.profile_id.clone()),
            hashtags: self.hashtags.clone(),
            followers: self.new_followers.clone(),
            ..IntegrationArgs::default()
        };
        self.ctx
            .dispatch(Integration::Twitter, handoff, args)
            .await
    }

    async fn on_complete(&mut self) -> Result<()> {
        self.ctx
            .save_settings(Integration::Twitter, &self.settings)
            .await?;
        if self.ctx.onboarding {
            self.ctx.mark_done(Integration::Twitter).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SocialAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocialAdapter")
            .field("ctx", &self.ctx)
            .field("profile_id", &self.profile_id)
            .field("hashtags", &self.hashtags)
            .field("followers", &self.settings.followers.len())
            .field("post_count", &self.post_count)
            .finish_non_exhaustive()
    }
}
