//! Article comment adapter
//!
//! One endpoint per article. The comment tree of an article arrives in a
//! single call and is flattened into parent/child activities.

use super::{
    decode_record, record_timestamp, AdapterContext, ArticleInfo, FetchRequest, PlatformAdapter,
    PlatformSource,
};
use crate::activity::{strip_html, ActivityDraft, MemberDraft, ScoreRule};
use crate::checkpoint::EndpointId;
use crate::engine::{Handoff, LastRecord, PageResponse, ParseOutcome, RateSignal};
use crate::error::{Error, Result};
use crate::http::RetryPolicy;
use crate::queue::IntegrationArgs;
use crate::store::BulkOperation;
use crate::types::{Integration, JsonValue, OptionStringExt, Platform};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

const COMMENT: ScoreRule = ScoreRule::new(6, true);

const FULL_USER_KEY: &str = "fullUser";

#[derive(Debug, Deserialize)]
struct CommentUser {
    #[serde(default)]
    user_id: Option<u64>,
    username: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    twitter_username: Option<String>,
    #[serde(default)]
    github_username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FullUser {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Comment {
    id_code: String,
    #[serde(default)]
    body_html: String,
    created_at: JsonValue,
    user: CommentUser,
    #[serde(default)]
    children: Vec<Comment>,
    #[serde(default, rename = "fullUser")]
    full_user: Option<FullUser>,
}

fn encode(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

fn collect_user_ids(comments: &[JsonValue], ids: &mut BTreeSet<u64>) {
    for comment in comments {
        if let Some(id) = comment.pointer("/user/user_id").and_then(JsonValue::as_u64) {
            ids.insert(id);
        }
        if let Some(children) = comment.get("children").and_then(JsonValue::as_array) {
            collect_user_ids(children, ids);
        }
    }
}

fn attach_full_user(comments: &mut [JsonValue], user_id: u64, user: &JsonValue) {
    for comment in comments {
        if comment.pointer("/user/user_id").and_then(JsonValue::as_u64) == Some(user_id) {
            if let Some(object) = comment.as_object_mut() {
                object.insert(FULL_USER_KEY.to_string(), user.clone());
            }
        }
        if let Some(children) = comment.get_mut("children").and_then(JsonValue::as_array_mut) {
            attach_full_user(children, user_id, user);
        }
    }
}

/// Adapter for article comments
pub struct ArticleAdapter {
    ctx: AdapterContext,
    source: Arc<dyn PlatformSource>,
    articles: Vec<ArticleInfo>,
    retry: RetryPolicy,
}

impl ArticleAdapter {
    pub fn new(
        ctx: AdapterContext,
        source: Arc<dyn PlatformSource>,
        articles: Vec<ArticleInfo>,
    ) -> Self {
        Self {
            ctx,
            source,
            articles,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the gateway retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn article(&self, endpoint: &EndpointId) -> Result<&ArticleInfo> {
        let id = endpoint
            .as_simple()
            .and_then(|id| id.parse::<u64>().ok())
            .ok_or_else(|| Error::contract(format!("not an article endpoint: {endpoint}")))?;
        self.articles
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::contract(format!("unknown article {id}")))
    }

    async fn fetch(&self, request: FetchRequest) -> Result<PageResponse> {
        let source = &self.source;
        self.retry
            .run("article fetch", move || source.fetch(request.clone()))
            .await
    }

    fn flatten(
        &self,
        article: &ArticleInfo,
        comment: Comment,
        parent: Option<&str>,
        out: &mut Vec<ActivityDraft>,
    ) -> Result<()> {
        let timestamp = record_timestamp(&comment.created_at).ok_or_else(|| {
            Error::decode(format!("comment {} has no usable timestamp", comment.id_code))
        })?;

        let username = comment
            .full_user
            .as_ref()
            .and_then(|u| u.username.clone())
            .unwrap_or_else(|| comment.user.username.clone());
        let user_url = format!("https://dev.to/{}", encode(&username));

        let mut member = MemberDraft::new(comment.user.username.clone())
            .with_attribute("url", user_url.clone());
        if let Some(id) = comment.user.user_id {
            member = member.with_platform_id(id.to_string());
        }
        if let Some(twitter) = comment.user.twitter_username.clone().none_if_empty() {
            member = member.with_identity("twitter", twitter);
        }
        if let Some(github) = comment.user.github_username.clone().none_if_empty() {
            member = member.with_identity("github", github);
            if let Some(name) = &comment.user.name {
                member = member.with_attribute("name", name.clone());
            }
        }
        if let Some(full) = &comment.full_user {
            member.bio = Some(full.summary.clone().unwrap_or_default());
            member.location = Some(full.location.clone().unwrap_or_default());
        }

        let mut activity = ActivityDraft::new(
            Platform::Devto,
            "comment",
            comment.id_code.clone(),
            timestamp,
            member,
            COMMENT,
        )
        .with_attribute("body", strip_html(&comment.body_html))
        .with_attribute(
            "url",
            format!("{user_url}/comment/{}", comment.id_code),
        )
        .with_attribute("thread", parent.is_some())
        .with_attribute("userUrl", user_url)
        .with_attribute("articleUrl", article.url.clone())
        .with_attribute("articleTitle", article.title.clone());
        if let Some(parent) = parent {
            activity = activity.with_parent(parent);
        }
        out.push(activity);

        for child in comment.children {
            self.flatten(article, child, Some(&comment.id_code), out)?;
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for ArticleAdapter {
    fn platform(&self) -> Platform {
        Platform::Devto
    }

    fn universe(&self) -> Vec<EndpointId> {
        self.articles
            .iter()
            .map(|a| EndpointId::simple(a.id.to_string()))
            .collect()
    }

    async fn get(&self, endpoint: &EndpointId, _page: &str) -> Result<PageResponse> {
        let article = self.article(endpoint)?;
        let page = self
            .fetch(FetchRequest::new(Platform::Devto, "comments").with_arg(article.id))
            .await?;
        let mut comments = page.records;

        let mut user_ids = BTreeSet::new();
        collect_user_ids(&comments, &mut user_ids);
        for user_id in user_ids {
            let profile = self
                .fetch(FetchRequest::new(Platform::Devto, "user").with_arg(user_id))
                .await?;
            match profile.records.first() {
                Some(user) => attach_full_user(&mut comments, user_id, user),
                None => debug!(user_id, "No profile for comment author"),
            }
        }

        Ok(PageResponse::last(comments))
    }

    async fn parse_and_write(
        &mut self,
        records: Vec<JsonValue>,
        endpoint: &EndpointId,
    ) -> Result<ParseOutcome> {
        let article = self.article(endpoint)?.clone();
        let record_count = records.len();

        let mut activities = Vec::new();
        for record in records {
            let comment: Comment = decode_record(record, "comment")?;
            self.flatten(&article, comment, None, &mut activities)?;
        }

        self.ctx
            .write(BulkOperation::UpsertActivitiesWithMembers(activities.clone()))
            .await?;

        Ok(ParseOutcome {
            record_count,
            ..ParseOutcome::from_activities(activities)
        })
    }

    fn is_limit_reached(&self, _rate: &RateSignal) -> bool {
        false
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
            articles: self.articles.clone(),
            ..IntegrationArgs::default()
        };
        self.ctx
            .dispatch(Integration::Devto, handoff, args)
            .await
    }

    async fn on_complete(&mut self) -> Result<()> {
        self.ctx.mark_done(Integration::Devto).await
    }
}

impl std::fmt::Debug for ArticleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArticleAdapter")
            .field("ctx", &self.ctx)
            .field("articles", &self.articles.len())
            .finish_non_exhaustive()
    }
}
