//! Repository event adapter
//!
//! Endpoints are `<repo>|<event>`. Pull requests, issues and discussions
//! with comments append a comment endpoint per item at the end of the
//! working queue. Every call leases a credential from the shared pool.

use super::{
    decode_record, record_timestamp, AdapterContext, FetchRequest, PlatformAdapter, PlatformSource,
    RepoInfo,
};
use crate::activity::{
    generate_source_id_hash, strip_html, ActivityDraft, MemberDraft, ScoreRule,
};
use crate::checkpoint::{CommentFeed, CompositeEndpoint, EndpointId};
use crate::engine::{Handoff, LastRecord, PageResponse, ParseOutcome, RateSignal};
use crate::error::{Error, Result};
use crate::pool::PooledCaller;
use crate::queue::IntegrationArgs;
use crate::store::BulkOperation;
use crate::types::{Integration, JsonValue, OptionStringExt, Platform};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

const STAR: ScoreRule = ScoreRule::new(2, false);
const FORK: ScoreRule = ScoreRule::new(4, false);
const PULL_REQUEST_OPENED: ScoreRule = ScoreRule::new(10, true);
const ISSUE_OPENED: ScoreRule = ScoreRule::new(8, true);
const DISCUSSION_OPENED: ScoreRule = ScoreRule::new(8, true);
const COMMENT: ScoreRule = ScoreRule::new(6, true);
const SELECTED_ANSWER: ScoreRule = ScoreRule::new(10, true);

// ============================================================================
// Events
// ============================================================================

/// Top-level repository feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoEvent {
    Stargazers,
    Forks,
    Pulls,
    Issues,
    Discussions,
}

impl RepoEvent {
    /// Every feed, in walking order
    pub const ALL: [RepoEvent; 5] = [
        RepoEvent::Stargazers,
        RepoEvent::Forks,
        RepoEvent::Pulls,
        RepoEvent::Issues,
        RepoEvent::Discussions,
    ];

    /// Usecase and endpoint suffix
    pub fn as_str(self) -> &'static str {
        match self {
            RepoEvent::Stargazers => "stargazers",
            RepoEvent::Forks => "forks",
            RepoEvent::Pulls => "pulls",
            RepoEvent::Issues => "issues",
            RepoEvent::Discussions => "discussions",
        }
    }

    /// Endpoint id for `repo`
    pub fn endpoint(self, repo: &str) -> EndpointId {
        EndpointId::simple(format!("{repo}|{}", self.as_str()))
    }

    /// JSON pointer to the login that identifies a record's author
    fn login_pointer(self) -> &'static str {
        match self {
            RepoEvent::Stargazers => "/node/login",
            RepoEvent::Forks => "/owner/login",
            _ => "/author/login",
        }
    }
}

impl fmt::Display for RepoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RepoEvent::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| Error::contract(format!("unsupported event {s}")))
    }
}

fn has_login(record: &JsonValue, pointer: &str) -> bool {
    record
        .pointer(pointer)
        .and_then(JsonValue::as_str)
        .is_some_and(|login| !login.is_empty())
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Author {
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_hireable: Option<bool>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    twitter_username: Option<String>,
}

impl Author {
    fn into_member(self) -> MemberDraft {
        let mut member = MemberDraft::new(self.login)
            .with_attribute("name", self.name.unwrap_or_default())
            .with_attribute("isHireable", self.is_hireable.unwrap_or(false))
            .with_attribute("url", self.url.unwrap_or_default());
        if let Some(twitter) = self.twitter_username.none_if_empty() {
            member = member.with_identity("twitter", twitter);
        }
        member.email = self.email.none_if_empty();
        member.bio = self.bio;
        member.organisation = self.company;
        member.location = self.location;
        member
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StarRecord {
    node: Author,
    starred_at: JsonValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForkRecord {
    id: String,
    owner: Author,
    created_at: JsonValue,
}

#[derive(Debug, Deserialize)]
struct Count {
    #[serde(rename = "totalCount", default)]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemRecord {
    id: String,
    number: u64,
    author: Author,
    created_at: JsonValue,
    #[serde(default)]
    body_text: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    category: Option<JsonValue>,
    #[serde(default)]
    comments: Option<Count>,
}

#[derive(Debug, Deserialize)]
struct ParentRef {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Replies {
    #[serde(default)]
    nodes: Vec<CommentRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentRecord {
    id: String,
    author: Author,
    created_at: JsonValue,
    #[serde(default)]
    body_text: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    is_answer: bool,
    #[serde(default)]
    discussion: Option<ParentRef>,
    #[serde(default)]
    issue: Option<ParentRef>,
    #[serde(default)]
    pull_request: Option<ParentRef>,
    #[serde(default)]
    replies: Replies,
}

enum Target<'a> {
    Event(&'a RepoInfo, RepoEvent),
    Comments(&'a RepoInfo, CommentFeed, u64),
}

// ============================================================================
// Adapter
// ============================================================================

/// Adapter for repository events
pub struct RepoAdapter {
    ctx: AdapterContext,
    source: Arc<dyn PlatformSource>,
    caller: PooledCaller,
    repos: Vec<RepoInfo>,
    per_page: u32,
}

impl RepoAdapter {
    pub fn new(
        ctx: AdapterContext,
        source: Arc<dyn PlatformSource>,
        caller: PooledCaller,
        repos: Vec<RepoInfo>,
    ) -> Self {
        Self {
            ctx,
            source,
            caller,
            repos,
            per_page: 100,
        }
    }

    /// Set the page size
    #[must_use]
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    fn repo(&self, name: &str) -> Result<&RepoInfo> {
        self.repos
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::contract(format!("unknown repository {name}")))
    }

    fn target<'a>(&'a self, endpoint: &'a EndpointId) -> Result<Target<'a>> {
        match endpoint {
            EndpointId::Simple(id) => {
                let (repo, event) = id
                    .split_once('|')
                    .ok_or_else(|| Error::contract(format!("bad endpoint {id}")))?;
                Ok(Target::Event(self.repo(repo)?, event.parse()?))
            }
            EndpointId::Composite(CompositeEndpoint::Comments { repo, feed, number }) => {
                Ok(Target::Comments(self.repo(repo)?, *feed, *number))
            }
            EndpointId::Composite(_) => Err(Error::contract(format!(
                "repository adapter cannot walk endpoint {endpoint}"
            ))),
        }
    }

    fn timestamp(value: &JsonValue, id: &str) -> Result<chrono::DateTime<chrono::Utc>> {
        record_timestamp(value)
            .ok_or_else(|| Error::decode(format!("record {id} has no usable timestamp")))
    }

    fn parse_stars(records: Vec<JsonValue>, repo: &RepoInfo) -> Result<Vec<ActivityDraft>> {
        records
            .into_iter()
            .map(|record| -> Result<ActivityDraft> {
                let star: StarRecord = decode_record(record, "stargazer")?;
                let starred_at = star.starred_at.as_str().unwrap_or_default().to_string();
                let timestamp = Self::timestamp(&star.starred_at, &star.node.login)?;
                let source_id =
                    generate_source_id_hash(&star.node.login, "star", &starred_at, "github")?;
                Ok(ActivityDraft::new(
                    Platform::Github,
                    "star",
                    source_id,
                    timestamp,
                    star.node.into_member(),
                    STAR,
                )
                .with_attribute("repo", repo.url.clone()))
            })
            .collect()
    }

    fn parse_forks(records: Vec<JsonValue>, repo: &RepoInfo) -> Result<Vec<ActivityDraft>> {
        records
            .into_iter()
            .map(|record| -> Result<ActivityDraft> {
                let fork: ForkRecord = decode_record(record, "fork")?;
                let timestamp = Self::timestamp(&fork.created_at, &fork.id)?;
                Ok(ActivityDraft::new(
                    Platform::Github,
                    "fork",
                    fork.id,
                    timestamp,
                    fork.owner.into_member(),
                    FORK,
                )
                .with_attribute("repo", repo.url.clone()))
            })
            .collect()
    }

    fn parse_items(
        records: Vec<JsonValue>,
        repo: &RepoInfo,
        event: RepoEvent,
    ) -> Result<(Vec<ActivityDraft>, Vec<EndpointId>)> {
        let (activity_type, rule, feed) = match event {
            RepoEvent::Pulls => (
                "pull_request-opened",
                PULL_REQUEST_OPENED,
                CommentFeed::PullComments,
            ),
            RepoEvent::Issues => ("issues-opened", ISSUE_OPENED, CommentFeed::IssueComments),
            RepoEvent::Discussions => (
                "discussion-started",
                DISCUSSION_OPENED,
                CommentFeed::DiscussionComments,
            ),
            RepoEvent::Stargazers | RepoEvent::Forks => {
                return Err(Error::contract(format!("{event} has no items")))
            }
        };

        let mut activities = Vec::new();
        let mut appended = Vec::new();
        for record in records {
            let item: ItemRecord = decode_record(record, "item")?;
            let timestamp = Self::timestamp(&item.created_at, &item.id)?;

            let wants_comments = match event {
                RepoEvent::Discussions => item.comments.as_ref().is_some_and(|c| c.total_count > 0),
                _ => true,
            };
            if wants_comments {
                appended.push(EndpointId::composite(CompositeEndpoint::Comments {
                    repo: repo.name.clone(),
                    feed,
                    number: item.number,
                }));
            }

            let mut activity = ActivityDraft::new(
                Platform::Github,
                activity_type,
                item.id,
                timestamp,
                item.author.into_member(),
                rule,
            )
            .with_attribute("body", strip_html(&item.body_text))
            .with_attribute("url", item.url)
            .with_attribute("repo", repo.url.clone())
            .with_attribute("title", item.title);
            if let Some(state) = item.state {
                activity = activity.with_attribute("state", state.to_lowercase());
            }
            if let Some(category) = item.category {
                activity = activity.with_attribute("category", category);
            }
            activities.push(activity);
        }
        Ok((activities, appended))
    }

    fn comment_activity(
        comment: CommentRecord,
        parent: Option<String>,
        activity_type: &str,
        rule: ScoreRule,
        repo: &RepoInfo,
    ) -> Result<ActivityDraft> {
        let timestamp = Self::timestamp(&comment.created_at, &comment.id)?;
        let mut activity = ActivityDraft::new(
            Platform::Github,
            activity_type,
            comment.id,
            timestamp,
            comment.author.into_member(),
            rule,
        )
        .with_attribute("body", strip_html(&comment.body_text))
        .with_attribute("url", comment.url)
        .with_attribute("repo", repo.url.clone());
        if let Some(parent) = parent {
            activity = activity.with_parent(parent);
        }
        Ok(activity)
    }

    fn parse_comments(
        records: Vec<JsonValue>,
        repo: &RepoInfo,
        feed: CommentFeed,
    ) -> Result<Vec<ActivityDraft>> {
        let mut activities = Vec::new();
        for record in records {
            let mut comment: CommentRecord = decode_record(record, "comment")?;
            match feed {
                CommentFeed::DiscussionComments => {
                    let rule = if comment.is_answer { SELECTED_ANSWER } else { COMMENT };
                    let replies = std::mem::take(&mut comment.replies.nodes);
                    let comment_id = comment.id.clone();
                    let parent = comment.discussion.as_ref().map(|d| d.id.clone());
                    activities.push(Self::comment_activity(
                        comment,
                        parent,
                        "discussion-comment",
                        rule,
                        repo,
                    )?);
                    for reply in replies {
                        activities.push(Self::comment_activity(
                            reply,
                            Some(comment_id.clone()),
                            "discussion-comment",
                            COMMENT,
                            repo,
                        )?);
                    }
                }
                CommentFeed::IssueComments => {
                    let parent = comment.issue.as_ref().map(|i| i.id.clone());
                    activities.push(Self::comment_activity(
                        comment,
                        parent,
                        "issue-comment",
                        COMMENT,
                        repo,
                    )?);
                }
                CommentFeed::PullComments => {
                    let parent = comment.pull_request.as_ref().map(|p| p.id.clone());
                    activities.push(Self::comment_activity(
                        comment,
                        parent,
                        "pull_request-comment",
                        COMMENT,
                        repo,
                    )?);
                }
            }
        }
        Ok(activities)
    }
}

#[async_trait]
impl PlatformAdapter for RepoAdapter {
    fn platform(&self) -> Platform {
        Platform::Github
    }

    fn universe(&self) -> Vec<EndpointId> {
        self.repos
            .iter()
            .flat_map(|repo| RepoEvent::ALL.into_iter().map(|e| e.endpoint(&repo.name)))
            .collect()
    }

    async fn get(&self, endpoint: &EndpointId, page: &str) -> Result<PageResponse> {
        let (request, pointer) = match self.target(endpoint)? {
            Target::Event(repo, event) => (
                FetchRequest::new(Platform::Github, event.as_str()).with_arg(repo.name.clone()),
                event.login_pointer(),
            ),
            Target::Comments(repo, feed, number) => (
                FetchRequest::new(Platform::Github, feed.as_str())
                    .with_arg(serde_json::json!({ "repo": repo.name, "number": number })),
                "/author/login",
            ),
        };
        let request = request
            .with_page(page)
            .with_param("perPage", self.per_page);

        let source = &self.source;
        let mut response = self
            .caller
            .call("repository fetch", move |credential| {
                source.fetch(request.clone().with_credential(credential))
            })
            .await?;

        let before = response.records.len();
        response.records.retain(|r| has_login(r, pointer));
        if response.records.len() < before {
            debug!(
                %endpoint,
                dropped = before - response.records.len(),
                "Dropped records without an author"
            );
        }
        Ok(response)
    }

    async fn parse_and_write(
        &mut self,
        records: Vec<JsonValue>,
        endpoint: &EndpointId,
    ) -> Result<ParseOutcome> {
        let (activities, appended) = match self.target(endpoint)? {
            Target::Event(repo, RepoEvent::Stargazers) => {
                (Self::parse_stars(records, repo)?, Vec::new())
            }
            Target::Event(repo, RepoEvent::Forks) => {
                (Self::parse_forks(records, repo)?, Vec::new())
            }
            Target::Event(repo, event) => Self::parse_items(records, repo, event)?,
            Target::Comments(repo, feed, _) => {
                (Self::parse_comments(records, repo, feed)?, Vec::new())
            }
        };

        self.ctx
            .write(BulkOperation::UpsertActivitiesWithMembers(activities.clone()))
            .await?;

        Ok(ParseOutcome::from_activities(activities).with_appended(appended))
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
        false
    }

    async fn on_limit_reached(&mut self, handoff: &Handoff) -> Result<()> {
        let args = IntegrationArgs {
            repos: self.repos.clone(),
            ..IntegrationArgs::default()
        };
        self.ctx
            .dispatch(Integration::Github, handoff, args)
            .await
    }

    async fn on_complete(&mut self) -> Result<()> {
        self.ctx.mark_done(Integration::Github).await
    }
}

impl std::fmt::Debug for RepoAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoAdapter")
            .field("ctx", &self.ctx)
            .field("repos", &self.repos)
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}
