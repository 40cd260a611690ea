//! Chat workspace adapter
//!
//! Endpoints are `members` followed by one endpoint per channel. Messages
//! that start a thread splice a thread endpoint directly after their
//! channel, so replies are fetched before the next channel.

use super::{
    decode_record, record_timestamp, AdapterContext, ChannelInfo, FetchRequest, PlatformAdapter,
    PlatformSource,
};
use crate::activity::{replace_mentions, strip_html, ActivityDraft, MemberDraft, ScoreRule};
use crate::checkpoint::{CompositeEndpoint, EndpointId};
use crate::engine::{
    is_retrospect_over, Handoff, LastRecord, PageResponse, ParseOutcome, RateSignal,
};
use crate::error::{Error, Result};
use crate::http::RetryPolicy;
use crate::queue::IntegrationArgs;
use crate::store::{BulkOperation, IntegrationSettings};
use crate::types::{Integration, JsonValue, Platform};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Fixed endpoint listing workspace members
pub const MEMBERS_ENDPOINT: &str = "members";

/// The platform's own bot user
const PLATFORM_BOT: &str = "Slackbot";

const JOIN: ScoreRule = ScoreRule::new(3, false);
const MESSAGE: ScoreRule = ScoreRule::new(6, true);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberRecord {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    is_bot: bool,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    created_at: JsonValue,
    #[serde(default)]
    author: Option<Author>,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    reactions: Vec<JsonValue>,
    #[serde(default)]
    attachments: Vec<JsonValue>,
    #[serde(default)]
    has_thread: bool,
    #[serde(default)]
    thread_id: Option<String>,
}

enum Target<'a> {
    Members,
    Channel(&'a ChannelInfo),
    Thread {
        thread_id: &'a str,
        channel: &'a str,
        channel_id: &'a str,
        placeholder: &'a str,
        is_new: bool,
    },
}

/// Adapter for a chat workspace
pub struct ChatAdapter {
    ctx: AdapterContext,
    source: Arc<dyn PlatformSource>,
    guild_id: String,
    settings: IntegrationSettings,
    channels: HashMap<String, ChannelInfo>,
    known_at_start: BTreeSet<String>,
    retry: RetryPolicy,
    max_retrospect: Duration,
    per_page: u32,
}

impl ChatAdapter {
    /// Default retrospect window (one hour)
    pub const DEFAULT_MAX_RETROSPECT: Duration = Duration::from_secs(3600);

    /// Create an adapter from previously saved settings
    pub fn new(
        ctx: AdapterContext,
        source: Arc<dyn PlatformSource>,
        guild_id: impl Into<String>,
        settings: IntegrationSettings,
    ) -> Self {
        let channels = settings
            .channels
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();
        let known_at_start = settings.members.keys().cloned().collect();

        Self {
            ctx,
            source,
            guild_id: guild_id.into(),
            settings,
            channels,
            known_at_start,
            retry: RetryPolicy::default(),
            max_retrospect: Self::DEFAULT_MAX_RETROSPECT,
            per_page: 200,
        }
    }

    /// Create an adapter with settings read from the integration store
    pub async fn load(
        ctx: AdapterContext,
        source: Arc<dyn PlatformSource>,
        guild_id: impl Into<String>,
    ) -> Result<Self> {
        let settings = ctx.load_settings(Integration::Slack).await?;
        Ok(Self::new(ctx, source, guild_id, settings))
    }

    /// Set the gateway retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the retrospect window
    #[must_use]
    pub fn with_max_retrospect(mut self, max_retrospect: Duration) -> Self {
        self.max_retrospect = max_retrospect;
        self
    }

    /// Known members, id to username
    pub fn members(&self) -> &BTreeMap<String, String> {
        &self.settings.members
    }

    fn target<'a>(&'a self, endpoint: &'a EndpointId) -> Result<Target<'a>> {
        match endpoint {
            EndpointId::Simple(id) if id == MEMBERS_ENDPOINT => Ok(Target::Members),
            EndpointId::Simple(id) => self
                .channels
                .get(id)
                .map(Target::Channel)
                .ok_or_else(|| Error::contract(format!("unknown channel {id}"))),
            EndpointId::Composite(CompositeEndpoint::Thread {
                thread_id,
                channel,
                channel_id,
                placeholder,
                is_new,
            }) => Ok(Target::Thread {
                thread_id,
                channel,
                channel_id,
                placeholder,
                is_new: *is_new,
            }),
            EndpointId::Composite(_) => Err(Error::contract(format!(
                "chat adapter cannot walk endpoint {endpoint}"
            ))),
        }
    }

    fn username<'a>(&'a self, author: Option<&'a Author>) -> Option<(&'a str, &'a str)> {
        let author = author?;
        self.settings
            .members
            .get(&author.id)
            .map(|name| (author.id.as_str(), name.as_str()))
    }

    fn render_body(&self, text: Option<&str>) -> String {
        let text = text.unwrap_or_default();
        let members = &self.settings.members;
        strip_html(&replace_mentions(text, |id| members.get(id).map(String::as_str)))
    }

    fn join_timestamp(&self) -> DateTime<Utc> {
        if self.ctx.onboarding {
            DateTime::UNIX_EPOCH
        } else {
            Utc::now()
        }
    }

    fn parse_members(&mut self, records: Vec<JsonValue>) -> Result<ParseOutcome> {
        let record_count = records.len();
        let timestamp = self.join_timestamp();
        let mut activities = Vec::new();
        let mut last_id = None;

        for record in records {
            let member: MemberRecord = decode_record(record, "member")?;
            last_id = Some(member.id.clone());

            if member.is_bot
                || member.username == PLATFORM_BOT
                || self.settings.members.contains_key(&member.id)
            {
                continue;
            }

            self.settings
                .members
                .insert(member.id.clone(), member.username.clone());
            activities.push(ActivityDraft::new(
                Platform::Slack,
                "channel_joined",
                member.id.clone(),
                timestamp,
                MemberDraft::new(member.username).with_platform_id(member.id),
                JOIN,
            ));
        }

        Ok(ParseOutcome {
            last_record: last_id.map(|source_id| LastRecord {
                source_id,
                timestamp,
            }),
            record_count,
            activities,
            ..ParseOutcome::default()
        })
    }

    fn message_activity(
        &self,
        message: &MessageRecord,
        channel: &str,
    ) -> Result<Option<ActivityDraft>> {
        if message.is_bot {
            return Ok(None);
        }
        let Some((author_id, username)) = self.username(message.author.as_ref()) else {
            return Ok(None);
        };

        let timestamp = record_timestamp(&message.created_at).ok_or_else(|| {
            Error::decode(format!("message {} has no usable timestamp", message.id))
        })?;

        let activity = ActivityDraft::new(
            Platform::Slack,
            "message",
            message.id.clone(),
            timestamp,
            MemberDraft::new(username).with_platform_id(author_id),
            MESSAGE,
        )
        .with_attribute("body", self.render_body(message.text.as_deref()))
        .with_attribute("url", message.url.clone().unwrap_or_default())
        .with_attribute("channel", channel)
        .with_attribute("reactions", message.reactions.clone())
        .with_attribute("attachments", message.attachments.clone());

        Ok(Some(activity))
    }

    fn parse_channel(
        &self,
        records: Vec<JsonValue>,
        channel: &ChannelInfo,
    ) -> Result<ParseOutcome> {
        let record_count = records.len();
        let mut activities = Vec::new();
        let mut discovered = Vec::new();

        for record in records {
            let message: MessageRecord = decode_record(record, "message")?;
            let Some(activity) = self.message_activity(&message, &channel.name)? else {
                continue;
            };
            let activity = activity.with_attribute("thread", false);

            if message.has_thread {
                if let Some(thread_id) = message.thread_id.clone() {
                    let placeholder = self.render_body(message.text.as_deref());
                    debug!(channel = %channel.id, thread_id, "Discovered thread");
                    discovered.push(EndpointId::composite(CompositeEndpoint::Thread {
                        thread_id,
                        channel: channel.name.clone(),
                        channel_id: channel.id.clone(),
                        placeholder,
                        is_new: channel.new,
                    }));
                }
            }
            activities.push(activity);
        }

        Ok(ParseOutcome {
            record_count,
            ..ParseOutcome::from_activities(activities)
        }
        .with_discovered(discovered))
    }

    fn parse_thread(
        &self,
        records: Vec<JsonValue>,
        thread_id: &str,
        channel: &str,
        placeholder: &str,
    ) -> Result<ParseOutcome> {
        let record_count = records.len();
        let thread = serde_json::json!({
            "body": strip_html(placeholder),
            "id": thread_id,
        });
        let mut activities = Vec::new();

        for record in records {
            let message: MessageRecord = decode_record(record, "thread message")?;
            if let Some(activity) = self.message_activity(&message, channel)? {
                activities.push(
                    activity
                        .with_parent(thread_id)
                        .with_attribute("thread", thread.clone()),
                );
            }
        }

        Ok(ParseOutcome {
            record_count,
            ..ParseOutcome::from_activities(activities)
        })
    }
}

#[async_trait]
impl PlatformAdapter for ChatAdapter {
    fn platform(&self) -> Platform {
        Platform::Slack
    }

    fn universe(&self) -> Vec<EndpointId> {
        std::iter::once(EndpointId::simple(MEMBERS_ENDPOINT))
            .chain(
                self.settings
                    .channels
                    .iter()
                    .map(|c| EndpointId::simple(c.id.clone())),
            )
            .collect()
    }

    async fn get(&self, endpoint: &EndpointId, page: &str) -> Result<PageResponse> {
        let request = FetchRequest::new(Platform::Slack, "messages")
            .with_page(page)
            .with_param("perPage", self.per_page);

        let request = match self.target(endpoint)? {
            Target::Members => FetchRequest {
                usecase: "members".to_string(),
                arg: self.guild_id.clone().into(),
                ..request
            },
            Target::Channel(channel) => request.with_arg(channel.id.clone()),
            Target::Thread {
                thread_id,
                channel_id,
                ..
            } => FetchRequest {
                usecase: "thread-messages".to_string(),
                arg: serde_json::json!({ "channelId": channel_id, "threadId": thread_id }),
                ..request
            },
        };

        let source = &self.source;
        self.retry
            .run("chat fetch", move || source.fetch(request.clone()))
            .await
    }

    async fn parse_and_write(
        &mut self,
        records: Vec<JsonValue>,
        endpoint: &EndpointId,
    ) -> Result<ParseOutcome> {
        let outcome = match self.target(endpoint)? {
            Target::Members => self.parse_members(records)?,
            Target::Channel(channel) => self.parse_channel(records, channel)?,
            Target::Thread {
                thread_id,
                channel,
                placeholder,
                ..
            } => self.parse_thread(records, thread_id, channel, placeholder)?,
        };

        self.ctx
            .write(BulkOperation::UpsertActivitiesWithMembers(
                outcome.activities.clone(),
            ))
            .await?;
        Ok(outcome)
    }

    fn is_limit_reached(&self, _rate: &RateSignal) -> bool {
        false
    }

    fn is_endpoint_finished(
        &self,
        endpoint: &EndpointId,
        last: &LastRecord,
        _activities: &[ActivityDraft],
    ) -> bool {
        let is_new = match self.target(endpoint) {
            Ok(Target::Members) => return self.known_at_start.contains(&last.source_id),
            Ok(Target::Channel(channel)) => channel.new,
            Ok(Target::Thread { is_new, .. }) => is_new,
            Err(_) => return true,
        };
        !is_new && is_retrospect_over(last, self.ctx.started_at, self.max_retrospect)
    }

    async fn on_limit_reached(&mut self, handoff: &Handoff) -> Result<()> {
        let args = IntegrationArgs {
            guild_id: Some(self.guild_id.clone()),
            ..IntegrationArgs::default()
        };
        self.ctx
            .dispatch(Integration::Slack, handoff, args)
            .await
    }

    async fn on_complete(&mut self) -> Result<()> {
        for channel in &mut self.settings.channels {
            channel.new = false;
        }
        self.ctx
            .save_settings(Integration::Slack, &self.settings)
            .await?;
        self.ctx.mark_done(Integration::Slack).await
    }
}

impl std::fmt::Debug for ChatAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatAdapter")
            .field("ctx", &self.ctx)
            .field("guild_id", &self.guild_id)
            .field("channels", &self.channels.len())
            .field("members", &self.settings.members.len())
            .finish_non_exhaustive()
    }
}
