//! Queue message types

use crate::adapter::{ArticleInfo, RepoInfo};
use crate::checkpoint::{Checkpoint, ReachSubject};
use crate::types::Integration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Integration-specific arguments echoed in continuations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashtags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub articles: Vec<ArticleInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<RepoInfo>,
    /// Members whose reach is refreshed, before batching
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<ReachSubject>,
    /// Followers first seen earlier in this run, not yet saved to settings
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub followers: BTreeSet<String>,
}

/// Trigger and continuation message.
///
/// The same shape starts a run and hands a checkpoint to the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub integration: Integration,
    /// Where to resume; empty on the first invocation
    #[serde(default)]
    pub state: Checkpoint,
    pub tenant: String,
    /// Seconds to wait before delivery
    #[serde(default)]
    pub sleep: u64,
    #[serde(default)]
    pub onboarding: bool,
    #[serde(
        rename = "integrationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub integration_id: Option<String>,
    /// Running count against the global limit from earlier invocations
    #[serde(rename = "limitCount", default, skip_serializing_if = "is_zero")]
    pub limit_count: usize,
    #[serde(default)]
    pub args: IntegrationArgs,
}

fn is_zero(count: &usize) -> bool {
    *count == 0
}

impl TriggerMessage {
    /// First message of an integration run
    pub fn new(integration: Integration, tenant: impl Into<String>) -> Self {
        Self {
            integration,
            state: Checkpoint::empty(),
            tenant: tenant.into(),
            sleep: 0,
            onboarding: false,
            integration_id: None,
            limit_count: 0,
            args: IntegrationArgs::default(),
        }
    }

    /// Set the onboarding flag
    #[must_use]
    pub fn with_onboarding(mut self, onboarding: bool) -> Self {
        self.onboarding = onboarding;
        self
    }

    /// Set the arguments
    #[must_use]
    pub fn with_args(mut self, args: IntegrationArgs) -> Self {
        self.args = args;
        self
    }

    /// Set the resume checkpoint
    #[must_use]
    pub fn with_state(mut self, state: Checkpoint) -> Self {
        self.state = state;
        self
    }

    /// Ordering group; messages of one integration and tenant are delivered in order
    pub fn group_key(&self) -> String {
        format!("{}:{}", self.integration, self.tenant)
    }

    /// Parse a message from JSON
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One line of a JSONL queue file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub group: String,
    pub message: TriggerMessage,
}
