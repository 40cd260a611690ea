//! Canonical activity and member drafts
//!
//! Adapters turn platform records into `ActivityDraft`s; the store
//! upserts them keyed on `(platform, source_id, source_parent_id)`.

use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue, Platform};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Prefix marking source ids that were derived rather than given by the platform
pub const GENERATED_ID_PREFIX: &str = "gen-";

// ============================================================================
// Scores
// ============================================================================

/// Score and key-action flag of one activity type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreRule {
    pub score: i32,
    pub is_key_action: bool,
}

impl ScoreRule {
    pub const fn new(score: i32, is_key_action: bool) -> Self {
        Self {
            score,
            is_key_action,
        }
    }
}

// ============================================================================
// Members
// ============================================================================

/// Member identity attached to an activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberDraft {
    /// Username on the activity's platform
    pub username: String,
    /// Platform-native member id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,
    /// Follower count on the activity's platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reach: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organisation: Option<String>,
    /// Usernames on other platforms (`twitter`, `github`, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub identities: BTreeMap<String, String>,
    /// Platform-specific profile data
    #[serde(default, skip_serializing_if = "JsonObject::is_empty")]
    pub attributes: JsonObject,
}

impl MemberDraft {
    /// Create a member with a username
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    /// Set the platform member id
    #[must_use]
    pub fn with_platform_id(mut self, id: impl Into<String>) -> Self {
        self.platform_id = Some(id.into());
        self
    }

    /// Set the follower count
    #[must_use]
    pub fn with_reach(mut self, reach: i64) -> Self {
        self.reach = Some(reach);
        self
    }

    /// Link a username on another platform
    #[must_use]
    pub fn with_identity(
        mut self,
        platform: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        self.identities.insert(platform.into(), username.into());
        self
    }

    /// Add a profile attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Field update for an existing member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberUpdate {
    /// Member id in the activity store
    pub member_id: String,
    pub platform: Platform,
    /// New follower count
    pub reach: i64,
}

// ============================================================================
// Activities
// ============================================================================

/// One activity ready to be upserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDraft {
    pub platform: Platform,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub timestamp: DateTime<Utc>,
    /// Stable id; derived with [`generate_source_id_hash`] when the platform has none
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_parent_id: Option<String>,
    /// Platform-specific payload (body, url, channel, ...)
    #[serde(default)]
    pub attributes: JsonObject,
    pub member: MemberDraft,
    pub score: i32,
    pub is_key_action: bool,
}

impl ActivityDraft {
    /// Create an activity scored with `rule`
    pub fn new(
        platform: Platform,
        activity_type: impl Into<String>,
        source_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        member: MemberDraft,
        rule: ScoreRule,
    ) -> Self {
        Self {
            platform,
            activity_type: activity_type.into(),
            timestamp,
            source_id: source_id.into(),
            source_parent_id: None,
            attributes: JsonObject::new(),
            member,
            score: rule.score,
            is_key_action: rule.is_key_action,
        }
    }

    /// Set the parent source id
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.source_parent_id = Some(parent.into()).filter(|p: &String| !p.is_empty());
        self
    }

    /// Add a payload attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Idempotency key used by sinks
    pub fn dedup_key(&self) -> (Platform, String, Option<String>) {
        (
            self.platform,
            self.source_id.clone(),
            self.source_parent_id.clone(),
        )
    }
}

// ============================================================================
// Synthetic Source Ids
// ============================================================================

/// Derive a stable source id for activities the platform does not identify.
///
/// The result is `gen-` followed by the hex SHA-256 of
/// `"{member}-{type}-{timestamp}-{platform}"`.
pub fn generate_source_id_hash(
    remote_member_id: &str,
    activity_type: &str,
    timestamp: &str,
    platform: &str,
) -> Result<String> {
    if remote_member_id.is_empty()
        || activity_type.is_empty()
        || timestamp.is_empty()
        || platform.is_empty()
    {
        return Err(Error::validation("Bad hash input"));
    }

    let data = format!("{remote_member_id}-{activity_type}-{timestamp}-{platform}");
    let digest = Sha256::digest(data.as_bytes());
    Ok(format!("{GENERATED_ID_PREFIX}{}", hex::encode(digest)))
}

// ============================================================================
// Text Helpers
// ============================================================================

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

static MENTION_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<@!?([^>]*)>").unwrap());

/// Strip markup tags and trim
pub fn strip_html(text: &str) -> String {
    TAG_REGEX.replace_all(text, "").trim().to_string()
}

/// Replace `<@ID>` mention tokens with `@username`, or `@mention` when unknown
pub fn replace_mentions<'a, F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<&'a str>,
{
    MENTION_REGEX
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let id = caps.get(1).map_or("", |m| m.as_str());
            format!("@{}", lookup(id).unwrap_or("mention"))
        })
        .into_owned()
}
