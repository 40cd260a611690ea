//! Store types

use crate::activity::{ActivityDraft, MemberUpdate};
use crate::adapter::ChannelInfo;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Bulk Operations
// ============================================================================

/// One bulk write sent to the activity sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "operation",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum BulkOperation {
    /// Upsert activities and create or update their members
    UpsertActivitiesWithMembers(Vec<ActivityDraft>),
    /// Update fields of existing members
    UpdateMembers(Vec<MemberUpdate>),
}

impl BulkOperation {
    /// Operation name as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            BulkOperation::UpsertActivitiesWithMembers(_) => "UPSERT_ACTIVITIES_WITH_MEMBERS",
            BulkOperation::UpdateMembers(_) => "UPDATE_MEMBERS",
        }
    }

    /// Number of items carried
    pub fn len(&self) -> usize {
        match self {
            BulkOperation::UpsertActivitiesWithMembers(items) => items.len(),
            BulkOperation::UpdateMembers(items) => items.len(),
        }
    }

    /// Check if the operation carries nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Integration Records
// ============================================================================

/// Settings an integration keeps between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationSettings {
    /// Chat channels to walk
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
    /// Known chat members, id to username
    #[serde(default)]
    pub members: BTreeMap<String, String>,
    /// Follower ids seen so far
    #[serde(default)]
    pub followers: BTreeSet<String>,
}

/// Lifecycle status of an integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrationStatus {
    #[default]
    InProgress,
    Done,
}

/// Persisted record of one integration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationRecord {
    #[serde(default)]
    pub status: IntegrationStatus,
    #[serde(default)]
    pub settings: IntegrationSettings,
}
