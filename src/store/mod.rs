//! Activity sink and integration store module
//!
//! Downstream collaborators of the adapters.
//!
//! # Overview
//!
//! The store module provides:
//! - `ActivitySink` - Receives bulk operations; must be idempotent
//! - `IntegrationStore` - Integration settings and completion status
//! - `MemorySink` / `JsonlSink` - Sink implementations
//! - `FileIntegrationStore` - JSON file store with atomic writes

mod file;
mod types;

pub use file::FileIntegrationStore;
pub use types::{
    BulkOperation, IntegrationRecord, IntegrationSettings, IntegrationStatus,
};

use crate::activity::{ActivityDraft, MemberUpdate};
use crate::error::{Error, Result};
use crate::types::{Integration, Platform};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

// ============================================================================
// Traits
// ============================================================================

/// Destination of parsed activities.
///
/// Replaying an operation must not duplicate activities: upserts are keyed
/// on `(platform, source_id, source_parent_id)`.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Apply one bulk operation for `tenant`
    async fn bulk(&self, tenant: &str, operation: BulkOperation) -> Result<()>;
}

/// Integration settings and status
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    /// Settings of the integration; defaults when none were saved
    async fn load_settings(
        &self,
        tenant: &str,
        integration: Integration,
    ) -> Result<IntegrationSettings>;

    /// Replace the settings of the integration
    async fn save_settings(
        &self,
        tenant: &str,
        integration: Integration,
        settings: &IntegrationSettings,
    ) -> Result<()>;

    /// Mark the integration as done
    async fn mark_done(&self, tenant: &str, integration: Integration) -> Result<()>;

    /// Current status, if the integration is known
    async fn status(
        &self,
        tenant: &str,
        integration: Integration,
    ) -> Result<Option<IntegrationStatus>>;
}

// ============================================================================
// Memory Sink
// ============================================================================

type ActivityKey = (Platform, String, Option<String>);

#[derive(Debug, Default)]
struct SinkState {
    activities: Vec<ActivityDraft>,
    index: HashMap<ActivityKey, usize>,
    member_updates: Vec<MemberUpdate>,
    operations: usize,
}

/// In-process sink; replays overwrite in place
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored activities in first-seen order
    pub async fn activities(&self) -> Vec<ActivityDraft> {
        self.state.lock().await.activities.clone()
    }

    /// Member updates in arrival order
    pub async fn member_updates(&self) -> Vec<MemberUpdate> {
        self.state.lock().await.member_updates.clone()
    }

    /// Number of bulk operations received
    pub async fn operations(&self) -> usize {
        self.state.lock().await.operations
    }
}

impl Clone for MemorySink {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl ActivitySink for MemorySink {
    async fn bulk(&self, tenant: &str, operation: BulkOperation) -> Result<()> {
        let mut state = self.state.lock().await;
        state.operations += 1;

        match operation {
            BulkOperation::UpsertActivitiesWithMembers(activities) => {
                for activity in activities {
                    let key = activity.dedup_key();
                    match state.index.get(&key).copied() {
                        Some(position) => state.activities[position] = activity,
                        None => {
                            let position = state.activities.len();
                            state.index.insert(key, position);
                            state.activities.push(activity);
                        }
                    }
                }
            }
            BulkOperation::UpdateMembers(updates) => state.member_updates.extend(updates),
        }

        debug!(tenant, stored = state.activities.len(), "Applied bulk operation");
        Ok(())
    }
}

// ============================================================================
// JSONL Sink
// ============================================================================

#[derive(Serialize)]
struct SinkLine<'a> {
    tenant: &'a str,
    #[serde(flatten)]
    operation: &'a BulkOperation,
}

/// Sink appending one JSON line per bulk operation
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonlSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Get the output file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Clone for JsonlSink {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            lock: Arc::clone(&self.lock),
        }
    }
}

#[async_trait]
impl ActivitySink for JsonlSink {
    async fn bulk(&self, tenant: &str, operation: BulkOperation) -> Result<()> {
        let mut line = serde_json::to_string(&SinkLine {
            tenant,
            operation: &operation,
        })?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::sink(format!("Failed to open output file: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::sink(format!("Failed to write output file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| Error::sink(format!("Failed to write output file: {e}")))?;
        Ok(())
    }
}
