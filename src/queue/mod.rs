//! Continuation queue module
//!
//! Delivery of trigger and continuation messages.
//!
//! # Overview
//!
//! The queue module provides:
//! - `TriggerMessage` - Inbound trigger, identical to the outbound continuation
//! - `ContinuationQueue` - Publish contract, partitioned by `(integration, tenant)`
//! - `MemoryQueue` - FIFO per group, for tests and embedding
//! - `JsonlQueue` - Appends one JSON line per message

mod types;

pub use types::{IntegrationArgs, QueueEntry, TriggerMessage};

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Destination of continuation messages
#[async_trait]
pub trait ContinuationQueue: Send + Sync {
    /// Publish a message in its ordering group
    async fn publish(&self, message: TriggerMessage) -> Result<()>;
}

// ============================================================================
// Memory Queue
// ============================================================================

/// In-process queue keeping one FIFO per ordering group
#[derive(Debug, Default)]
pub struct MemoryQueue {
    groups: Arc<Mutex<BTreeMap<String, VecDeque<TriggerMessage>>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest message of `group`
    pub async fn pop(&self, group: &str) -> Option<TriggerMessage> {
        let mut groups = self.groups.lock().await;
        let queue = groups.get_mut(group)?;
        let message = queue.pop_front();
        if queue.is_empty() {
            groups.remove(group);
        }
        message
    }

    /// Messages pending in `group`, oldest first
    pub async fn pending(&self, group: &str) -> Vec<TriggerMessage> {
        let groups = self.groups.lock().await;
        groups
            .get(group)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of pending messages
    pub async fn len(&self) -> usize {
        self.groups.lock().await.values().map(VecDeque::len).sum()
    }

    /// Check if nothing is pending
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Clone for MemoryQueue {
    fn clone(&self) -> Self {
        Self {
            groups: Arc::clone(&self.groups),
        }
    }
}

#[async_trait]
impl ContinuationQueue for MemoryQueue {
    async fn publish(&self, message: TriggerMessage) -> Result<()> {
        let group = message.group_key();
        debug!(%group, sleep = message.sleep, "Queued message");
        self.groups
            .lock()
            .await
            .entry(group)
            .or_default()
            .push_back(message);
        Ok(())
    }
}

// ============================================================================
// JSONL Queue
// ============================================================================

/// Queue appending `{"group", "message"}` lines to a file
#[derive(Debug)]
pub struct JsonlQueue {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonlQueue {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Get the queue file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry written so far
    pub async fn read_all(&self) -> Result<Vec<QueueEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::queue(format!("Failed to read queue file: {e}")))?;

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| Error::queue(format!("Malformed queue entry: {e}")))
            })
            .collect()
    }
}

impl Clone for JsonlQueue {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            lock: Arc::clone(&self.lock),
        }
    }
}

#[async_trait]
impl ContinuationQueue for JsonlQueue {
    async fn publish(&self, message: TriggerMessage) -> Result<()> {
        let entry = QueueEntry {
            group: message.group_key(),
            message,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::queue(format!("Failed to open queue file: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::queue(format!("Failed to write queue file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| Error::queue(format!("Failed to write queue file: {e}")))?;

        debug!(group = %entry.group, path = %self.path.display(), "Appended message");
        Ok(())
    }
}
