//! File-backed integration store
//!
//! Records are kept in memory and written to a JSON file with atomic
//! writes after every change.

use super::types::{IntegrationRecord, IntegrationSettings, IntegrationStatus};
use super::IntegrationStore;
use crate::error::{Error, Result};
use crate::types::Integration;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

type Records = BTreeMap<String, IntegrationRecord>;

fn record_key(tenant: &str, integration: Integration) -> String {
    format!("{tenant}:{integration}")
}

/// Integration store persisted as one JSON object keyed `tenant:integration`
#[derive(Debug)]
pub struct FileIntegrationStore {
    /// Path to the store file; empty in memory mode
    path: PathBuf,
    records: Arc<RwLock<Records>>,
}

impl FileIntegrationStore {
    /// Create a store at `path` without reading it
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            records: Arc::new(RwLock::new(Records::new())),
        }
    }

    /// Create an in-memory store (no file persistence)
    pub fn in_memory() -> Self {
        Self::new(PathBuf::new())
    }

    /// Create a store from a file, loading existing records if present
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::settings(format!("Failed to read store file: {e}")))?;
            serde_json::from_str(&contents)
                .map_err(|e| Error::settings(format!("Failed to parse store file: {e}")))?
        } else {
            Records::new()
        };

        Ok(Self {
            path,
            records: Arc::new(RwLock::new(records)),
        })
    }

    /// Get the store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if using in-memory mode
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    /// Snapshot of one record
    pub async fn record(
        &self,
        tenant: &str,
        integration: Integration,
    ) -> Option<IntegrationRecord> {
        self.records
            .read()
            .await
            .get(&record_key(tenant, integration))
            .cloned()
    }

    async fn update<F>(&self, tenant: &str, integration: Integration, f: F) -> Result<()>
    where
        F: FnOnce(&mut IntegrationRecord) + Send,
    {
        {
            let mut records = self.records.write().await;
            f(records.entry(record_key(tenant, integration)).or_default());
        }
        self.save().await
    }

    /// Save all records to file
    pub async fn save(&self) -> Result<()> {
        if self.is_in_memory() {
            return Ok(());
        }

        let records = self.records.read().await;
        let contents = serde_json::to_string_pretty(&*records)
            .map_err(|e| Error::settings(format!("Failed to serialize store: {e}")))?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::settings(format!("Failed to write store file: {e}")))?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::settings(format!("Failed to rename store file: {e}")))?;

        Ok(())
    }
}

impl Clone for FileIntegrationStore {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            records: Arc::clone(&self.records),
        }
    }
}

#[async_trait]
impl IntegrationStore for FileIntegrationStore {
    async fn load_settings(
        &self,
        tenant: &str,
        integration: Integration,
    ) -> Result<IntegrationSettings> {
        Ok(self
            .record(tenant, integration)
            .await
            .map(|r| r.settings)
            .unwrap_or_default())
    }

    async fn save_settings(
        &self,
        tenant: &str,
        integration: Integration,
        settings: &IntegrationSettings,
    ) -> Result<()> {
        let settings = settings.clone();
        self.update(tenant, integration, move |record| record.settings = settings)
            .await
    }

    async fn mark_done(&self, tenant: &str, integration: Integration) -> Result<()> {
        self.update(tenant, integration, |record| {
            record.status = IntegrationStatus::Done;
        })
        .await
    }

    async fn status(
        &self,
        tenant: &str,
        integration: Integration,
    ) -> Result<Option<IntegrationStatus>> {
        Ok(self.record(tenant, integration).await.map(|r| r.status))
    }
}
