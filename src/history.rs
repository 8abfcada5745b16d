//! Download history
//!
//! Executors report each task to a [`HistoryStore`] once its identity is known and
//! again when it reaches a terminal status. History is best effort: failures are
//! logged by the caller and never change a task's outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Identity, Status};

/// Fields of a new history record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRecord {
    /// Platform name
    pub platform: String,
    /// Canonical URL
    pub url: String,
    /// Task status at the time of recording
    pub status: Status,
    /// Items processed so far
    pub item_count: u64,
    /// Retrieval mode
    pub mode: String,
    /// Resolved identity, if any
    pub identity: Option<Identity>,
}

/// Partial update of an existing record (`None` leaves a field as is)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    /// New status
    pub status: Option<Status>,
    /// New item count
    pub item_count: Option<u64>,
    /// Retrieval mode actually used
    pub mode: Option<String>,
}

/// A stored history record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Record id
    pub id: String,
    /// Platform name
    pub platform: String,
    /// Canonical URL
    pub url: String,
    /// Last known status
    pub status: Status,
    /// Last known item count
    pub item_count: u64,
    /// Retrieval mode
    pub mode: String,
    /// Resolved identity, if any
    pub identity: Option<Identity>,
    /// How many times this subject was downloaded
    pub download_count: u32,
    /// When the record was first created
    pub created_at: DateTime<Utc>,
    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

impl HistoryRecord {
    fn same_subject(&self, record: &NewRecord) -> bool {
        if self.platform != record.platform {
            return false;
        }
        let external_id = |identity: &Option<Identity>| {
            identity
                .as_ref()
                .map(|i| i.external_id.clone())
                .filter(|id| !id.is_empty())
        };
        match (external_id(&self.identity), external_id(&record.identity)) {
            (Some(existing), Some(new)) => existing == new,
            _ => self.url == record.url,
        }
    }
}

/// Storage for download history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Add (or refresh) a record, returning its id
    async fn add_record(&self, record: NewRecord) -> Result<String>;

    /// Update fields of an existing record
    async fn update_record(&self, record_id: &str, update: RecordUpdate) -> Result<()>;
}

/// Records kept by [`MemoryHistory::new`]
pub const DEFAULT_MAX_RECORDS: usize = 1000;

/// In-memory history, newest first
///
/// Records are de-duplicated per platform by external id (or URL when either
/// side has no external id). Re-adding a known subject moves its record to the
/// front and bumps its download count. Once `max_records` is reached the
/// oldest records are dropped.
#[derive(Debug)]
pub struct MemoryHistory {
    records: tokio::sync::Mutex<Vec<HistoryRecord>>,
    max_records: usize,
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_RECORDS)
    }
}

impl MemoryHistory {
    /// Create an empty history keeping at most [`DEFAULT_MAX_RECORDS`] records
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty history keeping at most `max_records` records (at least one)
    pub fn with_limit(max_records: usize) -> Self {
        Self {
            records: tokio::sync::Mutex::new(Vec::new()),
            max_records: max_records.max(1),
        }
    }

    /// All records, newest first
    pub async fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().await.clone()
    }

    /// Look up a record by id
    pub async fn get(&self, record_id: &str) -> Option<HistoryRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.id == record_id)
            .cloned()
    }

    /// Delete every record
    pub async fn clear(&self) {
        self.records.lock().await.clear();
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn add_record(&self, record: NewRecord) -> Result<String> {
        let mut records = self.records.lock().await;
        let now = Utc::now();

        if let Some(pos) = records.iter().position(|r| r.same_subject(&record)) {
            let mut existing = records.remove(pos);
            existing.url = record.url;
            existing.status = record.status;
            existing.item_count = record.item_count;
            existing.mode = record.mode;
            if record.identity.as_ref().is_some_and(|i| !i.is_empty()) {
                existing.identity = record.identity;
            }
            existing.download_count = existing.download_count.saturating_add(1);
            existing.updated_at = now;
            let id = existing.id.clone();
            records.insert(0, existing);
            return Ok(id);
        }

        let id = uuid::Uuid::new_v4().to_string();
        records.insert(
            0,
            HistoryRecord {
                id: id.clone(),
                platform: record.platform,
                url: record.url,
                status: record.status,
                item_count: record.item_count,
                mode: record.mode,
                identity: record.identity,
                download_count: 1,
                created_at: now,
                updated_at: now,
            },
        );
        if records.len() > self.max_records {
            let dropped = records.len() - self.max_records;
            records.truncate(self.max_records);
            tracing::debug!(dropped, max_records = self.max_records, "Trimmed oldest history records");
        }
        Ok(id)
    }

    async fn update_record(&self, record_id: &str, update: RecordUpdate) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| Error::Other(format!("history record {record_id} not found")))?;

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(item_count) = update.item_count {
            record.item_count = item_count;
        }
        if let Some(mode) = update.mode {
            record.mode = mode;
        }
        record.updated_at = Utc::now();
        Ok(())
    }
}
