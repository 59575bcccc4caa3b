//! Durable local storage for write batches that could not reach the server.

mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod file;

#[cfg(target_arch = "wasm32")]
mod indexeddb;

pub use memory::MemoryOfflineStore;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileOfflineStore;

#[cfg(target_arch = "wasm32")]
pub use indexeddb::IndexedDbOfflineStore;

use crate::platform::{BoxFuture, MaybeSend};
use crate::stroke::{PageId, Stroke};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entry not found: {0}")]
    NotFound(EntryId),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage quota exceeded")]
    QuotaExceeded,
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Auto-assigned queue entry ID. Increases monotonically per store.
pub type EntryId = u64;

/// A batch about to be queued; the store assigns the ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOfflineEntry {
    pub page_id: PageId,
    pub strokes: Vec<Stroke>,
    pub created_at: DateTime<Utc>,
}

/// A queued batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOfflineEntry {
    pub id: EntryId,
    pub page_id: PageId,
    pub strokes: Vec<Stroke>,
    pub created_at: DateTime<Utc>,
}

impl PendingOfflineEntry {
    pub fn from_new(id: EntryId, entry: NewOfflineEntry) -> Self {
        Self {
            id,
            page_id: entry.page_id,
            strokes: entry.strokes,
            created_at: entry.created_at,
        }
    }
}

/// Record store keyed by auto-increment ID with a secondary `page_id` lookup.
///
/// Implementations must survive a process restart or page reload, except
/// [`MemoryOfflineStore`], which exists for tests and ephemeral sessions.
pub trait OfflineStore: MaybeSend {
    /// Insert a record and return its assigned ID.
    fn insert(&self, entry: NewOfflineEntry) -> BoxFuture<'_, StorageResult<EntryId>>;

    /// All records in ascending ID order.
    fn get_all(&self) -> BoxFuture<'_, StorageResult<Vec<PendingOfflineEntry>>>;

    /// Records for one page in ascending ID order.
    fn get_by_page(&self, page_id: &PageId) -> BoxFuture<'_, StorageResult<Vec<PendingOfflineEntry>>>;

    /// Overwrite an existing record, keeping its ID. Fails with
    /// [`StorageError::NotFound`] if the record is gone.
    fn update(&self, entry: PendingOfflineEntry) -> BoxFuture<'_, StorageResult<()>>;

    /// Delete a record. Deleting a missing ID is not an error.
    fn delete(&self, id: EntryId) -> BoxFuture<'_, StorageResult<()>>;

    /// Number of records.
    fn count(&self) -> BoxFuture<'_, StorageResult<usize>>;
}
