//! In-memory queue storage.

use super::{BoxFuture, EntryId, NewOfflineEntry, OfflineStore, PendingOfflineEntry, StorageError, StorageResult};
use crate::stroke::PageId;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    next_id: EntryId,
    entries: BTreeMap<EntryId, (PendingOfflineEntry, usize)>,
    used_bytes: usize,
}

/// In-memory store for testing and ephemeral use.
///
/// An optional byte quota emulates browser storage exhaustion.
#[derive(Debug, Default)]
pub struct MemoryOfflineStore {
    inner: RwLock<Inner>,
    quota_bytes: Option<usize>,
}

impl MemoryOfflineStore {
    /// Create a new empty store without a quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects inserts once the serialized records exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            inner: RwLock::default(),
            quota_bytes: Some(bytes),
        }
    }
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl OfflineStore for MemoryOfflineStore {
    fn insert(&self, entry: NewOfflineEntry) -> BoxFuture<'_, StorageResult<EntryId>> {
        Box::pin(async move {
            let size = serde_json::to_vec(&entry)
                .map_err(|e| StorageError::Serialization(e.to_string()))?
                .len();
            let mut inner = self.inner.write().map_err(lock_error)?;
            if let Some(quota) = self.quota_bytes {
                if inner.used_bytes + size > quota {
                    return Err(StorageError::QuotaExceeded);
                }
            }
            inner.next_id += 1;
            let id = inner.next_id;
            inner.used_bytes += size;
            inner
                .entries
                .insert(id, (PendingOfflineEntry::from_new(id, entry), size));
            Ok(id)
        })
    }

    fn get_all(&self) -> BoxFuture<'_, StorageResult<Vec<PendingOfflineEntry>>> {
        Box::pin(async move {
            let inner = self.inner.read().map_err(lock_error)?;
            Ok(inner.entries.values().map(|(e, _)| e.clone()).collect())
        })
    }

    fn get_by_page(&self, page_id: &PageId) -> BoxFuture<'_, StorageResult<Vec<PendingOfflineEntry>>> {
        let page_id = page_id.clone();
        Box::pin(async move {
            let inner = self.inner.read().map_err(lock_error)?;
            Ok(inner
                .entries
                .values()
                .filter(|(e, _)| e.page_id == page_id)
                .map(|(e, _)| e.clone())
                .collect())
        })
    }

    fn update(&self, entry: PendingOfflineEntry) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let size = serde_json::to_vec(&entry)
                .map_err(|e| StorageError::Serialization(e.to_string()))?
                .len();
            let mut inner = self.inner.write().map_err(lock_error)?;
            let old_size = match inner.entries.get(&entry.id) {
                Some((_, old_size)) => *old_size,
                None => return Err(StorageError::NotFound(entry.id)),
            };
            inner.used_bytes = inner.used_bytes.saturating_sub(old_size) + size;
            inner.entries.insert(entry.id, (entry, size));
            Ok(())
        })
    }

    fn delete(&self, id: EntryId) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let mut inner = self.inner.write().map_err(lock_error)?;
            if let Some((_, size)) = inner.entries.remove(&id) {
                inner.used_bytes -= size;
            }
            Ok(())
        })
    }

    fn count(&self) -> BoxFuture<'_, StorageResult<usize>> {
        Box::pin(async move {
            let inner = self.inner.read().map_err(lock_error)?;
            Ok(inner.entries.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::{InkPoint, Stroke, StrokeStyle};
    use chrono::Utc;
    use pollster::block_on;

    fn entry(page: &str) -> NewOfflineEntry {
        NewOfflineEntry {
            page_id: PageId::from(page),
            strokes: vec![Stroke::new(
                vec![InkPoint::new(0.0, 0.0, None), InkPoint::new(1.0, 1.0, None)],
                StrokeStyle::default(),
            )],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let store = MemoryOfflineStore::new();
        let a = block_on(store.insert(entry("p1"))).unwrap();
        let b = block_on(store.insert(entry("p1"))).unwrap();
        assert!(b > a);
        assert_eq!(block_on(store.count()).unwrap(), 2);
    }

    #[test]
    fn test_get_by_page() {
        let store = MemoryOfflineStore::new();
        block_on(store.insert(entry("p1"))).unwrap();
        block_on(store.insert(entry("p2"))).unwrap();
        block_on(store.insert(entry("p1"))).unwrap();

        let p1 = block_on(store.get_by_page(&PageId::from("p1"))).unwrap();
        assert_eq!(p1.len(), 2);
        assert!(p1[0].id < p1[1].id);
    }

    #[test]
    fn test_delete() {
        let store = MemoryOfflineStore::new();
        let id = block_on(store.insert(entry("p1"))).unwrap();
        block_on(store.delete(id)).unwrap();
        block_on(store.delete(id)).unwrap();
        assert_eq!(block_on(store.count()).unwrap(), 0);
    }

    #[test]
    fn test_update_keeps_id() {
        let store = MemoryOfflineStore::new();
        let id = block_on(store.insert(entry("p1"))).unwrap();
        let mut stored = block_on(store.get_all()).unwrap().remove(0);
        stored.strokes.clear();
        block_on(store.update(stored)).unwrap();

        let all = block_on(store.get_all()).unwrap();
        assert_eq!(all[0].id, id);
        assert!(all[0].strokes.is_empty());

        block_on(store.delete(id)).unwrap();
        let missing = block_on(store.update(all[0].clone()));
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_quota_exceeded() {
        let store = MemoryOfflineStore::with_quota(16);
        let result = block_on(store.insert(entry("p1")));
        assert!(matches!(result, Err(StorageError::QuotaExceeded)));
        assert_eq!(block_on(store.count()).unwrap(), 0);
    }
}
