//! File-based queue storage for native platforms.

use super::{BoxFuture, EntryId, NewOfflineEntry, OfflineStore, PendingOfflineEntry, StorageError, StorageResult};
use crate::stroke::PageId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const QUEUE_FILE: &str = "offline-queue.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueFile {
    next_id: EntryId,
    entries: Vec<PendingOfflineEntry>,
}

/// File-based store for native platforms.
///
/// All records live in one JSON file that is rewritten through a temporary
/// file and renamed into place, so a crash mid-write leaves the old queue.
#[derive(Debug)]
pub struct FileOfflineStore {
    /// Directory holding the queue file.
    base_path: PathBuf,
    quota_bytes: Option<usize>,
    /// Serializes read-modify-write cycles across threads.
    lock: Mutex<()>,
}

impl FileOfflineStore {
    /// Create a store in the given directory, creating it if needed.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path)
                .map_err(|e| StorageError::Io(format!("Failed to create storage directory: {}", e)))?;
        }
        Ok(Self {
            base_path,
            quota_bytes: None,
            lock: Mutex::new(()),
        })
    }

    /// Create a store in the default location.
    ///
    /// On Unix: `~/.local/share/inkpage/offline/`
    /// On Windows: `%LOCALAPPDATA%\inkpage\offline\`
    pub fn default_location() -> StorageResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;
        Self::new(base.join("inkpage").join("offline"))
    }

    /// Reject writes that would grow the queue file beyond `bytes`.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn queue_path(&self) -> PathBuf {
        self.base_path.join(QUEUE_FILE)
    }

    fn read(&self) -> StorageResult<QueueFile> {
        let path = self.queue_path();
        if !path.exists() {
            return Ok(QueueFile::default());
        }
        let json = fs::read_to_string(&path)
            .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&json)
            .map_err(|e| StorageError::Serialization(format!("Failed to parse {}: {}", path.display(), e)))
    }

    fn write(&self, queue: &QueueFile) -> StorageResult<()> {
        let json = serde_json::to_vec(queue).map_err(|e| StorageError::Serialization(e.to_string()))?;
        if let Some(quota) = self.quota_bytes {
            if json.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        let path = self.queue_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| StorageError::Io(format!("Failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| StorageError::Io(format!("Failed to replace {}: {}", path.display(), e)))
    }

    fn with_queue<T>(&self, f: impl FnOnce(&mut QueueFile) -> StorageResult<(T, bool)>) -> StorageResult<T> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
        let mut queue = self.read()?;
        let (value, dirty) = f(&mut queue)?;
        if dirty {
            self.write(&queue)?;
        }
        Ok(value)
    }
}

impl OfflineStore for FileOfflineStore {
    fn insert(&self, entry: NewOfflineEntry) -> BoxFuture<'_, StorageResult<EntryId>> {
        Box::pin(async move {
            self.with_queue(|queue| {
                queue.next_id += 1;
                let id = queue.next_id;
                queue.entries.push(PendingOfflineEntry::from_new(id, entry));
                Ok((id, true))
            })
        })
    }

    fn get_all(&self) -> BoxFuture<'_, StorageResult<Vec<PendingOfflineEntry>>> {
        Box::pin(async move {
            self.with_queue(|queue| {
                let mut entries = std::mem::take(&mut queue.entries);
                entries.sort_by_key(|e| e.id);
                Ok((entries, false))
            })
        })
    }

    fn get_by_page(&self, page_id: &PageId) -> BoxFuture<'_, StorageResult<Vec<PendingOfflineEntry>>> {
        let page_id = page_id.clone();
        Box::pin(async move {
            self.with_queue(|queue| {
                let mut entries: Vec<_> = std::mem::take(&mut queue.entries)
                    .into_iter()
                    .filter(|e| e.page_id == page_id)
                    .collect();
                entries.sort_by_key(|e| e.id);
                Ok((entries, false))
            })
        })
    }

    fn update(&self, entry: PendingOfflineEntry) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            self.with_queue(|queue| {
                let slot = queue
                    .entries
                    .iter_mut()
                    .find(|e| e.id == entry.id)
                    .ok_or(StorageError::NotFound(entry.id))?;
                *slot = entry;
                Ok(((), true))
            })
        })
    }

    fn delete(&self, id: EntryId) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            self.with_queue(|queue| {
                let before = queue.entries.len();
                queue.entries.retain(|e| e.id != id);
                Ok(((), queue.entries.len() != before))
            })
        })
    }

    fn count(&self) -> BoxFuture<'_, StorageResult<usize>> {
        Box::pin(async move { self.with_queue(|queue| Ok((queue.entries.len(), false))) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::{InkPoint, Stroke, StrokeStyle};
    use chrono::Utc;
    use pollster::block_on;
    use tempfile::tempdir;

    fn entry(page: &str) -> NewOfflineEntry {
        NewOfflineEntry {
            page_id: PageId::from(page),
            strokes: vec![Stroke::new(
                vec![InkPoint::new(0.0, 0.0, None), InkPoint::new(5.0, 5.0, Some(0.8))],
                StrokeStyle::default(),
            )],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileOfflineStore::new(dir.path().to_path_buf()).unwrap();
            block_on(store.insert(entry("p1"))).unwrap();
            block_on(store.insert(entry("p2"))).unwrap();
        }

        let store = FileOfflineStore::new(dir.path().to_path_buf()).unwrap();
        let all = block_on(store.get_all()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].page_id, PageId::from("p1"));
        assert_eq!(all[0].strokes[0].points.len(), 2);
    }

    #[test]
    fn test_file_store_ids_not_reused_after_delete() {
        let dir = tempdir().unwrap();
        let store = FileOfflineStore::new(dir.path().to_path_buf()).unwrap();
        let a = block_on(store.insert(entry("p1"))).unwrap();
        block_on(store.delete(a)).unwrap();
        let b = block_on(store.insert(entry("p1"))).unwrap();
        assert!(b > a);
        assert_eq!(block_on(store.count()).unwrap(), 1);
    }

    #[test]
    fn test_file_store_get_by_page() {
        let dir = tempdir().unwrap();
        let store = FileOfflineStore::new(dir.path().to_path_buf()).unwrap();
        block_on(store.insert(entry("p1"))).unwrap();
        block_on(store.insert(entry("p2"))).unwrap();

        let p2 = block_on(store.get_by_page(&PageId::from("p2"))).unwrap();
        assert_eq!(p2.len(), 1);
        assert!(block_on(store.get_by_page(&PageId::from("p3"))).unwrap().is_empty());
    }

    #[test]
    fn test_file_store_update_survives_reopen() {
        let dir = tempdir().unwrap();
        let store = FileOfflineStore::new(dir.path().to_path_buf()).unwrap();
        let id = block_on(store.insert(entry("p1"))).unwrap();
        let mut stored = block_on(store.get_all()).unwrap().remove(0);
        stored.strokes[0].width = 9.0;
        block_on(store.update(stored)).unwrap();

        let reopened = FileOfflineStore::new(dir.path().to_path_buf()).unwrap();
        let all = block_on(reopened.get_all()).unwrap();
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].strokes[0].width, 9.0);

        block_on(reopened.delete(id)).unwrap();
        assert!(matches!(
            block_on(reopened.update(all[0].clone())),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_file_store_quota() {
        let dir = tempdir().unwrap();
        let store = FileOfflineStore::new(dir.path().to_path_buf())
            .unwrap()
            .with_quota(32);
        let result = block_on(store.insert(entry("p1")));
        assert!(matches!(result, Err(StorageError::QuotaExceeded)));
        assert_eq!(block_on(store.count()).unwrap(), 0);
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(QUEUE_FILE), "not json").unwrap();
        let store = FileOfflineStore::new(dir.path().to_path_buf()).unwrap();
        assert!(matches!(block_on(store.count()), Err(StorageError::Serialization(_))));
    }
}
