//! Durable queue of save batches that did not reach the server.
//!
//! Queue failures are soft: they are logged and reported as `None`/empty so the
//! capture pipeline never sees a storage error.

use crate::storage::{EntryId, NewOfflineEntry, OfflineStore, PendingOfflineEntry};
use crate::stroke::{PageId, Stroke, StrokeId};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Cloneable handle; clones share the same store.
#[derive(Clone)]
pub struct OfflineQueue {
    store: Arc<dyn OfflineStore>,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue").finish_non_exhaustive()
    }
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn OfflineStore>) -> Self {
        Self { store }
    }

    /// Queue a batch. Returns `None` if the store refused it (quota, I/O).
    pub async fn enqueue(&self, page_id: &PageId, strokes: Vec<Stroke>) -> Option<EntryId> {
        let count = strokes.len();
        let entry = NewOfflineEntry {
            page_id: page_id.clone(),
            strokes,
            created_at: Utc::now(),
        };
        match self.store.insert(entry).await {
            Ok(id) => {
                log::info!("Queued {} strokes for page {} offline (entry {})", count, page_id, id);
                Some(id)
            }
            Err(e) => {
                log::error!("Dropped {} strokes for page {}: offline queue write failed: {}", count, page_id, e);
                None
            }
        }
    }

    /// All entries in ascending ID order, without removing them.
    pub async fn peek_all(&self) -> Vec<PendingOfflineEntry> {
        self.store.get_all().await.unwrap_or_else(|e| {
            log::warn!("Failed to read offline queue: {}", e);
            Vec::new()
        })
    }

    pub async fn peek_page(&self, page_id: &PageId) -> Vec<PendingOfflineEntry> {
        self.store.get_by_page(page_id).await.unwrap_or_else(|e| {
            log::warn!("Failed to read offline queue for page {}: {}", page_id, e);
            Vec::new()
        })
    }

    /// Returns false if the store failed; the entry may then be replayed again.
    pub async fn remove(&self, id: EntryId) -> bool {
        match self.store.delete(id).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to remove offline entry {}: {}", id, e);
                false
            }
        }
    }

    /// Take a stroke out of every queued batch for the page, deleting batches
    /// left empty, so an erased or undone stroke is never replayed. Returns
    /// whether any batch held it.
    pub async fn withdraw(&self, page_id: &PageId, stroke_id: &StrokeId) -> bool {
        let mut withdrawn = false;
        for mut entry in self.peek_page(page_id).await {
            let before = entry.strokes.len();
            entry.strokes.retain(|s| &s.id != stroke_id);
            if entry.strokes.len() == before {
                continue;
            }
            let id = entry.id;
            let result = if entry.strokes.is_empty() {
                self.store.delete(id).await
            } else {
                self.store.update(entry).await
            };
            match result {
                Ok(()) => {
                    log::debug!("Withdrew stroke {} from offline entry {}", stroke_id, id);
                    withdrawn = true;
                }
                Err(e) => log::warn!("Failed to withdraw stroke {} from offline entry {}: {}", stroke_id, id, e),
            }
        }
        withdrawn
    }

    pub async fn count(&self) -> usize {
        self.store.count().await.unwrap_or_else(|e| {
            log::warn!("Failed to count offline queue: {}", e);
            0
        })
    }

    /// Delete entries created more than `max_age` ago. Returns how many went.
    pub async fn purge_stale(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;
        let mut purged = 0;
        for entry in self.peek_all().await {
            if entry.created_at < cutoff && self.remove(entry.id).await {
                log::error!(
                    "Purged stale offline entry {} ({} strokes for page {})",
                    entry.id,
                    entry.strokes.len(),
                    entry.page_id
                );
                purged += 1;
            }
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryOfflineStore;
    use crate::stroke::{InkPoint, StrokeStyle};
    use pollster::block_on;

    fn stroke() -> Stroke {
        Stroke::new(
            vec![InkPoint::new(0.0, 0.0, None), InkPoint::new(3.0, 4.0, None)],
            StrokeStyle::default(),
        )
    }

    #[test]
    fn test_enqueue_and_peek_is_non_destructive() {
        let queue = OfflineQueue::new(Arc::new(MemoryOfflineStore::new()));
        let page = PageId::from("p1");
        let batch = vec![stroke(), stroke()];

        let id = block_on(queue.enqueue(&page, batch.clone())).unwrap();
        let entries = block_on(queue.peek_all());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].strokes, batch);
        assert_eq!(block_on(queue.count()), 1);

        assert!(block_on(queue.remove(id)));
        assert_eq!(block_on(queue.count()), 0);
    }

    #[test]
    fn test_enqueue_soft_fails_on_quota() {
        let queue = OfflineQueue::new(Arc::new(MemoryOfflineStore::with_quota(8)));
        assert!(block_on(queue.enqueue(&PageId::from("p1"), vec![stroke()])).is_none());
        assert_eq!(block_on(queue.count()), 0);
    }

    #[test]
    fn test_purge_stale() {
        let store = Arc::new(MemoryOfflineStore::new());
        let queue = OfflineQueue::new(store.clone());
        let page = PageId::from("p1");

        block_on(store.insert(NewOfflineEntry {
            page_id: page.clone(),
            strokes: vec![stroke()],
            created_at: Utc::now() - chrono::Duration::hours(48),
        }))
        .unwrap();
        block_on(queue.enqueue(&page, vec![stroke()])).unwrap();

        assert_eq!(block_on(queue.purge_stale(Duration::from_secs(24 * 60 * 60))), 1);
        assert_eq!(block_on(queue.count()), 1);
    }

    #[test]
    fn test_withdraw_rewrites_or_deletes_batches() {
        let queue = OfflineQueue::new(Arc::new(MemoryOfflineStore::new()));
        let page = PageId::from("p1");
        let (a, b) = (stroke(), stroke());
        let pair = block_on(queue.enqueue(&page, vec![a.clone(), b.clone()])).unwrap();
        let single = block_on(queue.enqueue(&page, vec![a.clone()])).unwrap();
        block_on(queue.enqueue(&PageId::from("p2"), vec![a.clone()])).unwrap();

        assert!(block_on(queue.withdraw(&page, &a.id)));
        let left = block_on(queue.peek_page(&page));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, pair);
        assert_eq!(left[0].strokes, vec![b]);
        assert!(left.iter().all(|e| e.id != single));

        // Other pages keep their copy.
        assert_eq!(block_on(queue.peek_page(&PageId::from("p2"))).len(), 1);
        assert!(!block_on(queue.withdraw(&page, &a.id)));
    }

    #[test]
    fn test_peek_page() {
        let queue = OfflineQueue::new(Arc::new(MemoryOfflineStore::new()));
        block_on(queue.enqueue(&PageId::from("p1"), vec![stroke()]));
        block_on(queue.enqueue(&PageId::from("p2"), vec![stroke()]));
        assert_eq!(block_on(queue.peek_page(&PageId::from("p2"))).len(), 1);
    }
}
