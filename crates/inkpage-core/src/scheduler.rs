//! Periodic batch save of pending strokes.
//!
//! Each tick drains a page's pending list, moves it into the saved set,
//! records one undo entry per stroke and only then issues a single network
//! write for the whole batch. A stroke is therefore never missing from both
//! working sets, even while the write is in flight or failing.

use crate::api::StrokeApi;
use crate::notice::{Notice, NoticeSender};
use crate::offline::OfflineQueue;
use crate::platform::Instant;
use crate::spawn::Spawner;
use crate::stroke::PageId;
use crate::undo::{UndoCommand, UndoHistory};
use crate::working_set::{PendingWorkingSet, SavedWorkingSet};
use std::sync::Arc;
use std::time::Duration;

/// Which pages a tick drains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchScope {
    /// Only the page in view.
    Page(PageId),
    /// Every page with pending strokes.
    AllPending,
}

pub struct BatchSaveScheduler {
    api: Arc<dyn StrokeApi>,
    queue: OfflineQueue,
    spawner: Arc<dyn Spawner>,
    notices: NoticeSender,
    interval: Duration,
    scope: WatchScope,
    next_tick: Option<Instant>,
}

impl BatchSaveScheduler {
    pub fn new(
        api: Arc<dyn StrokeApi>,
        queue: OfflineQueue,
        spawner: Arc<dyn Spawner>,
        notices: NoticeSender,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            queue,
            spawner,
            notices,
            interval,
            scope: WatchScope::AllPending,
            next_tick: None,
        }
    }

    pub fn scope(&self) -> &WatchScope {
        &self.scope
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_tick.is_none_or(|at| now >= at)
    }

    /// Run a save pass if the interval has elapsed. Returns the number of
    /// batches dispatched.
    pub fn tick(
        &mut self,
        now: Instant,
        pending: &mut PendingWorkingSet,
        saved: &mut SavedWorkingSet,
        undo: &mut UndoHistory,
    ) -> usize {
        if !self.is_due(now) {
            return 0;
        }
        self.next_tick = Some(now + self.interval);
        self.flush(pending, saved, undo)
    }

    /// Save everything in scope now, regardless of the interval.
    pub fn flush(&mut self, pending: &mut PendingWorkingSet, saved: &mut SavedWorkingSet, undo: &mut UndoHistory) -> usize {
        let pages = match &self.scope {
            WatchScope::Page(page_id) => vec![page_id.clone()],
            WatchScope::AllPending => pending.pages_with_pending(),
        };
        pages
            .iter()
            .filter(|page_id| self.flush_page(page_id, pending, saved, undo))
            .count()
    }

    /// Save one page's pending strokes regardless of scope. Returns whether a
    /// batch was dispatched.
    pub fn flush_page(
        &self,
        page_id: &PageId,
        pending: &mut PendingWorkingSet,
        saved: &mut SavedWorkingSet,
        undo: &mut UndoHistory,
    ) -> bool {
        let batch = pending.drain(page_id);
        if batch.is_empty() {
            return false;
        }

        let added = saved.add_all(page_id, batch.iter().cloned());
        if added.len() != batch.len() {
            log::debug!(
                "{} of {} strokes for page {} were already saved",
                batch.len() - added.len(),
                batch.len(),
                page_id
            );
        }
        for stroke in &batch {
            undo.record(UndoCommand::add(page_id.clone(), stroke.clone()));
        }

        log::debug!("Saving {} strokes for page {}", batch.len(), page_id);
        let write = self.api.save_strokes(page_id, &batch);
        let queue = self.queue.clone();
        let notices = self.notices.clone();
        let page_id = page_id.clone();
        self.spawner.spawn(Box::pin(async move {
            match write.await {
                Ok(count) => log::debug!("Server stored {} strokes for page {}", count, page_id),
                Err(e) => {
                    log::warn!("Saving {} strokes for page {} failed: {}", batch.len(), page_id, e);
                    let strokes = batch.len();
                    let notice = match queue.enqueue(&page_id, batch).await {
                        Some(_) => Notice::QueuedOffline { page_id, strokes },
                        None => Notice::QueueWriteDropped { page_id, strokes },
                    };
                    notices.send(notice);
                }
            }
        }));
        true
    }

    /// Switch scope, first flushing whatever the old scope still holds.
    pub fn set_scope(
        &mut self,
        scope: WatchScope,
        pending: &mut PendingWorkingSet,
        saved: &mut SavedWorkingSet,
        undo: &mut UndoHistory,
    ) -> usize {
        if scope == self.scope {
            return 0;
        }
        let flushed = self.flush(pending, saved, undo);
        log::debug!("Save scope {:?} -> {:?}", self.scope, scope);
        self.scope = scope;
        flushed
    }
}
