//! Replays the offline queue while the server is reachable.
//!
//! One pass at a time runs as a background task. It reports per-entry
//! outcomes over a channel; [`OfflineSync::poll`] collects them and decides
//! when the next pass may start.

use crate::api::{ApiError, StrokeApi};
use crate::backoff::Backoff;
use crate::offline::OfflineQueue;
use crate::platform::Instant;
use crate::spawn::Spawner;
use crate::storage::EntryId;
use crate::stroke::{PageId, Stroke};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

/// Result of replaying one queue entry.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// Saved on the server and removed from the queue.
    Replayed { entry_id: EntryId, page_id: PageId, strokes: Vec<Stroke> },
    /// Rejected permanently and removed from the queue.
    Discarded { entry_id: EntryId, page_id: PageId, strokes: usize, error: ApiError },
    /// Retryable failure; the pass stopped here and the entry stays queued.
    Failed { entry_id: EntryId, page_id: PageId, error: ApiError },
}

enum PassEvent {
    Outcome(DrainOutcome),
    Finished { purged: usize, failed: bool },
}

pub struct OfflineSync {
    api: Arc<dyn StrokeApi>,
    queue: OfflineQueue,
    spawner: Arc<dyn Spawner>,
    backoff: Backoff,
    drain_interval: Duration,
    stale_after: Duration,
    online: bool,
    in_flight: bool,
    next_attempt: Option<Instant>,
    tx: Sender<PassEvent>,
    rx: Receiver<PassEvent>,
    outcomes: Vec<DrainOutcome>,
}

impl OfflineSync {
    pub fn new(
        api: Arc<dyn StrokeApi>,
        queue: OfflineQueue,
        spawner: Arc<dyn Spawner>,
        backoff: Backoff,
        drain_interval: Duration,
        stale_after: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            api,
            queue,
            spawner,
            backoff,
            drain_interval,
            stale_after,
            online: true,
            in_flight: false,
            next_attempt: None,
            tx,
            rx,
            outcomes: Vec::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn is_draining(&self) -> bool {
        self.in_flight
    }

    /// Consecutive failed passes since the last clean one.
    pub fn attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    /// Going offline forgets accrued backoff so the first pass after
    /// reconnecting starts immediately. A pass already running is left alone.
    pub fn set_online(&mut self, online: bool) {
        if online == self.online {
            return;
        }
        self.online = online;
        log::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        if !online {
            self.backoff.reset();
            self.next_attempt = None;
        }
    }

    /// Collect finished work and start a pass if one is due. Returns whether a
    /// pass was started.
    pub fn poll(&mut self, now: Instant) -> bool {
        self.collect(now);

        if !self.online || self.in_flight || self.next_attempt.is_some_and(|at| now < at) {
            return false;
        }
        self.start_pass();
        true
    }

    /// Outcomes gathered since the last call, in the order they happened.
    pub fn take_outcomes(&mut self) -> Vec<DrainOutcome> {
        std::mem::take(&mut self.outcomes)
    }

    fn collect(&mut self, now: Instant) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                PassEvent::Outcome(outcome) => self.outcomes.push(outcome),
                PassEvent::Finished { purged, failed } => {
                    self.in_flight = false;
                    if purged > 0 {
                        log::warn!("Purged {} stale offline entries", purged);
                    }
                    let delay = if failed {
                        self.backoff.next_delay()
                    } else {
                        self.backoff.reset();
                        self.drain_interval
                    };
                    self.next_attempt = Some(now + delay);
                    log::debug!("Next offline drain in {:?}", delay);
                }
            }
        }
    }

    fn start_pass(&mut self) {
        self.in_flight = true;
        let api = self.api.clone();
        let queue = self.queue.clone();
        let tx = self.tx.clone();
        let stale_after = self.stale_after;
        self.spawner.spawn(Box::pin(async move {
            let purged = queue.purge_stale(stale_after).await;
            let mut failed = false;
            for entry in queue.peek_all().await {
                match api.save_strokes(&entry.page_id, &entry.strokes).await {
                    Ok(_) => {
                        queue.remove(entry.id).await;
                        log::info!("Replayed offline entry {} for page {}", entry.id, entry.page_id);
                        let _ = tx.send(PassEvent::Outcome(DrainOutcome::Replayed {
                            entry_id: entry.id,
                            page_id: entry.page_id,
                            strokes: entry.strokes,
                        }));
                    }
                    Err(error) if error.is_permanent() => {
                        queue.remove(entry.id).await;
                        log::error!(
                            "Discarded offline entry {} ({} strokes for page {}): {}",
                            entry.id,
                            entry.strokes.len(),
                            entry.page_id,
                            error
                        );
                        let _ = tx.send(PassEvent::Outcome(DrainOutcome::Discarded {
                            entry_id: entry.id,
                            page_id: entry.page_id,
                            strokes: entry.strokes.len(),
                            error,
                        }));
                    }
                    Err(error) => {
                        log::warn!("Offline drain stopped at entry {}: {}", entry.id, error);
                        let _ = tx.send(PassEvent::Outcome(DrainOutcome::Failed {
                            entry_id: entry.id,
                            page_id: entry.page_id,
                            error,
                        }));
                        failed = true;
                        break;
                    }
                }
            }
            let _ = tx.send(PassEvent::Finished { purged, failed });
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiMode, MemoryStrokeApi};
    use crate::backoff::BackoffConfig;
    use crate::spawn::InlineSpawner;
    use crate::storage::MemoryOfflineStore;
    use crate::stroke::{InkPoint, StrokeStyle};
    use pollster::block_on;

    fn stroke() -> Stroke {
        Stroke::new(
            vec![InkPoint::new(1.0, 1.0, None), InkPoint::new(2.0, 2.0, None)],
            StrokeStyle::default(),
        )
    }

    fn sync(api: &MemoryStrokeApi, queue: &OfflineQueue) -> OfflineSync {
        OfflineSync::new(
            Arc::new(api.clone()),
            queue.clone(),
            Arc::new(InlineSpawner),
            Backoff::new(BackoffConfig::new(2000, 60_000)),
            Duration::from_millis(5000),
            Duration::from_secs(24 * 60 * 60),
        )
    }

    #[test]
    fn test_replays_and_removes_entries() {
        let api = MemoryStrokeApi::new();
        let queue = OfflineQueue::new(Arc::new(MemoryOfflineStore::new()));
        let page = PageId::from("p1");
        let batch = vec![stroke(), stroke()];
        block_on(queue.enqueue(&page, batch.clone()));

        let mut sync = sync(&api, &queue);
        assert!(sync.poll(Instant::now()));

        let outcomes = sync.take_outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], DrainOutcome::Replayed { strokes, .. } if *strokes == batch));
        assert_eq!(block_on(queue.count()), 0);
        assert_eq!(api.stored(&page).len(), 2);
    }

    #[test]
    fn test_client_error_discards_entry() {
        let api = MemoryStrokeApi::new();
        api.set_mode(ApiMode::Status(404));
        let queue = OfflineQueue::new(Arc::new(MemoryOfflineStore::new()));
        block_on(queue.enqueue(&PageId::from("gone"), vec![stroke()]));
        block_on(queue.enqueue(&PageId::from("gone"), vec![stroke()]));

        let mut sync = sync(&api, &queue);
        sync.poll(Instant::now());

        let outcomes = sync.take_outcomes();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| matches!(o, DrainOutcome::Discarded { .. })));
        assert_eq!(block_on(queue.count()), 0);
    }

    #[test]
    fn test_server_error_stops_pass_and_backs_off() {
        let api = MemoryStrokeApi::new();
        api.set_mode(ApiMode::Status(503));
        let queue = OfflineQueue::new(Arc::new(MemoryOfflineStore::new()));
        block_on(queue.enqueue(&PageId::from("p1"), vec![stroke()]));
        block_on(queue.enqueue(&PageId::from("p1"), vec![stroke()]));

        let mut sync = sync(&api, &queue);
        let start = Instant::now();
        sync.poll(start);
        // Finish bookkeeping lands on the next poll.
        assert!(!sync.poll(start));
        assert_eq!(api.save_calls(), 1);
        assert_eq!(sync.attempt(), 1);
        assert_eq!(block_on(queue.count()), 2);

        // Still inside the 2s backoff window.
        assert!(!sync.poll(start + Duration::from_millis(1500)));
        assert!(sync.poll(start + Duration::from_millis(2000)));
    }

    #[test]
    fn test_offline_resets_backoff_and_pauses() {
        let api = MemoryStrokeApi::new();
        api.set_mode(ApiMode::Offline);
        let queue = OfflineQueue::new(Arc::new(MemoryOfflineStore::new()));
        block_on(queue.enqueue(&PageId::from("p1"), vec![stroke()]));

        let mut sync = sync(&api, &queue);
        let start = Instant::now();
        sync.poll(start);
        sync.poll(start);
        assert_eq!(sync.attempt(), 1);

        sync.set_online(false);
        assert_eq!(sync.attempt(), 0);
        assert!(!sync.poll(start));

        api.set_mode(ApiMode::Online);
        sync.set_online(true);
        assert!(sync.poll(start));
        assert_eq!(block_on(queue.count()), 0);
    }
}
