//! The ink engine as the host application sees it.
//!
//! [`InkSession`] owns every piece of per-page state and drives the save
//! scheduler, the offline drain loop and the realtime hub from a single
//! [`InkSession::poll`]. Local edits apply synchronously; the matching network
//! writes are spawned and report back through channels that `poll` drains, so
//! nothing here blocks on the network and nothing returns a network error.

use crate::api::{ApiResult, StrokeApi};
use crate::backoff::Backoff;
use crate::capture::{ElementRect, PointerSample, StrokeCapture};
use crate::config::InkConfig;
use crate::directory::PageDirectory;
use crate::drain::{DrainOutcome, OfflineSync};
use crate::notice::{self, Notice, NoticeSender};
use crate::offline::OfflineQueue;
use crate::path_cache::PathCache;
use crate::platform::Instant;
use crate::realtime::{ChannelState, Connector, RealtimeHub, RealtimeUpdate};
use crate::scheduler::{BatchSaveScheduler, WatchScope};
use crate::spatial::SpatialIndex;
use crate::spawn::Spawner;
use crate::storage::OfflineStore;
use crate::stroke::{self, PageId, Stroke, StrokeId, StrokeStyle};
use crate::transcription::{TranscriptionStatus, TranscriptionStore};
use crate::undo::{UndoCommand, UndoHistory};
use crate::working_set::{PendingWorkingSet, SavedWorkingSet};
use kurbo::BezPath;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;

/// Failure to assemble a session from configuration.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] crate::api::ApiError),
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
    #[error("Realtime setup failed: {0}")]
    Realtime(String),
}

/// Result of a background page fetch.
struct PageLoad {
    page_id: PageId,
    result: ApiResult<Vec<Stroke>>,
    /// Strokes still waiting in the offline queue for this page.
    queued: Vec<Stroke>,
}

pub struct InkSession {
    config: InkConfig,
    api: Arc<dyn StrokeApi>,
    queue: OfflineQueue,
    spawner: Arc<dyn Spawner>,

    pending: PendingWorkingSet,
    saved: SavedWorkingSet,
    undo: UndoHistory,
    indexes: HashMap<PageId, SpatialIndex>,
    paths: PathCache,
    transcriptions: TranscriptionStore,
    capture: StrokeCapture,
    /// Saved strokes erased or undone here. A queued batch or a load may still
    /// carry them; they are filtered out until restored by undo or redo.
    withdrawn: HashMap<PageId, HashSet<StrokeId>>,

    scheduler: BatchSaveScheduler,
    drain: OfflineSync,
    realtime: RealtimeHub,

    view: BTreeSet<PageId>,
    notice_tx: NoticeSender,
    notice_rx: Receiver<Notice>,
    load_tx: Sender<PageLoad>,
    load_rx: Receiver<PageLoad>,
}

impl InkSession {
    pub fn new(
        config: InkConfig,
        api: Arc<dyn StrokeApi>,
        store: Arc<dyn OfflineStore>,
        connector: Box<dyn Connector>,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        let queue = OfflineQueue::new(store);
        let (notice_tx, notice_rx) = notice::channel();
        let (load_tx, load_rx) = mpsc::channel();

        let scheduler = BatchSaveScheduler::new(
            api.clone(),
            queue.clone(),
            spawner.clone(),
            notice_tx.clone(),
            config.save_interval(),
        );
        let drain = OfflineSync::new(
            api.clone(),
            queue.clone(),
            spawner.clone(),
            Backoff::new(config.drain_backoff),
            config.drain_interval(),
            config.stale_after(),
        );
        let realtime = RealtimeHub::new(connector, config.realtime_backoff);

        Self {
            pending: PendingWorkingSet::new(),
            saved: SavedWorkingSet::new(),
            undo: UndoHistory::new(config.undo_limit),
            indexes: HashMap::new(),
            paths: PathCache::new(config.path_cache_capacity),
            transcriptions: TranscriptionStore::new(),
            capture: StrokeCapture::new(config.page),
            withdrawn: HashMap::new(),
            scheduler,
            drain,
            realtime,
            view: BTreeSet::new(),
            config,
            api,
            queue,
            spawner,
            notice_tx,
            notice_rx,
            load_tx,
            load_rx,
        }
    }

    /// HTTP client, file-backed queue, `tungstenite` sockets and thread-spawned writes.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn native(config: InkConfig) -> Result<Self, SessionError> {
        let api = crate::api::HttpStrokeApi::new(&config.api_base_url, config.request_timeout())?;
        let store = crate::storage::FileOfflineStore::default_location()?;
        let connector = crate::realtime::TungsteniteConnector::new(&config.ws_base_url).map_err(SessionError::Realtime)?;
        Ok(Self::new(
            config,
            Arc::new(api),
            Arc::new(store),
            Box::new(connector),
            Arc::new(crate::spawn::ThreadSpawner),
        ))
    }

    /// IndexedDB queue, browser sockets and `spawn_local` writes. The HTTP
    /// client is supplied by the host.
    #[cfg(target_arch = "wasm32")]
    pub fn browser(config: InkConfig, api: Arc<dyn StrokeApi>) -> Result<Self, SessionError> {
        let connector = crate::realtime::WebSysConnector::new(&config.ws_base_url).map_err(SessionError::Realtime)?;
        Ok(Self::new(
            config,
            api,
            Arc::new(crate::storage::IndexedDbOfflineStore::new()),
            Box::new(connector),
            Arc::new(crate::spawn::LocalSpawner),
        ))
    }

    pub fn config(&self) -> &InkConfig {
        &self.config
    }

    // --- Drawing ---

    pub fn begin_stroke(&mut self, page_id: PageId, sample: &PointerSample, rect: ElementRect, style: StrokeStyle) {
        self.capture.begin(page_id, sample, rect, style);
    }

    /// Returns true when the host should request an animation frame.
    pub fn ingest(&mut self, sample: &PointerSample) -> bool {
        self.capture.ingest(sample)
    }

    /// Returns whether the live stroke changed and needs a redraw.
    pub fn on_animation_frame(&mut self) -> bool {
        self.capture.on_animation_frame()
    }

    pub fn cancel_stroke(&mut self) {
        self.capture.cancel();
    }

    pub fn capture(&self) -> &StrokeCapture {
        &self.capture
    }

    /// Commit the stroke in progress to the page's pending set. Taps yield `None`.
    pub fn end_stroke(&mut self) -> Option<StrokeId> {
        let (page_id, stroke) = self.capture.end()?;
        let id = stroke.id.clone();
        self.index_mut(&page_id).add_stroke(stroke.clone());
        self.pending.push(&page_id, stroke);
        log::debug!("Stroke {} drawn on page {}", id, page_id);
        Some(id)
    }

    // --- Erasing ---

    /// Erase the stroke hit at `(x, y)`. Only strokes that reached the saved
    /// set are deleted on the server; pending ones never left this client.
    pub fn erase_at(&mut self, page_id: &PageId, x: f64, y: f64, radius: f64) -> Option<StrokeId> {
        let id = self.indexes.get(page_id)?.query_nearest(x, y, radius)?.id.clone();
        self.forget_indexed(page_id, &id);

        if let Some(stroke) = self.pending.remove(page_id, &id) {
            self.undo.record(UndoCommand::remove(page_id.clone(), stroke, None));
        } else if let Some(position) = self.saved.position(page_id, &id) {
            let stroke = self.saved.remove(page_id, &id)?;
            self.undo
                .record(UndoCommand::remove(page_id.clone(), stroke, Some(position)));
            self.withdraw(page_id, &id);
        } else {
            log::warn!("Indexed stroke {} missing from page {}", id, page_id);
            return None;
        }
        Some(id)
    }

    // --- History ---

    /// Undo the page's newest command. Returns false when there is nothing to undo.
    pub fn undo(&mut self, page_id: &PageId) -> bool {
        let Some(command) = self.undo.pop_undo(page_id) else {
            return false;
        };
        match command {
            UndoCommand::AddStroke { stroke, .. } => self.retract(page_id, &stroke.id),
            UndoCommand::RemoveStroke { stroke, position, .. } => self.restore(page_id, stroke, position),
        }
        true
    }

    /// Redo the page's newest undone command. Returns false when there is nothing to redo.
    pub fn redo(&mut self, page_id: &PageId) -> bool {
        let Some(command) = self.undo.pop_redo(page_id) else {
            return false;
        };
        match command {
            UndoCommand::AddStroke { stroke, .. } => self.restore(page_id, stroke, None),
            UndoCommand::RemoveStroke { stroke, .. } => self.retract(page_id, &stroke.id),
        }
        true
    }

    pub fn can_undo(&self, page_id: &PageId) -> bool {
        self.undo.can_undo(page_id)
    }

    pub fn can_redo(&self, page_id: &PageId) -> bool {
        self.undo.can_redo(page_id)
    }

    pub fn history(&self) -> &UndoHistory {
        &self.undo
    }

    fn retract(&mut self, page_id: &PageId, id: &StrokeId) {
        self.forget_indexed(page_id, id);
        if self.saved.remove(page_id, id).is_some() {
            self.withdraw(page_id, id);
        } else if self.pending.remove(page_id, id).is_some() {
            self.spawn_delete(page_id, id);
        }
    }

    fn restore(&mut self, page_id: &PageId, stroke: Stroke, position: Option<usize>) {
        if let Some(ids) = self.withdrawn.get_mut(page_id) {
            ids.remove(&stroke.id);
        }
        let added = match position {
            Some(index) => self.saved.insert_at(page_id, index, stroke.clone()),
            None => self.saved.add(page_id, stroke.clone()),
        };
        if added {
            self.index_mut(page_id).add_stroke(stroke.clone());
            self.spawn_restore(page_id, stroke);
        }
    }

    // --- Pages ---

    /// Fetch a page from the server and replace its saved set. Strokes the
    /// server does not know yet (optimistic or queued) are kept.
    pub fn load_page(&mut self, page_id: &PageId) {
        let fetch = self.api.fetch_strokes(page_id);
        let queue = self.queue.clone();
        let tx = self.load_tx.clone();
        let page_id = page_id.clone();
        self.spawner.spawn(Box::pin(async move {
            let result = fetch.await;
            let queued = queue
                .peek_page(&page_id)
                .await
                .into_iter()
                .flat_map(|entry| entry.strokes)
                .collect();
            let _ = tx.send(PageLoad { page_id, result, queued });
        }));
        self.apply_loads();
    }

    /// Clear the page locally and on the server. The page's history goes too.
    pub fn clear_page(&mut self, page_id: &PageId) {
        let mut removed = self.saved.clear(page_id);
        removed.extend(self.pending.unload(page_id));
        for stroke in &removed {
            self.paths.invalidate(&stroke.id);
        }
        self.indexes.insert(page_id.clone(), SpatialIndex::new(self.config.cell_size));
        self.undo.clear_page(page_id);
        self.withdrawn.remove(page_id);
        log::info!("Cleared {} strokes on page {}", removed.len(), page_id);

        let write = self.api.clear_strokes(page_id);
        let notices = self.notice_tx.clone();
        let page_id = page_id.clone();
        self.spawner.spawn(Box::pin(async move {
            if let Err(e) = write.await {
                log::warn!("Clearing page {} on the server failed: {}", page_id, e);
                notices.send(Notice::ClearFailed { page_id });
            }
        }));
    }

    /// Set the pages in view. Pages leaving view are flushed, then unloaded;
    /// pages entering view are loaded and subscribed to.
    pub fn set_view(&mut self, pages: impl IntoIterator<Item = PageId>, now: Instant) {
        let pages: BTreeSet<PageId> = pages.into_iter().collect();
        let scope = match (pages.len(), pages.first()) {
            (1, Some(page_id)) => WatchScope::Page(page_id.clone()),
            _ => WatchScope::AllPending,
        };
        self.apply_view(pages, scope, now);
    }

    fn apply_view(&mut self, pages: BTreeSet<PageId>, scope: WatchScope, now: Instant) {
        let leaving: Vec<PageId> = self.view.difference(&pages).cloned().collect();
        let entering: Vec<PageId> = pages.difference(&self.view).cloned().collect();

        self.scheduler
            .set_scope(scope, &mut self.pending, &mut self.saved, &mut self.undo);
        for page_id in &leaving {
            self.unload_page(page_id);
        }
        self.realtime.set_desired(pages.iter().cloned(), now);
        self.view = pages;
        for page_id in &entering {
            if !self.saved.is_loaded(page_id) {
                self.load_page(page_id);
            }
        }
    }

    /// Watch only the directory's current page.
    pub fn watch_current(&mut self, directory: &dyn PageDirectory, now: Instant) {
        let pages: BTreeSet<PageId> = directory.current_page().into_iter().collect();
        let scope = match pages.first() {
            Some(page_id) => WatchScope::Page(page_id.clone()),
            None => WatchScope::AllPending,
        };
        self.apply_view(pages, scope, now);
    }

    /// Watch every page in the directory, saving whichever has pending work.
    pub fn watch_all(&mut self, directory: &dyn PageDirectory, now: Instant) {
        self.apply_view(directory.pages().into_iter().collect(), WatchScope::AllPending, now);
    }

    pub fn view(&self) -> &BTreeSet<PageId> {
        &self.view
    }

    /// Release a page's in-memory state. Pending strokes are flushed to the
    /// save pipeline first.
    pub fn unload_page(&mut self, page_id: &PageId) {
        self.scheduler
            .flush_page(page_id, &mut self.pending, &mut self.saved, &mut self.undo);
        let leftover = self.pending.unload(page_id);
        if !leftover.is_empty() {
            log::error!("{} pending strokes left on unloaded page {}", leftover.len(), page_id);
        }
        for stroke in self.saved.get(page_id).iter().chain(&leftover) {
            self.paths.invalidate(&stroke.id);
        }
        self.saved.unload(page_id);
        self.indexes.remove(page_id);
        self.undo.clear_page(page_id);
        self.transcriptions.clear(page_id);
        log::debug!("Unloaded page {}", page_id);
    }

    /// Hand every page's pending strokes to the save pipeline now.
    pub fn flush_all(&mut self) -> usize {
        self.pending
            .pages_with_pending()
            .iter()
            .filter(|page_id| {
                self.scheduler
                    .flush_page(page_id, &mut self.pending, &mut self.saved, &mut self.undo)
            })
            .count()
    }

    // --- Loop ---

    /// Drive one turn of the loop: finished loads, the save tick, the offline
    /// drain and realtime traffic.
    pub fn poll(&mut self, now: Instant) {
        self.apply_loads();
        self.scheduler
            .tick(now, &mut self.pending, &mut self.saved, &mut self.undo);

        self.drain.poll(now);
        for outcome in self.drain.take_outcomes() {
            self.apply_drain_outcome(outcome);
        }

        for update in self.realtime.poll(now) {
            self.apply_realtime(update);
        }
    }

    /// Forward the host's connectivity signal.
    pub fn set_online(&mut self, online: bool) {
        self.drain.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.drain.is_online()
    }

    /// Notices emitted since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notice_rx.try_iter().collect()
    }

    // --- Reads ---

    pub fn saved(&self, page_id: &PageId) -> &[Stroke] {
        self.saved.get(page_id)
    }

    pub fn pending(&self, page_id: &PageId) -> &[Stroke] {
        self.pending.get(page_id)
    }

    pub fn saved_set(&self) -> &SavedWorkingSet {
        &self.saved
    }

    pub fn pending_set(&self) -> &PendingWorkingSet {
        &self.pending
    }

    /// Everything to draw for a page: saved strokes, then pending ones.
    pub fn strokes<'a>(&'a self, page_id: &PageId) -> impl Iterator<Item = &'a Stroke> + 'a {
        self.saved.get(page_id).iter().chain(self.pending.get(page_id))
    }

    pub fn index(&self, page_id: &PageId) -> Option<&SpatialIndex> {
        self.indexes.get(page_id)
    }

    /// Cached render path for a stroke on the page.
    pub fn stroke_path(&mut self, page_id: &PageId, id: &StrokeId) -> Option<&BezPath> {
        let stroke = self
            .saved
            .get(page_id)
            .iter()
            .chain(self.pending.get(page_id))
            .find(|s| &s.id == id)?;
        Some(self.paths.get_or_build(stroke))
    }

    pub fn transcription(&self, page_id: &PageId) -> Option<&TranscriptionStatus> {
        self.transcriptions.get(page_id)
    }

    pub fn channel_state(&self, page_id: &PageId) -> ChannelState {
        self.realtime.state(page_id)
    }

    pub fn realtime(&self) -> &RealtimeHub {
        &self.realtime
    }

    pub async fn queued_count(&self) -> usize {
        self.queue.count().await
    }

    pub fn offline_queue(&self) -> &OfflineQueue {
        &self.queue
    }

    // --- Internals ---

    fn index_mut(&mut self, page_id: &PageId) -> &mut SpatialIndex {
        let cell_size = self.config.cell_size;
        self.indexes
            .entry(page_id.clone())
            .or_insert_with(|| SpatialIndex::new(cell_size))
    }

    fn forget_indexed(&mut self, page_id: &PageId, id: &StrokeId) {
        if let Some(index) = self.indexes.get_mut(page_id) {
            index.remove_stroke(id);
        }
        self.paths.invalidate(id);
    }

    fn rebuild_index(&mut self, page_id: &PageId) {
        let index = SpatialIndex::build(
            self.config.cell_size,
            self.saved.get(page_id).iter().chain(self.pending.get(page_id)),
        );
        self.indexes.insert(page_id.clone(), index);
    }

    /// Retract a saved stroke from the server and from the offline queue.
    fn withdraw(&mut self, page_id: &PageId, id: &StrokeId) {
        self.withdrawn
            .entry(page_id.clone())
            .or_default()
            .insert(id.clone());
        self.spawn_delete(page_id, id);
    }

    fn is_withdrawn(&self, page_id: &PageId, id: &StrokeId) -> bool {
        self.withdrawn.get(page_id).is_some_and(|ids| ids.contains(id))
    }

    /// Queued copies go first so the drain cannot replay the stroke afterwards.
    fn spawn_delete(&self, page_id: &PageId, id: &StrokeId) {
        let write = self.api.delete_stroke(page_id, id);
        let queue = self.queue.clone();
        let notices = self.notice_tx.clone();
        let page_id = page_id.clone();
        let stroke_id = id.clone();
        self.spawner.spawn(Box::pin(async move {
            queue.withdraw(&page_id, &stroke_id).await;
            if let Err(e) = write.await {
                log::warn!("Deleting stroke {} on page {} failed: {}", stroke_id, page_id, e);
                notices.send(Notice::DeleteFailed { page_id, stroke_id });
            }
        }));
    }

    fn spawn_restore(&self, page_id: &PageId, stroke: Stroke) {
        let write = self.api.save_strokes(page_id, std::slice::from_ref(&stroke));
        let notices = self.notice_tx.clone();
        let page_id = page_id.clone();
        let stroke_id = stroke.id;
        self.spawner.spawn(Box::pin(async move {
            if let Err(e) = write.await {
                log::warn!("Restoring stroke {} on page {} failed: {}", stroke_id, page_id, e);
                notices.send(Notice::RestoreFailed { page_id, stroke_id });
            }
        }));
    }

    fn apply_loads(&mut self) {
        while let Ok(load) = self.load_rx.try_recv() {
            let PageLoad { page_id, result, queued } = load;
            let queued: Vec<Stroke> = stroke::retain_well_formed(queued, "offline queue")
                .into_iter()
                .filter(|s| !self.is_withdrawn(&page_id, &s.id))
                .collect();
            match result {
                Ok(fetched) => {
                    let fetched: Vec<Stroke> = stroke::retain_well_formed(fetched, "page load")
                        .into_iter()
                        .filter(|s| !self.is_withdrawn(&page_id, &s.id))
                        .collect();
                    let local = self.saved.get(&page_id).to_vec();
                    self.saved.replace(&page_id, fetched);
                    let restored = self.saved.add_all(&page_id, local.into_iter().chain(queued));
                    self.rebuild_index(&page_id);
                    log::debug!(
                        "Loaded page {}: {} strokes ({} local only)",
                        page_id,
                        self.saved.len(&page_id),
                        restored.len()
                    );
                }
                Err(e) => {
                    log::warn!("Loading page {} failed: {}", page_id, e);
                    if !queued.is_empty() {
                        for stroke in self.saved.add_all(&page_id, queued) {
                            self.index_mut(&page_id).add_stroke(stroke);
                        }
                    }
                    self.notice_tx.send(Notice::LoadFailed { page_id });
                }
            }
        }
    }

    fn apply_drain_outcome(&mut self, outcome: DrainOutcome) {
        match outcome {
            DrainOutcome::Replayed { page_id, strokes, .. } => {
                let (stale, strokes): (Vec<Stroke>, Vec<Stroke>) =
                    strokes.into_iter().partition(|s| self.is_withdrawn(&page_id, &s.id));
                // Replayed before the withdrawal reached the queue: delete it again.
                for stroke in &stale {
                    self.spawn_delete(&page_id, &stroke.id);
                }
                // Pages out of memory pick these up on their next load.
                if !self.saved.is_loaded(&page_id) && !self.view.contains(&page_id) {
                    return;
                }
                for stroke in self.saved.add_all(&page_id, strokes) {
                    self.index_mut(&page_id).add_stroke(stroke);
                }
            }
            DrainOutcome::Discarded { page_id, strokes, .. } => {
                self.notice_tx.send(Notice::EntryDiscarded { page_id, strokes });
            }
            DrainOutcome::Failed { .. } => {}
        }
    }

    fn apply_realtime(&mut self, update: RealtimeUpdate) {
        match update {
            RealtimeUpdate::Added { page_id, strokes } => {
                let fresh: Vec<Stroke> = strokes
                    .into_iter()
                    .filter(|s| !self.pending.contains(&page_id, &s.id) && !self.is_withdrawn(&page_id, &s.id))
                    .collect();
                let added = self.saved.add_all(&page_id, fresh);
                if !added.is_empty() {
                    log::debug!("{} remote strokes added to page {}", added.len(), page_id);
                }
                for stroke in added {
                    self.index_mut(&page_id).add_stroke(stroke);
                }
            }
            RealtimeUpdate::Deleted { page_id, stroke_id } => {
                if self.saved.remove(&page_id, &stroke_id).is_some() {
                    self.forget_indexed(&page_id, &stroke_id);
                }
            }
            RealtimeUpdate::Cleared { page_id } => {
                for stroke in self.saved.clear(&page_id) {
                    self.forget_indexed(&page_id, &stroke.id);
                }
            }
            RealtimeUpdate::Transcription { page_id, status } => {
                self.transcriptions.set(&page_id, status);
            }
        }
    }
}
