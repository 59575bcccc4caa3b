//! In-process stroke store.

use super::{ApiError, ApiResult, StrokeApi};
use crate::platform::BoxFuture;
use crate::stroke::{PageId, Stroke, StrokeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How the in-memory server responds.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiMode {
    /// Requests succeed.
    Online,
    /// Requests fail as unreachable.
    Offline,
    /// Requests fail with the given status.
    Status(u16),
}

/// A request observed by [`MemoryStrokeApi`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Save { page_id: PageId, stroke_ids: Vec<StrokeId> },
    Delete { page_id: PageId, stroke_id: StrokeId },
    Clear { page_id: PageId },
    Fetch { page_id: PageId },
}

#[derive(Debug)]
struct Inner {
    mode: ApiMode,
    pages: HashMap<PageId, Vec<Stroke>>,
    calls: Vec<ApiCall>,
}

/// Ephemeral server for tests and offline demos. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryStrokeApi {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStrokeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStrokeApi {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                mode: ApiMode::Online,
                pages: HashMap::new(),
                calls: Vec::new(),
            })),
        }
    }

    pub fn set_mode(&self, mode: ApiMode) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.mode = mode;
        }
    }

    /// Every request made so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.inner.lock().map(|i| i.calls.clone()).unwrap_or_default()
    }

    /// Number of save requests made so far.
    pub fn save_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::Save { .. }))
            .count()
    }

    /// Strokes currently stored for a page.
    pub fn stored(&self, page_id: &PageId) -> Vec<Stroke> {
        self.inner
            .lock()
            .ok()
            .and_then(|i| i.pages.get(page_id).cloned())
            .unwrap_or_default()
    }

    /// Seed a page, bypassing the call log.
    pub fn seed(&self, page_id: &PageId, strokes: Vec<Stroke>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.pages.insert(page_id.clone(), strokes);
        }
    }

    fn handle<T>(&self, call: ApiCall, apply: impl FnOnce(&mut HashMap<PageId, Vec<Stroke>>) -> T) -> ApiResult<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| ApiError::Transport(format!("Lock error: {}", e)))?;
        inner.calls.push(call);
        match inner.mode.clone() {
            ApiMode::Online => Ok(apply(&mut inner.pages)),
            ApiMode::Offline => Err(ApiError::Offline),
            ApiMode::Status(status) => Err(ApiError::from_status(status, "injected failure")),
        }
    }
}

impl StrokeApi for MemoryStrokeApi {
    fn save_strokes(&self, page_id: &PageId, strokes: &[Stroke]) -> BoxFuture<'static, ApiResult<usize>> {
        let call = ApiCall::Save {
            page_id: page_id.clone(),
            stroke_ids: strokes.iter().map(|s| s.id.clone()).collect(),
        };
        let result = self.handle(call, |pages| {
            let stored = pages.entry(page_id.clone()).or_default();
            let mut count = 0;
            for stroke in strokes {
                if !stored.iter().any(|s| s.id == stroke.id) {
                    stored.push(stroke.clone());
                }
                count += 1;
            }
            count
        });
        Box::pin(async move { result })
    }

    fn delete_stroke(&self, page_id: &PageId, stroke_id: &StrokeId) -> BoxFuture<'static, ApiResult<()>> {
        let call = ApiCall::Delete {
            page_id: page_id.clone(),
            stroke_id: stroke_id.clone(),
        };
        let result = self.handle(call, |pages| {
            if let Some(stored) = pages.get_mut(page_id) {
                stored.retain(|s| &s.id != stroke_id);
            }
        });
        Box::pin(async move { result })
    }

    fn clear_strokes(&self, page_id: &PageId) -> BoxFuture<'static, ApiResult<()>> {
        let call = ApiCall::Clear { page_id: page_id.clone() };
        let result = self.handle(call, |pages| {
            pages.remove(page_id);
        });
        Box::pin(async move { result })
    }

    fn fetch_strokes(&self, page_id: &PageId) -> BoxFuture<'static, ApiResult<Vec<Stroke>>> {
        let call = ApiCall::Fetch { page_id: page_id.clone() };
        let result = self.handle(call, |pages| pages.get(page_id).cloned().unwrap_or_default());
        Box::pin(async move { result })
    }
}
