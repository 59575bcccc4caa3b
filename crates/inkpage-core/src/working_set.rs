//! Per-page in-memory stroke lists.
//!
//! [`PendingWorkingSet`] holds strokes drawn but not yet handed to the save
//! pipeline; [`SavedWorkingSet`] holds strokes known to be saved, optimistically
//! or by server confirmation. Both keep strokes in draw order.

use crate::stroke::{PageId, Stroke, StrokeId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
struct PageStrokes {
    strokes: Vec<Stroke>,
    /// IDs of `strokes`, for constant-time dedup.
    ids: HashSet<StrokeId>,
    /// Bumped on every real change, never on a deduplicated no-op.
    revision: u64,
}

impl PageStrokes {
    fn contains(&self, id: &StrokeId) -> bool {
        self.ids.contains(id)
    }

    /// Append unless the ID is present. Does not bump the revision.
    fn push(&mut self, stroke: Stroke) -> bool {
        if !self.ids.insert(stroke.id.clone()) {
            return false;
        }
        self.strokes.push(stroke);
        true
    }

    fn insert(&mut self, index: usize, stroke: Stroke) -> bool {
        if !self.ids.insert(stroke.id.clone()) {
            return false;
        }
        let index = index.min(self.strokes.len());
        self.strokes.insert(index, stroke);
        true
    }

    fn remove(&mut self, id: &StrokeId) -> Option<Stroke> {
        if !self.ids.remove(id) {
            return None;
        }
        let pos = self.strokes.iter().position(|s| &s.id == id)?;
        self.revision += 1;
        Some(self.strokes.remove(pos))
    }

    /// Swap out the whole list; bumps the revision only when it was non-empty.
    fn take(&mut self) -> Vec<Stroke> {
        if self.strokes.is_empty() {
            return Vec::new();
        }
        self.revision += 1;
        self.ids.clear();
        std::mem::take(&mut self.strokes)
    }
}

/// Strokes drawn locally and not yet drained by the save scheduler.
#[derive(Debug, Clone, Default)]
pub struct PendingWorkingSet {
    pages: HashMap<PageId, PageStrokes>,
}

impl PendingWorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, page_id: &PageId, stroke: Stroke) {
        let page = self.pages.entry(page_id.clone()).or_default();
        if page.push(stroke) {
            page.revision += 1;
        }
    }

    /// Swap out and return the page's pending list.
    pub fn drain(&mut self, page_id: &PageId) -> Vec<Stroke> {
        self.pages.get_mut(page_id).map(PageStrokes::take).unwrap_or_default()
    }

    pub fn remove(&mut self, page_id: &PageId, id: &StrokeId) -> Option<Stroke> {
        self.pages.get_mut(page_id)?.remove(id)
    }

    pub fn get(&self, page_id: &PageId) -> &[Stroke] {
        self.pages.get(page_id).map(|p| p.strokes.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, page_id: &PageId, id: &StrokeId) -> bool {
        self.pages.get(page_id).is_some_and(|p| p.contains(id))
    }

    pub fn len(&self, page_id: &PageId) -> usize {
        self.get(page_id).len()
    }

    pub fn is_empty(&self, page_id: &PageId) -> bool {
        self.len(page_id) == 0
    }

    /// Pages that currently have pending strokes, sorted for deterministic draining.
    pub fn pages_with_pending(&self) -> Vec<PageId> {
        let mut pages: Vec<PageId> = self
            .pages
            .iter()
            .filter(|(_, p)| !p.strokes.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        pages.sort();
        pages
    }

    pub fn revision(&self, page_id: &PageId) -> u64 {
        self.pages.get(page_id).map(|p| p.revision).unwrap_or(0)
    }

    /// Drop the page's state. Returns any strokes that were still pending.
    pub fn unload(&mut self, page_id: &PageId) -> Vec<Stroke> {
        self.pages.remove(page_id).map(|p| p.strokes).unwrap_or_default()
    }
}

/// Strokes present in the authoritative view of each page.
///
/// A page counts as loaded only once its contents were fetched via
/// [`replace`](Self::replace); strokes saved for a page nobody fetched do not
/// make it loaded.
#[derive(Debug, Clone, Default)]
pub struct SavedWorkingSet {
    pages: HashMap<PageId, PageStrokes>,
    loaded: HashSet<PageId>,
}

impl SavedWorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `stroke` unless a stroke with the same ID is already present.
    /// Returns whether the set changed.
    pub fn add(&mut self, page_id: &PageId, stroke: Stroke) -> bool {
        if self.contains(page_id, &stroke.id) {
            return false;
        }
        let page = self.pages.entry(page_id.clone()).or_default();
        page.push(stroke);
        page.revision += 1;
        true
    }

    /// Append every stroke not already present, preserving order.
    /// Returns the strokes that were actually added.
    pub fn add_all(&mut self, page_id: &PageId, strokes: impl IntoIterator<Item = Stroke>) -> Vec<Stroke> {
        let mut seen = HashSet::new();
        let added: Vec<Stroke> = strokes
            .into_iter()
            .filter(|s| !self.contains(page_id, &s.id) && seen.insert(s.id.clone()))
            .collect();
        if added.is_empty() {
            return added;
        }
        let page = self.pages.entry(page_id.clone()).or_default();
        for stroke in &added {
            page.push(stroke.clone());
        }
        page.revision += 1;
        added
    }

    /// Insert at `index` (clamped), unless already present. Used to restore a
    /// stroke at its original draw position.
    pub fn insert_at(&mut self, page_id: &PageId, index: usize, stroke: Stroke) -> bool {
        if self.contains(page_id, &stroke.id) {
            return false;
        }
        let page = self.pages.entry(page_id.clone()).or_default();
        page.insert(index, stroke);
        page.revision += 1;
        true
    }

    pub fn remove(&mut self, page_id: &PageId, id: &StrokeId) -> Option<Stroke> {
        self.pages.get_mut(page_id)?.remove(id)
    }

    /// Empty the page's saved list, returning what was there.
    pub fn clear(&mut self, page_id: &PageId) -> Vec<Stroke> {
        self.pages.get_mut(page_id).map(PageStrokes::take).unwrap_or_default()
    }

    /// Replace the page's contents wholesale after fetching it from the server,
    /// and mark it loaded. Duplicate IDs in the input keep their first occurrence.
    pub fn replace(&mut self, page_id: &PageId, strokes: Vec<Stroke>) {
        let page = self.pages.entry(page_id.clone()).or_default();
        page.strokes.clear();
        page.ids.clear();
        for stroke in strokes {
            page.push(stroke);
        }
        page.revision += 1;
        self.loaded.insert(page_id.clone());
    }

    pub fn get(&self, page_id: &PageId) -> &[Stroke] {
        self.pages.get(page_id).map(|p| p.strokes.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, page_id: &PageId, id: &StrokeId) -> bool {
        self.pages.get(page_id).is_some_and(|p| p.contains(id))
    }

    pub fn position(&self, page_id: &PageId, id: &StrokeId) -> Option<usize> {
        let page = self.pages.get(page_id)?;
        if !page.contains(id) {
            return None;
        }
        page.strokes.iter().position(|s| &s.id == id)
    }

    pub fn len(&self, page_id: &PageId) -> usize {
        self.get(page_id).len()
    }

    pub fn revision(&self, page_id: &PageId) -> u64 {
        self.pages.get(page_id).map(|p| p.revision).unwrap_or(0)
    }

    /// Whether the page's server contents have been fetched.
    pub fn is_loaded(&self, page_id: &PageId) -> bool {
        self.loaded.contains(page_id)
    }

    pub fn unload(&mut self, page_id: &PageId) {
        self.pages.remove(page_id);
        self.loaded.remove(page_id);
    }
}
