//! Per-page undo/redo stacks of inverse commands.
//!
//! This is bookkeeping only. Applying a command's inverse to the working sets
//! and issuing the matching network write is the caller's job
//! (see [`crate::session::InkSession::undo`]).

use crate::stroke::{PageId, Stroke};
use std::collections::{HashMap, VecDeque};

/// Maximum number of undo entries kept per page.
pub const DEFAULT_UNDO_LIMIT: usize = 200;

/// A reversible draw or erase.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoCommand {
    /// A stroke was added to the page.
    AddStroke { page_id: PageId, stroke: Stroke },
    /// A stroke was removed from the page.
    RemoveStroke {
        page_id: PageId,
        stroke: Stroke,
        /// Index in the saved list at removal time, so undo can put it back in place.
        position: Option<usize>,
    },
}

impl UndoCommand {
    pub fn add(page_id: PageId, stroke: Stroke) -> Self {
        Self::AddStroke { page_id, stroke }
    }

    pub fn remove(page_id: PageId, stroke: Stroke, position: Option<usize>) -> Self {
        Self::RemoveStroke {
            page_id,
            stroke,
            position,
        }
    }

    pub fn page_id(&self) -> &PageId {
        match self {
            Self::AddStroke { page_id, .. } | Self::RemoveStroke { page_id, .. } => page_id,
        }
    }

    pub fn stroke(&self) -> &Stroke {
        match self {
            Self::AddStroke { stroke, .. } | Self::RemoveStroke { stroke, .. } => stroke,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct PageHistory {
    undo: VecDeque<UndoCommand>,
    redo: Vec<UndoCommand>,
}

/// Linear undo history, one pair of stacks per page.
#[derive(Debug, Clone)]
pub struct UndoHistory {
    limit: usize,
    pages: HashMap<PageId, PageHistory>,
}

impl Default for UndoHistory {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_LIMIT)
    }
}

impl UndoHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            pages: HashMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Push a command and clear that page's redo stack. The oldest entry is
    /// dropped once the page exceeds the limit.
    pub fn record(&mut self, command: UndoCommand) {
        let history = self.pages.entry(command.page_id().clone()).or_default();
        history.redo.clear();
        history.undo.push_back(command);
        while history.undo.len() > self.limit {
            history.undo.pop_front();
        }
    }

    /// Move the newest undo entry onto the redo stack and return it.
    pub fn pop_undo(&mut self, page_id: &PageId) -> Option<UndoCommand> {
        let history = self.pages.get_mut(page_id)?;
        let command = history.undo.pop_back()?;
        history.redo.push(command.clone());
        Some(command)
    }

    /// Move the newest redo entry back onto the undo stack and return it.
    pub fn pop_redo(&mut self, page_id: &PageId) -> Option<UndoCommand> {
        let history = self.pages.get_mut(page_id)?;
        let command = history.redo.pop()?;
        history.undo.push_back(command.clone());
        Some(command)
    }

    pub fn can_undo(&self, page_id: &PageId) -> bool {
        self.pages.get(page_id).is_some_and(|h| !h.undo.is_empty())
    }

    pub fn can_redo(&self, page_id: &PageId) -> bool {
        self.pages.get(page_id).is_some_and(|h| !h.redo.is_empty())
    }

    pub fn undo_len(&self, page_id: &PageId) -> usize {
        self.pages.get(page_id).map(|h| h.undo.len()).unwrap_or(0)
    }

    pub fn redo_len(&self, page_id: &PageId) -> usize {
        self.pages.get(page_id).map(|h| h.redo.len()).unwrap_or(0)
    }

    /// Undo entries for a page, oldest first.
    pub fn undo_stack(&self, page_id: &PageId) -> Vec<&UndoCommand> {
        self.pages
            .get(page_id)
            .map(|h| h.undo.iter().collect())
            .unwrap_or_default()
    }

    pub fn clear_page(&mut self, page_id: &PageId) {
        self.pages.remove(page_id);
    }
}
