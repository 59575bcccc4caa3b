//! Per-page handwriting transcription status pushed by the server.
//!
//! Sidecar data: it rides the realtime channel but is not stroke state.

use crate::stroke::PageId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TranscriptionStatus {
    Complete { content: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptionStore {
    pages: HashMap<PageId, TranscriptionStatus>,
}

impl TranscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, page_id: &PageId, status: TranscriptionStatus) {
        self.pages.insert(page_id.clone(), status);
    }

    pub fn get(&self, page_id: &PageId) -> Option<&TranscriptionStatus> {
        self.pages.get(page_id)
    }

    pub fn clear(&mut self, page_id: &PageId) -> Option<TranscriptionStatus> {
        self.pages.remove(page_id)
    }
}
