//! Advisory notifications for the host UI.
//!
//! Network and storage trouble never surfaces as an error from the session;
//! the local state stays correct and a [`Notice`] says what the server missed.

use crate::stroke::{PageId, StrokeId};
use std::sync::mpsc::{self, Receiver, Sender};

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A batch could not be saved and is waiting in the offline queue.
    QueuedOffline { page_id: PageId, strokes: usize },
    /// A batch could not be saved and the offline queue rejected it too.
    QueueWriteDropped { page_id: PageId, strokes: usize },
    /// The server did not confirm an erase or undone draw.
    DeleteFailed { page_id: PageId, stroke_id: StrokeId },
    /// The server did not confirm an undone erase or redone draw.
    RestoreFailed { page_id: PageId, stroke_id: StrokeId },
    ClearFailed { page_id: PageId },
    /// The server permanently rejected a queued batch.
    EntryDiscarded { page_id: PageId, strokes: usize },
    LoadFailed { page_id: PageId },
}

/// Sending half, cloned into every background write.
#[derive(Debug, Clone)]
pub struct NoticeSender {
    tx: Sender<Notice>,
}

impl NoticeSender {
    pub fn send(&self, notice: Notice) {
        log::debug!("Notice: {:?}", notice);
        // The receiver only goes away with the session.
        let _ = self.tx.send(notice);
    }
}

pub fn channel() -> (NoticeSender, Receiver<Notice>) {
    let (tx, rx) = mpsc::channel();
    (NoticeSender { tx }, rx)
}
