//! Hand-driven sockets for tests and demos without a server.

use super::{Connector, SocketEvent, SocketHandle};
use crate::stroke::PageId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct SocketScript {
    events: VecDeque<SocketEvent>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    /// Every socket opened per page, newest last.
    sockets: HashMap<PageId, Vec<Arc<Mutex<SocketScript>>>>,
    fail_connects: bool,
}

/// A [`Connector`] whose sockets only report what the test pushes.
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent connects fail until switched back.
    pub fn fail_connects(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_connects = fail;
        }
    }

    fn latest(&self, page_id: &PageId) -> Option<Arc<Mutex<SocketScript>>> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.sockets.get(page_id).and_then(|s| s.last().cloned()))
    }

    /// Queue an event on the page's newest socket. Returns false if the page
    /// has no socket or it was closed.
    pub fn push(&self, page_id: &PageId, event: SocketEvent) -> bool {
        let Some(socket) = self.latest(page_id) else {
            return false;
        };
        let Ok(mut script) = socket.lock() else {
            return false;
        };
        if script.closed {
            return false;
        }
        script.events.push_back(event);
        true
    }

    /// Push a realtime JSON frame.
    pub fn push_text(&self, page_id: &PageId, text: impl Into<String>) -> bool {
        self.push(page_id, SocketEvent::Text(text.into()))
    }

    pub fn connect_count(&self, page_id: &PageId) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.sockets.get(page_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Whether the page's newest socket has been closed by its owner.
    pub fn is_closed(&self, page_id: &PageId) -> bool {
        self.latest(page_id)
            .and_then(|socket| socket.lock().ok().map(|s| s.closed))
            .unwrap_or(true)
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, page_id: &PageId) -> Result<Box<dyn SocketHandle>, String> {
        let mut inner = self.inner.lock().map_err(|e| format!("Lock error: {}", e))?;
        if inner.fail_connects {
            return Err("connection refused".to_string());
        }
        let script = Arc::new(Mutex::new(SocketScript::default()));
        inner.sockets.entry(page_id.clone()).or_default().push(script.clone());
        Ok(Box::new(ScriptedSocket { script }))
    }
}

struct ScriptedSocket {
    script: Arc<Mutex<SocketScript>>,
}

impl SocketHandle for ScriptedSocket {
    fn poll_events(&mut self) -> Vec<SocketEvent> {
        match self.script.lock() {
            Ok(mut script) if !script.closed => script.events.drain(..).collect(),
            _ => Vec::new(),
        }
    }

    fn close(&mut self) {
        if let Ok(mut script) = self.script.lock() {
            script.closed = true;
            script.events.clear();
        }
    }
}
