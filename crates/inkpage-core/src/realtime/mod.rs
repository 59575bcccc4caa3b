//! Per-page push channel from the stroke server.
//!
//! A [`RealtimeHub`] keeps one socket per page the host wants live. Sockets
//! are polled, never called back into: each one buffers [`SocketEvent`]s,
//! and the hub turns them into typed [`RealtimeUpdate`]s for the session.
//! Reconnect backoff lives in each [`PageChannel`].

#[cfg(not(target_arch = "wasm32"))]
mod native;
pub mod scripted;
#[cfg(target_arch = "wasm32")]
mod wasm;

#[cfg(not(target_arch = "wasm32"))]
pub use native::TungsteniteConnector;
#[cfg(target_arch = "wasm32")]
pub use wasm::WebSysConnector;

use crate::backoff::{Backoff, BackoffConfig};
use crate::platform::Instant;
use crate::stroke::{self, PageId, Stroke, StrokeId};
use crate::transcription::TranscriptionStatus;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Server push envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimeMessage {
    #[serde(rename = "strokes:added")]
    StrokesAdded { strokes: Vec<Stroke> },
    #[serde(rename = "strokes:deleted", rename_all = "camelCase")]
    StrokesDeleted { stroke_id: StrokeId },
    #[serde(rename = "strokes:cleared")]
    StrokesCleared,
    #[serde(rename = "transcription:complete")]
    TranscriptionComplete { content: String },
    #[serde(rename = "transcription:failed")]
    TranscriptionFailed { error: String },
}

/// Parse a text frame. Malformed JSON and unknown types are logged and dropped.
pub fn parse_message(text: &str) -> Option<RealtimeMessage> {
    match serde_json::from_str(text) {
        Ok(message) => Some(message),
        Err(e) => {
            log::warn!("Ignoring realtime message: {} ({})", e, preview(text));
            None
        }
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    /// `will_reconnect` is false once the page is no longer wanted.
    Closed { will_reconnect: bool },
}

/// What a socket reports between polls.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Opened,
    Text(String),
    Closed,
    Error(String),
}

/// A live connection, polled from the session loop.
pub trait SocketHandle {
    /// Events since the last poll, oldest first.
    fn poll_events(&mut self) -> Vec<SocketEvent>;

    /// Close the socket. Nothing it buffered afterwards is delivered.
    fn close(&mut self);
}

/// Opens page sockets.
pub trait Connector {
    fn connect(&self, page_id: &PageId) -> Result<Box<dyn SocketHandle>, String>;
}

/// A change pushed by the server, ready to apply to the working sets.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeUpdate {
    Added { page_id: PageId, strokes: Vec<Stroke> },
    Deleted { page_id: PageId, stroke_id: StrokeId },
    Cleared { page_id: PageId },
    Transcription { page_id: PageId, status: TranscriptionStatus },
}

impl RealtimeUpdate {
    /// Malformed added strokes are dropped here, before they reach any working set.
    fn from_message(page_id: PageId, message: RealtimeMessage) -> Self {
        match message {
            RealtimeMessage::StrokesAdded { strokes } => Self::Added {
                strokes: stroke::retain_well_formed(strokes, "realtime channel"),
                page_id,
            },
            RealtimeMessage::StrokesDeleted { stroke_id } => Self::Deleted { page_id, stroke_id },
            RealtimeMessage::StrokesCleared => Self::Cleared { page_id },
            RealtimeMessage::TranscriptionComplete { content } => Self::Transcription {
                page_id,
                status: TranscriptionStatus::Complete { content },
            },
            RealtimeMessage::TranscriptionFailed { error } => Self::Transcription {
                page_id,
                status: TranscriptionStatus::Failed { error },
            },
        }
    }
}

/// One page's connection and its reconnect state.
pub struct PageChannel {
    page_id: PageId,
    state: ChannelState,
    socket: Option<Box<dyn SocketHandle>>,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
}

impl PageChannel {
    fn new(page_id: PageId, backoff: BackoffConfig) -> Self {
        Self {
            page_id,
            state: ChannelState::Closed { will_reconnect: true },
            socket: None,
            backoff: Backoff::new(backoff),
            reconnect_at: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    fn open(&mut self, connector: &dyn Connector, now: Instant) {
        self.reconnect_at = None;
        match connector.connect(&self.page_id) {
            Ok(socket) => {
                log::debug!("Connecting realtime channel for page {}", self.page_id);
                self.socket = Some(socket);
                self.state = ChannelState::Connecting;
            }
            Err(e) => {
                log::warn!("Realtime connect for page {} failed: {}", self.page_id, e);
                self.schedule_reconnect(now);
            }
        }
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
        let delay = self.backoff.next_delay();
        log::info!(
            "Realtime channel for page {} closed, reconnecting in {:?} (attempt {})",
            self.page_id,
            delay,
            self.backoff.attempt()
        );
        self.reconnect_at = Some(now + delay);
        self.state = ChannelState::Closed { will_reconnect: true };
    }

    fn shutdown(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
        self.reconnect_at = None;
        self.state = ChannelState::Closed { will_reconnect: false };
    }

    fn poll(&mut self, connector: &dyn Connector, now: Instant, updates: &mut Vec<RealtimeUpdate>) {
        if self.socket.is_none() {
            if self.reconnect_at.is_some_and(|at| now >= at) {
                self.open(connector, now);
            }
            return;
        }

        let events = self.socket.as_mut().map(|s| s.poll_events()).unwrap_or_default();
        for event in events {
            match event {
                SocketEvent::Opened => {
                    log::info!("Realtime channel for page {} open", self.page_id);
                    self.state = ChannelState::Open;
                    self.backoff.reset();
                }
                SocketEvent::Text(text) => {
                    if let Some(message) = parse_message(&text) {
                        updates.push(RealtimeUpdate::from_message(self.page_id.clone(), message));
                    }
                }
                SocketEvent::Error(e) => {
                    log::warn!("Realtime socket error for page {}: {}", self.page_id, e);
                    self.schedule_reconnect(now);
                    return;
                }
                SocketEvent::Closed => {
                    self.schedule_reconnect(now);
                    return;
                }
            }
        }
    }
}

/// All live page channels.
pub struct RealtimeHub {
    connector: Box<dyn Connector>,
    backoff: BackoffConfig,
    channels: BTreeMap<PageId, PageChannel>,
}

impl RealtimeHub {
    pub fn new(connector: Box<dyn Connector>, backoff: BackoffConfig) -> Self {
        Self {
            connector,
            backoff,
            channels: BTreeMap::new(),
        }
    }

    /// Reconcile open channels with the pages the host wants live: close what
    /// is no longer wanted, open what is new, leave the rest alone.
    pub fn set_desired(&mut self, pages: impl IntoIterator<Item = PageId>, now: Instant) {
        let desired: BTreeSet<PageId> = pages.into_iter().collect();

        self.channels.retain(|page_id, channel| {
            if desired.contains(page_id) {
                return true;
            }
            log::debug!("Closing realtime channel for page {}", page_id);
            channel.shutdown();
            false
        });

        for page_id in desired {
            if self.channels.contains_key(&page_id) {
                continue;
            }
            let mut channel = PageChannel::new(page_id.clone(), self.backoff);
            channel.open(self.connector.as_ref(), now);
            self.channels.insert(page_id, channel);
        }
    }

    /// Drive sockets and reconnect timers. Returns updates in arrival order per page.
    pub fn poll(&mut self, now: Instant) -> Vec<RealtimeUpdate> {
        let mut updates = Vec::new();
        for channel in self.channels.values_mut() {
            channel.poll(self.connector.as_ref(), now, &mut updates);
        }
        updates
    }

    /// Pages no longer wanted report a terminal close.
    pub fn state(&self, page_id: &PageId) -> ChannelState {
        self.channels
            .get(page_id)
            .map(PageChannel::state)
            .unwrap_or(ChannelState::Closed { will_reconnect: false })
    }

    pub fn attempt(&self, page_id: &PageId) -> u32 {
        self.channels.get(page_id).map(PageChannel::attempt).unwrap_or(0)
    }

    pub fn channel(&self, page_id: &PageId) -> Option<&PageChannel> {
        self.channels.get(page_id)
    }

    pub fn open_pages(&self) -> Vec<PageId> {
        self.channels
            .iter()
            .filter(|(_, c)| c.state == ChannelState::Open)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn close_all(&mut self) {
        self.set_desired(std::iter::empty(), Instant::now());
    }
}

impl Drop for RealtimeHub {
    fn drop(&mut self) {
        for channel in self.channels.values_mut() {
            channel.shutdown();
        }
    }
}
