//! Native page sockets over `tungstenite`.
//!
//! Each socket runs on its own thread. The thread reads with a short timeout
//! so it can notice a close command between frames.

use super::{Connector, SocketEvent, SocketHandle};
use crate::stroke::PageId;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread;
use std::time::Duration;
use tungstenite::{Message, connect};
use url::Url;

const READ_TIMEOUT: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands sent to the socket thread.
enum WsCommand {
    Close,
}

/// Connects to `{ws_base}/ws/pages/{page}`.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    ws_base: Url,
}

impl TungsteniteConnector {
    pub fn new(ws_base: &str) -> Result<Self, String> {
        let ws_base = Url::parse(ws_base).map_err(|e| format!("Invalid URL: {}", e))?;
        if ws_base.scheme() != "ws" && ws_base.scheme() != "wss" {
            return Err(format!("Invalid WebSocket URL scheme: {}", ws_base.scheme()));
        }
        Ok(Self { ws_base })
    }

    fn page_url(&self, page_id: &PageId) -> Result<Url, String> {
        let mut url = self.ws_base.clone();
        url.path_segments_mut()
            .map_err(|_| "Base URL cannot have a path".to_string())?
            .pop_if_empty()
            .extend(["ws", "pages", page_id.as_str()]);
        Ok(url)
    }
}

impl Connector for TungsteniteConnector {
    fn connect(&self, page_id: &PageId) -> Result<Box<dyn SocketHandle>, String> {
        let url = self.page_url(page_id)?;
        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let (event_tx, event_rx) = channel::<SocketEvent>();

        thread::Builder::new()
            .name(format!("inkpage-ws-{}", page_id))
            .spawn(move || run_socket(url, cmd_rx, event_tx))
            .map_err(|e| format!("Failed to spawn socket thread: {}", e))?;

        Ok(Box::new(NativeSocket {
            cmd_tx: Some(cmd_tx),
            event_rx: Some(event_rx),
        }))
    }
}

fn run_socket(url: Url, cmd_rx: Receiver<WsCommand>, event_tx: Sender<SocketEvent>) {
    log::info!("WebSocket thread: connecting to {}", url);
    let (mut socket, response) = match connect(url.as_str()) {
        Ok(connected) => connected,
        Err(e) => {
            log::warn!("WebSocket connection failed: {}", e);
            let _ = event_tx.send(SocketEvent::Error(format!("Connection failed: {}", e)));
            return;
        }
    };
    log::debug!("WebSocket connected, status: {}", response.status());

    match socket.get_mut() {
        tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
            let _ = tcp.set_read_timeout(Some(READ_TIMEOUT));
            let _ = tcp.set_write_timeout(Some(WRITE_TIMEOUT));
        }
        #[allow(unreachable_patterns)]
        _ => log::debug!("TLS or other stream - using default timeout handling"),
    }

    if event_tx.send(SocketEvent::Opened).is_err() {
        let _ = socket.close(None);
        return;
    }

    loop {
        match cmd_rx.try_recv() {
            Ok(WsCommand::Close) | Err(TryRecvError::Disconnected) => {
                log::debug!("WebSocket close requested");
                let _ = socket.close(None);
                return;
            }
            Err(TryRecvError::Empty) => {}
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                if event_tx.send(SocketEvent::Text(text)).is_err() {
                    let _ = socket.close(None);
                    return;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("WebSocket received close frame");
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::warn!("WebSocket read error: {}", e);
                let _ = event_tx.send(SocketEvent::Error(e.to_string()));
                return;
            }
        }
    }

    let _ = event_tx.send(SocketEvent::Closed);
}

struct NativeSocket {
    cmd_tx: Option<Sender<WsCommand>>,
    event_rx: Option<Receiver<SocketEvent>>,
}

impl SocketHandle for NativeSocket {
    fn poll_events(&mut self) -> Vec<SocketEvent> {
        match &self.event_rx {
            Some(rx) => rx.try_iter().collect(),
            None => Vec::new(),
        }
    }

    fn close(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
    }
}

impl Drop for NativeSocket {
    fn drop(&mut self) {
        self.close();
    }
}
