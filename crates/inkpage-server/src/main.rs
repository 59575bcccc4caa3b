//! InkPage Stroke Server
//!
//! Authoritative per-page stroke store with a realtime push channel.
//!
//! ## Endpoints
//!
//! ```text
//! GET    /api/pages/{page}/strokes          -> Stroke[]
//! POST   /api/pages/{page}/strokes          { "strokes": Stroke[] } -> { "count": n }
//! DELETE /api/pages/{page}/strokes/{stroke}
//! DELETE /api/pages/{page}/strokes
//! GET    /ws/pages/{page}                   WebSocket push
//! ```
//!
//! Every mutation is pushed to all sockets on the page, the writer included:
//! ```json
//! { "type": "strokes:added", "strokes": [...] }
//! { "type": "strokes:deleted", "strokeId": "..." }
//! { "type": "strokes:cleared" }
//! ```

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use inkpage_core::api::{SaveStrokesRequest, SaveStrokesResponse};
use inkpage_core::realtime::RealtimeMessage;
use inkpage_core::{PageId, Stroke, StrokeId};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;
const DEFAULT_ADDR: &str = "0.0.0.0:3030";

/// One page's strokes and subscribers.
struct PageRoom {
    strokes: Vec<Stroke>,
    tx: broadcast::Sender<RealtimeMessage>,
}

impl PageRoom {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { strokes: Vec::new(), tx }
    }

    fn is_idle(&self) -> bool {
        self.strokes.is_empty() && self.tx.receiver_count() == 0
    }

    fn publish(&self, message: RealtimeMessage) {
        // No subscribers is fine.
        let _ = self.tx.send(message);
    }
}

/// Why a write was refused.
#[derive(Debug, PartialEq)]
enum WriteError {
    EmptyStroke(StrokeId),
}

impl IntoResponse for WriteError {
    fn into_response(self) -> axum::response::Response {
        match self {
            WriteError::EmptyStroke(id) => {
                (StatusCode::UNPROCESSABLE_ENTITY, format!("Stroke {} has no points", id)).into_response()
            }
        }
    }
}

/// Shared application state
struct AppState {
    pages: DashMap<PageId, PageRoom>,
}

impl AppState {
    fn new() -> Self {
        Self { pages: DashMap::new() }
    }

    fn strokes(&self, page_id: &PageId) -> Vec<Stroke> {
        self.pages
            .get(page_id)
            .map(|room| room.strokes.clone())
            .unwrap_or_default()
    }

    /// Store a batch, skipping IDs the page already has. Returns the stored count.
    fn save(&self, page_id: &PageId, strokes: Vec<Stroke>) -> Result<usize, WriteError> {
        if let Some(empty) = strokes.iter().find(|s| s.points.is_empty()) {
            return Err(WriteError::EmptyStroke(empty.id.clone()));
        }
        let mut room = self.pages.entry(page_id.clone()).or_insert_with(PageRoom::new);
        let mut added = Vec::with_capacity(strokes.len());
        for stroke in strokes {
            if room.strokes.iter().any(|s| s.id == stroke.id) || added.iter().any(|s: &Stroke| s.id == stroke.id) {
                continue;
            }
            added.push(stroke);
        }
        let count = added.len();
        if count > 0 {
            room.strokes.extend(added.iter().cloned());
            room.publish(RealtimeMessage::StrokesAdded { strokes: added });
        }
        Ok(count)
    }

    /// Returns whether the stroke existed.
    fn delete(&self, page_id: &PageId, stroke_id: &StrokeId) -> bool {
        let removed = match self.pages.get_mut(page_id) {
            Some(mut room) => {
                let before = room.strokes.len();
                room.strokes.retain(|s| &s.id != stroke_id);
                let removed = room.strokes.len() != before;
                if removed {
                    room.publish(RealtimeMessage::StrokesDeleted {
                        stroke_id: stroke_id.clone(),
                    });
                }
                removed
            }
            None => false,
        };
        self.release(page_id);
        removed
    }

    fn clear(&self, page_id: &PageId) {
        if let Some(mut room) = self.pages.get_mut(page_id) {
            room.strokes.clear();
            room.publish(RealtimeMessage::StrokesCleared);
        }
        self.release(page_id);
    }

    fn subscribe(&self, page_id: &PageId) -> broadcast::Receiver<RealtimeMessage> {
        self.pages
            .entry(page_id.clone())
            .or_insert_with(PageRoom::new)
            .tx
            .subscribe()
    }

    /// Drop the room once nothing is stored and nobody listens.
    fn release(&self, page_id: &PageId) {
        self.pages.remove_if(page_id, |_, room| room.is_idle());
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkpage_server=info,tower_http=info".into()),
        )
        .init();

    let addr: SocketAddr = match std::env::var("INKPAGE_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
    {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid INKPAGE_ADDR: {}", e);
            std::process::exit(2);
        }
    };

    let app = router(Arc::new(AppState::new()));

    info!("InkPage stroke server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws/pages/{{page}}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route(
            "/api/pages/{page}/strokes",
            get(list_strokes).post(save_strokes).delete(clear_strokes),
        )
        .route("/api/pages/{page}/strokes/{stroke}", delete(delete_stroke))
        .route("/ws/pages/{page}", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "InkPage Stroke Server - REST under /api/pages, push under /ws/pages"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

async fn list_strokes(Path(page): Path<String>, State(state): State<Arc<AppState>>) -> Json<Vec<Stroke>> {
    Json(state.strokes(&PageId::new(page)))
}

async fn save_strokes(
    Path(page): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<SaveStrokesRequest>,
) -> Result<Json<SaveStrokesResponse>, WriteError> {
    let page_id = PageId::new(page);
    let submitted = request.strokes.len();
    let count = state.save(&page_id, request.strokes)?;
    debug!("Page {}: stored {} of {} strokes", page_id, count, submitted);
    Ok(Json(SaveStrokesResponse { count }))
}

async fn delete_stroke(
    Path((page, stroke)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> StatusCode {
    let page_id = PageId::new(page);
    let stroke_id = StrokeId::from(stroke.as_str());
    if !state.delete(&page_id, &stroke_id) {
        debug!("Page {}: delete of unknown stroke {}", page_id, stroke_id);
    }
    StatusCode::NO_CONTENT
}

async fn clear_strokes(Path(page): Path<String>, State(state): State<Arc<AppState>>) -> StatusCode {
    let page_id = PageId::new(page);
    state.clear(&page_id);
    info!("Page {} cleared", page_id);
    StatusCode::NO_CONTENT
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(page): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, PageId::new(page), state))
}

/// Push page mutations to one subscriber until either side goes away.
async fn handle_socket(socket: WebSocket, page_id: PageId, state: Arc<AppState>) {
    let subscriber = Uuid::new_v4().to_string();
    info!("Subscriber {} joined page {}", subscriber, page_id);

    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.subscribe(&page_id);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Clients only listen
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", subscriber, e);
                        break;
                    }
                }
            }

            update = rx.recv() => {
                match update {
                    Ok(message) => {
                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("Failed to encode push for page {}: {}", page_id, e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Subscriber {} lagged, {} pushes skipped", subscriber, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    drop(rx);
    state.release(&page_id);
    info!("Subscriber {} left page {}", subscriber, page_id);
}
