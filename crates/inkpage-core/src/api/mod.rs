//! The remote stroke store, as seen from the client.
//!
//! [`StrokeApi`] is the seam to the authoritative server. Futures are
//! `'static` so a write can be spawned and forgotten while local state moves on.

mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod http;

pub use memory::{ApiCall, ApiMode, MemoryStrokeApi};

#[cfg(not(target_arch = "wasm32"))]
pub use http::HttpStrokeApi;

use crate::platform::{BoxFuture, MaybeSend};
use crate::stroke::{PageId, Stroke, StrokeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the stroke server.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("Server unreachable")]
    Offline,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Build from an HTTP status; 4xx is permanent, everything else retryable.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) {
            Self::Rejected { status, message }
        } else {
            Self::Server { status, message }
        }
    }

    /// True when retrying cannot succeed (client errors).
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Result type for server operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Body of `POST /api/pages/{page}/strokes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveStrokesRequest {
    pub strokes: Vec<Stroke>,
}

/// Response of `POST /api/pages/{page}/strokes`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SaveStrokesResponse {
    pub count: usize,
}

/// Network operations against the authoritative stroke store.
pub trait StrokeApi: MaybeSend {
    /// Store a batch of strokes in one request. Returns the stored count.
    fn save_strokes(&self, page_id: &PageId, strokes: &[Stroke]) -> BoxFuture<'static, ApiResult<usize>>;

    /// Delete one stroke.
    fn delete_stroke(&self, page_id: &PageId, stroke_id: &StrokeId) -> BoxFuture<'static, ApiResult<()>>;

    /// Delete every stroke on a page.
    fn clear_strokes(&self, page_id: &PageId) -> BoxFuture<'static, ApiResult<()>>;

    /// Fetch a page's strokes in draw order.
    fn fetch_strokes(&self, page_id: &PageId) -> BoxFuture<'static, ApiResult<Vec<Stroke>>>;
}
