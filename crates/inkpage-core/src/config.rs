//! Runtime configuration.

use crate::backoff::BackoffConfig;
use crate::path_cache::DEFAULT_PATH_CACHE_CAPACITY;
use crate::spatial::DEFAULT_CELL_SIZE;
use crate::stroke::PageGeometry;
use crate::undo::DEFAULT_UNDO_LIMIT;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SAVE_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_ERASER_RADIUS: f64 = 12.0;
/// Queue entries older than a day are purged rather than replayed.
pub const DEFAULT_STALE_AFTER_MS: u64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_DRAIN_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_DRAIN_BACKOFF: BackoffConfig = BackoffConfig::new(2000, 60_000);
pub const DEFAULT_REALTIME_BACKOFF: BackoffConfig = BackoffConfig::new(1000, 30_000);
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3030";
pub const DEFAULT_WS_BASE_URL: &str = "ws://localhost:3030";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {message}")]
    Io { path: String, message: String },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Every field falls back to its default when absent from the JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InkConfig {
    pub page: PageGeometry,
    pub save_interval_ms: u64,
    pub cell_size: f64,
    pub undo_limit: usize,
    pub eraser_radius: f64,
    pub path_cache_capacity: usize,
    pub stale_after_ms: u64,
    pub drain_interval_ms: u64,
    pub drain_backoff: BackoffConfig,
    pub realtime_backoff: BackoffConfig,
    pub request_timeout_ms: u64,
    pub api_base_url: String,
    pub ws_base_url: String,
}

impl Default for InkConfig {
    fn default() -> Self {
        Self {
            page: PageGeometry::default(),
            save_interval_ms: DEFAULT_SAVE_INTERVAL_MS,
            cell_size: DEFAULT_CELL_SIZE,
            undo_limit: DEFAULT_UNDO_LIMIT,
            eraser_radius: DEFAULT_ERASER_RADIUS,
            path_cache_capacity: DEFAULT_PATH_CACHE_CAPACITY,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            drain_interval_ms: DEFAULT_DRAIN_INTERVAL_MS,
            drain_backoff: DEFAULT_DRAIN_BACKOFF,
            realtime_backoff: DEFAULT_REALTIME_BACKOFF,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_base_url: DEFAULT_WS_BASE_URL.to_string(),
        }
    }
}

impl InkConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file. A missing or empty file yields the defaults.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Self::from_json(&content)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = InkConfig::from_json(r#"{ "saveIntervalMs": 500, "realtimeBackoff": { "baseMs": 10, "capMs": 80 } }"#)
            .unwrap();
        assert_eq!(config.save_interval(), Duration::from_millis(500));
        assert_eq!(config.realtime_backoff, BackoffConfig::new(10, 80));
        assert_eq!(config.cell_size, DEFAULT_CELL_SIZE);
        assert_eq!(config.undo_limit, 200);
        assert_eq!(config.page.width, 1000.0);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(InkConfig::from_json("{ nope"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = InkConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, InkConfig::default());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inkpage.json");
        std::fs::write(&path, r#"{ "eraserRadius": 20.0 }"#).unwrap();
        let config = InkConfig::load(&path).unwrap();
        assert_eq!(config.eraser_radius, 20.0);
    }
}
