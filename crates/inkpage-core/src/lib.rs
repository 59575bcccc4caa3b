//! InkPage Core Library
//!
//! Local-first freehand ink for paginated documents: stroke capture, spatial
//! erasing, per-page undo, batched saves with an offline queue, and realtime
//! page channels.

pub mod api;
pub mod backoff;
pub mod capture;
pub mod config;
pub mod directory;
pub mod drain;
pub mod notice;
pub mod offline;
pub mod path_cache;
pub mod platform;
pub mod realtime;
pub mod scheduler;
pub mod session;
pub mod spatial;
pub mod spawn;
pub mod storage;
pub mod stroke;
pub mod transcription;
pub mod undo;
pub mod working_set;

pub use api::{ApiError, ApiResult, StrokeApi};
pub use capture::{ElementRect, PointerSample, StrokeCapture};
pub use config::InkConfig;
pub use directory::{PageDirectory, StaticPages};
pub use notice::Notice;
pub use offline::OfflineQueue;
pub use realtime::{ChannelState, RealtimeHub, RealtimeUpdate};
pub use scheduler::{BatchSaveScheduler, WatchScope};
pub use session::{InkSession, SessionError};
pub use spatial::SpatialIndex;
pub use storage::{OfflineStore, PendingOfflineEntry, StorageError};
pub use stroke::{Color, InkPoint, PageId, PenStyle, Stroke, StrokeId, StrokeStyle};
pub use transcription::TranscriptionStatus;
pub use undo::{UndoCommand, UndoHistory};
pub use working_set::{PendingWorkingSet, SavedWorkingSet};
