//! Size-bounded cache of stroke paths.

use crate::stroke::{Stroke, StrokeId};
use indexmap::IndexMap;
use kurbo::BezPath;

/// Default number of cached paths.
pub const DEFAULT_PATH_CACHE_CAPACITY: usize = 2048;

/// Least-recently-used cache of `StrokeId -> BezPath`.
///
/// Entries never go stale on their own since strokes are immutable; they only
/// leave through eviction or [`PathCache::invalidate`].
#[derive(Debug, Clone)]
pub struct PathCache {
    capacity: usize,
    /// Ordered oldest-use first.
    entries: IndexMap<StrokeId, BezPath>,
}

impl Default for PathCache {
    fn default() -> Self {
        Self::new(DEFAULT_PATH_CACHE_CAPACITY)
    }
}

impl PathCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    /// Cached path for `stroke`, building it on a miss.
    pub fn get_or_build(&mut self, stroke: &Stroke) -> &BezPath {
        let index = match self.entries.get_index_of(&stroke.id) {
            Some(i) => {
                let last = self.entries.len() - 1;
                self.entries.move_index(i, last);
                last
            }
            None => {
                if self.entries.len() >= self.capacity {
                    self.entries.shift_remove_index(0);
                }
                self.entries.insert(stroke.id.clone(), stroke.to_path());
                self.entries.len() - 1
            }
        };
        &self.entries[index]
    }

    pub fn contains(&self, id: &StrokeId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn invalidate(&mut self, id: &StrokeId) {
        self.entries.shift_remove(id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
