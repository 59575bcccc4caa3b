//! Grid-bucketed spatial index for eraser hit testing.
//!
//! Strokes live in a slot arena. Each grid cell holds the slot IDs whose
//! bounding box overlaps the cell, so a query only inspects strokes near the
//! query point instead of every point on the page.

use crate::stroke::{Stroke, StrokeId};
use std::collections::{BTreeSet, HashMap};

/// Default grid cell size in page units.
pub const DEFAULT_CELL_SIZE: f64 = 60.0;

/// Strokes covering more cells than this go into a bucket every query scans
/// instead of the grid.
pub const MAX_CELLS_PER_STROKE: i128 = 4096;

/// Grid cell key, `(floor(x / cell), floor(y / cell))`.
pub type CellKey = (i64, i64);

/// Index into the slot arena.
pub type SlotId = usize;

#[derive(Debug, Clone)]
struct Slot {
    stroke: Stroke,
    /// Cells this stroke was registered under at insert time.
    cells: Vec<CellKey>,
}

/// Spatial index over one page's strokes.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    slots: Vec<Option<Slot>>,
    free: Vec<SlotId>,
    by_id: HashMap<StrokeId, SlotId>,
    grid: HashMap<CellKey, BTreeSet<SlotId>>,
    /// Slots too large for the grid.
    oversized: BTreeSet<SlotId>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl SpatialIndex {
    /// Create an empty index. Non-positive cell sizes fall back to the default.
    pub fn new(cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            DEFAULT_CELL_SIZE
        };
        Self {
            cell_size,
            slots: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            grid: HashMap::new(),
            oversized: BTreeSet::new(),
        }
    }

    /// Build an index over `strokes`.
    pub fn build<'a>(cell_size: f64, strokes: impl IntoIterator<Item = &'a Stroke>) -> Self {
        let mut index = Self::new(cell_size);
        for stroke in strokes {
            index.add_stroke(stroke.clone());
        }
        index
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Saturates at the `i64` range; NaN maps to cell 0.
    fn cell_of(&self, v: f64) -> i64 {
        (v / self.cell_size).floor() as i64
    }

    /// Number of cells in `c0..=c1` by `r0..=r1`, or `None` past `i128`.
    fn cell_span(c0: i64, c1: i64, r0: i64, r1: i64) -> Option<i128> {
        let cols = i128::from(c1) - i128::from(c0) + 1;
        let rows = i128::from(r1) - i128::from(r0) + 1;
        cols.checked_mul(rows)
    }

    /// Register a stroke in every cell its bounding box overlaps.
    /// Returns false if the ID was already indexed or the stroke is malformed.
    pub fn add_stroke(&mut self, stroke: Stroke) -> bool {
        if !stroke.is_well_formed() || self.by_id.contains_key(&stroke.id) {
            return false;
        }

        let bounds = stroke.bounds();
        let (c0, c1) = (self.cell_of(bounds.x0), self.cell_of(bounds.x1));
        let (r0, r1) = (self.cell_of(bounds.y0), self.cell_of(bounds.y1));

        let slot_id = match self.free.pop() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        let mut cells = Vec::new();
        match Self::cell_span(c0, c1, r0, r1) {
            Some(span) if span <= MAX_CELLS_PER_STROKE => {
                for col in c0..=c1 {
                    for row in r0..=r1 {
                        self.grid.entry((col, row)).or_default().insert(slot_id);
                        cells.push((col, row));
                    }
                }
            }
            _ => {
                self.oversized.insert(slot_id);
            }
        }

        self.by_id.insert(stroke.id.clone(), slot_id);
        self.slots[slot_id] = Some(Slot { stroke, cells });
        true
    }

    /// Remove a stroke from every cell it was registered under.
    pub fn remove_stroke(&mut self, id: &StrokeId) -> Option<Stroke> {
        let slot_id = self.by_id.remove(id)?;
        let slot = self.slots.get_mut(slot_id)?.take()?;

        for cell in &slot.cells {
            if let Some(set) = self.grid.get_mut(cell) {
                set.remove(&slot_id);
                if set.is_empty() {
                    self.grid.remove(cell);
                }
            }
        }

        self.oversized.remove(&slot_id);
        self.free.push(slot_id);
        Some(slot.stroke)
    }

    pub fn contains(&self, id: &StrokeId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &StrokeId) -> Option<&Stroke> {
        let slot_id = *self.by_id.get(id)?;
        self.slots.get(slot_id)?.as_ref().map(|s| &s.stroke)
    }

    /// Number of indexed strokes.
    pub fn size(&self) -> usize {
        self.by_id.len()
    }

    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_id.clear();
        self.grid.clear();
        self.oversized.clear();
    }

    /// Candidate slots for a square of side `2 * radius` around the point,
    /// deduplicated and in ascending slot order. A square covering more cells
    /// than are occupied scans the occupied cells instead.
    fn candidates(&self, x: f64, y: f64, radius: f64) -> BTreeSet<SlotId> {
        let (c0, c1) = (self.cell_of(x - radius), self.cell_of(x + radius));
        let (r0, r1) = (self.cell_of(y - radius), self.cell_of(y + radius));

        let mut out = self.oversized.clone();
        let walk = Self::cell_span(c0, c1, r0, r1).is_some_and(|span| span <= self.grid.len() as i128);
        if walk {
            for col in c0..=c1 {
                for row in r0..=r1 {
                    if let Some(set) = self.grid.get(&(col, row)) {
                        out.extend(set.iter().copied());
                    }
                }
            }
        } else {
            for (&(col, row), set) in &self.grid {
                if (c0..=c1).contains(&col) && (r0..=r1).contains(&row) {
                    out.extend(set.iter().copied());
                }
            }
        }
        out
    }

    /// Some stroke with a point within `radius` of `(x, y)`.
    ///
    /// The first hit in slot order wins; this is not necessarily the nearest.
    pub fn query_point(&self, x: f64, y: f64, radius: f64) -> Option<&Stroke> {
        if !(radius >= 0.0) {
            return None;
        }
        self.candidates(x, y, radius)
            .into_iter()
            .filter_map(|slot_id| self.slots[slot_id].as_ref())
            .map(|slot| &slot.stroke)
            .find(|stroke| stroke.has_point_within(x, y, radius))
    }

    /// The stroke whose closest point is nearest to `(x, y)`, within `radius`.
    /// Ties go to the lower slot.
    pub fn query_nearest(&self, x: f64, y: f64, radius: f64) -> Option<&Stroke> {
        if !(radius >= 0.0) {
            return None;
        }
        let r2 = radius * radius;
        let mut best: Option<(f64, &Stroke)> = None;

        for slot_id in self.candidates(x, y, radius) {
            let Some(slot) = self.slots[slot_id].as_ref() else {
                continue;
            };
            let Some(d) = slot.stroke.min_distance_sq(x, y) else {
                continue;
            };
            if d <= r2 && best.is_none_or(|(bd, _)| d < bd) {
                best = Some((d, &slot.stroke));
            }
        }

        best.map(|(_, s)| s)
    }

    /// Number of non-empty grid cells.
    pub fn cell_count(&self) -> usize {
        self.grid.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::{InkPoint, StrokeStyle};

    fn stroke(id: &str, points: &[(f64, f64)]) -> Stroke {
        Stroke::with_id(
            StrokeId::from(id),
            points.iter().map(|&(x, y)| InkPoint::new(x, y, None)).collect(),
            StrokeStyle::default(),
        )
    }

    #[test]
    fn test_query_hits_point_within_radius() {
        let mut index = SpatialIndex::default();
        index.add_stroke(stroke("a", &[(10.0, 10.0), (20.0, 10.0)]));

        let hit = index.query_point(22.0, 12.0, 3.0).map(|s| s.id.clone());
        assert_eq!(hit, Some(StrokeId::from("a")));
    }

    #[test]
    fn test_query_misses_far_stroke() {
        let mut index = SpatialIndex::default();
        index.add_stroke(stroke("a", &[(10.0, 10.0), (20.0, 10.0)]));

        assert!(index.query_point(15.0, 30.0, 5.0).is_none());
        // Between the two points: only points count, not the segment.
        assert!(index.query_point(15.0, 10.0, 4.0).is_none());
    }

    #[test]
    fn test_query_across_cell_boundary() {
        let mut index = SpatialIndex::new(60.0);
        index.add_stroke(stroke("a", &[(61.0, 61.0), (70.0, 70.0)]));

        // Query point sits in the neighbouring cell.
        assert!(index.query_point(58.0, 59.0, 5.0).is_some());
    }

    #[test]
    fn test_stroke_spanning_cells_registered_in_all() {
        let mut index = SpatialIndex::new(60.0);
        index.add_stroke(stroke("a", &[(0.0, 0.0), (130.0, 70.0)]));
        // cols 0..=2, rows 0..=1
        assert_eq!(index.cell_count(), 6);

        index.remove_stroke(&StrokeId::from("a"));
        assert_eq!(index.cell_count(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_negative_coordinates() {
        let mut index = SpatialIndex::new(60.0);
        index.add_stroke(stroke("a", &[(-5.0, -5.0), (-1.0, -1.0)]));
        assert!(index.query_point(-3.0, -4.0, 2.0).is_some());
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let mut index = SpatialIndex::default();
        assert!(index.add_stroke(stroke("a", &[(0.0, 0.0), (1.0, 1.0)])));
        assert!(!index.add_stroke(stroke("a", &[(0.0, 0.0), (1.0, 1.0)])));
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn test_remove_then_query() {
        let mut index = SpatialIndex::default();
        index.add_stroke(stroke("a", &[(0.0, 0.0), (1.0, 1.0)]));
        assert!(index.remove_stroke(&StrokeId::from("a")).is_some());
        assert!(index.query_point(0.0, 0.0, 5.0).is_none());
        assert!(index.remove_stroke(&StrokeId::from("a")).is_none());
    }

    #[test]
    fn test_slots_are_reused() {
        let mut index = SpatialIndex::default();
        index.add_stroke(stroke("a", &[(0.0, 0.0), (1.0, 1.0)]));
        index.remove_stroke(&StrokeId::from("a"));
        index.add_stroke(stroke("b", &[(300.0, 300.0), (301.0, 301.0)]));
        assert_eq!(index.slots.len(), 1);
        assert!(index.query_point(300.0, 300.0, 1.0).is_some());
    }

    #[test]
    fn test_first_hit_is_oldest_slot() {
        let mut index = SpatialIndex::default();
        index.add_stroke(stroke("far", &[(0.0, 4.0), (50.0, 50.0)]));
        index.add_stroke(stroke("near", &[(0.0, 1.0), (50.0, 50.0)]));

        assert_eq!(index.query_point(0.0, 0.0, 5.0).unwrap().id, StrokeId::from("far"));
        assert_eq!(index.query_nearest(0.0, 0.0, 5.0).unwrap().id, StrokeId::from("near"));
    }

    #[test]
    fn test_build_from_strokes() {
        let strokes = vec![
            stroke("a", &[(0.0, 0.0), (1.0, 1.0)]),
            stroke("b", &[(500.0, 500.0), (501.0, 501.0)]),
        ];
        let index = SpatialIndex::build(DEFAULT_CELL_SIZE, &strokes);
        assert_eq!(index.size(), 2);
        assert!(index.get(&StrokeId::from("b")).is_some());
    }

    #[test]
    fn test_extreme_coordinates_do_not_overflow() {
        let mut index = SpatialIndex::default();
        assert!(index.add_stroke(stroke("huge", &[(-1e300, 0.0), (1e300, 0.0)])));
        assert!(index.add_stroke(stroke("page", &[(0.0, 0.0), (1e6, 1e6)])));
        assert_eq!(index.cell_count(), 0);

        assert_eq!(index.query_point(0.0, 0.0, 1.0).unwrap().id, StrokeId::from("page"));
        assert!(index.query_nearest(5e299, 0.0, 1.0).is_none());

        index.remove_stroke(&StrokeId::from("page"));
        assert_eq!(index.query_nearest(0.0, 0.0, f64::MAX).unwrap().id, StrokeId::from("huge"));
    }

    #[test]
    fn test_huge_radius_scans_occupied_cells() {
        let mut index = SpatialIndex::default();
        index.add_stroke(stroke("a", &[(10.0, 10.0), (12.0, 12.0)]));
        index.add_stroke(stroke("b", &[(900.0, 900.0), (901.0, 901.0)]));

        assert_eq!(index.query_nearest(890.0, 890.0, 1e12).unwrap().id, StrokeId::from("b"));
        assert_eq!(index.query_point(0.0, 0.0, f64::INFINITY).unwrap().id, StrokeId::from("a"));
        assert!(index.query_point(f64::NAN, 0.0, 5.0).is_none());
    }

    #[test]
    fn test_malformed_stroke_is_not_indexed() {
        let mut index = SpatialIndex::default();
        assert!(!index.add_stroke(stroke("empty", &[])));
        assert!(!index.add_stroke(stroke("nan", &[(f64::NAN, 1.0)])));
        assert!(index.is_empty());
    }

    #[test]
    fn test_invalid_cell_size_falls_back() {
        assert_eq!(SpatialIndex::new(0.0).cell_size(), DEFAULT_CELL_SIZE);
        assert_eq!(SpatialIndex::new(f64::NAN).cell_size(), DEFAULT_CELL_SIZE);
    }
}
