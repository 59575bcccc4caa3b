//! Pointer capture: raw pointer samples in, committed strokes out.
//!
//! Samples are buffered and only folded into the live stroke once per
//! animation frame, so input rate and render rate stay decoupled.

use crate::stroke::{InkPoint, PageGeometry, PageId, Stroke, StrokeStyle};

/// Minimum number of points for a stroke to be kept.
pub const MIN_STROKE_POINTS: usize = 2;

/// Device-space position reported by a pointer event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    pub x: f64,
    pub y: f64,
    /// Pressure as reported by the device, if any.
    pub pressure: Option<f32>,
}

/// One pointer event, possibly carrying the platform's coalesced sub-samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerSample {
    pub x: f64,
    pub y: f64,
    pub pressure: Option<f32>,
    /// Coalesced samples, oldest first. When present they supersede `x`/`y`.
    pub coalesced: Vec<RawPoint>,
}

impl PointerSample {
    pub fn new(x: f64, y: f64, pressure: Option<f32>) -> Self {
        Self {
            x,
            y,
            pressure,
            coalesced: Vec::new(),
        }
    }

    pub fn with_coalesced(mut self, coalesced: Vec<RawPoint>) -> Self {
        self.coalesced = coalesced;
        self
    }

    fn raw_points(&self) -> Vec<RawPoint> {
        if self.coalesced.is_empty() {
            vec![RawPoint {
                x: self.x,
                y: self.y,
                pressure: self.pressure,
            }]
        } else {
            self.coalesced.clone()
        }
    }
}

/// Bounding rectangle of the captured element, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementRect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// Maps device pixels into the fixed page coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    rect: ElementRect,
    scale_x: f64,
    scale_y: f64,
}

impl CoordinateMapper {
    pub fn new(rect: ElementRect, page: PageGeometry) -> Self {
        let scale = |page_len: f64, px_len: f64| {
            if px_len > 0.0 { page_len / px_len } else { 1.0 }
        };
        Self {
            rect,
            scale_x: scale(page.width, rect.width),
            scale_y: scale(page.height, rect.height),
        }
    }

    /// Map a raw device point. Zero pressure during contact counts as unreported.
    pub fn map(&self, raw: RawPoint) -> InkPoint {
        let pressure = raw.pressure.filter(|p| *p > 0.0);
        InkPoint::new(
            (raw.x - self.rect.left) * self.scale_x,
            (raw.y - self.rect.top) * self.scale_y,
            pressure,
        )
    }
}

#[derive(Debug, Clone)]
struct ActiveStroke {
    page_id: PageId,
    /// Fixed at stroke start; not re-queried per sample.
    mapper: CoordinateMapper,
    style: StrokeStyle,
    /// Points already flushed to the live stroke.
    points: Vec<InkPoint>,
    /// Points received since the last animation frame.
    buffer: Vec<InkPoint>,
}

/// Converts pointer input into strokes.
#[derive(Debug, Clone)]
pub struct StrokeCapture {
    page: PageGeometry,
    active: Option<ActiveStroke>,
}

impl Default for StrokeCapture {
    fn default() -> Self {
        Self::new(PageGeometry::default())
    }
}

impl StrokeCapture {
    pub fn new(page: PageGeometry) -> Self {
        Self { page, active: None }
    }

    /// Start a stroke on `page_id`. An unfinished stroke in progress is abandoned.
    pub fn begin(&mut self, page_id: PageId, sample: &PointerSample, rect: ElementRect, style: StrokeStyle) {
        if let Some(previous) = self.active.take() {
            log::debug!("Abandoning unfinished stroke on page {}", previous.page_id);
        }

        let mapper = CoordinateMapper::new(rect, self.page);
        let first: Vec<InkPoint> = sample.raw_points().into_iter().map(|p| mapper.map(p)).collect();

        self.active = Some(ActiveStroke {
            page_id,
            mapper,
            style,
            points: first,
            buffer: Vec::new(),
        });
    }

    /// Buffer a move sample. Returns true when this is the first sample since
    /// the last flush, i.e. when the host should request an animation frame.
    pub fn ingest(&mut self, sample: &PointerSample) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        let needs_frame = active.buffer.is_empty();
        let mapper = active.mapper;
        active
            .buffer
            .extend(sample.raw_points().into_iter().map(|p| mapper.map(p)));
        needs_frame
    }

    /// Fold buffered points into the live stroke. Returns whether anything changed.
    pub fn on_animation_frame(&mut self) -> bool {
        match self.active.as_mut() {
            Some(active) if !active.buffer.is_empty() => {
                active.points.append(&mut active.buffer);
                true
            }
            _ => false,
        }
    }

    /// Finish the stroke. Strokes with fewer than two points (taps) are discarded.
    pub fn end(&mut self) -> Option<(PageId, Stroke)> {
        let mut active = self.active.take()?;
        active.points.append(&mut active.buffer);

        if active.points.len() < MIN_STROKE_POINTS {
            log::debug!("Discarding tap on page {}", active.page_id);
            return None;
        }

        let stroke = Stroke::new(active.points, active.style);
        Some((active.page_id, stroke))
    }

    /// Drop the stroke in progress without committing it.
    pub fn cancel(&mut self) {
        self.active = None;
    }

    pub fn is_capturing(&self) -> bool {
        self.active.is_some()
    }

    /// Page of the stroke in progress.
    pub fn page_id(&self) -> Option<&PageId> {
        self.active.as_ref().map(|a| &a.page_id)
    }

    /// Points flushed so far; buffered points appear after the next frame.
    pub fn live_points(&self) -> &[InkPoint] {
        self.active.as_ref().map(|a| a.points.as_slice()).unwrap_or(&[])
    }

    /// Number of points waiting for the next frame.
    pub fn buffered_len(&self) -> usize {
        self.active.as_ref().map(|a| a.buffer.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::DEFAULT_PRESSURE;

    fn rect() -> ElementRect {
        // Displayed at half the page size, offset by (10, 20).
        ElementRect::new(10.0, 20.0, 500.0, 707.0)
    }

    fn capture() -> StrokeCapture {
        StrokeCapture::new(PageGeometry::default())
    }

    #[test]
    fn test_coordinate_mapping() {
        let mapper = CoordinateMapper::new(rect(), PageGeometry::default());
        let p = mapper.map(RawPoint { x: 260.0, y: 20.0, pressure: Some(0.8) });
        assert!((p.x - 500.0).abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);
        assert!((p.pressure - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_missing_or_zero_pressure_defaults() {
        let mapper = CoordinateMapper::new(rect(), PageGeometry::default());
        assert_eq!(mapper.map(RawPoint { x: 0.0, y: 0.0, pressure: None }).pressure, DEFAULT_PRESSURE);
        assert_eq!(mapper.map(RawPoint { x: 0.0, y: 0.0, pressure: Some(0.0) }).pressure, DEFAULT_PRESSURE);
    }

    #[test]
    fn test_samples_buffered_until_frame() {
        let mut cap = capture();
        cap.begin(PageId::from("p1"), &PointerSample::new(10.0, 20.0, None), rect(), StrokeStyle::default());
        assert_eq!(cap.live_points().len(), 1);

        assert!(cap.ingest(&PointerSample::new(20.0, 30.0, None)));
        assert!(!cap.ingest(&PointerSample::new(30.0, 40.0, None)));
        assert_eq!(cap.live_points().len(), 1);
        assert_eq!(cap.buffered_len(), 2);

        assert!(cap.on_animation_frame());
        assert_eq!(cap.live_points().len(), 3);
        assert!(!cap.on_animation_frame());
    }

    #[test]
    fn test_coalesced_samples_expand() {
        let mut cap = capture();
        cap.begin(PageId::from("p1"), &PointerSample::new(10.0, 20.0, None), rect(), StrokeStyle::default());
        let sample = PointerSample::new(40.0, 50.0, None).with_coalesced(vec![
            RawPoint { x: 20.0, y: 30.0, pressure: None },
            RawPoint { x: 30.0, y: 40.0, pressure: None },
            RawPoint { x: 40.0, y: 50.0, pressure: None },
        ]);
        cap.ingest(&sample);
        cap.on_animation_frame();
        assert_eq!(cap.live_points().len(), 4);
    }

    #[test]
    fn test_end_commits_unflushed_points() {
        let mut cap = capture();
        cap.begin(PageId::from("p1"), &PointerSample::new(10.0, 20.0, None), rect(), StrokeStyle::default());
        cap.ingest(&PointerSample::new(20.0, 30.0, None));

        let (page, stroke) = cap.end().expect("two points make a stroke");
        assert_eq!(page, PageId::from("p1"));
        assert_eq!(stroke.points.len(), 2);
        assert!(!cap.is_capturing());
    }

    #[test]
    fn test_tap_is_discarded() {
        let mut cap = capture();
        cap.begin(PageId::from("p1"), &PointerSample::new(10.0, 20.0, None), rect(), StrokeStyle::default());
        assert!(cap.end().is_none());
        assert!(!cap.is_capturing());
    }

    #[test]
    fn test_ingest_without_stroke_is_ignored() {
        let mut cap = capture();
        assert!(!cap.ingest(&PointerSample::new(1.0, 1.0, None)));
        assert!(!cap.on_animation_frame());
        assert!(cap.end().is_none());
    }

    #[test]
    fn test_cancel_drops_stroke() {
        let mut cap = capture();
        cap.begin(PageId::from("p1"), &PointerSample::new(10.0, 20.0, None), rect(), StrokeStyle::default());
        cap.ingest(&PointerSample::new(20.0, 30.0, None));
        cap.cancel();
        assert!(cap.end().is_none());
    }
}
