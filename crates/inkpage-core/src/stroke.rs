//! Stroke geometry and identifiers.
//!
//! A [`Stroke`] is immutable once committed: working sets only ever add or
//! remove whole strokes, which is what lets paths and spatial-index membership
//! be cached per stroke ID.

use chrono::{DateTime, Utc};
use kurbo::{BezPath, Point, Rect};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Default page width in page units.
pub const DEFAULT_PAGE_WIDTH: f64 = 1000.0;
/// Default page height in page units.
pub const DEFAULT_PAGE_HEIGHT: f64 = 1414.0;
/// Pressure used when the input device reports none.
pub const DEFAULT_PRESSURE: f32 = 0.5;

/// Identifier of a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Globally unique stroke identifier, assigned client-side at draw time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrokeId(String);

impl StrokeId {
    /// Mint a fresh random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StrokeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StrokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StrokeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Fixed page coordinate space, independent of display pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width: f64,
    pub height: f64,
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self {
            width: DEFAULT_PAGE_WIDTH,
            height: DEFAULT_PAGE_HEIGHT,
        }
    }
}

/// A sampled point in page coordinates.
///
/// Deserialization goes through [`InkPoint::new`], so pressure from the wire
/// is clamped the same way as pressure from the pointer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "WirePoint")]
pub struct InkPoint {
    pub x: f64,
    pub y: f64,
    /// Normalized pen pressure in `[0, 1]`.
    pub pressure: f32,
}

#[derive(Deserialize)]
struct WirePoint {
    x: f64,
    y: f64,
    #[serde(default)]
    pressure: Option<f32>,
}

impl From<WirePoint> for InkPoint {
    fn from(p: WirePoint) -> Self {
        Self::new(p.x, p.y, p.pressure)
    }
}

impl InkPoint {
    /// Create a point; pressure is clamped into `[0, 1]` and defaults when absent or NaN.
    pub fn new(x: f64, y: f64, pressure: Option<f32>) -> Self {
        let pressure = match pressure {
            Some(p) if p.is_finite() => p.clamp(0.0, 1.0),
            _ => DEFAULT_PRESSURE,
        };
        Self { x, y, pressure }
    }

    pub fn to_kurbo(self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Squared Euclidean distance to `(x, y)`.
    pub fn distance_sq(&self, x: f64, y: f64) -> f64 {
        let dx = self.x - x;
        let dy = self.y - y;
        dx * dx + dy * dy
    }
}

/// RGBA color, carried on the wire as a hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`. Anything else yields black.
    pub fn from_hex(color: &str) -> Self {
        let Some(hex) = color.trim().strip_prefix('#') else {
            return Self::black();
        };
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Self::black();
        }
        let byte = |s: &str| u8::from_str_radix(s, 16).unwrap_or(0);
        match hex.len() {
            3 => Self::new(
                byte(&hex[0..1]) * 17,
                byte(&hex[1..2]) * 17,
                byte(&hex[2..3]) * 17,
                255,
            ),
            6 => Self::new(byte(&hex[0..2]), byte(&hex[2..4]), byte(&hex[4..6]), 255),
            8 => Self::new(
                byte(&hex[0..2]),
                byte(&hex[2..4]),
                byte(&hex[4..6]),
                byte(&hex[6..8]),
            ),
            _ => Self::black(),
        }
    }

    /// Hex form; the alpha byte is only written when not opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::black()
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_hex(&s))
    }
}

/// Pen style of a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PenStyle {
    #[default]
    Pen,
    Pencil,
    Marker,
    Highlighter,
}

/// Brush settings applied to a stroke at capture time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub color: Color,
    pub width: f64,
    pub pen_style: PenStyle,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: Color::black(),
            width: 2.0,
            pen_style: PenStyle::Pen,
        }
    }
}

/// One immutable freehand ink path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub id: StrokeId,
    pub points: Vec<InkPoint>,
    pub color: Color,
    pub width: f64,
    pub pen_style: PenStyle,
    pub created_at: DateTime<Utc>,
}

impl Stroke {
    /// Build a stroke with a fresh ID, stamped now.
    pub fn new(points: Vec<InkPoint>, style: StrokeStyle) -> Self {
        Self::with_id(StrokeId::new(), points, style)
    }

    pub fn with_id(id: StrokeId, points: Vec<InkPoint>, style: StrokeStyle) -> Self {
        Self {
            id,
            points,
            color: style.color,
            width: style.width,
            pen_style: style.pen_style,
            created_at: Utc::now(),
        }
    }

    /// At least one point, finite coordinates and a finite, non-negative width.
    pub fn is_well_formed(&self) -> bool {
        !self.points.is_empty()
            && self.points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
            && self.width.is_finite()
            && self.width >= 0.0
    }

    pub fn style(&self) -> StrokeStyle {
        StrokeStyle {
            color: self.color,
            width: self.width,
            pen_style: self.pen_style,
        }
    }

    /// Bounding box of the stroke's points (not inflated by width).
    pub fn bounds(&self) -> Rect {
        if self.points.is_empty() {
            return Rect::ZERO;
        }

        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;

        for point in &self.points {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }

        Rect::new(min_x, min_y, max_x, max_y)
    }

    /// Whether any point lies within `radius` of `(x, y)`.
    pub fn has_point_within(&self, x: f64, y: f64, radius: f64) -> bool {
        let r2 = radius * radius;
        self.points.iter().any(|p| p.distance_sq(x, y) <= r2)
    }

    /// Smallest squared distance from any point to `(x, y)`.
    pub fn min_distance_sq(&self, x: f64, y: f64) -> Option<f64> {
        self.points
            .iter()
            .map(|p| p.distance_sq(x, y))
            .fold(None, |acc, d| match acc {
                Some(best) if best <= d => Some(best),
                _ => Some(d),
            })
    }

    /// Polyline path through the stroke's points.
    pub fn to_path(&self) -> BezPath {
        let mut path = BezPath::new();

        let Some(first) = self.points.first() else {
            return path;
        };

        path.move_to(first.to_kurbo());
        for point in self.points.iter().skip(1) {
            path.line_to(point.to_kurbo());
        }

        path
    }
}

/// Drop malformed strokes received from `origin`, logging each one.
pub fn retain_well_formed(strokes: Vec<Stroke>, origin: &str) -> Vec<Stroke> {
    strokes
        .into_iter()
        .filter(|stroke| {
            let ok = stroke.is_well_formed();
            if !ok {
                log::warn!(
                    "Dropping malformed stroke {} from {} ({} points)",
                    stroke.id,
                    origin,
                    stroke.points.len()
                );
            }
            ok
        })
        .collect()
}
