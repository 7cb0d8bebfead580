// Chart domain models - render-ready series and curve geometry
use super::reading::{Reading, TimeRange};
use serde::Serialize;

/// A point in (epoch milliseconds, value) space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub x: f64,
    pub y: f64,
}

impl ChartPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One cubic Bézier piece between two consecutive series points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurveSegment {
    pub start: ChartPoint,
    pub control1: ChartPoint,
    pub control2: ChartPoint,
    pub end: ChartPoint,
}

impl CurveSegment {
    /// Evaluate the segment at `t` in `[0, 1]`.
    pub fn point_at(&self, t: f64) -> ChartPoint {
        let t = t.clamp(0.0, 1.0);
        let u = 1.0 - t;
        let b0 = u * u * u;
        let b1 = 3.0 * u * u * t;
        let b2 = 3.0 * u * t * t;
        let b3 = t * t * t;

        ChartPoint {
            x: b0 * self.start.x + b1 * self.control1.x + b2 * self.control2.x + b3 * self.end.x,
            y: b0 * self.start.y + b1 * self.control1.y + b2 * self.control2.y + b3 * self.end.y,
        }
    }
}

/// Resampled readings plus the power curve drawn through them.
#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub window: TimeRange,
    pub bucket_width_secs: i64,
    pub readings: Vec<Reading>,
    pub power_curve: Vec<CurveSegment>,
    /// The curve flattened to a polyline, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polyline: Option<Vec<ChartPoint>>,
}
