//! Curve construction for chart series
//!
//! Turns resampled points into cubic Bézier segments using Catmull-Rom
//! tangents. Every control point is clamped to the bounding box of its own
//! segment, so the curve never runs back along the time axis and never
//! overshoots past a neighbouring point.

use crate::domain::chart::{ChartPoint, CurveSegment};
use crate::domain::reading::Reading;
use serde::Deserialize;

/// Smoothing presets offered to chart consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Smoothing {
    /// Straight segments
    None,
    Light,
    #[default]
    Medium,
    Heavy,
    /// Classic Catmull-Rom (tension 0.5)
    CatmullRom,
}

impl Smoothing {
    /// Tangent scale (0.0 = straight, 0.5 = standard Catmull-Rom)
    pub fn tension(self) -> f64 {
        match self {
            Smoothing::None => 0.0,
            Smoothing::Light => 0.3,
            Smoothing::Medium | Smoothing::CatmullRom => 0.5,
            Smoothing::Heavy => 0.7,
        }
    }
}

/// Project a series onto (epoch ms, watts).
pub fn power_points(readings: &[Reading]) -> Vec<ChartPoint> {
    readings
        .iter()
        .map(|r| ChartPoint::new(r.timestamp.timestamp_millis() as f64, r.power_w))
        .collect()
}

/// Build one segment per consecutive pair of points.
///
/// The first and last points are duplicated to supply the missing neighbour
/// at each end. Fewer than two points produce no segments.
pub fn build(points: &[ChartPoint], smoothing: Smoothing) -> Vec<CurveSegment> {
    if points.len() < 2 {
        return Vec::new();
    }

    let tension = smoothing.tension();
    let last = points.len() - 1;

    (0..last)
        .map(|i| {
            let p0 = points[i.saturating_sub(1)];
            let p1 = points[i];
            let p2 = points[i + 1];
            let p3 = points[(i + 2).min(last)];

            let control1 = ChartPoint::new(
                p1.x + (p2.x - p0.x) * tension / 3.0,
                p1.y + (p2.y - p0.y) * tension / 3.0,
            );
            let control2 = ChartPoint::new(
                p2.x - (p3.x - p1.x) * tension / 3.0,
                p2.y - (p3.y - p1.y) * tension / 3.0,
            );

            CurveSegment {
                start: p1,
                control1: clamp_to_segment(control1, p1, p2),
                control2: clamp_to_segment(control2, p1, p2),
                end: p2,
            }
        })
        .collect()
}

/// Keep a control point inside the box spanned by the segment endpoints.
fn clamp_to_segment(control: ChartPoint, a: ChartPoint, b: ChartPoint) -> ChartPoint {
    ChartPoint::new(
        control.x.clamp(a.x.min(b.x), a.x.max(b.x)),
        control.y.clamp(a.y.min(b.y), a.y.max(b.y)),
    )
}

/// Flatten segments into a polyline with `subdivisions` steps per segment.
pub fn sample(segments: &[CurveSegment], subdivisions: usize) -> Vec<ChartPoint> {
    let Some(first) = segments.first() else {
        return Vec::new();
    };
    let subdivisions = subdivisions.max(1);
    let step = 1.0 / subdivisions as f64;

    let mut points = Vec::with_capacity(segments.len() * subdivisions + 1);
    points.push(first.start);
    for segment in segments {
        for j in 1..=subdivisions {
            points.push(segment.point_at(j as f64 * step));
        }
    }
    points
}
