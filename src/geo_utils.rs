//! # Geographic Utilities
//!
//! Distance computations used by the segment matcher.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points |
//! | [`path_length`] | Total length of a path in meters |
//! | [`midpoint`] | Coordinate-wise average of two points |
//! | [`LocalProjection`] | Flat meter projection around a point |
//! | [`point_to_segment_distance`] | Point to segment distance in meters |
//!
//! ## Flat Projection
//!
//! Trail matching compares every activity midpoint against every trail
//! segment, so the inner loop avoids trigonometry. Around a reference point,
//! degree deltas are scaled to meters with a constant factor for latitude and a
//! `cos(latitude)` scaled factor for longitude. At the scale of a tolerance
//! (tens of meters) the error against the great-circle distance is negligible.

use std::f64::consts::PI;

use geo::{Distance, Haversine, Point};

use crate::GeoPoint;

/// Mean Earth radius in meters, as used by `geo`'s Haversine metric.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Meters per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_METERS * PI / 180.0;

/// Great-circle distance in meters between two points.
///
/// # Example
///
/// ```rust
/// use trail_matcher::{GeoPoint, geo_utils};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Total length of a path in meters. Empty or single-point paths return 0.0.
pub fn path_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Coordinate-wise average of two points.
///
/// Not the geodesic midpoint; the difference is irrelevant for segments a
/// few hundred meters long.
#[inline]
pub fn midpoint(a: &GeoPoint, b: &GeoPoint) -> GeoPoint {
    GeoPoint::new(
        (a.latitude + b.latitude) / 2.0,
        (a.longitude + b.longitude) / 2.0,
    )
}

/// Flat meter projection centred on an origin point.
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    origin: GeoPoint,
    meters_per_deg_lat: f64,
    meters_per_deg_lng: f64,
}

impl LocalProjection {
    /// Build the projection for `origin`. The scale factors are fixed for the
    /// origin's latitude.
    pub fn at(origin: GeoPoint) -> Self {
        let lat_rad = origin.latitude.to_radians();
        Self {
            origin,
            meters_per_deg_lat: METERS_PER_DEGREE,
            meters_per_deg_lng: METERS_PER_DEGREE * lat_rad.cos(),
        }
    }

    /// Project a point to `(x, y)` meters east/north of the origin.
    #[inline]
    pub fn project(&self, p: &GeoPoint) -> (f64, f64) {
        (
            (p.longitude - self.origin.longitude) * self.meters_per_deg_lng,
            (p.latitude - self.origin.latitude) * self.meters_per_deg_lat,
        )
    }

    /// Distance in meters from the origin to the segment `a -> b`.
    ///
    /// A zero-length segment degenerates to the distance to `a`.
    #[inline]
    pub fn distance_to_segment(&self, a: &GeoPoint, b: &GeoPoint) -> f64 {
        let (ax, ay) = self.project(a);
        let (bx, by) = self.project(b);
        distance_from_origin_to_segment(ax, ay, bx, by)
    }

    /// Like [`distance_to_segment`](Self::distance_to_segment), but first
    /// rejects segments whose projected bounding box lies entirely further than
    /// `limit` from the origin. Returns `None` for rejected segments; a rejected
    /// segment is guaranteed to be further than `limit`.
    #[inline]
    pub fn distance_to_segment_within(&self, a: &GeoPoint, b: &GeoPoint, limit: f64) -> Option<f64> {
        let (ax, ay) = self.project(a);
        let (bx, by) = self.project(b);
        if ax.min(bx) > limit || ax.max(bx) < -limit || ay.min(by) > limit || ay.max(by) < -limit {
            return None;
        }
        Some(distance_from_origin_to_segment(ax, ay, bx, by))
    }
}

#[inline]
fn distance_from_origin_to_segment(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;

    if len_sq == 0.0 {
        return ax.hypot(ay);
    }

    // Projection of the origin onto the segment, clamped to its ends
    let t = (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0);
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    cx.hypot(cy)
}

/// Distance in meters from `point` to the segment `a -> b`, using a flat
/// projection centred on `point`.
pub fn point_to_segment_distance(point: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> f64 {
    LocalProjection::at(*point).distance_to_segment(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // One thousandth of a degree of latitude is ~111 m
        let a = GeoPoint::new(34.8500, -82.3940);
        let b = GeoPoint::new(34.8510, -82.3940);
        let d = haversine_distance(&a, &b);
        assert!((d - 111.19).abs() < 0.1, "got {}", d);
    }

    #[test]
    fn test_path_length_degenerate() {
        assert_eq!(path_length(&[]), 0.0);
        assert_eq!(path_length(&[GeoPoint::new(1.0, 1.0)]), 0.0);
    }

    #[test]
    fn test_path_length_sums_segments() {
        let points = vec![
            GeoPoint::new(34.8500, -82.3940),
            GeoPoint::new(34.8510, -82.3940),
            GeoPoint::new(34.8520, -82.3940),
        ];
        let total = path_length(&points);
        let direct = haversine_distance(&points[0], &points[2]);
        assert!((total - direct).abs() < 1e-6);
    }

    #[test]
    fn test_midpoint() {
        let m = midpoint(&GeoPoint::new(10.0, 20.0), &GeoPoint::new(12.0, 24.0));
        assert_eq!(m, GeoPoint::new(11.0, 22.0));
    }

    #[test]
    fn test_point_on_segment_is_zero() {
        let a = GeoPoint::new(34.8500, -82.3940);
        let b = GeoPoint::new(34.8510, -82.3950);
        let p = midpoint(&a, &b);
        assert!(point_to_segment_distance(&p, &a, &b) < 1e-6);
    }

    #[test]
    fn test_perpendicular_distance_matches_haversine() {
        // Segment runs east-west; point sits 0.0002 deg (~22 m) north of it
        let a = GeoPoint::new(34.8500, -82.3960);
        let b = GeoPoint::new(34.8500, -82.3920);
        let p = GeoPoint::new(34.8502, -82.3940);
        let flat = point_to_segment_distance(&p, &a, &b);
        let foot = GeoPoint::new(34.8500, -82.3940);
        let great_circle = haversine_distance(&p, &foot);
        assert!((flat - great_circle).abs() < 0.01, "{} vs {}", flat, great_circle);
    }

    #[test]
    fn test_beyond_segment_end_measures_to_endpoint() {
        let a = GeoPoint::new(34.8500, -82.3960);
        let b = GeoPoint::new(34.8500, -82.3950);
        let p = GeoPoint::new(34.8500, -82.3940);
        let d = point_to_segment_distance(&p, &a, &b);
        let to_end = haversine_distance(&p, &b);
        assert!((d - to_end).abs() < 0.01);
    }

    #[test]
    fn test_zero_length_segment_is_point_distance() {
        let a = GeoPoint::new(34.8500, -82.3940);
        let p = GeoPoint::new(34.8501, -82.3940);
        let d = point_to_segment_distance(&p, &a, &a);
        assert!((d - haversine_distance(&p, &a)).abs() < 0.01);
    }

    #[test]
    fn test_bounding_box_rejection_is_conservative() {
        let projection = LocalProjection::at(GeoPoint::new(34.8500, -82.3940));
        let a = GeoPoint::new(34.8600, -82.3960);
        let b = GeoPoint::new(34.8600, -82.3920);

        // ~1.1 km away: rejected at 25 m, measured at 5 km
        assert!(projection.distance_to_segment_within(&a, &b, 25.0).is_none());
        let d = projection.distance_to_segment_within(&a, &b, 5000.0).unwrap();
        assert!((d - projection.distance_to_segment(&a, &b)).abs() < 1e-9);
    }
}
