//! Segment matching: how much of an activity path lies on the trail.
//!
//! For every consecutive pair of activity points:
//! 1. Measure the segment with the Haversine distance
//! 2. Take the coordinate-wise midpoint
//! 3. Find the distance from the midpoint to the nearest trail segment
//! 4. Count the segment as on-trail if that distance is within tolerance
//!
//! On-trail time is the on-trail share of the recorded distance applied to the
//! activity's moving time. It assumes a constant speed over the whole activity
//! and ignores per-point timestamps.

use log::debug;

use crate::geo_utils::{haversine_distance, midpoint, LocalProjection};
use crate::{Activity, GeoPoint, MatchResult, TrailReference};

/// Nearest-trail lookup used by the matcher.
///
/// [`TrailReference`] implements it by brute force over every segment. A
/// spatial index can implement the same trait without changing the matcher.
pub trait TrailLookup {
    /// Distance in meters from `point` to the nearest trail segment, or
    /// `f64::INFINITY` when there is no trail.
    fn distance_to_trail(&self, point: &GeoPoint) -> f64;

    /// Whether `point` lies within `tolerance` meters of the trail
    /// (inclusive).
    fn is_within(&self, point: &GeoPoint, tolerance: f64) -> bool {
        self.distance_to_trail(point) <= tolerance
    }
}

impl TrailLookup for TrailReference {
    fn distance_to_trail(&self, point: &GeoPoint) -> f64 {
        let projection = LocalProjection::at(*point);
        self.segments()
            .iter()
            .map(|s| projection.distance_to_segment(&s.start, &s.end))
            .fold(f64::INFINITY, f64::min)
    }

    fn is_within(&self, point: &GeoPoint, tolerance: f64) -> bool {
        let projection = LocalProjection::at(*point);
        self.segments().iter().any(|s| {
            projection
                .distance_to_segment_within(&s.start, &s.end, tolerance)
                .is_some_and(|d| d <= tolerance)
        })
    }
}

/// Per-path totals produced by [`tally_path`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PathTally {
    /// Sum of all segment lengths in meters
    pub path_distance: f64,
    /// Sum of on-trail segment lengths in meters
    pub on_trail_distance: f64,
    /// Number of activity segments examined
    pub segment_count: usize,
    /// Number of activity segments classified on-trail
    pub on_trail_segments: usize,
}

impl PathTally {
    /// Share of the decoded path that is on trail, in `[0, 1]`.
    pub fn path_ratio(&self) -> f64 {
        if self.path_distance > 0.0 {
            (self.on_trail_distance / self.path_distance).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Turn the tally into the activity's match result.
    ///
    /// Distance is capped at the activity's recorded distance. Time applies
    /// the written distance's share of the recorded distance to moving time
    /// (elapsed time as fallback), so both outputs agree.
    pub fn into_result(self, activity: &Activity) -> MatchResult {
        let recorded = activity.distance.max(0.0);
        let distance_on_trail = self.on_trail_distance.min(recorded);
        let ratio = if recorded > 0.0 {
            (distance_on_trail / recorded).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let time_on_trail = ratio * activity.reference_duration();

        MatchResult {
            activity_id: activity.id,
            distance_on_trail,
            time_on_trail,
        }
    }
}

/// Classify every segment of `points` against `trail`.
pub fn tally_path<L: TrailLookup + ?Sized>(
    points: &[GeoPoint],
    trail: &L,
    tolerance: f64,
) -> PathTally {
    let mut tally = PathTally::default();

    for pair in points.windows(2) {
        let length = haversine_distance(&pair[0], &pair[1]);
        let mid = midpoint(&pair[0], &pair[1]);

        tally.path_distance += length;
        tally.segment_count += 1;

        if trail.is_within(&mid, tolerance) {
            tally.on_trail_distance += length;
            tally.on_trail_segments += 1;
        }
    }

    tally
}

/// Match an already decoded activity path against a trail.
///
/// Fewer than two points gives zero distance and zero time.
pub fn compute_match<L: TrailLookup + ?Sized>(
    activity: &Activity,
    points: &[GeoPoint],
    trail: &L,
    tolerance: f64,
) -> MatchResult {
    let tally = tally_path(points, trail, tolerance);

    debug!(
        "[Matcher] Activity {}: {}/{} segments on trail, {:.1}m of {:.1}m ({:.0}%)",
        activity.id,
        tally.on_trail_segments,
        tally.segment_count,
        tally.on_trail_distance,
        tally.path_distance,
        tally.path_ratio() * 100.0
    );

    tally.into_result(activity)
}
