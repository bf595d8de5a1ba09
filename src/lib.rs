//! # Trail Matcher
//!
//! Determines how much of a GPS-tracked activity happened on a known trail
//! network.
//!
//! This library provides:
//! - Encoded polyline decoding into geographic points
//! - Trail reference loading from GeoJSON datasets (LineString / MultiLineString)
//! - Segment matching within a distance tolerance, with on-trail distance and time
//! - Backlog orchestration over activities that have not been matched yet
//!
//! ## Features
//!
//! - **`parallel`** - Parallel queued batches and fire-and-forget dispatch with rayon
//! - **`http`** - Fetch trail datasets over HTTP
//! - **`persistence`** - SQLite activity store
//! - **`cli`** - `trail-matcher` operator binary
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trail_matcher::{compute_match, Activity, GeoPoint, TrailReference, TrailSegment};
//!
//! let trail = TrailReference::from_segments(vec![TrailSegment::new(
//!     GeoPoint::new(34.8500, -82.3940),
//!     GeoPoint::new(34.8510, -82.3950),
//! )]);
//!
//! let points = vec![GeoPoint::new(34.8500, -82.3940), GeoPoint::new(34.8505, -82.3945)];
//! let activity = Activity::new(1, 1, None, 1000.0, Some(600), Some(700));
//!
//! let result = compute_match(&activity, &points, &trail, 25.0);
//! assert!(result.distance_on_trail > 0.0);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{ErrorKind, ErrorReport, OptionExt, Result, TrailMatchError};

// Geographic utilities (distance, midpoint, flat projection)
pub mod geo_utils;

// Encoded path decoding
pub mod decoder;
pub use decoder::{decode_path, DEFAULT_PRECISION};

// Trail reference loading and dataset storage
pub mod trails;
pub use trails::{
    load_trail_reference, parse_trail_document, refresh_datasets, DirectoryTrailSource,
    RefreshStatus, TrailLoader, TrailReference, TrailSegment, TrailSource,
};

// Explicitly scoped trail reference cache
pub mod cache;
pub use cache::TrailCache;

// Segment matching (on/off trail classification)
pub mod matching;
pub use matching::{compute_match, tally_path, PathTally, TrailLookup};

// Activity storage boundary
pub mod store;
pub use store::{ActivityStore, MemoryActivityStore};

// SQLite activity store
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteActivityStore;

// Single-activity match operation
pub mod engine;
pub use engine::{BatchOutcome, TrailMatcher};

// Backlog orchestration
pub mod orchestrator;
#[cfg(feature = "parallel")]
pub use orchestrator::ThreadPoolDispatcher;
pub use orchestrator::{
    BacklogRequest, BacklogSummary, Dispatcher, InlineDispatcher, Orchestrator,
    OrchestratorConfig,
};

// HTTP module for trail dataset fetching
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::HttpTrailSource;

// ============================================================================
// Core Types
// ============================================================================

/// Activity identifier as assigned by the ingestion subsystem.
pub type ActivityId = i64;

/// Default tolerance in meters between an activity segment midpoint and the
/// nearest trail segment.
pub const DEFAULT_TOLERANCE_METERS: f64 = 25.0;

/// A WGS84 coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use trail_matcher::GeoPoint;
/// let point = GeoPoint::new(34.8526, -82.3940); // Greenville, SC
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// An activity record as seen by the matching engine.
///
/// `encoded_path`, `distance`, `moving_time` and `elapsed_time` are owned by
/// the ingestion subsystem. `distance_on_trail`, `time_on_trail` and
/// `matched_at` are owned by this engine; `matched_at == None` marks the
/// activity as part of the backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub athlete_id: i64,
    /// Encoded polyline of the activity path
    pub encoded_path: Option<String>,
    /// Total distance in meters
    pub distance: f64,
    /// Moving time in seconds
    pub moving_time: Option<u32>,
    /// Elapsed time in seconds
    pub elapsed_time: Option<u32>,
    /// Unix timestamp (seconds since epoch), orders the backlog
    pub start_date: Option<i64>,
    /// Meters on trail, `None` until matched
    pub distance_on_trail: Option<f64>,
    /// Seconds on trail, `None` until matched
    pub time_on_trail: Option<f64>,
    /// When the last successful match was written
    pub matched_at: Option<DateTime<Utc>>,
}

impl Activity {
    /// Create an unmatched activity.
    pub fn new(
        id: ActivityId,
        athlete_id: i64,
        encoded_path: Option<String>,
        distance: f64,
        moving_time: Option<u32>,
        elapsed_time: Option<u32>,
    ) -> Self {
        Self {
            id,
            athlete_id,
            encoded_path,
            distance,
            moving_time,
            elapsed_time,
            start_date: None,
            distance_on_trail: None,
            time_on_trail: None,
            matched_at: None,
        }
    }

    /// Set the start date (builder style).
    pub fn with_start_date(mut self, start_date: i64) -> Self {
        self.start_date = Some(start_date);
        self
    }

    /// Duration the on-trail ratio is applied to: moving time, or elapsed time
    /// when moving time is absent.
    ///
    /// A recorded moving time of zero is a value, not a gap, so it yields 0
    /// and on-trail time never exceeds moving time.
    pub fn reference_duration(&self) -> f64 {
        match (self.moving_time, self.elapsed_time) {
            (Some(moving), _) => moving as f64,
            (None, Some(elapsed)) => elapsed as f64,
            (None, None) => 0.0,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched_at.is_some()
    }
}

/// Output of the single-activity match operation.
///
/// Never persisted on its own; it is written into the activity's
/// engine-owned fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub activity_id: ActivityId,
    /// Meters of the activity on trail
    pub distance_on_trail: f64,
    /// Estimated seconds on trail (constant-speed approximation)
    pub time_on_trail: f64,
}

/// Configuration for trail matching.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    /// Maximum distance in meters from an activity segment midpoint to the
    /// trail for the segment to count as on-trail (inclusive).
    /// Default: 25.0 meters
    pub tolerance_meters: f64,

    /// Polyline precision in decimal digits (5 = factor 1e5).
    /// Default: 5
    pub precision: u32,

    /// Trail datasets merged into the reference for single-activity matches.
    /// Default: ["main", "spurs"]
    pub datasets: Vec<String>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tolerance_meters: DEFAULT_TOLERANCE_METERS,
            precision: DEFAULT_PRECISION,
            datasets: vec!["main".to_string(), "spurs".to_string()],
        }
    }
}

impl MatchConfig {
    /// Reject configurations the matcher cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !self.tolerance_meters.is_finite() || self.tolerance_meters < 0.0 {
            return Err(TrailMatchError::Config {
                message: format!(
                    "tolerance must be a non-negative number of meters, got {}",
                    self.tolerance_meters
                ),
            });
        }
        if self.precision == 0 || self.precision > 9 {
            return Err(TrailMatchError::Config {
                message: format!("precision must be between 1 and 9, got {}", self.precision),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(34.85, -82.39).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_reference_duration_prefers_moving_time() {
        let activity = Activity::new(1, 1, None, 1000.0, Some(600), Some(900));
        assert_eq!(activity.reference_duration(), 600.0);

        let activity = Activity::new(1, 1, None, 1000.0, None, Some(900));
        assert_eq!(activity.reference_duration(), 900.0);

        // Zero moving time is respected, not replaced by elapsed time
        let activity = Activity::new(1, 1, None, 1000.0, Some(0), Some(900));
        assert_eq!(activity.reference_duration(), 0.0);

        let activity = Activity::new(1, 1, None, 1000.0, None, None);
        assert_eq!(activity.reference_duration(), 0.0);
    }

    #[test]
    fn test_new_activity_is_unmatched() {
        let activity = Activity::new(5, 2, Some("_p~iF~ps|U".to_string()), 10.0, None, None);
        assert!(!activity.is_matched());
        assert!(activity.distance_on_trail.is_none());
        assert!(activity.time_on_trail.is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(MatchConfig::default().validate().is_ok());

        let config = MatchConfig {
            tolerance_meters: -1.0,
            ..MatchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TrailMatchError::Config { .. })
        ));

        let config = MatchConfig {
            precision: 0,
            ..MatchConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
