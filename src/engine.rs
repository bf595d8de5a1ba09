//! # Trail Matcher
//!
//! The single-activity match operation:
//!
//! activity id → read record → decode path → trail reference → segment
//! matching → write `{distance_on_trail, time_on_trail, matched_at}`.
//!
//! Each call is independent and holds no shared mutable state beyond the
//! trail cache, so calls for different activities can run concurrently. Two
//! calls for the same activity both write the same metrics; the later
//! `matched_at` wins. If a call dies before its write, the activity simply
//! stays in the backlog.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::store::ActivityStore;
use crate::trails::{TrailLoader, TrailReference};
use crate::{
    compute_match, decode_path, ActivityId, ErrorReport, MatchConfig, MatchResult, Result,
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Failure of one id within a queued batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub activity_id: ActivityId,
    pub error: ErrorReport,
}

/// Outcome of matching a queued batch of ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub matched: Vec<MatchResult>,
    pub failed: Vec<BatchFailure>,
}

/// Runs the match operation against a store and a trail loader.
pub struct TrailMatcher {
    store: Arc<dyn ActivityStore>,
    trails: Arc<TrailLoader>,
    config: MatchConfig,
}

impl TrailMatcher {
    /// Create a matcher. Fails if `config` is invalid.
    pub fn new(
        store: Arc<dyn ActivityStore>,
        trails: Arc<TrailLoader>,
        config: MatchConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            trails,
            config,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ActivityStore> {
        &self.store
    }

    /// Reference for the given datasets, through the loader's cache.
    pub fn trail_reference(&self, datasets: &[String]) -> Arc<TrailReference> {
        self.trails.reference(datasets)
    }

    /// Match one activity against the configured datasets.
    pub fn match_activity(&self, activity_id: ActivityId) -> Result<MatchResult> {
        let trail = self.trails.reference(&self.config.datasets);
        self.match_activity_with(activity_id, &trail)
    }

    /// Match one activity against an already loaded reference.
    ///
    /// Read and write failures propagate; a missing or broken path is matched
    /// as an empty path and still marks the activity as matched.
    pub fn match_activity_with(
        &self,
        activity_id: ActivityId,
        trail: &TrailReference,
    ) -> Result<MatchResult> {
        let activity = self.store.get_activity(activity_id)?;

        let points = decode_path(activity.encoded_path.as_deref(), self.config.precision);
        if points.len() < 2 {
            info!(
                "[TrailMatcher] Activity {} has no usable path data ({} points)",
                activity_id,
                points.len()
            );
        }

        let result = compute_match(&activity, &points, trail, self.config.tolerance_meters);
        self.store.record_match(&result, Utc::now())?;

        info!(
            "[TrailMatcher] Activity {} matched: {:.1}m, {:.0}s on trail",
            activity_id, result.distance_on_trail, result.time_on_trail
        );
        Ok(result)
    }

    /// Match a batch of ids from an upstream queue.
    ///
    /// The reference is loaded once for the whole batch. A failing id is
    /// recorded and the rest of the batch continues.
    pub fn match_queued(&self, activity_ids: &[ActivityId]) -> BatchOutcome {
        let trail = self.trails.reference(&self.config.datasets);

        #[cfg(feature = "parallel")]
        let results: Vec<(ActivityId, Result<MatchResult>)> = activity_ids
            .par_iter()
            .map(|&id| (id, self.match_activity_with(id, &trail)))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let results: Vec<(ActivityId, Result<MatchResult>)> = activity_ids
            .iter()
            .map(|&id| (id, self.match_activity_with(id, &trail)))
            .collect();

        let mut outcome = BatchOutcome::default();
        for (activity_id, result) in results {
            match result {
                Ok(matched) => outcome.matched.push(matched),
                Err(e) => {
                    warn!("[TrailMatcher] Failed to match activity {}: {}", activity_id, e);
                    outcome.failed.push(BatchFailure {
                        activity_id,
                        error: ErrorReport::from(&e),
                    });
                }
            }
        }

        info!(
            "[TrailMatcher] Queued batch: {} matched, {} failed",
            outcome.matched.len(),
            outcome.failed.len()
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryActivityStore;
    use crate::trails::TrailSource;
    use crate::geo_utils::path_length;
    use crate::{Activity, ErrorKind, TrailMatchError, DEFAULT_PRECISION};

    const TRAIL: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "geometry": {"type": "LineString",
         "coordinates": [[-120.2, 38.5], [-120.95, 40.7]]}}]}"#;

    // Two points on the trail line above: (38.5, -120.2) -> (40.7, -120.95)
    const ON_TRAIL_PATH: &str = "_p~iF~ps|U_ulLnnqC";

    struct StaticSource;

    impl TrailSource for StaticSource {
        fn fetch(&self, name: &str) -> Result<Vec<u8>> {
            match name {
                "main" => Ok(TRAIL.as_bytes().to_vec()),
                _ => Err(TrailMatchError::reference_load(name, "missing")),
            }
        }
    }

    fn matcher(store: Arc<MemoryActivityStore>) -> TrailMatcher {
        let loader = Arc::new(TrailLoader::new(Arc::new(StaticSource)));
        let config = MatchConfig {
            datasets: vec!["main".to_string()],
            ..MatchConfig::default()
        };
        TrailMatcher::new(store, loader, config).unwrap()
    }

    #[test]
    fn test_match_writes_metrics() {
        let store = Arc::new(MemoryActivityStore::new());
        let length = path_length(&decode_path(Some(ON_TRAIL_PATH), DEFAULT_PRECISION));
        store
            .insert(Activity::new(1, 1, Some(ON_TRAIL_PATH.to_string()), length, Some(3600), None))
            .unwrap();

        let result = matcher(store.clone()).match_activity(1).unwrap();
        assert!((result.distance_on_trail - length).abs() < 1e-6);
        assert!((result.time_on_trail - 3600.0).abs() < 1e-6);

        let stored = store.get_activity(1).unwrap();
        assert!(stored.is_matched());
        assert_eq!(stored.distance_on_trail, Some(result.distance_on_trail));
    }

    #[test]
    fn test_missing_path_still_marks_matched() {
        let store = Arc::new(MemoryActivityStore::new());
        store.insert(Activity::new(2, 1, None, 5000.0, Some(900), None)).unwrap();
        store
            .insert(Activity::new(3, 1, Some("~~~".to_string()), 5000.0, Some(900), None))
            .unwrap();

        let matcher = matcher(store.clone());
        for id in [2, 3] {
            let result = matcher.match_activity(id).unwrap();
            assert_eq!(result.distance_on_trail, 0.0);
            assert_eq!(result.time_on_trail, 0.0);
            assert!(store.get_activity(id).unwrap().is_matched());
        }
    }

    #[test]
    fn test_not_found_propagates() {
        let store = Arc::new(MemoryActivityStore::new());
        let err = matcher(store).match_activity(404).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store: Arc<dyn ActivityStore> = Arc::new(MemoryActivityStore::new());
        let loader = Arc::new(TrailLoader::new(Arc::new(StaticSource)));
        let config = MatchConfig {
            tolerance_meters: f64::NAN,
            ..MatchConfig::default()
        };
        assert!(TrailMatcher::new(store, loader, config).is_err());
    }

    #[test]
    fn test_queued_batch_continues_past_failures() {
        let store = Arc::new(MemoryActivityStore::new());
        store
            .insert(Activity::new(1, 1, Some(ON_TRAIL_PATH.to_string()), 300_000.0, Some(3600), None))
            .unwrap();
        store.insert(Activity::new(2, 1, None, 0.0, None, None)).unwrap();

        let outcome = matcher(store.clone()).match_queued(&[1, 99, 2]);
        assert_eq!(outcome.matched.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].activity_id, 99);
        assert_eq!(outcome.failed[0].error.kind, ErrorKind::NotFound);
        assert!(store.unmatched_ids(10).unwrap().is_empty());
    }
}
