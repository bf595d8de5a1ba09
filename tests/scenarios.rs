//! End-to-end matching scenarios over the public API.
//!
//! Trails live as GeoJSON files in a scratch directory and activities in the
//! in-memory store, so every test runs without a database or network.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;
use trail_matcher::geo_utils::haversine_distance;
use trail_matcher::{
    Activity, ActivityStore, BacklogRequest, DirectoryTrailSource, ErrorKind, ErrorReport,
    GeoPoint, InlineDispatcher, MatchConfig, MemoryActivityStore, Orchestrator, TrailLoader,
    TrailMatcher,
};

// (34.8500, -82.3940) -> (34.8505, -82.3945)
const SHORT_PATH: &str = "osusEnq{uNcBbB";

const NEAR_TRAIL: &str = r#"{"type": "FeatureCollection", "features": [
    {"type": "Feature", "properties": {"name": "Swamp Rabbit"},
     "geometry": {"type": "LineString",
                  "coordinates": [[-82.3940, 34.8500], [-82.3950, 34.8510]]}}]}"#;

// Same shape, ~1.1 km north
const FAR_TRAIL: &str = r#"{"type": "FeatureCollection", "features": [
    {"type": "Feature",
     "geometry": {"type": "LineString",
                  "coordinates": [[-82.3940, 34.8600], [-82.3950, 34.8610]]}}]}"#;

struct Fixture {
    _dir: TempDir,
    store: Arc<MemoryActivityStore>,
    matcher: Arc<TrailMatcher>,
}

fn fixture(datasets: &[(&str, &str)]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    for (name, doc) in datasets {
        fs::write(dir.path().join(format!("{}.geojson", name)), doc).unwrap();
    }

    let store = Arc::new(MemoryActivityStore::new());
    let loader = Arc::new(TrailLoader::new(Arc::new(DirectoryTrailSource::new(dir.path()))));
    let config = MatchConfig {
        datasets: vec!["main".to_string()],
        ..MatchConfig::default()
    };
    let matcher = Arc::new(TrailMatcher::new(store.clone(), loader, config).unwrap());

    Fixture {
        _dir: dir,
        store,
        matcher,
    }
}

fn short_activity(id: i64) -> Activity {
    Activity::new(id, 1, Some(SHORT_PATH.to_string()), short_path_length(), Some(600), Some(700))
}

fn short_path_length() -> f64 {
    haversine_distance(
        &GeoPoint::new(34.8500, -82.3940),
        &GeoPoint::new(34.8505, -82.3945),
    )
}

#[test]
fn activity_on_trail_gets_full_credit() {
    let fx = fixture(&[("main", NEAR_TRAIL)]);
    fx.store.insert(short_activity(1)).unwrap();

    let result = fx.matcher.match_activity(1).unwrap();
    assert!((result.distance_on_trail - short_path_length()).abs() < 1e-6);
    assert!((result.time_on_trail - 600.0).abs() < 1e-6);

    let stored = fx.store.get_activity(1).unwrap();
    assert_eq!(stored.distance_on_trail, Some(result.distance_on_trail));
    assert_eq!(stored.time_on_trail, Some(result.time_on_trail));
    assert!(stored.matched_at.is_some());
}

#[test]
fn activity_away_from_trail_gets_nothing() {
    let fx = fixture(&[("main", FAR_TRAIL)]);
    fx.store.insert(short_activity(1)).unwrap();

    let result = fx.matcher.match_activity(1).unwrap();
    assert_eq!(result.distance_on_trail, 0.0);
    assert_eq!(result.time_on_trail, 0.0);
    assert!(fx.store.get_activity(1).unwrap().is_matched());
}

#[test]
fn backlog_run_respects_batch_limit() {
    let fx = fixture(&[("main", NEAR_TRAIL)]);
    for id in 1..=5 {
        fx.store.insert(short_activity(id).with_start_date(id)).unwrap();
    }

    let orchestrator = Orchestrator::new(
        fx.matcher.clone(),
        Box::new(InlineDispatcher::new(fx.matcher.clone())),
    );
    let request = BacklogRequest {
        batch_limit: 2,
        dataset_names: vec!["main".to_string()],
    };

    let summary = orchestrator.run(&request).unwrap();
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.dispatched, 2);

    // Newest two went first
    assert!(fx.store.get_activity(5).unwrap().is_matched());
    assert!(fx.store.get_activity(4).unwrap().is_matched());
    assert_eq!(fx.store.unmatched_ids(10).unwrap(), vec![3, 2, 1]);

    let summary = orchestrator.run(&BacklogRequest { batch_limit: 10, ..request }).unwrap();
    assert_eq!(summary.attempted, 3);
    assert!(fx.store.unmatched_ids(10).unwrap().is_empty());
}

#[test]
fn rematching_is_idempotent() {
    let fx = fixture(&[("main", NEAR_TRAIL)]);
    fx.store.insert(short_activity(1)).unwrap();

    let first = fx.matcher.match_activity(1).unwrap();
    let first_at = fx.store.get_activity(1).unwrap().matched_at.unwrap();
    let second = fx.matcher.match_activity(1).unwrap();
    let second_at = fx.store.get_activity(1).unwrap().matched_at.unwrap();

    assert_eq!(first, second);
    assert!(second_at >= first_at);
}

#[test]
fn degenerate_paths_match_with_zero() {
    let fx = fixture(&[("main", NEAR_TRAIL)]);
    fx.store.insert(Activity::new(1, 1, None, 800.0, Some(200), None)).unwrap();
    fx.store
        .insert(Activity::new(2, 1, Some(String::new()), 800.0, Some(200), None))
        .unwrap();
    // Truncated varint
    fx.store
        .insert(Activity::new(3, 1, Some("osusEnq{uNcB_".to_string()), 800.0, Some(200), None))
        .unwrap();
    // Single point
    fx.store
        .insert(Activity::new(4, 1, Some("osusEnq{uN".to_string()), 800.0, Some(200), None))
        .unwrap();

    for id in 1..=4 {
        let result = fx.matcher.match_activity(id).unwrap();
        assert_eq!(result.distance_on_trail, 0.0, "activity {}", id);
        assert_eq!(result.time_on_trail, 0.0, "activity {}", id);
        assert!(fx.store.get_activity(id).unwrap().is_matched());
    }
}

#[test]
fn missing_dataset_leaves_empty_reference() {
    let fx = fixture(&[]);
    fx.store.insert(short_activity(1)).unwrap();

    let reference = fx.matcher.trail_reference(&["main".to_string()]);
    assert!(reference.is_empty());
    assert_eq!(reference.failed, vec!["main".to_string()]);

    let result = fx.matcher.match_activity(1).unwrap();
    assert_eq!(result.distance_on_trail, 0.0);
    assert!(fx.store.get_activity(1).unwrap().is_matched());
}

#[test]
fn broken_dataset_does_not_hide_good_one() {
    let fx = fixture(&[("main", NEAR_TRAIL), ("spurs", "{not json")]);
    let reference = fx
        .matcher
        .trail_reference(&["main".to_string(), "spurs".to_string()]);

    assert_eq!(reference.len(), 1);
    assert_eq!(reference.loaded, vec!["main".to_string()]);
    assert_eq!(reference.failed, vec!["spurs".to_string()]);
}

#[test]
fn unknown_activity_reports_not_found() {
    let fx = fixture(&[("main", NEAR_TRAIL)]);
    let err = fx.matcher.match_activity(77).unwrap_err();
    let report = ErrorReport::from(&err);

    assert_eq!(report.kind, ErrorKind::NotFound);
    assert!(report.message.contains("77"));
    assert!(!err.is_retryable());
}

#[test]
fn metrics_stay_within_activity_bounds() {
    let fx = fixture(&[("main", NEAR_TRAIL)]);
    // Recorded distance shorter than the decoded path
    fx.store
        .insert(Activity::new(1, 1, Some(SHORT_PATH.to_string()), 20.0, Some(90), Some(120)))
        .unwrap();
    // No moving time: elapsed time is the reference
    fx.store
        .insert(Activity::new(2, 1, Some(SHORT_PATH.to_string()), short_path_length(), None, Some(120)))
        .unwrap();
    // Recorded distance twice the path: half the time is on trail
    fx.store
        .insert(Activity::new(3, 1, Some(SHORT_PATH.to_string()), 2.0 * short_path_length(), Some(600), None))
        .unwrap();
    // Nothing recorded: nothing on trail
    fx.store
        .insert(Activity::new(4, 1, Some(SHORT_PATH.to_string()), 0.0, Some(600), None))
        .unwrap();

    let capped = fx.matcher.match_activity(1).unwrap();
    assert_eq!(capped.distance_on_trail, 20.0);
    assert!(capped.time_on_trail >= 0.0 && capped.time_on_trail <= 90.0);

    let elapsed = fx.matcher.match_activity(2).unwrap();
    assert!((elapsed.time_on_trail - 120.0).abs() < 1e-6);

    let half = fx.matcher.match_activity(3).unwrap();
    assert!((half.time_on_trail - 300.0).abs() < 1e-6);

    let empty = fx.matcher.match_activity(4).unwrap();
    assert_eq!(empty.distance_on_trail, 0.0);
    assert_eq!(empty.time_on_trail, 0.0);
}

#[test]
fn queued_batch_matches_every_known_id() {
    let fx = fixture(&[("main", NEAR_TRAIL)]);
    for id in 1..=3 {
        fx.store.insert(short_activity(id)).unwrap();
    }

    let outcome = fx.matcher.match_queued(&[1, 2, 3, 4]);
    assert_eq!(outcome.matched.len(), 3);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].activity_id, 4);
    assert!(fx.store.unmatched_ids(10).unwrap().is_empty());
}
