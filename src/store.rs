//! Activity storage boundary.
//!
//! The engine reads activity records and writes back its three derived
//! fields through [`ActivityStore`]; it never creates or deletes activities.
//! Which activities need matching is decided only by the orchestrator, through
//! [`ActivityStore::unmatched_ids`].

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::{Activity, ActivityId, MatchResult, OptionExt, Result, TrailMatchError};

/// Storage of activity records shared by concurrent match calls.
pub trait ActivityStore: Send + Sync {
    /// Read one activity. Fails with `NotFound` if absent.
    fn get_activity(&self, id: ActivityId) -> Result<Activity>;

    /// Unconditionally write the match metrics and `matched_at`.
    fn record_match(&self, result: &MatchResult, matched_at: DateTime<Utc>) -> Result<()>;

    /// Up to `limit` ids with `matched_at` unset, newest start date first.
    fn unmatched_ids(&self, limit: usize) -> Result<Vec<ActivityId>>;

    /// Clear `matched_at` for one athlete's activities (or all activities) so
    /// they re-enter the backlog. Returns the number of activities reset.
    fn reset_matches(&self, athlete_id: Option<i64>) -> Result<usize>;
}

/// In-memory store, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    activities: RwLock<BTreeMap<ActivityId, Activity>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an activity (ingestion side).
    pub fn insert(&self, activity: Activity) -> Result<()> {
        let mut activities = self
            .activities
            .write()
            .map_err(|_| TrailMatchError::persistence("activity store lock poisoned"))?;
        activities.insert(activity.id, activity);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.activities.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ActivityStore for MemoryActivityStore {
    fn get_activity(&self, id: ActivityId) -> Result<Activity> {
        let activities = self
            .activities
            .read()
            .map_err(|_| TrailMatchError::persistence("activity store lock poisoned"))?;
        activities.get(&id).cloned().ok_or_not_found(id)
    }

    fn record_match(&self, result: &MatchResult, matched_at: DateTime<Utc>) -> Result<()> {
        let mut activities = self
            .activities
            .write()
            .map_err(|_| TrailMatchError::persistence("activity store lock poisoned"))?;
        let activity = activities
            .get_mut(&result.activity_id)
            .ok_or_not_found(result.activity_id)?;

        activity.distance_on_trail = Some(result.distance_on_trail);
        activity.time_on_trail = Some(result.time_on_trail);
        activity.matched_at = Some(matched_at);
        Ok(())
    }

    fn unmatched_ids(&self, limit: usize) -> Result<Vec<ActivityId>> {
        let activities = self
            .activities
            .read()
            .map_err(|_| TrailMatchError::persistence("activity store lock poisoned"))?;

        let mut unmatched: Vec<&Activity> =
            activities.values().filter(|a| a.matched_at.is_none()).collect();
        // Newest first; undated activities last, ties broken by id descending
        unmatched.sort_by(|a, b| b.start_date.cmp(&a.start_date).then(b.id.cmp(&a.id)));

        Ok(unmatched.into_iter().take(limit).map(|a| a.id).collect())
    }

    fn reset_matches(&self, athlete_id: Option<i64>) -> Result<usize> {
        let mut activities = self
            .activities
            .write()
            .map_err(|_| TrailMatchError::persistence("activity store lock poisoned"))?;

        let mut reset = 0;
        for activity in activities.values_mut() {
            if athlete_id.is_some_and(|aid| aid != activity.athlete_id) {
                continue;
            }
            if activity.matched_at.take().is_some() {
                reset += 1;
            }
        }
        Ok(reset)
    }
}
