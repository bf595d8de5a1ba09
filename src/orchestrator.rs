//! # Match Orchestrator
//!
//! Works through the backlog of activities whose `matched_at` is unset.
//!
//! Each run takes at most `batch_limit` ids, loads the trail reference once and
//! hands every id to a [`Dispatcher`]. A dispatcher may run the match on the
//! spot or queue it elsewhere; the orchestrator does not wait for queued work.
//! Completion shows up on a later run as the id leaving the backlog.
//!
//! Overlapping runs may dispatch the same id twice. That only repeats work:
//! the match write is idempotent for unchanged inputs.

use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::engine::TrailMatcher;
use crate::trails::TrailReference;
use crate::{ActivityId, Result};

/// Orchestrator defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Maximum activities dispatched per run.
    /// Default: 10
    pub batch_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { batch_limit: 10 }
    }
}

/// Input of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogRequest {
    pub batch_limit: usize,
    pub dataset_names: Vec<String>,
}

/// Output of one orchestrator run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogSummary {
    /// Unmatched ids found (at most the batch limit)
    pub attempted: usize,
    /// Ids the dispatcher accepted
    pub dispatched: usize,
}

/// Hands one activity to whatever performs the match.
pub trait Dispatcher: Send + Sync {
    /// Accept `activity_id` for matching against `trail`. An `Err` means the
    /// id was not dispatched and stays in the backlog.
    fn dispatch(&self, activity_id: ActivityId, trail: &Arc<TrailReference>) -> Result<()>;
}

/// Runs each match on the calling thread before returning.
pub struct InlineDispatcher {
    matcher: Arc<TrailMatcher>,
}

impl InlineDispatcher {
    pub fn new(matcher: Arc<TrailMatcher>) -> Self {
        Self { matcher }
    }
}

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, activity_id: ActivityId, trail: &Arc<TrailReference>) -> Result<()> {
        self.matcher.match_activity_with(activity_id, trail).map(|_| ())
    }
}

/// Fire-and-forget dispatch onto the rayon thread pool.
#[cfg(feature = "parallel")]
pub struct ThreadPoolDispatcher {
    matcher: Arc<TrailMatcher>,
}

#[cfg(feature = "parallel")]
impl ThreadPoolDispatcher {
    pub fn new(matcher: Arc<TrailMatcher>) -> Self {
        Self { matcher }
    }
}

#[cfg(feature = "parallel")]
impl Dispatcher for ThreadPoolDispatcher {
    fn dispatch(&self, activity_id: ActivityId, trail: &Arc<TrailReference>) -> Result<()> {
        let matcher = Arc::clone(&self.matcher);
        let trail = Arc::clone(trail);
        rayon::spawn(move || {
            if let Err(e) = matcher.match_activity_with(activity_id, &trail) {
                warn!(
                    "[Orchestrator] Background match of activity {} failed: {}",
                    activity_id, e
                );
            }
        });
        Ok(())
    }
}

/// Scans the backlog and dispatches bounded batches.
pub struct Orchestrator {
    matcher: Arc<TrailMatcher>,
    dispatcher: Box<dyn Dispatcher>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(matcher: Arc<TrailMatcher>, dispatcher: Box<dyn Dispatcher>) -> Self {
        Self::with_config(matcher, dispatcher, OrchestratorConfig::default())
    }

    pub fn with_config(
        matcher: Arc<TrailMatcher>,
        dispatcher: Box<dyn Dispatcher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            matcher,
            dispatcher,
            config,
        }
    }

    /// Request for the configured batch limit and the matcher's datasets.
    pub fn default_request(&self) -> BacklogRequest {
        BacklogRequest {
            batch_limit: self.config.batch_limit,
            dataset_names: self.matcher.config().datasets.clone(),
        }
    }

    /// Dispatch up to `request.batch_limit` unmatched activities.
    ///
    /// Fails only if the backlog cannot be read. Individual dispatch failures
    /// are logged and counted out of `dispatched`.
    pub fn run(&self, request: &BacklogRequest) -> Result<BacklogSummary> {
        let start = Instant::now();
        let ids = self.matcher.store().unmatched_ids(request.batch_limit)?;

        if ids.is_empty() {
            info!("[Orchestrator] No unmatched activities found");
            return Ok(BacklogSummary::default());
        }

        info!(
            "[Orchestrator] Found {} unmatched activities (limit {})",
            ids.len(),
            request.batch_limit
        );

        let trail = self.matcher.trail_reference(&request.dataset_names);

        let mut summary = BacklogSummary {
            attempted: ids.len(),
            dispatched: 0,
        };
        for id in ids {
            match self.dispatcher.dispatch(id, &trail) {
                Ok(()) => summary.dispatched += 1,
                Err(e) => warn!("[Orchestrator] Failed to dispatch activity {}: {}", id, e),
            }
        }

        info!(
            "[Orchestrator] Dispatched {}/{} activities in {:.2}s",
            summary.dispatched,
            summary.attempted,
            start.elapsed().as_secs_f64()
        );
        Ok(summary)
    }
}
