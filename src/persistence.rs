//! # SQLite Activity Store
//!
//! [`ActivityStore`] backed by a single SQLite table.
//!
//! The connection sits behind a mutex so one store can serve concurrent match
//! calls; SQLite's busy timeout bounds how long a call waits on another
//! process holding the database.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::store::ActivityStore;
use crate::{Activity, ActivityId, MatchResult, OptionExt, Result, TrailMatchError};

/// Default time to wait for a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ACTIVITY_COLUMNS: &str = "id, athlete_id, polyline, distance, moving_time, elapsed_time,
     start_date, distance_on_trail, time_on_trail, matched_at";

/// SQLite-backed activity store.
pub struct SqliteActivityStore {
    db: Mutex<Connection>,
}

impl SqliteActivityStore {
    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &str) -> Result<Self> {
        Self::open_with_timeout(db_path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open with an explicit busy timeout.
    pub fn open_with_timeout(db_path: &str, busy_timeout: Duration) -> Result<Self> {
        let db = Connection::open(db_path)?;
        db.busy_timeout(busy_timeout)?;
        Self::init_schema(&db)?;
        info!("[ActivityStore] Opened {}", db_path);
        Ok(Self { db: Mutex::new(db) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY,
                athlete_id INTEGER NOT NULL,
                polyline TEXT,
                distance REAL NOT NULL DEFAULT 0,
                moving_time INTEGER,
                elapsed_time INTEGER,
                start_date INTEGER,
                -- Owned by the matcher; matched_at NULL = backlog
                distance_on_trail REAL,
                time_on_trail REAL,
                matched_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_activities_backlog
                ON activities(matched_at, start_date);
            CREATE INDEX IF NOT EXISTS idx_activities_athlete
                ON activities(athlete_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| TrailMatchError::persistence("database lock poisoned"))
    }

    /// Insert or replace an activity (ingestion side).
    pub fn upsert_activity(&self, activity: &Activity) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO activities
                (id, athlete_id, polyline, distance, moving_time, elapsed_time,
                 start_date, distance_on_trail, time_on_trail, matched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                activity.id,
                activity.athlete_id,
                activity.encoded_path,
                activity.distance,
                activity.moving_time,
                activity.elapsed_time,
                activity.start_date,
                activity.distance_on_trail,
                activity.time_on_trail,
                activity.matched_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    /// Number of stored activities.
    pub fn activity_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn row_to_activity(row: &Row<'_>) -> rusqlite::Result<Activity> {
        let matched_at: Option<i64> = row.get(9)?;
        Ok(Activity {
            id: row.get(0)?,
            athlete_id: row.get(1)?,
            encoded_path: row.get(2)?,
            distance: row.get(3)?,
            moving_time: row.get(4)?,
            elapsed_time: row.get(5)?,
            start_date: row.get(6)?,
            distance_on_trail: row.get(7)?,
            time_on_trail: row.get(8)?,
            matched_at: matched_at.and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }
}

impl ActivityStore for SqliteActivityStore {
    fn get_activity(&self, id: ActivityId) -> Result<Activity> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM activities WHERE id = ?1", ACTIVITY_COLUMNS);
        conn.query_row(&sql, params![id], Self::row_to_activity)
            .optional()?
            .ok_or_not_found(id)
    }

    fn record_match(&self, result: &MatchResult, matched_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE activities
             SET distance_on_trail = ?1, time_on_trail = ?2, matched_at = ?3
             WHERE id = ?4",
            params![
                result.distance_on_trail,
                result.time_on_trail,
                matched_at.timestamp_millis(),
                result.activity_id,
            ],
        )?;

        if updated == 0 {
            return Err(TrailMatchError::NotFound {
                activity_id: result.activity_id,
            });
        }
        Ok(())
    }

    fn unmatched_ids(&self, limit: usize) -> Result<Vec<ActivityId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM activities
             WHERE matched_at IS NULL
             ORDER BY start_date IS NULL, start_date DESC, id DESC
             LIMIT ?1",
        )?;
        let ids = stmt
            .query_map(params![limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<ActivityId>>>()?;
        Ok(ids)
    }

    fn reset_matches(&self, athlete_id: Option<i64>) -> Result<usize> {
        let conn = self.conn()?;
        let reset = match athlete_id {
            Some(aid) => conn.execute(
                "UPDATE activities SET matched_at = NULL
                 WHERE athlete_id = ?1 AND matched_at IS NOT NULL",
                params![aid],
            )?,
            None => conn.execute(
                "UPDATE activities SET matched_at = NULL WHERE matched_at IS NOT NULL",
                [],
            )?,
        };
        info!(
            "[ActivityStore] Reset {} matched activities{}",
            reset,
            athlete_id
                .map(|aid| format!(" for athlete {}", aid))
                .unwrap_or_default()
        );
        Ok(reset)
    }
}

// ============================================================================
// Tests
// ============================================================================
