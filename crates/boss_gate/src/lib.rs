use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use thiserror::Error;

/// How long a recorded join suppresses further joins.
pub const JOIN_WINDOW_HOURS: i64 = 4;

/// Lock-wait budget for a cooperating second process. Contention is rare
/// but must never turn into a silent deadlock; a write that cannot acquire
/// the store within this budget fails instead.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum GateError {
    #[error("durable store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("store directory could not be created: {0}")]
    StoreDir(#[from] std::io::Error),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS boss_joins (
    join_time TEXT,
    fight_id TEXT
);
CREATE INDEX IF NOT EXISTS index_join_time ON boss_joins(join_time);
"#;

/// Append-only ledger of guarded squad joins, backed by a single SQLite
/// file. The trailing-window count is evaluated by the store's own clock,
/// so the 4-hour boundary is exact per that clock and survives restarts.
pub struct JoinGate {
    conn: Connection,
}

impl JoinGate {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GateError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let mode: String = conn.query_row("PRAGMA journal_mode = wal", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(%mode, "could not enable WAL journal mode");
        }
        conn.pragma_update(None, "synchronous", "normal")?;
        conn.pragma_update(None, "temp_store", "memory")?;

        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Number of joins recorded within the trailing 4 hours, as seen by the
    /// store's clock at query time.
    pub fn recent_join_count(&self) -> Result<i64, GateError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM boss_joins
             WHERE join_time >= datetime('now', ?1)",
            params![format!("-{JOIN_WINDOW_HOURS} hours")],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Durably appends one join record. Must succeed before the guarded
    /// action is considered performed; callers abort the join on error.
    pub fn record_join(&self, fight_id: &str, at: DateTime<Utc>) -> Result<(), GateError> {
        // datetime(?) normalises the ISO-8601 input to the store's
        // canonical UTC text form so it compares against datetime('now').
        self.conn.execute(
            "INSERT INTO boss_joins (join_time, fight_id) VALUES (datetime(?1), ?2)",
            params![at.to_rfc3339_opts(SecondsFormat::Millis, true), fight_id],
        )?;
        Ok(())
    }
}
