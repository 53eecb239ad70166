//! SQLite-backed aggregate store.
//!
//! Plays the role of the external key-value service: per-user stats rows,
//! one global stats row, two leaderboard score tables and an append-only
//! invalid-order log. All counter updates go through atomic upserts; the
//! store never caches aggregates in process memory.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{GlobalStats, InvalidOrderRecord, LeaderboardEntry, UserStats};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS user_stats (
    user_id TEXT PRIMARY KEY,
    order_count INTEGER NOT NULL DEFAULT 0,
    total_spend REAL NOT NULL DEFAULT 0
) WITHOUT ROWID;

-- Singleton row (id = 1).
CREATE TABLE IF NOT EXISTS global_stats (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    total_orders INTEGER NOT NULL DEFAULT 0,
    total_revenue REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS leaderboard_spend (
    user_id TEXT PRIMARY KEY,
    score REAL NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS leaderboard_orders (
    user_id TEXT PRIMARY KEY,
    score REAL NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_leaderboard_spend_score
    ON leaderboard_spend(score DESC);
CREATE INDEX IF NOT EXISTS idx_leaderboard_orders_score
    ON leaderboard_orders(score DESC);

-- Append-only rejection log; id order is insertion order.
CREATE TABLE IF NOT EXISTS invalid_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_json TEXT NOT NULL,
    reason TEXT NOT NULL,
    logged_at TEXT NOT NULL
);
"#;

/// Which leaderboard to rank by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardKind {
    Spend,
    Orders,
}

impl LeaderboardKind {
    /// Parse the API's `by` query value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spend" => Some(Self::Spend),
            "orders" => Some(Self::Orders),
            _ => None,
        }
    }

    fn table(self) -> &'static str {
        match self {
            Self::Spend => "leaderboard_spend",
            Self::Orders => "leaderboard_orders",
        }
    }
}

/// Aggregate statistics store.
pub struct StatsStore {
    conn: Arc<Mutex<Connection>>,
}

impl StatsStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // guarded by our own Mutex

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open stats database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize stats schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .context("Failed to read journal_mode")?;
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📊 Stats store initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Increment a user's order count by 1 and total spend by `order_value`.
    ///
    /// Both increments land in a single upsert so a reader never observes a
    /// half-updated pair. The leaderboard refresh afterwards is a separate
    /// read-after-write step: under concurrent updates to the same user it
    /// can transiently carry a stale score (matching the upstream design).
    pub fn update_user_stats(&self, user_id: &str, order_value: f64) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO user_stats (user_id, order_count, total_spend)
             VALUES (?1, 1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET
                 order_count = order_count + 1,
                 total_spend = total_spend + excluded.total_spend",
            params![user_id, order_value],
        )
        .context("Failed to increment user stats")?;

        // Re-read the updated counters for the leaderboards.
        let (order_count, total_spend): (i64, f64) = conn
            .query_row(
                "SELECT order_count, total_spend FROM user_stats WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to re-read user stats")?;

        conn.execute(
            "INSERT INTO leaderboard_spend (user_id, score) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET score = excluded.score",
            params![user_id, total_spend],
        )
        .context("Failed to update spend leaderboard")?;

        conn.execute(
            "INSERT INTO leaderboard_orders (user_id, score) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET score = excluded.score",
            params![user_id, order_count as f64],
        )
        .context("Failed to update orders leaderboard")?;

        Ok(())
    }

    /// Increment global order count by 1 and revenue by `order_value`, as one
    /// atomic upsert.
    pub fn update_global_stats(&self, order_value: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO global_stats (id, total_orders, total_revenue)
             VALUES (1, 1, ?1)
             ON CONFLICT(id) DO UPDATE SET
                 total_orders = total_orders + 1,
                 total_revenue = total_revenue + excluded.total_revenue",
            params![order_value],
        )
        .context("Failed to increment global stats")?;
        Ok(())
    }

    /// Stats for one user; absence reads as zeros (users are created
    /// implicitly on their first valid order and never deleted here).
    pub fn get_user_stats(&self, user_id: &str) -> Result<UserStats> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT order_count, total_spend FROM user_stats WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserStats {
                        order_count: row.get(0)?,
                        total_spend: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to read user stats")?;
        Ok(row.unwrap_or_else(UserStats::zero))
    }

    pub fn get_global_stats(&self) -> Result<GlobalStats> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT total_orders, total_revenue FROM global_stats WHERE id = 1",
                [],
                |row| {
                    Ok(GlobalStats {
                        total_orders: row.get(0)?,
                        total_revenue: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to read global stats")?;
        Ok(row.unwrap_or_else(GlobalStats::zero))
    }

    /// Top users by descending score, with pagination. Ties break by
    /// descending user id so pages are stable.
    pub fn get_top_users(
        &self,
        by: LeaderboardKind,
        n: usize,
        offset: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT user_id, score FROM {}
             ORDER BY score DESC, user_id DESC
             LIMIT ?1 OFFSET ?2",
            by.table()
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare top-users query")?;
        let rows = stmt
            .query_map(params![bind_count(n), bind_count(offset)], |row| {
                Ok(LeaderboardEntry {
                    user_id: row.get(0)?,
                    score: row.get(1)?,
                })
            })
            .context("Failed to query leaderboard")?;

        let mut entries = Vec::with_capacity(n.min(1024));
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Append a rejected order with its reason, timestamped now.
    pub fn log_invalid_order(&self, order: &Value, reason: &str) -> Result<()> {
        let order_json = serde_json::to_string(order)?;
        let logged_at = Utc::now().to_rfc3339();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO invalid_orders (order_json, reason, logged_at) VALUES (?1, ?2, ?3)",
            params![order_json, reason, logged_at],
        )
        .context("Failed to log invalid order")?;
        Ok(())
    }

    /// Up to `limit` most recently rejected orders, newest first.
    pub fn list_invalid_orders(&self, limit: usize) -> Result<Vec<InvalidOrderRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT order_json, reason, logged_at FROM invalid_orders
                 ORDER BY id DESC LIMIT ?1",
            )
            .context("Failed to prepare invalid-orders query")?;

        let rows = stmt
            .query_map(params![bind_count(limit)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("Failed to query invalid orders")?;

        let mut records = Vec::new();
        for row in rows {
            let (order_json, reason, logged_at) = row?;
            records.push(decode_record(&order_json, reason, &logged_at)?);
        }
        Ok(records)
    }

    /// Pop the oldest rejection log entry, if any. Backs the replay CLI:
    /// replays proceed in the order the rejections arrived.
    pub fn take_oldest_invalid(&self) -> Result<Option<InvalidOrderRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, order_json, reason, logged_at FROM invalid_orders
                 ORDER BY id ASC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to read oldest invalid order")?;

        let Some((id, order_json, reason, logged_at)) = row else {
            return Ok(None);
        };

        conn.execute("DELETE FROM invalid_orders WHERE id = ?1", params![id])
            .context("Failed to pop invalid order")?;

        Ok(Some(decode_record(&order_json, reason, &logged_at)?))
    }
}

/// LIMIT/OFFSET bind value. A plain `as i64` cast would turn huge counts
/// negative, which SQLite reads as "unbounded" (LIMIT) or "skip nothing"
/// (OFFSET).
fn bind_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn decode_record(order_json: &str, reason: String, logged_at: &str) -> Result<InvalidOrderRecord> {
    let order: Value =
        serde_json::from_str(order_json).context("Corrupt order payload in invalid log")?;
    let timestamp = chrono::DateTime::parse_from_rfc3339(logged_at)
        .context("Corrupt timestamp in invalid log")?
        .with_timezone(&Utc);
    Ok(InvalidOrderRecord {
        order,
        reason,
        timestamp,
    })
}
