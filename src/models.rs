//! Shared data types and runtime configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Aggregate statistics for a single user.
///
/// Both counters are monotonically non-decreasing: an order is never
/// "un-counted", and replaying a message under at-least-once delivery
/// increments again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub order_count: i64,
    pub total_spend: f64,
}

impl UserStats {
    pub fn zero() -> Self {
        Self {
            order_count: 0,
            total_spend: 0.0,
        }
    }
}

/// Aggregate statistics across all users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_orders: i64,
    pub total_revenue: f64,
}

impl GlobalStats {
    pub fn zero() -> Self {
        Self {
            total_orders: 0,
            total_revenue: 0.0,
        }
    }
}

/// One leaderboard row: a user and their score (spend or order count).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub score: f64,
}

/// A rejected order, preserved verbatim together with the rejection reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidOrderRecord {
    /// Original order payload, including fields validation never inspects.
    pub order: Value,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Runtime configuration, loaded from the environment (with `.env` support).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub queue_path: String,
    pub port: u16,
    /// How long a received message stays invisible before redelivery.
    pub visibility_timeout_secs: u64,
    /// Max messages claimed per poll.
    pub batch_size: usize,
    /// Long-poll wait per receive call.
    pub poll_wait_secs: u64,
    /// Sleep after a queue transport error before polling again.
    pub error_backoff_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./orderstats.db".to_string());

        let queue_path =
            std::env::var("QUEUE_PATH").unwrap_or_else(|_| "./orders_queue.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .unwrap_or(8000);

        let visibility_timeout_secs = std::env::var("QUEUE_VISIBILITY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let batch_size = std::env::var("QUEUE_BATCH_SIZE")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let poll_wait_secs = std::env::var("QUEUE_POLL_WAIT_SECS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .unwrap_or(20);

        let error_backoff_secs = std::env::var("QUEUE_ERROR_BACKOFF_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        Ok(Self {
            database_path,
            queue_path,
            port,
            visibility_timeout_secs,
            batch_size,
            poll_wait_secs,
            error_backoff_secs,
        })
    }
}
