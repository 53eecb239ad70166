//! Durable at-least-once message queue on SQLite.
//!
//! Mirrors the SQS consumption discipline: `receive` claims a batch and makes
//! it invisible for the visibility timeout, `delete` acknowledges by receipt
//! handle, and anything not deleted in time becomes receivable again. A fresh
//! receipt handle is minted per delivery, so an old handle after redelivery
//! acknowledges nothing (a lost ack replays the message — by design).

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL,
    visible_at INTEGER NOT NULL DEFAULT 0,
    receipt_handle TEXT,
    enqueued_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_visible ON messages(visible_at, id);
"#;

/// How often the long poll re-checks for visible messages.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A claimed message. The receipt handle is only valid until the visibility
/// timeout expires.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

pub struct OrderQueue {
    conn: Arc<Mutex<Connection>>,
    visibility_timeout: Duration,
}

impl OrderQueue {
    pub fn new(db_path: &str, visibility_timeout: Duration) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open queue database at {}", db_path))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize queue schema")?;

        info!("📬 Order queue initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            visibility_timeout,
        })
    }

    /// Enqueue a raw message body.
    pub fn send(&self, body: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (body, visible_at, enqueued_at) VALUES (?1, 0, ?2)",
            params![body, now_millis()],
        )
        .context("Failed to enqueue message")?;
        Ok(())
    }

    /// Long-poll for up to `max` messages, waiting at most `wait`.
    ///
    /// Returns as soon as at least one message is claimed; an empty result
    /// means the wait elapsed with nothing visible. Claimed messages are
    /// hidden for the visibility timeout.
    pub async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<QueueMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let batch = self.claim_batch(max)?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - Instant::now())).await;
        }
    }

    /// Acknowledge a message. A stale handle (already redelivered, or already
    /// deleted) is a no-op.
    pub fn delete(&self, receipt_handle: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM messages WHERE receipt_handle = ?1",
            params![receipt_handle],
        )
        .context("Failed to delete message")?;
        Ok(())
    }

    /// Visible messages right now (in-flight ones excluded).
    pub fn visible_len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE visible_at <= ?1",
                params![now_millis()],
                |row| row.get(0),
            )
            .context("Failed to count visible messages")?;
        Ok(count as usize)
    }

    /// Total messages, including in-flight.
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .context("Failed to count messages")?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Claim up to `max` visible messages in one transaction: hide them and
    /// stamp a fresh receipt handle per delivery.
    fn claim_batch(&self, max: usize) -> Result<Vec<QueueMessage>> {
        let now = now_millis();
        let hidden_until = now + self.visibility_timeout.as_millis() as i64;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .context("Failed to start claim transaction")?;

        let mut claimed = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id, body FROM messages
                 WHERE visible_at <= ?1 ORDER BY id LIMIT ?2",
            )?;
            let max = i64::try_from(max).unwrap_or(i64::MAX);
            let rows = stmt.query_map(params![now, max], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;

            for row in rows {
                let (id, body) = row?;
                let receipt_handle = Uuid::new_v4().to_string();
                claimed.push((id, body, receipt_handle));
            }
        }

        for (id, _, receipt_handle) in &claimed {
            tx.execute(
                "UPDATE messages SET visible_at = ?1, receipt_handle = ?2 WHERE id = ?3",
                params![hidden_until, receipt_handle, id],
            )?;
        }

        tx.commit().context("Failed to commit claim transaction")?;

        Ok(claimed
            .into_iter()
            .map(|(_, body, receipt_handle)| QueueMessage {
                body,
                receipt_handle,
            })
            .collect())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn test_queue(visibility: Duration) -> (OrderQueue, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let queue = OrderQueue::new(temp.path().to_str().unwrap(), visibility).unwrap();
        (queue, temp)
    }

    #[tokio::test]
    async fn test_send_receive_delete() {
        let (queue, _temp) = test_queue(Duration::from_secs(30));
        queue.send("hello").unwrap();

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "hello");

        queue.delete(&batch[0].receipt_handle).unwrap();
        assert!(queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_claimed_message_is_invisible() {
        let (queue, _temp) = test_queue(Duration::from_secs(30));
        queue.send("a").unwrap();

        let first = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);

        // Still in the queue, but not receivable while in flight.
        assert_eq!(queue.len().unwrap(), 1);
        let second = queue.receive(10, Duration::ZERO).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered() {
        let (queue, _temp) = test_queue(Duration::from_millis(50));
        queue.send("retry-me").unwrap();

        let first = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let second = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].body, "retry-me");
        // Redelivery mints a new receipt handle.
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
    }

    #[tokio::test]
    async fn test_stale_receipt_delete_is_noop() {
        let (queue, _temp) = test_queue(Duration::from_millis(50));
        queue.send("keep-me").unwrap();

        let first = queue.receive(10, Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);

        // Ack with the expired handle: the redelivered copy survives.
        queue.delete(&first[0].receipt_handle).unwrap();
        assert_eq!(queue.len().unwrap(), 1);

        queue.delete(&second[0].receipt_handle).unwrap();
        assert!(queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_receive_respects_batch_limit_and_order() {
        let (queue, _temp) = test_queue(Duration::from_secs(30));
        for i in 0..15 {
            queue.send(&format!("m{i}")).unwrap();
        }

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 10);
        assert_eq!(batch[0].body, "m0");
        assert_eq!(batch[9].body, "m9");
    }

    #[tokio::test]
    async fn test_long_poll_picks_up_late_message() {
        let (queue, temp) = test_queue(Duration::from_secs(30));

        // Second handle on the same file, like a separate producer process.
        let producer =
            OrderQueue::new(temp.path().to_str().unwrap(), Duration::from_secs(30)).unwrap();

        let receiver = queue.receive(10, Duration::from_secs(5));
        let sender = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            producer.send("late").unwrap();
        };

        let (batch, ()) = tokio::join!(receiver, sender);
        let batch = batch.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test]
    async fn test_empty_queue_wait_zero_returns_immediately() {
        let (queue, _temp) = test_queue(Duration::from_secs(30));
        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        assert!(batch.is_empty());
    }
}
