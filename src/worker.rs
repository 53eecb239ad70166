//! Queue consumer loop.
//!
//! Polls the order queue, dispatches each decoded order, and acknowledges
//! only after successful processing. Anything that fails stays on the queue
//! and comes back after the visibility timeout — at-least-once, no dedup.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::models::Config;
use crate::processing::process_order;
use crate::queue::{OrderQueue, QueueMessage};
use crate::storage::StatsStore;

/// Outcome of one polling cycle, mainly for tests and shutdown logging.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub received: usize,
    pub processed: usize,
    /// Left unacked: decode failures plus dispatch errors.
    pub left_for_redelivery: usize,
}

pub struct Worker {
    queue: Arc<OrderQueue>,
    store: Arc<StatsStore>,
    batch_size: usize,
    poll_wait: Duration,
    error_backoff: Duration,
}

impl Worker {
    pub fn new(queue: Arc<OrderQueue>, store: Arc<StatsStore>, config: &Config) -> Self {
        Self {
            queue,
            store,
            batch_size: config.batch_size,
            poll_wait: Duration::from_secs(config.poll_wait_secs),
            error_backoff: Duration::from_secs(config.error_backoff_secs),
        }
    }

    /// Run until `shutdown` flips to true. The flag is checked between polls,
    /// so an in-flight batch always finishes before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("📥 Starting order queue consumer");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let batch = tokio::select! {
                result = self.queue.receive(self.batch_size, self.poll_wait) => result,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender dropped: treat as shutdown.
                        break;
                    }
                    continue;
                }
            };

            match batch {
                Ok(messages) => {
                    if messages.is_empty() {
                        continue;
                    }
                    info!("Received {} messages", messages.len());
                    self.process_batch(&messages);
                }
                Err(e) => {
                    // Transport fault: back off, never terminate the loop.
                    error!("Queue receive error: {e:#}");
                    tokio::time::sleep(self.error_backoff).await;
                }
            }
        }

        info!("📥 Consumer stopped");
    }

    /// Poll once and process whatever arrives. `run` is this in a loop; tests
    /// call it directly for a deterministic single cycle.
    pub async fn poll_once(&self) -> Result<BatchOutcome> {
        let messages = self.queue.receive(self.batch_size, Duration::ZERO).await?;
        Ok(self.process_batch(&messages))
    }

    fn process_batch(&self, messages: &[QueueMessage]) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            received: messages.len(),
            ..Default::default()
        };

        for msg in messages {
            let order: Value = match serde_json::from_str(&msg.body) {
                Ok(v) => v,
                Err(e) => {
                    // Malformed payload: leave it for redelivery and move on.
                    // No backoff; this is not a transport problem.
                    warn!("Invalid JSON in message body, will be retried: {e}");
                    outcome.left_for_redelivery += 1;
                    continue;
                }
            };

            let order_id = order
                .get("order_id")
                .and_then(Value::as_str)
                .unwrap_or("N/A");
            info!("Processing order_id: {}", order_id);

            match process_order(&self.store, &order) {
                Ok(()) => {
                    if let Err(e) = self.queue.delete(&msg.receipt_handle) {
                        // Lost ack: the message will replay and count again.
                        warn!("Failed to ack order_id {}: {e:#}", order_id);
                        outcome.left_for_redelivery += 1;
                    } else {
                        outcome.processed += 1;
                    }
                }
                Err(e) => {
                    // Store-layer fault. The rejection log handles business
                    // rejections, so only infrastructure errors land here.
                    error!("Error processing order_id {}: {e:#}", order_id);
                    outcome.left_for_redelivery += 1;
                }
            }
        }

        outcome
    }
}
