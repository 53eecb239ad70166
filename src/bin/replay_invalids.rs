//! Invalid-Order Replay Tool
//!
//! Pops entries off the invalid-order log (oldest first) and runs each
//! original payload back through the dispatcher. Orders that are still
//! invalid are simply logged again as fresh rejections; orders fixed in the
//! meantime (or rejected for since-relaxed reasons) count into the stats.
//!
//! Usage:
//!   cargo run --bin replay_invalids -- --limit 10

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orderstats_backend::{models::Config, processing::process_order, storage::StatsStore};

/// Replay invalid orders from the rejection log
#[derive(Parser, Debug)]
#[command(name = "replay_invalids")]
#[command(about = "Pop logged invalid orders and re-run them through processing")]
struct Cli {
    /// Maximum number of invalid orders to replay
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orderstats_backend=info,replay_invalids=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store = StatsStore::new(&config.database_path)?;

    info!("Attempting to replay up to {} invalid orders...", cli.limit);

    let mut replayed = 0usize;
    for _ in 0..cli.limit {
        let Some(record) = store.take_oldest_invalid()? else {
            info!("No more invalid orders to replay.");
            break;
        };

        if record.order.as_object().map_or(true, |o| o.is_empty()) {
            warn!("Skipping empty order entry (reason was: {})", record.reason);
            continue;
        }

        let order_id = record
            .order
            .get("order_id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("N/A");
        info!("Replaying order_id: {}", order_id);

        process_order(&store, &record.order)?;
        replayed += 1;
    }

    info!("Replay finished. Processed {} orders.", replayed);
    Ok(())
}
