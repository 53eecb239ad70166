//! Routes one order through validation into the aggregate store.

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info};

use crate::processing::validator::validate_order;
use crate::storage::StatsStore;

/// Process a single order: valid orders update user then global aggregates,
/// invalid orders are appended to the rejection log with their reason.
///
/// The validator's verdict is trusted here; `order_value` is not re-checked.
/// Any store error propagates unchanged — at this layer it is an
/// infrastructure failure, not a business outcome.
pub fn process_order(store: &StatsStore, order: &Value) -> Result<()> {
    match validate_order(order) {
        Ok(()) => {
            let user_id = user_id_of(order);
            // Presence is guaranteed by validation; as_f64 by the type rule.
            let order_value = order
                .get("order_value")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);

            debug!(user_id = %user_id, order_value, "Order valid, updating stats");
            store.update_user_stats(&user_id, order_value)?;
            store.update_global_stats(order_value)?;
        }
        Err(reason) => {
            info!(reason = %reason, "Order rejected");
            store.log_invalid_order(order, &reason)?;
        }
    }
    Ok(())
}

/// User id as a stats key. Non-string ids (validation only checks presence)
/// fall back to their JSON rendering.
fn user_id_of(order: &Value) -> String {
    match order.get("user_id") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
