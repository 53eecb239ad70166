//! Order validation rules.
//!
//! Pure functions: no storage access, no side effects. Validation failure is
//! a business outcome (`Err(reason)`), never an infrastructure error.

use serde_json::Value;

/// Relative tolerance for reconciling the item sum against `order_value`.
/// Accepts up to 1% drift to absorb floating-point rounding in producers.
const RECONCILE_REL_TOL: f64 = 1e-2;

/// Fields that must be present on every order, checked in this exact order so
/// the reported reason is deterministic.
const REQUIRED_FIELDS: [&str; 3] = ["user_id", "order_id", "order_value"];

/// Validate a single order payload.
///
/// Rules, first failure wins:
/// 1. `user_id`, `order_id` and `order_value` keys must be present.
/// 2. `order_value` must be a JSON number.
/// 3. If `items` is an array, the summed `quantity * price_per_unit` must
///    match `order_value` within a 1% relative tolerance. Missing item fields
///    count as zero; present-but-non-numeric fields (or non-object items) are
///    a structural rejection.
///
/// Absent or non-array `items` skips rule 3 entirely.
pub fn validate_order(order: &Value) -> Result<(), String> {
    for field in REQUIRED_FIELDS {
        if order.get(field).is_none() {
            return Err(format!("Missing required field: {field}"));
        }
    }

    let Some(order_value) = order.get("order_value").and_then(Value::as_f64) else {
        return Err("order_value must be a number".to_string());
    };

    if let Some(items) = order.get("items").and_then(Value::as_array) {
        let calculated_total = sum_items(items)?;
        if !is_close(calculated_total, order_value) {
            return Err(format!(
                "Calculated total ({calculated_total}) does not match order_value ({order_value})"
            ));
        }
    }

    Ok(())
}

/// Sum `quantity * price_per_unit` over all line items.
///
/// A missing field on an item contributes 0; a field that is present but not
/// numeric, or an item that is not an object, makes the whole list invalid.
fn sum_items(items: &[Value]) -> Result<f64, String> {
    const STRUCTURE_ERR: &str = "Invalid structure in 'items' list";

    let mut total = 0.0;
    for item in items {
        if !item.is_object() {
            return Err(STRUCTURE_ERR.to_string());
        }
        let quantity = item_field(item, "quantity").ok_or_else(|| STRUCTURE_ERR.to_string())?;
        let price = item_field(item, "price_per_unit").ok_or_else(|| STRUCTURE_ERR.to_string())?;
        total += quantity * price;
    }
    Ok(total)
}

/// Numeric item field, defaulting to 0 when absent. `None` means the field
/// exists but is not a number.
fn item_field(item: &Value, field: &str) -> Option<f64> {
    match item.get(field) {
        None => Some(0.0),
        Some(v) => v.as_f64(),
    }
}

/// Relative-closeness test: `|a - b| <= tol * max(|a|, |b|)`.
fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= RECONCILE_REL_TOL * a.abs().max(b.abs())
}
