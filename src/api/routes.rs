//! HTTP read API over the aggregate store, plus the synchronous reprocess
//! endpoint.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::models::{GlobalStats, InvalidOrderRecord, LeaderboardEntry};
use crate::processing::process_order;
use crate::storage::{LeaderboardKind, StatsStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StatsStore>,
}

/// Create the API router
pub fn create_router(store: Arc<StatsStore>) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/health", get(health_check))
        .route("/stats/global", get(get_global_stats))
        .route("/stats/top-users", get(get_top_users))
        .route("/users/:user_id/stats", get(get_user_stats))
        .route("/orders/invalid", get(get_invalid_orders))
        .route("/orders/reprocess", post(reprocess_order))
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Global order count and revenue; zeros before the first valid order.
async fn get_global_stats(State(state): State<AppState>) -> Result<Json<GlobalStats>, ApiError> {
    Ok(Json(state.store.get_global_stats()?))
}

/// Per-user stats; unknown users read as zeros, never a 404.
async fn get_user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserStatsResponse>, ApiError> {
    let stats = state.store.get_user_stats(&user_id)?;
    Ok(Json(UserStatsResponse {
        user_id,
        order_count: stats.order_count,
        total_spend: stats.total_spend,
    }))
}

/// Most recently rejected orders, newest first.
async fn get_invalid_orders(
    State(state): State<AppState>,
    Query(params): Query<InvalidOrdersQuery>,
) -> Result<Json<Vec<InvalidOrderRecord>>, ApiError> {
    let limit = params.limit.unwrap_or(50);
    Ok(Json(state.store.list_invalid_orders(limit)?))
}

/// Top-N users by spend or order count.
async fn get_top_users(
    State(state): State<AppState>,
    Query(params): Query<TopUsersQuery>,
) -> Result<Json<TopUsersResponse>, ApiError> {
    let by_raw = params.by.unwrap_or_else(|| "spend".to_string());
    let by = LeaderboardKind::parse(&by_raw).ok_or_else(|| {
        ApiError::BadRequest("Invalid leaderboard type. Must be 'spend' or 'orders'.".to_string())
    })?;

    let n = params.n.unwrap_or(10);
    if !(1..=100).contains(&n) {
        return Err(ApiError::BadRequest(
            "n must be between 1 and 100.".to_string(),
        ));
    }
    let offset = params.offset.unwrap_or(0);

    let users = state.store.get_top_users(by, n, offset)?;
    Ok(Json(TopUsersResponse {
        by: by_raw,
        n,
        offset,
        users,
    }))
}

/// Accept a corrected order payload and dispatch it synchronously.
///
/// Responds 202 regardless of the validation outcome; the result is only
/// observable through the stats and invalid-order endpoints. A store failure
/// is still a 500 — that is infrastructure, not validation.
async fn reprocess_order(
    State(state): State<AppState>,
    Json(order): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    process_order(&state.store, &order)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "message": "Order sent for reprocessing."
        })),
    ))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct InvalidOrdersQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct TopUsersQuery {
    /// Leaderboard type: "spend" or "orders" (default "spend")
    by: Option<String>,
    /// Number of users to return, 1..=100 (default 10)
    n: Option<usize>,
    /// Offset for pagination (default 0)
    offset: Option<usize>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct UserStatsResponse {
    user_id: String,
    order_count: i64,
    total_spend: f64,
}

#[derive(Serialize)]
struct TopUsersResponse {
    by: String,
    n: usize,
    offset: usize,
    users: Vec<LeaderboardEntry>,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Storage(anyhow::Error),
    BadRequest(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Storage(err) => {
                // Store outages are server faults; never fabricate zeros.
                tracing::error!("Storage error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
