//! Read-API tests: the router exercised in process with `tower::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tower::ServiceExt;

use orderstats_backend::api::create_router;
use orderstats_backend::processing::process_order;
use orderstats_backend::storage::StatsStore;

fn test_store() -> (Arc<StatsStore>, NamedTempFile) {
    let temp = NamedTempFile::new().unwrap();
    let store = Arc::new(StatsStore::new(temp.path().to_str().unwrap()).unwrap());
    (store, temp)
}

async fn get_json(store: Arc<StatsStore>, uri: &str) -> (StatusCode, Value) {
    let response = create_router(store)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn post_json(store: Arc<StatsStore>, uri: &str, payload: &Value) -> (StatusCode, Value) {
    let response = create_router(store)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn health_endpoint() {
    let (store, _temp) = test_store();
    let (status, body) = get_json(store, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn global_stats_zero_then_populated() {
    let (store, _temp) = test_store();

    let (status, body) = get_json(store.clone(), "/stats/global").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"total_orders": 0, "total_revenue": 0.0}));

    store.update_global_stats(15.0).unwrap();
    let (_, body) = get_json(store, "/stats/global").await;
    assert_eq!(body["total_orders"], 1);
    assert_eq!(body["total_revenue"], 15.0);
}

#[tokio::test]
async fn user_stats_roundtrip() {
    let (store, _temp) = test_store();
    store.update_user_stats("u1", 15.0).unwrap();

    let (status, body) = get_json(store.clone(), "/users/u1/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"user_id": "u1", "order_count": 1, "total_spend": 15.0})
    );

    // Unknown users read as zeros.
    let (status, body) = get_json(store, "/users/nobody/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_count"], 0);
}

#[tokio::test]
async fn invalid_orders_limit_and_order() {
    let (store, _temp) = test_store();
    for i in 0..5 {
        store
            .log_invalid_order(&json!({"order_id": format!("o{i}")}), "bad")
            .unwrap();
    }

    let (status, body) = get_json(store, "/orders/invalid?limit=3").await;
    assert_eq!(status, StatusCode::OK);
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["order"]["order_id"], "o4");
    assert_eq!(records[2]["order"]["order_id"], "o2");
    assert_eq!(records[0]["reason"], "bad");
}

#[tokio::test]
async fn top_users_happy_path_and_validation() {
    let (store, _temp) = test_store();
    store.update_user_stats("a", 100.0).unwrap();
    store.update_user_stats("b", 50.0).unwrap();

    let (status, body) = get_json(store.clone(), "/stats/top-users?by=spend&n=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["by"], "spend");
    assert_eq!(body["users"][0]["user_id"], "a");
    assert_eq!(body["users"][0]["score"], 100.0);

    // Defaults: by=spend, n=10, offset=0.
    let (status, body) = get_json(store.clone(), "/stats/top-users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"].as_array().unwrap().len(), 2);

    let (status, _) = get_json(store.clone(), "/stats/top-users?by=revenue").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(store.clone(), "/stats/top-users?n=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(store, "/stats/top-users?n=101").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn store_fault_is_a_500_not_fabricated_zeros() {
    let (store, temp) = test_store();
    // Simulate a store outage from a second connection on the same file.
    let saboteur = rusqlite::Connection::open(temp.path()).unwrap();
    saboteur.execute("DROP TABLE global_stats", []).unwrap();

    let (status, body) = get_json(store, "/stats/global").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
}

#[tokio::test]
async fn reprocess_store_fault_is_a_500_not_accepted() {
    // 202-regardless covers the validation outcome only; losing the store is
    // still a server fault.
    let (store, temp) = test_store();
    let saboteur = rusqlite::Connection::open(temp.path()).unwrap();
    saboteur.execute("DROP TABLE user_stats", []).unwrap();

    let order = json!({"user_id": "u1", "order_id": "o1", "order_value": 15.0});
    let (status, body) = post_json(store, "/orders/reprocess", &order).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
}

#[tokio::test]
async fn reprocess_accepts_valid_order() {
    let (store, _temp) = test_store();
    let order = json!({"user_id": "u1", "order_id": "o1", "order_value": 15.0});

    let (status, body) = post_json(store.clone(), "/orders/reprocess", &order).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");

    assert_eq!(store.get_user_stats("u1").unwrap().order_count, 1);
    assert_eq!(store.get_global_stats().unwrap().total_orders, 1);
}

#[tokio::test]
async fn reprocess_accepts_invalid_order_too() {
    // 202 regardless of the validation outcome; the rejection is only
    // observable through the invalid-orders endpoint.
    let (store, _temp) = test_store();
    let order = json!({"order_id": "o1", "order_value": "ten"});

    let (status, _) = post_json(store.clone(), "/orders/reprocess", &order).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    assert_eq!(store.get_global_stats().unwrap().total_orders, 0);
    let logged = store.list_invalid_orders(10).unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].reason, "Missing required field: user_id");
}
