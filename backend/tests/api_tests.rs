//! HTTP API tests
//!
//! Drives the router end to end against in-memory storage:
//! - Bearer tokens and permissions gate every stock route
//! - Receipts and sales flow through the ledger
//! - Errors carry a stable code and the shortfall

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Days, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use pos_stock::middleware::Claims;
use pos_stock::repository::InMemoryBatchRepository;
use pos_stock::{create_app, AppState, Config};
use serde_json::{json, Value};
use tower::ServiceExt;

const ALL_PERMISSIONS: &[&str] = &[
    "stock:read",
    "stock:write",
    "sales:create",
    "disposals:execute",
    "transfers:read",
    "transfers:execute",
    "jobs:manage",
];

fn app() -> Router {
    let repo = Arc::new(InMemoryBatchRepository::new());
    create_app(AppState::new(repo.clone(), repo, Config::default()))
}

fn token(permissions: &[&str], branch_id: Option<i64>) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: "user-1".to_string(),
        branch_id,
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        exp: now + 3600,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(Config::default().jwt.secret.as_bytes()),
    )
    .unwrap()
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn receipt(number: &str, quantity: i64, cost: &str, expiry_in: Option<u64>) -> Value {
    let expiry = expiry_in.map(|d| (Utc::now().date_naive() + Days::new(d)).to_string());
    json!({
        "product_id": 1,
        "branch_id": 1,
        "batch_number": number,
        "quantity": quantity,
        "cost_per_unit": cost,
        "expiry_date": expiry,
    })
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Health is public and reports storage
    #[tokio::test]
    async fn test_health_is_public() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage"], "connected");
    }

    /// Stock routes need a valid bearer token
    #[tokio::test]
    async fn test_missing_or_bad_token_is_unauthorized() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/v1/batches", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let (status, _) = send(&app, "GET", "/api/v1/batches", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    /// Missing permissions are refused
    #[tokio::test]
    async fn test_missing_permission_is_forbidden() {
        let app = app();
        let reader = token(&["stock:read"], Some(1));
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/batches",
            Some(&reader),
            Some(receipt("B1", 10, "1000", Some(2))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "INSUFFICIENT_PERMISSIONS");
    }

    /// Receive, sell through FIFO, then hit a shortfall
    #[tokio::test]
    async fn test_receive_and_sell_flow() {
        let app = app();
        let admin = token(ALL_PERMISSIONS, Some(1));

        let (status, b1) = send(
            &app,
            "POST",
            "/api/v1/batches",
            Some(&admin),
            Some(receipt("B1", 10, "1000", Some(2))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(b1["created"], true);
        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/batches",
            Some(&admin),
            Some(receipt("B2", 20, "900", None)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, sale) = send(
            &app,
            "POST",
            "/api/v1/sales",
            Some(&admin),
            Some(json!({
                "items": [{ "product_id": 1, "quantity": 15, "unit_price": "1500" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(sale["branch_id"], 1);
        let allocations = sale["items"][0]["batch_allocations"].as_array().unwrap();
        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0]["batch_number"], "B1");
        assert_eq!(allocations[0]["quantity"], 10);
        assert_eq!(allocations[1]["batch_number"], "B2");
        assert_eq!(allocations[1]["quantity"], 5);

        let (status, error) = send(
            &app,
            "POST",
            "/api/v1/sales",
            Some(&admin),
            Some(json!({
                "items": [{ "product_id": 1, "quantity": 20, "unit_price": "1500" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error["error"]["code"], "INSUFFICIENT_STOCK");
        assert_eq!(error["error"]["shortfall"], 5);

        let (status, stock) = send(&app, "GET", "/api/v1/products/1/stock", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stock["total_available"], 15);
    }

    /// A repeat receipt under an open batch number merges with 200
    #[tokio::test]
    async fn test_repeat_receipt_merges() {
        let app = app();
        let admin = token(ALL_PERMISSIONS, Some(1));
        let first = receipt("LOT-1", 5, "10", Some(30));

        let (status, _) = send(&app, "POST", "/api/v1/batches", Some(&admin), Some(first.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, merged) = send(&app, "POST", "/api/v1/batches", Some(&admin), Some(first)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(merged["created"], false);
        assert_eq!(merged["batch"]["current_stock"], 10);
    }

    /// Disposing an unexpired batch without force is refused
    #[tokio::test]
    async fn test_dispose_unexpired_batch_refused() {
        let app = app();
        let admin = token(ALL_PERMISSIONS, Some(1));
        let (_, created) = send(
            &app,
            "POST",
            "/api/v1/batches",
            Some(&admin),
            Some(receipt("D-1", 5, "10", Some(30))),
        )
        .await;
        let batch_id = created["batch"]["id"].as_i64().unwrap();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/batches/{}/dispose", batch_id),
            Some(&admin),
            Some(json!({ "method": "destroy" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "NOT_EXPIRED");

        let (status, view) = send(
            &app,
            "GET",
            &format!("/api/v1/batches/{}", batch_id),
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["state"], "active");
        assert_eq!(view["current_stock"], 5);
    }

    /// Job cancellation knows the scan kinds
    #[tokio::test]
    async fn test_cancel_job_kinds() {
        let app = app();
        let admin = token(ALL_PERMISSIONS, None);

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/jobs/transfer-scan/cancel",
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "transfer-scan");
        assert_eq!(body["cancelled"], 0);

        let (status, _) = send(&app, "POST", "/api/v1/jobs/reindex/cancel", Some(&admin), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
