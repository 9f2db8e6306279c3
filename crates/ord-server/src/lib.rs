//! HTTP server for the order service.
//!
//! Exposes the order store as a small REST API (create, list with cursor
//! pagination, get, status transitions, delete) and owns the backend's
//! process lifecycle.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use config::{BackendConfig, IdStrategy, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use handler::AppState;
pub use server::OrderServer;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use ord_kv::{InMemoryKv, KvBackend};
    use ord_store::{MonotonicIds, OrderStore};
    use ord_types::{Order, OrderStatus};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use crate::handler::ListResponse;

    fn app_with(page_size: usize) -> (Router, Arc<InMemoryKv>) {
        let kv = Arc::new(InMemoryKv::new());
        let state = AppState::new(
            OrderStore::new(kv.clone()),
            Arc::new(MonotonicIds::starting_at(1)),
            page_size,
        );
        (router::build_router(state), kv)
    }

    fn app() -> Router {
        app_with(50).0
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                request = request.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn new_order_body() -> Value {
        json!({
            "customer_id": "6f1c3b1e-9a52-4d8e-8f3a-2b6c1d0e4a77",
            "line_items": [
                { "item_id": "0c9b8f6e-1d2a-4e3b-9c4d-5e6f7a8b9c0d", "quantity": 2, "price": 1250 }
            ]
        })
    }

    async fn create(app: &Router) -> Order {
        let (status, body) = send(app, "POST", "/orders", Some(new_order_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (status, body) = send(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn create_then_get() {
        let app = app();
        let order = create(&app).await;
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.line_items.len(), 1);

        let (status, body) = send(&app, "GET", &format!("/orders/{}", order.order_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_value::<Order>(body).unwrap(), order);
    }

    #[tokio::test]
    async fn malformed_create_is_bad_request() {
        let app = app();
        let (status, _) = send(&app, "POST", "/orders", Some(json!({ "customer_id": 5 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method("POST")
            .uri("/orders")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_missing_and_invalid_ids() {
        let app = app();
        let (status, body) = send(&app, "GET", "/orders/424242", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("424242"));

        let (status, _) = send(&app, "GET", "/orders/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_follows_cursor_to_the_end() {
        let (app, _) = app_with(2);
        let mut created = HashSet::new();
        for _ in 0..5 {
            created.insert(create(&app).await.order_id);
        }

        let mut seen = HashSet::new();
        let mut uri = "/orders".to_string();
        loop {
            let (status, body) = send(&app, "GET", &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            let page: ListResponse = serde_json::from_value(body).unwrap();
            for order in page.items {
                assert!(seen.insert(order.order_id), "order listed twice");
            }
            match page.next {
                Some(next) => uri = format!("/orders?cursor={next}"),
                None => break,
            }
        }
        assert_eq!(seen, created);
    }

    #[tokio::test]
    async fn list_rejects_bad_cursor() {
        let (status, _) = send(&app(), "GET", "/orders?cursor=minus-one", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_list_has_no_next() {
        let (status, body) = send(&app(), "GET", "/orders", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "items": [] }));
    }

    #[tokio::test]
    async fn ship_then_complete() {
        let app = app();
        let order = create(&app).await;
        let uri = format!("/orders/{}", order.order_id);

        // Completing an unshipped order is refused.
        let (status, _) = send(&app, "PUT", &uri, Some(json!({ "status": "completed" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "PUT", &uri, Some(json!({ "status": "shipped" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["shipped_at"].is_null());

        let (status, _) = send(&app, "PUT", &uri, Some(json!({ "status": "shipped" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "PUT", &uri, Some(json!({ "status": "completed" }))).await;
        assert_eq!(status, StatusCode::OK);
        let done: Order = serde_json::from_value(body).unwrap();
        assert_eq!(done.status(), OrderStatus::Completed);

        let (_, body) = send(&app, "GET", &uri, None).await;
        assert_eq!(serde_json::from_value::<Order>(body).unwrap(), done);
    }

    #[tokio::test]
    async fn update_rejects_unknown_status_and_missing_order() {
        let app = app();
        let order = create(&app).await;
        let uri = format!("/orders/{}", order.order_id);

        let (status, _) = send(&app, "PUT", &uri, Some(json!({ "status": "lost" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "PUT", "/orders/999999", Some(json!({ "status": "shipped" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_then_gone() {
        let (app, kv) = app_with(50);
        let order = create(&app).await;
        let uri = format!("/orders/{}", order.order_id);

        let (status, body) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, _) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn closed_backend_is_internal_error() {
        let (app, kv) = app_with(50);
        kv.close().unwrap();
        let (status, body) = send(&app, "GET", "/orders", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal server error");
    }

    #[tokio::test]
    async fn colliding_ids_are_redrawn() {
        let kv = Arc::new(InMemoryKv::new());
        let store = OrderStore::new(kv.clone());
        // Two generators handing out the same sequence.
        let first = AppState::new(store.clone(), Arc::new(MonotonicIds::starting_at(1)), 50);
        let second = AppState::new(store, Arc::new(MonotonicIds::starting_at(1)), 50);
        let (a, b) = (router::build_router(first), router::build_router(second));

        let one = create(&a).await;
        let two = create(&b).await;
        assert_ne!(one.order_id, two.order_id);
    }
}
