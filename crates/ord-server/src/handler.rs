//! Request handlers for the order API.
//!
//! Store calls are synchronous and may touch the disk, so every handler runs
//! them on the blocking pool.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use ord_store::{FindAllPage, IdGenerator, OrderStore, StoreError};
use ord_types::{CustomerId, LineItem, Order, OrderId, Transition};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{ServerError, ServerResult};

/// Attempts at drawing an unused id before giving up on a create.
pub const MAX_ID_ATTEMPTS: usize = 3;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub store: OrderStore,
    pub ids: Arc<dyn IdGenerator>,
    pub page_size: usize,
}

impl AppState {
    pub fn new(store: OrderStore, ids: Arc<dyn IdGenerator>, page_size: usize) -> Self {
        Self {
            store,
            ids,
            page_size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: CustomerId,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub items: Vec<Order>,
    /// Absent once the listing is exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<u64>,
}

/// Health check handler.
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `POST /orders`
pub async fn create_order(
    State(state): State<AppState>,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> ServerResult<(StatusCode, Json<Order>)> {
    let Json(body) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let order = blocking(move || insert_with_fresh_id(&state, body)).await?;
    info!(order_id = %order.order_id, "order created");
    Ok((StatusCode::CREATED, Json(order)))
}

/// `GET /orders?cursor=N`
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ServerResult<Json<ListResponse>> {
    let offset = parse_cursor(params.cursor.as_deref())?;
    let page = FindAllPage::after(offset, state.page_size);
    let found = blocking(move || Ok(state.store.find_all(page)?)).await?;
    let next = (!found.is_exhausted()).then_some(found.cursor);
    Ok(Json(ListResponse {
        items: found.orders,
        next,
    }))
}

/// `GET /orders/:id`
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<Order>> {
    let id: OrderId = id.parse()?;
    let order = blocking(move || {
        state
            .store
            .get_by_id(id)?
            .ok_or(ServerError::Store(StoreError::NotFound(id)))
    })
    .await?;
    Ok(Json(order))
}

/// `PUT /orders/:id` with `{"status": "shipped" | "completed"}`
pub async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateOrderRequest>, JsonRejection>,
) -> ServerResult<Json<Order>> {
    let Json(body) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let id: OrderId = id.parse()?;
    let transition: Transition = body.status.parse()?;

    let order = blocking(move || {
        let mut order = state
            .store
            .get_by_id(id)?
            .ok_or(ServerError::Store(StoreError::NotFound(id)))?;
        order.apply(transition, Utc::now())?;
        state.store.update(&order)?;
        Ok(order)
    })
    .await?;
    info!(order_id = %id, status = %order.status(), "order status changed");
    Ok(Json(order))
}

/// `DELETE /orders/:id`
pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<StatusCode> {
    let id: OrderId = id.parse()?;
    blocking(move || Ok(state.store.delete_by_id(id)?)).await?;
    info!(order_id = %id, "order deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn insert_with_fresh_id(state: &AppState, body: CreateOrderRequest) -> ServerResult<Order> {
    let now = Utc::now();
    let mut attempt = 1;
    loop {
        let order = Order::new(
            state.ids.next_id(),
            body.customer_id,
            body.line_items.clone(),
            now,
        );
        match state.store.insert(&order) {
            Ok(()) => return Ok(order),
            Err(StoreError::AlreadyExists(id)) if attempt < MAX_ID_ATTEMPTS => {
                warn!(order_id = %id, attempt, "order id taken, drawing another");
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Missing or empty means start from the beginning.
fn parse_cursor(raw: Option<&str>) -> ServerResult<u64> {
    match raw {
        None | Some("") => Ok(0),
        Some(s) => s
            .parse()
            .map_err(|_| ServerError::BadRequest(format!("invalid cursor: {s}"))),
    }
}

async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("blocking task failed: {e}")))?
}
