use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handler::{self, AppState};

/// Build the axum router with all order endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handler::health_handler))
        .route(
            "/orders",
            get(handler::list_orders).post(handler::create_order),
        )
        .route(
            "/orders/:id",
            get(handler::get_order)
                .put(handler::update_order)
                .delete(handler::delete_order),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// [`build_router`] that also accepts cross-origin requests from anywhere.
pub fn build_router_with_cors(state: AppState) -> Router {
    build_router(state).layer(CorsLayer::permissive())
}
