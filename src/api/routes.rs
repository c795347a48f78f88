use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState, stream::stream_handler};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Order endpoints
        .route("/api/orders/execute", post(handlers::execute_order))
        .route("/api/orders/:order_id", get(handlers::get_order))
        .route("/api/orders/:order_id/stream", get(stream_handler))
        // Health endpoint
        .route("/api/health", get(handlers::health))
        // Add state and CORS
        .with_state(state)
        .layer(cors)
}
