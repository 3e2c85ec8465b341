//! HTTP router for the queue service

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use queuestack_sqs::SqsState;

use crate::handlers;

/// Create the main application router
pub fn create_router(state: Arc<SqsState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/queues",
            post(handlers::create_queue).get(handlers::list_queues),
        )
        .route("/queues/:queue_name", delete(handlers::delete_queue))
        .route(
            "/queues/:queue_name/messages",
            post(handlers::send_message)
                .get(handlers::receive_messages)
                .delete(handlers::delete_message),
        )
        .route("/queues/:queue_name/metrics", get(handlers::get_metrics))
        .fallback(handlers::not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
