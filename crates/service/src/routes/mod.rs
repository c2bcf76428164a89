pub mod admin;
pub mod chat;
pub mod count_tokens;
pub mod health;
pub mod messages;
pub mod models;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::middleware::stamp_response_metadata;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(messages::messages))
        .route("/v1/messages/count_tokens", post(count_tokens::count_tokens))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/", get(health::health))
        .route("/v1/health", get(health::health))
        .route("/api/v1/health", get(health::health))
        .route("/admin/config", get(admin::config_snapshot))
        .route("/admin/routing/stats", get(admin::routing_stats))
        .route("/admin/async-summary/stats", get(admin::async_summary_stats))
        .route("/admin/routing/reset", post(admin::reset_routing_stats))
        .route("/admin/config/history", post(admin::patch_history_config))
        .layer(axum::middleware::from_fn(stamp_response_metadata))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
