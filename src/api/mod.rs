//! HTTP API surface. Served identically on the main and crawler-API ports.

mod admin;
mod fetch;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/fetch", post(fetch::fetch_handler))
        .route("/api/fetch/advanced", post(fetch::advanced_handler))
        .route("/api/status", get(admin::status_handler))
        .route(
            "/api/config",
            get(admin::get_config).post(admin::update_config),
        )
        .route(
            "/api/domain-profiles",
            get(admin::list_profiles).post(admin::create_profile),
        )
        .route(
            "/api/domain-profiles/{domain}",
            get(admin::get_profile).delete(admin::delete_profile),
        )
        .route("/api/logs", get(admin::recent_logs))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "service": "ghostfetch",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
