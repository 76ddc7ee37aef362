//! Status, config, profile, and log endpoints. Unlike the fetch surface,
//! admin misuse gets real 4xx statuses.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::api::ErrorResponse;
use crate::core::domain::extract_domain;
use crate::core::event_log::LogEntry;
use crate::core::types::{DomainProfile, EngineKind};
use crate::core::AppState;
use crate::pool::PoolStatus;
use crate::profiles::ProfileInput;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub active_requests: usize,
    pub browser_connected: bool,
    pub browser_pool: PoolStatus,
    pub uptime: u64,
}

pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        active_requests: state
            .active_requests
            .load(std::sync::atomic::Ordering::SeqCst),
        browser_connected: state.pool.any_connected(),
        browser_pool: state.pool.status(),
        uptime: state.uptime_secs(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub browserless_url: Option<String>,
    pub proxy_url: Option<String>,
    pub default_engine: String,
    pub browser_stealth: bool,
    pub browser_headless: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigUpdate {
    pub browserless_url: Option<String>,
    pub proxy_url: Option<String>,
    pub default_engine: Option<String>,
    pub browser_stealth: Option<bool>,
    pub browser_headless: Option<bool>,
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigView> {
    let cfg = state.config.load();
    Json(ConfigView {
        browserless_url: cfg.browserless_url.clone(),
        proxy_url: cfg.proxy_url.clone(),
        default_engine: cfg.default_engine.clone(),
        browser_stealth: cfg.browser_stealth,
        browser_headless: cfg.browser_headless,
    })
}

/// Merge the update into a fresh config record and swap it in atomically.
/// Empty strings clear an optional field. The pool picks the change up on
/// its next (re)connect.
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ConfigUpdate>,
) -> Json<ConfigView> {
    let mut cfg = (*state.config.load()).clone();

    if let Some(v) = update.browserless_url {
        cfg.browserless_url = (!v.trim().is_empty()).then(|| v.trim().to_string());
    }
    if let Some(v) = update.proxy_url {
        cfg.proxy_url = (!v.trim().is_empty()).then(|| v.trim().to_string());
    }
    if let Some(v) = update.default_engine {
        cfg.default_engine = v;
    }
    if let Some(v) = update.browser_stealth {
        cfg.browser_stealth = v;
    }
    if let Some(v) = update.browser_headless {
        cfg.browser_headless = v;
    }

    if let Err(e) = cfg.save(&state.paths.data_dir) {
        warn!("Persisting settings snapshot failed: {}", e);
    }
    state.events.info("config updated via admin API");
    state.config.store(cfg);

    get_config(State(state)).await
}

pub async fn list_profiles(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DomainProfile>>, (StatusCode, Json<ErrorResponse>)> {
    state.profiles.all().await.map(Json).map_err(internal)
}

pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(domain): Path<String>,
) -> Result<Json<DomainProfile>, (StatusCode, Json<ErrorResponse>)> {
    match state.profiles.get(&domain).await {
        Ok(Some(profile)) => Ok(Json(profile)),
        Ok(None) => Err(not_found(&domain)),
        Err(e) => Err(internal(e)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileRequest {
    pub domain: String,
    pub engine: String,
    #[serde(default)]
    pub render_js: bool,
    #[serde(default)]
    pub render_delay_ms: u64,
    #[serde(default)]
    pub use_proxy: bool,
    #[serde(default)]
    pub preset: Option<String>,
}

/// Manual profile pinning. The domain goes through the same
/// canonicalization as the fetch path so `https://www.Example.com` and
/// `example.com` land on one row.
pub async fn create_profile(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProfileRequest>,
) -> Result<(StatusCode, Json<DomainProfile>), (StatusCode, Json<ErrorResponse>)> {
    let engine = EngineKind::parse_str(&req.engine).ok_or_else(|| {
        bad_request(format!(
            "unknown engine '{}' (expected fast|browser|stealth|unblock)",
            req.engine
        ))
    })?;

    let domain = if req.domain.contains("://") {
        extract_domain(&req.domain).map_err(|e| bad_request(e.user_message()))?
    } else {
        let trimmed = req.domain.trim().to_ascii_lowercase();
        if trimmed.is_empty() {
            return Err(bad_request("domain is required".to_string()));
        }
        trimmed.strip_prefix("www.").unwrap_or(&trimmed).to_string()
    };

    let input = ProfileInput {
        engine,
        render_js: req.render_js,
        render_delay_ms: req.render_delay_ms,
        use_proxy: req.use_proxy,
        preset: req.preset.clone(),
        last_status_code: None,
    };

    state
        .profiles
        .upsert(&domain, &input)
        .await
        .map_err(internal)?;

    let profile = state
        .profiles
        .get(&domain)
        .await
        .map_err(internal)?
        .ok_or_else(|| internal(anyhow::anyhow!("profile vanished after upsert")))?;

    state
        .events
        .info(format!("profile for {} pinned via admin API", domain));
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn delete_profile(
    State(state): State<Arc<AppState>>,
    Path(domain): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    match state.profiles.delete(&domain).await {
        Ok(true) => {
            state
                .events
                .info(format!("profile for {} evicted via admin API", domain));
            Ok(Json(serde_json::json!({ "success": true })))
        }
        Ok(false) => Err(not_found(&domain)),
        Err(e) => Err(internal(e)),
    }
}

pub async fn recent_logs(State(state): State<Arc<AppState>>) -> Json<Vec<LogEntry>> {
    Json(state.events.recent())
}

fn not_found(domain: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("no profile for domain '{domain}'"),
        }),
    )
}

fn bad_request(msg: String) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: msg }))
}

fn internal(e: anyhow::Error) -> (StatusCode, Json<ErrorResponse>) {
    error!("Admin API store error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal storage error".to_string(),
        }),
    )
}
