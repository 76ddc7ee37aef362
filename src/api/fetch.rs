//! Fetch endpoints: request validation, engine/escalation dispatch, and the
//! success-flag response envelope. HTTP status stays 200 for fetch outcomes
//! (the `success` field is authoritative); only malformed input gets a 400.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use tracing::{error, info};
use url::Url;

use crate::advanced::fetch_advanced;
use crate::core::error::FetchError;
use crate::core::types::{
    AdvancedFetchRequest, AdvancedFetchResult, ApiCall, EngineChoice, EngineKind, FetchRequest,
    FetchResult, ResourceResult, ResponseType,
};
use crate::core::AppState;
use crate::engines::{dispatch, EngineCall, EngineContext};
use crate::escalation::AutoFetcher;
use crate::render::apply_format;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchApiResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: Option<FetchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedApiResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: Option<FetchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_calls: Option<Vec<ApiCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn fetch_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FetchRequest>,
) -> (StatusCode, Json<FetchApiResponse>) {
    match run_fetch(&state, &req).await {
        Ok(result) => (
            StatusCode::OK,
            Json(FetchApiResponse {
                success: true,
                result: Some(result),
                error: None,
            }),
        ),
        Err(FetchError::BadRequest(msg)) => (
            StatusCode::BAD_REQUEST,
            Json(FetchApiResponse {
                success: false,
                result: None,
                error: Some(msg),
            }),
        ),
        Err(e) => {
            error!("Fetch of {} failed: {}", req.url, e);
            state.events.error(format!("fetch {} failed: {}", req.url, e));
            (
                StatusCode::OK,
                Json(FetchApiResponse {
                    success: false,
                    result: None,
                    error: Some(e.user_message()),
                }),
            )
        }
    }
}

pub async fn advanced_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdvancedFetchRequest>,
) -> (StatusCode, Json<AdvancedApiResponse>) {
    match run_advanced(&state, &req).await {
        Ok(result) => (
            StatusCode::OK,
            Json(AdvancedApiResponse {
                success: true,
                result: Some(result.fetch),
                api_calls: Some(result.api_calls),
                resources: Some(result.resources),
                error: None,
            }),
        ),
        Err(FetchError::BadRequest(msg)) => (
            StatusCode::BAD_REQUEST,
            Json(AdvancedApiResponse {
                success: false,
                result: None,
                api_calls: None,
                resources: None,
                error: Some(msg),
            }),
        ),
        Err(e) => {
            error!("Advanced fetch of {} failed: {}", req.fetch.url, e);
            state
                .events
                .error(format!("advanced fetch {} failed: {}", req.fetch.url, e));
            (
                StatusCode::OK,
                Json(AdvancedApiResponse {
                    success: false,
                    result: None,
                    api_calls: None,
                    resources: None,
                    error: Some(e.user_message()),
                }),
            )
        }
    }
}

fn validate_url(raw: &str) -> Result<(), FetchError> {
    if raw.trim().is_empty() {
        return Err(FetchError::bad_request("url is required"));
    }
    let parsed = Url::parse(raw)
        .map_err(|e| FetchError::bad_request(format!("invalid URL '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(FetchError::bad_request(format!(
            "unsupported URL scheme '{other}'"
        ))),
    }
}

async fn run_fetch(state: &AppState, req: &FetchRequest) -> Result<FetchResult, FetchError> {
    validate_url(&req.url)?;
    if state.is_draining() {
        return Err(FetchError::Cancelled);
    }
    let _guard = state.begin_request();

    let config = state.config.load();
    let engines = EngineContext {
        pool: &state.pool,
        http_client: &state.http_client,
        config: &config,
    };

    let mut result = if req.response_type == ResponseType::Base64 {
        // Binary payloads always take the fast engine, cached profile or not.
        info!("Base64 fetch forces fast engine: {}", req.url);
        dispatch(&engines, EngineKind::Fast, &direct_call(req)).await?
    } else {
        match req.engine {
            EngineChoice::Auto => {
                let fetcher = AutoFetcher {
                    engines,
                    profiles: &state.profiles,
                    events: &state.events,
                    draining: &state.draining,
                };
                fetcher.fetch(req).await?
            }
            EngineChoice::Fast => dispatch(&engines, EngineKind::Fast, &direct_call(req)).await?,
            EngineChoice::Browser => {
                dispatch(&engines, EngineKind::Browser, &direct_call(req)).await?
            }
            EngineChoice::Stealth => {
                dispatch(&engines, EngineKind::Stealth, &direct_call(req)).await?
            }
        }
    };

    apply_format(&mut result, req.format);
    Ok(result)
}

async fn run_advanced(
    state: &AppState,
    req: &AdvancedFetchRequest,
) -> Result<AdvancedFetchResult, FetchError> {
    validate_url(&req.fetch.url)?;
    if state.is_draining() {
        return Err(FetchError::Cancelled);
    }
    let _guard = state.begin_request();

    let config = state.config.load();
    let mut result = fetch_advanced(
        &state.pool,
        &state.http_client,
        &config,
        &state.events,
        req,
    )
    .await?;

    apply_format(&mut result.fetch, req.fetch.format);
    Ok(result)
}

/// Engine call for forced-engine and base64 paths: the caller's own knobs,
/// proxy allowed (per-request override or service default).
fn direct_call(req: &FetchRequest) -> EngineCall<'_> {
    EngineCall {
        url: &req.url,
        headers: &req.headers,
        preset: req.preset.as_deref(),
        response_type: req.response_type,
        render_delay_ms: req.render_delay_ms,
        wait_for_js: req.wait_for_js,
        use_proxy: true,
        proxy_override: req.proxy.as_deref(),
    }
}
