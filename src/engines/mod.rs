//! Fetch engines behind one contract. Variants are data, not a trait
//! hierarchy: the escalation scheduler stays independent of engine
//! internals, and engines reference the pool but never the reverse.

pub mod browser;
pub mod fast;
pub mod presets;
pub mod stealth;
pub mod unblock;

use std::collections::HashMap;

use anyhow::anyhow;

use crate::core::config::ServiceConfig;
use crate::core::error::FetchError;
use crate::core::types::{EngineKind, FetchResult, ResponseType};
use crate::pool::{BrowserPool, PoolSettings};

/// Shared handles an engine call may need. Built per request from app state.
pub struct EngineContext<'a> {
    pub pool: &'a BrowserPool,
    pub http_client: &'a reqwest::Client,
    pub config: &'a ServiceConfig,
}

/// One engine invocation, normalized from the caller's request and (in auto
/// mode) the current escalation step.
pub struct EngineCall<'a> {
    pub url: &'a str,
    pub headers: &'a HashMap<String, String>,
    pub preset: Option<&'a str>,
    pub response_type: ResponseType,
    pub render_delay_ms: u64,
    pub wait_for_js: bool,
    /// Whether this call should route through a proxy at all.
    pub use_proxy: bool,
    /// Per-request proxy; falls back to the service default when unset.
    pub proxy_override: Option<&'a str>,
}

impl<'a> EngineCall<'a> {
    fn effective_proxy(&self, config: &'a ServiceConfig) -> Option<&'a str> {
        if !self.use_proxy {
            return None;
        }
        self.proxy_override.or(config.proxy_url.as_deref())
    }
}

/// Run one engine once. Errors propagate; absorbing them during escalation
/// is the scheduler's job.
pub async fn dispatch(
    ctx: &EngineContext<'_>,
    kind: EngineKind,
    call: &EngineCall<'_>,
) -> Result<FetchResult, FetchError> {
    match kind {
        EngineKind::Fast => fast::fetch(
            call.url,
            fast::FastFetchOptions {
                headers: call.headers,
                preset: call.preset,
                response_type: call.response_type,
                proxy: call.effective_proxy(ctx.config),
            },
        )
        .await
        .map_err(FetchError::Engine),

        EngineKind::Browser => {
            let settings = pool_settings(ctx.config)?;
            browser::fetch(ctx.pool, &settings, call.url, call.render_delay_ms).await
        }

        EngineKind::Stealth => stealth::fetch(
            call.url,
            stealth::StealthFetchOptions {
                headers: call.headers,
                render_delay_ms: call.render_delay_ms,
                wait_for_js: call.wait_for_js,
            },
        )
        .await
        .map_err(FetchError::Engine),

        EngineKind::Unblock => {
            let ws_url = ctx.config.browserless_url.as_deref().ok_or_else(|| {
                FetchError::Engine(anyhow!("no remote browser endpoint configured"))
            })?;
            unblock::fetch(ctx.http_client, ws_url, call.url)
                .await
                .map_err(FetchError::Engine)
        }
    }
}

pub fn pool_settings(config: &ServiceConfig) -> Result<PoolSettings, FetchError> {
    PoolSettings::from_config(config)
        .ok_or_else(|| FetchError::Engine(anyhow!("no remote browser endpoint configured")))
}
