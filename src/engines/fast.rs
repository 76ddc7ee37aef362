//! Fast engine: a single HTTP GET with redirect following. Cheapest rung of
//! the ladder and the only engine that can return raw bytes as base64.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::info;

use crate::core::types::{FetchResult, ResponseType};
use crate::engines::presets;

const FAST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 5;

pub struct FastFetchOptions<'a> {
    pub headers: &'a HashMap<String, String>,
    pub preset: Option<&'a str>,
    pub response_type: ResponseType,
    pub proxy: Option<&'a str>,
}

/// Perform the GET. Any HTTP status is a successful fetch — the quality
/// judge, not the transport, decides whether a 403 page is useful.
pub async fn fetch(url: &str, opts: FastFetchOptions<'_>) -> Result<FetchResult> {
    let mut builder = reqwest::Client::builder()
        .timeout(FAST_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));

    let engine_used = if let Some(proxy_url) = opts.proxy {
        builder = builder.proxy(
            reqwest::Proxy::all(proxy_url)
                .map_err(|e| anyhow!("invalid proxy URL '{}': {}", proxy_url, e))?,
        );
        "fast:proxy"
    } else {
        "fast:direct"
    };

    let client = builder
        .build()
        .map_err(|e| anyhow!("failed to build HTTP client: {}", e))?;

    let response = client
        .get(url)
        .headers(build_header_map(opts.preset, opts.headers))
        .send()
        .await
        .map_err(|e| anyhow!("request to {} failed: {}", url, e))?;

    let status_code = response.status().as_u16();
    let final_url = response.url().to_string();
    let headers = collect_headers(response.headers());

    let content = match opts.response_type {
        ResponseType::Text => response
            .text()
            .await
            .map_err(|e| anyhow!("reading body of {} failed: {}", url, e))?,
        ResponseType::Base64 => {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| anyhow!("reading bytes of {} failed: {}", url, e))?;
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        }
    };

    info!(
        "Fast fetch {} -> {} ({} bytes, {})",
        url,
        status_code,
        content.len(),
        engine_used
    );

    Ok(FetchResult {
        status_code,
        content,
        markdown: None,
        headers,
        url: final_url,
        engine_used: engine_used.to_string(),
        response_type: opts.response_type,
    })
}

/// Preset bundle first, caller headers merged on top (caller wins).
fn build_header_map(preset: Option<&str>, extra: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();

    if let Some(bundle) = preset.and_then(presets::preset_headers) {
        for (name, value) in bundle {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.insert(name, value);
            }
        }
    }

    for (name, value) in extra {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.insert(name, value);
        }
    }

    map
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|v| (k.as_str().to_string(), v.to_string()))
        })
        .collect()
}
