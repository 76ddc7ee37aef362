//! Unblock engine: delegates the whole anti-bot negotiation to the remote
//! browser service's unblock endpoint and takes the finalized HTML.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::core::types::{FetchResult, ResponseType};

const UNBLOCK_WAIT_MS: u64 = 5_000;

/// Derive the REST endpoint from the pool's WebSocket URL: ws→http,
/// wss→https, path swapped for `/chrome/unblock`, query (tokens) preserved.
pub fn unblock_endpoint(ws_url: &str) -> Result<String> {
    let mut url =
        Url::parse(ws_url).with_context(|| format!("invalid browser endpoint '{ws_url}'"))?;

    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        "http" | "https" => url.scheme(),
        other => return Err(anyhow!("unsupported browser endpoint scheme '{other}'")),
    }
    .to_string();

    url.set_scheme(&scheme)
        .map_err(|_| anyhow!("cannot rewrite scheme of '{ws_url}'"))?;
    url.set_path("/chrome/unblock");

    Ok(url.to_string())
}

#[derive(Debug, Deserialize)]
struct UnblockResponse {
    content: Option<String>,
}

pub async fn fetch(client: &reqwest::Client, ws_url: &str, target: &str) -> Result<FetchResult> {
    let endpoint = unblock_endpoint(ws_url)?;

    let response = client
        .post(&endpoint)
        .json(&serde_json::json!({
            "url": target,
            "bestAttempt": true,
            "content": true,
            "waitForTimeout": UNBLOCK_WAIT_MS,
        }))
        .send()
        .await
        .map_err(|e| anyhow!("unblock request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("unblock endpoint returned {}", status));
    }

    let body: UnblockResponse = response
        .json()
        .await
        .map_err(|e| anyhow!("unblock response was not JSON: {}", e))?;

    let content = body
        .content
        .ok_or_else(|| anyhow!("unblock response carried no content"))?;

    info!("Unblock fetch {} -> {} bytes", target, content.len());

    Ok(FetchResult {
        status_code: 200,
        content,
        markdown: None,
        headers: HashMap::new(),
        url: target.to_string(),
        engine_used: "unblock".to_string(),
        response_type: ResponseType::Text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_http_from_ws() {
        assert_eq!(
            unblock_endpoint("ws://browser:3000").unwrap(),
            "http://browser:3000/chrome/unblock"
        );
    }

    #[test]
    fn derives_https_from_wss_and_keeps_query() {
        assert_eq!(
            unblock_endpoint("wss://chrome.example.io?token=abc").unwrap(),
            "https://chrome.example.io/chrome/unblock?token=abc"
        );
    }

    #[test]
    fn replaces_stealth_path() {
        assert_eq!(
            unblock_endpoint("ws://browser:3000/chrome/stealth").unwrap(),
            "http://browser:3000/chrome/unblock"
        );
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(unblock_endpoint("ftp://browser:3000").is_err());
    }
}
