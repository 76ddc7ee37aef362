//! Remote browser engine: one-shot tab on the shared pool.

use std::collections::HashMap;

use crate::core::error::FetchError;
use crate::core::types::{FetchResult, ResponseType};
use crate::pool::{BrowserPool, PoolSettings};

/// Navigate in a pooled tab and return the rendered DOM. Navigation that
/// completes without a top-level response object reports as 200; the pool
/// handles reconnect-and-retry underneath.
pub async fn fetch(
    pool: &BrowserPool,
    settings: &PoolSettings,
    url: &str,
    render_delay_ms: u64,
) -> Result<FetchResult, FetchError> {
    let fetched = pool.fetch_in_tab(settings, url, render_delay_ms).await?;

    Ok(FetchResult {
        status_code: fetched.status_code,
        content: fetched.content,
        markdown: None,
        headers: HashMap::new(),
        url: fetched.final_url,
        engine_used: "browser:pool".to_string(),
        response_type: ResponseType::Text,
    })
}
