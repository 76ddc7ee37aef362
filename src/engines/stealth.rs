//! Local stealth engine: launches a patched headless Chromium per request.
//! No pooling on purpose — every fetch gets a fresh browser identity, which
//! is what finally gets through fingerprint-keyed walls.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::core::types::{FetchResult, ResponseType};
use crate::engines::presets::CHROME_USER_AGENT;

const VIEWPORT_WIDTH: u32 = 1920;
const VIEWPORT_HEIGHT: u32 = 1080;
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const NETWORK_IDLE_DEADLINE: Duration = Duration::from_secs(10);
const DEFAULT_JS_SETTLE_MS: u64 = 2_000;

pub struct StealthFetchOptions<'a> {
    pub headers: &'a HashMap<String, String>,
    pub render_delay_ms: u64,
    pub wait_for_js: bool,
}

/// Fetch with a fresh stealth browser. The browser is torn down on every
/// exit path; a close error never shadows the fetch error.
pub async fn fetch(url: &str, opts: StealthFetchOptions<'_>) -> Result<FetchResult> {
    let config = build_stealth_config()?;

    let (mut browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| anyhow!("failed to launch stealth browser: {}", e))?;

    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("Stealth CDP handler: {}", e);
            }
        }
    });

    let result = drive_page(&browser, url, &opts).await;

    if let Err(e) = browser.close().await {
        warn!("Stealth browser close error (non-fatal): {}", e);
    }

    let (content, final_url) = result?;
    info!("Stealth fetch {} -> {} bytes", url, content.len());

    Ok(FetchResult {
        status_code: 200,
        content,
        markdown: None,
        headers: HashMap::new(),
        url: final_url,
        engine_used: "stealth:local".to_string(),
        response_type: ResponseType::Text,
    })
}

async fn drive_page(
    browser: &Browser,
    url: &str,
    opts: &StealthFetchOptions<'_>,
) -> Result<(String, String)> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| anyhow!("failed to open page: {}", e))?;

    page.execute(SetTimezoneOverrideParams::new("America/New_York"))
        .await
        .map_err(|e| anyhow!("timezone override failed: {}", e))?;

    let mut locale = SetLocaleOverrideParams::default();
    locale.locale = Some("en-US".to_string());
    page.execute(locale)
        .await
        .map_err(|e| anyhow!("locale override failed: {}", e))?;

    if !opts.headers.is_empty() {
        let json = serde_json::Map::from_iter(
            opts.headers
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone()))),
        );
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(json)))
            .await
            .map_err(|e| anyhow!("setting extra headers failed: {}", e))?;
    }

    tokio::time::timeout(NAVIGATION_TIMEOUT, page.goto(url))
        .await
        .map_err(|_| anyhow!("stealth navigation to {} timed out after 30s", url))?
        .map_err(|e| anyhow!("stealth navigation to {} failed: {}", url, e))?;

    // Wait strategy mirrors caller intent: an explicit JS hint waits for the
    // full load, an explicit delay is honored verbatim, and the default case
    // tries network-idle with a bounded fallback.
    if opts.wait_for_js {
        match tokio::time::timeout(Duration::from_secs(10), page.wait_for_navigation()).await {
            Ok(Err(e)) => debug!("wait_for_navigation after goto: {}", e),
            Err(_) => debug!("wait_for_navigation timed out; proceeding with settle delay"),
            Ok(Ok(_)) => {}
        }
        let settle = if opts.render_delay_ms > 0 {
            opts.render_delay_ms
        } else {
            DEFAULT_JS_SETTLE_MS
        };
        tokio::time::sleep(Duration::from_millis(settle)).await;
    } else if opts.render_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(opts.render_delay_ms)).await;
    } else {
        settle_page(&page, NETWORK_IDLE_DEADLINE).await;
    }

    let content = page
        .content()
        .await
        .map_err(|e| anyhow!("reading rendered DOM failed: {}", e))?;

    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| url.to_string());

    Ok((content, final_url))
}

fn build_stealth_config() -> Result<BrowserConfig> {
    BrowserConfig::builder()
        .viewport(Viewport {
            width: VIEWPORT_WIDTH,
            height: VIEWPORT_HEIGHT,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .arg("--lang=en-US")
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", CHROME_USER_AGENT))
        .build()
        .map_err(|e| anyhow!("failed to build stealth browser config: {}", e))
}

const SETTLE_POLL: Duration = Duration::from_millis(300);
const SETTLE_QUIET_WINDOW: Duration = Duration::from_millis(1500);

/// Settle heuristic for fetches with no explicit wait hint: the page counts
/// as settled once the DOM has finished parsing and its resource timeline
/// has stopped growing for a quiet window. Gives up at `deadline` and lets
/// the caller capture whatever has rendered by then.
async fn settle_page(page: &Page, deadline: Duration) {
    let started = std::time::Instant::now();
    // (resource count, quiet since) while the DOM is past parsing.
    let mut quiet: Option<(u64, std::time::Instant)> = None;

    while started.elapsed() < deadline {
        match probe_readiness(page).await {
            Some((true, resources)) => {
                quiet = match quiet {
                    Some((count, since)) if count == resources => {
                        if since.elapsed() >= SETTLE_QUIET_WINDOW {
                            debug!(
                                "Page settled after {:?} ({} resources)",
                                started.elapsed(),
                                resources
                            );
                            return;
                        }
                        Some((count, since))
                    }
                    _ => Some((resources, std::time::Instant::now())),
                };
            }
            _ => quiet = None,
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }

    debug!("Settle wait gave up at the {:?} ceiling", deadline);
}

/// One readiness probe: parsing state plus resource-timeline length in a
/// single evaluate round trip.
async fn probe_readiness(page: &Page) -> Option<(bool, u64)> {
    let raw = page
        .evaluate(
            "JSON.stringify([document.readyState !== 'loading', \
             performance.getEntriesByType('resource').length])",
        )
        .await
        .ok()?
        .into_value::<String>()
        .ok()?;
    serde_json::from_str::<(bool, u64)>(&raw).ok()
}
