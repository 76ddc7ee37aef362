//! Advanced fetch: a pooled-browser fetch with per-request hooks — network
//! response capture by URL pattern, post-load JS injection, binary resource
//! downloads through the live browser context, and upload fan-out.
//!
//! Hook order is strict: listeners install before `goto` and stop with it,
//! `jsAction` runs after `goto`, downloads run after `jsAction`, the DOM
//! read is last.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived, GetResponseBodyParams, RequestId, ResourceType,
};
use chromiumoxide::Page;
use chrono::{SecondsFormat, Utc};
use futures::StreamExt;
use rand::distr::Alphanumeric;
use rand::Rng;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::core::config::ServiceConfig;
use crate::core::error::FetchError;
use crate::core::event_log::EventLog;
use crate::core::types::{
    AdvancedFetchRequest, AdvancedFetchResult, ApiCall, FetchResult, ResourceResult,
    ResourceStatus, ResponseType, UploadConfig,
};
use crate::engines::pool_settings;
use crate::pool::{BrowserPool, TabLease};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const JS_ACTION_SETTLE: Duration = Duration::from_secs(2);
const RESPONSE_WAIT: Duration = Duration::from_secs(5);

/// One pattern-matched network response observed during the main
/// navigation, pending body retrieval.
#[derive(Debug, Clone)]
pub struct CapturedEntry {
    pub request_id: String,
    pub url: String,
    pub status: u16,
    pub timestamp: String,
}

/// Bookkeeping shared between the CDP listener tasks and the body-resolve
/// phase: request methods by id, and matched responses in arrival order.
pub struct CaptureBuffer {
    patterns: Vec<Regex>,
    methods: Mutex<HashMap<String, String>>,
    matched: Mutex<Vec<CapturedEntry>>,
}

impl CaptureBuffer {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self {
            patterns,
            methods: Mutex::new(HashMap::new()),
            matched: Mutex::new(Vec::new()),
        }
    }

    pub fn note_request(&self, request_id: &str, method: &str) {
        if let Ok(mut map) = self.methods.lock() {
            map.insert(request_id.to_string(), method.to_string());
        }
    }

    /// Record the response if its URL matches any caller pattern. Returns
    /// whether it was captured.
    pub fn note_response(&self, request_id: &str, url: &str, status: u16) -> bool {
        if !self.patterns.iter().any(|re| re.is_match(url)) {
            return false;
        }
        if let Ok(mut list) = self.matched.lock() {
            list.push(CapturedEntry {
                request_id: request_id.to_string(),
                url: url.to_string(),
                status,
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            });
        }
        true
    }

    pub fn drain(&self) -> Vec<CapturedEntry> {
        match self.matched.lock() {
            Ok(mut list) => list.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Assemble the caller-facing record for one captured entry. The body
    /// is whatever the CDP layer handed back (raw text + base64 flag), or
    /// None when retrieval failed.
    pub fn api_call(&self, entry: CapturedEntry, body: Option<(String, bool)>) -> ApiCall {
        let method = self
            .methods
            .lock()
            .ok()
            .and_then(|m| m.get(&entry.request_id).cloned())
            .unwrap_or_else(|| "GET".to_string());

        ApiCall {
            url: entry.url,
            method,
            status: entry.status,
            response_body: body.and_then(|(raw, base64_encoded)| decode_body(&raw, base64_encoded)),
            timestamp: entry.timestamp,
        }
    }
}

pub async fn fetch_advanced(
    pool: &BrowserPool,
    http_client: &reqwest::Client,
    config: &ServiceConfig,
    events: &EventLog,
    req: &AdvancedFetchRequest,
) -> Result<AdvancedFetchResult, FetchError> {
    let patterns = compile_patterns(&req.api_patterns)?;
    let settings = pool_settings(config)?;

    let lease = pool.acquire_tab(&settings).await?;
    let page = lease.page().clone();

    // Hooks first: both listeners must be live before navigation starts or
    // early XHRs slip through uncaptured.
    let buffer = Arc::new(CaptureBuffer::new(patterns));
    let capture_tasks = if buffer.patterns.is_empty() {
        Vec::new()
    } else {
        install_capture_hooks(&page, &buffer)
            .await
            .map_err(FetchError::Engine)?
    };

    let nav_result = tokio::time::timeout(NAVIGATION_TIMEOUT, page.goto(req.fetch.url.as_str()))
        .await
        .map_err(|_| FetchError::Engine(anyhow!("navigation to {} timed out", req.fetch.url)))
        .and_then(|r| {
            r.map(|_| ())
                .map_err(|e| FetchError::Engine(anyhow!("navigation failed: {e}")))
        });

    // Capture terminates with the main navigation: stop listening before
    // render delays or jsAction can trigger more traffic.
    for task in &capture_tasks {
        task.abort();
    }
    nav_result?;

    if req.fetch.render_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(req.fetch.render_delay_ms)).await;
    }

    if let Some(js) = &req.js_action {
        if let Err(e) = page.evaluate(js.clone()).await {
            warn!("jsAction evaluation failed (continuing): {}", e);
            events.warn(format!("advanced fetch: jsAction failed: {e}"));
        }
        tokio::time::sleep(JS_ACTION_SETTLE).await;
    }

    let api_calls = resolve_api_calls(&page, &buffer).await;

    let mut resources = Vec::with_capacity(req.images_to_download.len());
    for resource_url in &req.images_to_download {
        resources.push(
            download_resource(
                &lease,
                http_client,
                resource_url,
                req.upload_config.as_ref(),
            )
            .await,
        );
    }

    let content = page
        .content()
        .await
        .map_err(|e| FetchError::Engine(anyhow!("reading finalized DOM failed: {e}")))?;

    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| req.fetch.url.clone());

    info!(
        "Advanced fetch {}: {} api calls, {} resources",
        req.fetch.url,
        api_calls.len(),
        resources.len()
    );

    Ok(AdvancedFetchResult {
        fetch: FetchResult {
            status_code: 200,
            content,
            markdown: None,
            headers: HashMap::new(),
            url: final_url,
            engine_used: "browser:pool".to_string(),
            response_type: ResponseType::Text,
        },
        api_calls,
        resources,
    })
}

fn compile_patterns(raw: &[String]) -> Result<Vec<Regex>, FetchError> {
    raw.iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| FetchError::bad_request(format!("invalid apiPattern '{p}': {e}")))
        })
        .collect()
}

async fn install_capture_hooks(
    page: &Page,
    buffer: &Arc<CaptureBuffer>,
) -> anyhow::Result<Vec<tokio::task::JoinHandle<()>>> {
    let mut request_events = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(|e| anyhow!("installing request listener failed: {e}"))?;
    let mut response_events = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| anyhow!("installing response listener failed: {e}"))?;

    let request_buffer = Arc::clone(buffer);
    let request_task = tokio::spawn(async move {
        while let Some(event) = request_events.next().await {
            request_buffer.note_request(event.request_id.as_ref(), &event.request.method);
        }
    });

    let response_buffer = Arc::clone(buffer);
    let response_task = tokio::spawn(async move {
        while let Some(event) = response_events.next().await {
            let captured = response_buffer.note_response(
                event.request_id.as_ref(),
                &event.response.url,
                event.response.status.max(0) as u16,
            );
            if captured {
                debug!("API capture matched: {}", event.response.url);
            }
        }
    });

    Ok(vec![request_task, response_task])
}

/// Pull bodies for every captured response. JSON first, text fallback,
/// nothing on failure — a body that cannot be read does not sink the call
/// record.
async fn resolve_api_calls(page: &Page, buffer: &CaptureBuffer) -> Vec<ApiCall> {
    let entries = buffer.drain();
    let mut calls = Vec::with_capacity(entries.len());

    for entry in entries {
        let request_id: RequestId = entry.request_id.clone().into();
        let body = match page.execute(GetResponseBodyParams::new(request_id)).await {
            Ok(response) => Some((
                response.result.body.clone(),
                response.result.base64_encoded,
            )),
            Err(e) => {
                debug!("Response body unavailable for {}: {}", entry.url, e);
                None
            }
        };
        calls.push(buffer.api_call(entry, body));
    }
    calls
}

fn decode_body(raw: &str, base64_encoded: bool) -> Option<serde_json::Value> {
    let text = if base64_encoded {
        let bytes = base64::engine::general_purpose::STANDARD.decode(raw).ok()?;
        String::from_utf8(bytes).ok()?
    } else {
        raw.to_string()
    };

    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => Some(json),
        Err(_) => Some(serde_json::Value::String(text)),
    }
}

/// Fetch one binary through a sibling tab of the main page's browser
/// connection, so session cookies carry over. Never fatal: failures land in
/// the resource record.
async fn download_resource(
    lease: &TabLease,
    http_client: &reqwest::Client,
    resource_url: &str,
    upload: Option<&UploadConfig>,
) -> ResourceResult {
    let outcome = tokio::time::timeout(
        DOWNLOAD_TIMEOUT,
        download_bytes_via_tab(lease, resource_url),
    )
    .await
    .unwrap_or_else(|_| {
        Err(FetchError::Resource(
            "download timed out after 30s".to_string(),
        ))
    });

    match outcome {
        Ok((bytes, mime_type)) => {
            let size = bytes.len();
            let uploaded_url = match upload {
                Some(cfg) => {
                    let sink = UploadSink::new(http_client, cfg);
                    match sink.store(bytes, &mime_type, resource_url).await {
                        Ok(url) => Some(url),
                        Err(e) => {
                            warn!("Upload of {} failed: {}", resource_url, e);
                            return ResourceResult {
                                original_url: resource_url.to_string(),
                                status: ResourceStatus::Error,
                                uploaded_url: None,
                                mime_type: Some(mime_type),
                                size: Some(size),
                                error: Some(e.user_message()),
                            };
                        }
                    }
                }
                None => None,
            };

            ResourceResult {
                original_url: resource_url.to_string(),
                status: ResourceStatus::Success,
                uploaded_url,
                mime_type: Some(mime_type),
                size: Some(size),
                error: None,
            }
        }
        Err(e) => ResourceResult {
            original_url: resource_url.to_string(),
            status: ResourceStatus::Error,
            uploaded_url: None,
            mime_type: None,
            size: None,
            error: Some(e.user_message()),
        },
    }
}

async fn download_bytes_via_tab(
    lease: &TabLease,
    url: &str,
) -> Result<(Vec<u8>, String), FetchError> {
    let tab = lease.open_sibling().await?;

    let result = async {
        let mut responses = tab
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| {
                FetchError::Resource(format!("installing download listener failed: {e}"))
            })?;

        tab.goto(url)
            .await
            .map_err(|e| FetchError::Resource(format!("navigation to {url} failed: {e}")))?;

        // The main document response for this tab is the resource itself.
        let document = tokio::time::timeout(RESPONSE_WAIT, async {
            while let Some(event) = responses.next().await {
                if event.r#type == ResourceType::Document || event.response.url == url {
                    return Some(event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
        .ok_or_else(|| {
            FetchError::Resource(format!("no document response observed for {url}"))
        })?;

        let status = document.response.status;
        if !(200..300).contains(&status) {
            return Err(FetchError::Resource(format!(
                "resource returned status {status}"
            )));
        }

        let body = tab
            .execute(GetResponseBodyParams::new(document.request_id.clone()))
            .await
            .map_err(|e| FetchError::Resource(format!("reading resource body failed: {e}")))?;

        let bytes = if body.result.base64_encoded {
            base64::engine::general_purpose::STANDARD
                .decode(&body.result.body)
                .map_err(|e| {
                    FetchError::Resource(format!("resource body was not valid base64: {e}"))
                })?
        } else {
            body.result.body.clone().into_bytes()
        };

        Ok((bytes, document.response.mime_type.clone()))
    }
    .await;

    // Close the tab on every exit path.
    if let Err(e) = tab.close().await {
        debug!("Download tab close error (non-fatal): {}", e);
    }

    result
}

/// Multipart client for the upload sink: `files` form field, `X-API-Key`
/// auth, and a synthesized filename so the sink's extension-based type
/// sniffing keeps working.
pub struct UploadSink<'a> {
    client: &'a reqwest::Client,
    config: &'a UploadConfig,
}

impl<'a> UploadSink<'a> {
    pub fn new(client: &'a reqwest::Client, config: &'a UploadConfig) -> Self {
        Self { client, config }
    }

    pub async fn store(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        source_url: &str,
    ) -> Result<String, FetchError> {
        let filename = synthesize_filename(mime_type, source_url);

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime_type)
            .map_err(|e| {
                FetchError::Resource(format!("resource carried unusable mime type '{mime_type}': {e}"))
            })?;

        let endpoint = format!(
            "{}/api/files/{}/upload",
            self.config.base_url.trim_end_matches('/'),
            self.config.bucket
        );

        let response = self
            .client
            .post(&endpoint)
            .header("X-API-Key", &self.config.api_key)
            .multipart(reqwest::multipart::Form::new().part("files", part))
            .send()
            .await
            .map_err(|e| FetchError::Resource(format!("upload POST failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Resource(format!(
                "upload sink returned {status}"
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            FetchError::Resource(format!("upload sink response was not JSON: {e}"))
        })?;

        body.pointer("/files/0/urls/original")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                FetchError::Resource(
                    "upload sink response missing files[0].urls.original".to_string(),
                )
            })
    }
}

pub(crate) fn synthesize_filename(mime_type: &str, source_url: &str) -> String {
    let ext = extension_for(mime_type, source_url);
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("crawl_{}_{}.{}", Utc::now().timestamp_millis(), suffix, ext)
}

fn extension_for(mime_type: &str, source_url: &str) -> String {
    match mime_type {
        "image/png" => return "png".to_string(),
        "image/jpeg" => return "jpg".to_string(),
        "image/gif" => return "gif".to_string(),
        "image/webp" => return "webp".to_string(),
        "image/svg+xml" => return "svg".to_string(),
        "application/pdf" => return "pdf".to_string(),
        _ => {}
    }

    source_url
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.split(['?', '#']).next().unwrap_or(ext).to_string())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_compile_or_reject() {
        assert!(compile_patterns(&["/api/data$".to_string()]).is_ok());
        assert!(matches!(
            compile_patterns(&["(unclosed".to_string()]),
            Err(FetchError::BadRequest(_))
        ));
    }

    #[test]
    fn body_decoding_prefers_json() {
        let json = decode_body(r#"{"status":"captured"}"#, false).unwrap();
        assert_eq!(json["status"], "captured");

        let text = decode_body("plain text", false).unwrap();
        assert_eq!(text, serde_json::Value::String("plain text".to_string()));

        // Invalid base64 stores nothing.
        assert!(decode_body("!!!", true).is_none());
    }

    #[test]
    fn base64_bodies_are_decoded_before_parsing() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(r#"{"ok":true}"#);
        let json = decode_body(&encoded, true).unwrap();
        assert_eq!(json["ok"], true);
    }

    #[test]
    fn unseen_request_ids_default_to_get() {
        let buffer = CaptureBuffer::new(vec![Regex::new("/api/").unwrap()]);
        assert!(buffer.note_response("9.9", "https://site/api/feed", 200));
        let entry = buffer.drain().into_iter().next().unwrap();
        let call = buffer.api_call(entry, None);
        assert_eq!(call.method, "GET");
        assert!(call.response_body.is_none());
    }

    #[test]
    fn filenames_carry_mime_extension() {
        let name = synthesize_filename("image/png", "https://site/img/logo");
        assert!(name.starts_with("crawl_"));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn filenames_fall_back_to_url_extension() {
        let name = synthesize_filename("application/octet-stream", "https://site/a/photo.jpeg?v=2");
        assert!(name.ends_with(".jpeg"));

        let name = synthesize_filename("application/octet-stream", "https://site/a/blob");
        assert!(name.ends_with(".bin"));
    }
}
