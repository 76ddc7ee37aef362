use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which fetch strategy the caller wants. `Auto` walks the escalation ladder
/// (or reuses a cached domain profile); the others force a single engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    #[default]
    Auto,
    Fast,
    Browser,
    Stealth,
}

/// Concrete engine identity as persisted in domain profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Fast,
    Browser,
    Stealth,
    Unblock,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Fast => "fast",
            EngineKind::Browser => "browser",
            EngineKind::Stealth => "stealth",
            EngineKind::Unblock => "unblock",
        }
    }

    pub fn parse_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(EngineKind::Fast),
            "browser" => Some(EngineKind::Browser),
            "stealth" => Some(EngineKind::Stealth),
            "unblock" => Some(EngineKind::Unblock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Text,
    Base64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "html")]
    Html,
    #[serde(rename = "html-stripped")]
    HtmlStripped,
    #[serde(rename = "markdown")]
    Markdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub engine: EngineChoice,
    #[serde(default)]
    pub render_js: bool,
    #[serde(default)]
    pub wait_for_js: bool,
    #[serde(default)]
    pub render_delay_ms: u64,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub response_type: ResponseType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
    pub status_code: u16,
    /// Final HTML, or the base64-encoded body when `responseType = base64`.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    pub headers: HashMap<String, String>,
    /// Final URL after redirects.
    pub url: String,
    pub engine_used: String,
    pub response_type: ResponseType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    pub base_url: String,
    pub api_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedFetchRequest {
    #[serde(flatten)]
    pub fetch: FetchRequest,
    /// Script evaluated in the page after the main navigation.
    #[serde(default)]
    pub js_action: Option<String>,
    /// Regex patterns matched against captured network response URLs.
    #[serde(default)]
    pub api_patterns: Vec<String>,
    #[serde(default)]
    pub images_to_download: Vec<String>,
    #[serde(default)]
    pub upload_config: Option<UploadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCall {
    pub url: String,
    pub method: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResult {
    pub original_url: String,
    pub status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedFetchResult {
    #[serde(flatten)]
    pub fetch: FetchResult,
    /// Always present, in capture order. Empty when nothing matched.
    pub api_calls: Vec<ApiCall>,
    /// Always present; per-item failures are recorded in place.
    pub resources: Vec<ResourceResult>,
}

/// Persisted per-domain fetch profile: the escalation step that worked last.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainProfile {
    pub domain: String,
    pub engine: EngineKind,
    pub render_js: bool,
    pub render_delay_ms: u64,
    pub use_proxy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    pub hit_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_code: Option<u16>,
    pub created_at: String,
    pub updated_at: String,
}

/// One rung of the escalation ladder, derived from live config on each miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationStep {
    pub engine: EngineKind,
    pub render_js: bool,
    pub render_delay_ms: u64,
    pub use_proxy: bool,
    pub label: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_request_defaults() {
        let req: FetchRequest =
            serde_json::from_str(r#"{"url":"https://example.com"}"#).unwrap();
        assert_eq!(req.engine, EngineChoice::Auto);
        assert_eq!(req.format, OutputFormat::Html);
        assert_eq!(req.response_type, ResponseType::Text);
        assert_eq!(req.render_delay_ms, 0);
        assert!(req.headers.is_empty());
    }

    #[test]
    fn format_accepts_hyphenated_variant() {
        let req: FetchRequest = serde_json::from_str(
            r#"{"url":"https://example.com","format":"html-stripped"}"#,
        )
        .unwrap();
        assert_eq!(req.format, OutputFormat::HtmlStripped);
    }

    #[test]
    fn advanced_request_flattens_fetch_fields() {
        let req: AdvancedFetchRequest = serde_json::from_str(
            r#"{"url":"https://example.com","apiPatterns":["/api/data$"],"jsAction":"window.scrollTo(0, 999)"}"#,
        )
        .unwrap();
        assert_eq!(req.fetch.url, "https://example.com");
        assert_eq!(req.api_patterns.len(), 1);
        assert!(req.upload_config.is_none());
    }

    #[test]
    fn engine_kind_round_trips() {
        for kind in [
            EngineKind::Fast,
            EngineKind::Browser,
            EngineKind::Stealth,
            EngineKind::Unblock,
        ] {
            assert_eq!(EngineKind::parse_str(kind.as_str()), Some(kind));
        }
        assert_eq!(EngineKind::parse_str("warp-drive"), None);
    }
}
