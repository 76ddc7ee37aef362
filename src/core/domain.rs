use url::Url;

use crate::core::error::FetchError;

/// Canonical profile key for a URL: lowercased hostname with a single
/// leading `www.` stripped. Subdomains are kept distinct on purpose —
/// anti-bot protections often differ between `api.example.com` and
/// `example.com`.
pub fn extract_domain(raw: &str) -> Result<String, FetchError> {
    let parsed = Url::parse(raw)
        .map_err(|e| FetchError::bad_request(format!("invalid URL '{raw}': {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(FetchError::bad_request(format!(
                "unsupported URL scheme '{other}' (expected http or https)"
            )))
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| FetchError::bad_request(format!("URL '{raw}' has no host")))?
        .to_ascii_lowercase();

    Ok(host.strip_prefix("www.").unwrap_or(&host).to_string())
}
