//! Named header bundles merged under caller-supplied headers.

/// Modern Chrome desktop User-Agent used by the stealth engine and the
/// `chrome` preset.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Resolve a named preset to its header bundle. Unknown names resolve to
/// nothing rather than failing the request.
pub fn preset_headers(name: &str) -> Option<&'static [(&'static str, &'static str)]> {
    match name.trim().to_ascii_lowercase().as_str() {
        "chrome" => Some(CHROME_PRESET),
        _ => None,
    }
}

const CHROME_PRESET: &[(&str, &str)] = &[
    ("User-Agent", CHROME_USER_AGENT),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Accept-Encoding", "gzip, deflate, br"),
    (
        "Sec-Ch-Ua",
        r#""Chromium";v="131", "Not_A Brand";v="24", "Google Chrome";v="131""#,
    ),
    ("Sec-Ch-Ua-Mobile", "?0"),
    ("Sec-Ch-Ua-Platform", "\"Windows\""),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Upgrade-Insecure-Requests", "1"),
    ("DNT", "1"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_preset_resolves_case_insensitively() {
        assert!(preset_headers("chrome").is_some());
        assert!(preset_headers("Chrome").is_some());
        assert!(preset_headers("netscape").is_none());
    }

    #[test]
    fn chrome_preset_carries_a_user_agent() {
        let headers = preset_headers("chrome").unwrap();
        assert!(headers
            .iter()
            .any(|(k, v)| *k == "User-Agent" && v.contains("Chrome")));
    }
}
