//! Content quality judge: decides whether an engine's response is a real
//! page or a shell/block that warrants escalating to a heavier engine.

use std::sync::LazyLock;

use regex::Regex;

/// Statuses that indicate an anti-bot wall rather than a real answer.
const BLOCK_STATUSES: &[u16] = &[403, 429, 503];

/// Root containers that empty SPA shells ship before hydration.
const SPA_SHELL_MARKERS: &[&str] = &[
    r#"<div id="root"></div>"#,
    r#"<div id="app"></div>"#,
    r#"<div id="__next"></div>"#,
    r#"<div id="__nuxt"></div>"#,
];

static BODY_NOSCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<body[^>]*>\s*<noscript").expect("valid regex"));

static TEXT_ELEMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:p|h[1-6]|li|td|span|a|div)[^>]*>[^<]{10,}").expect("valid regex")
});

static STRUCTURAL_ELEMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:table|ul|ol|article|section|main|header)[\s>]").expect("valid regex")
});

/// Pure predicate applied after every engine attempt during escalation.
///
/// Ordered rules: block statuses and tiny bodies fail outright; an
/// unhydrated SPA shell fails unless it already carries enough markup;
/// everything else passes once it shows real text or structure.
pub fn sufficient(content: &str, status_code: u16) -> bool {
    if BLOCK_STATUSES.contains(&status_code) {
        return false;
    }

    if content.len() < 500 {
        return false;
    }

    if looks_like_spa_shell(content) && content.len() < 2000 {
        return false;
    }

    let text_elements = TEXT_ELEMENT_RE.find_iter(content).take(3).count();
    if text_elements >= 3 && content.len() >= 1000 {
        return true;
    }

    if content.len() > 5000 {
        return true;
    }

    if STRUCTURAL_ELEMENT_RE.is_match(content) {
        return true;
    }

    // Passed the shell check; nothing left to hold against it.
    true
}

fn looks_like_spa_shell(content: &str) -> bool {
    SPA_SHELL_MARKERS.iter().any(|m| content.contains(m))
        || BODY_NOSCRIPT_RE.is_match(content)
}
