//! Output shaping: the engines hand back raw HTML; callers may ask for a
//! script-stripped variant or a Markdown rendition on top.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{FetchResult, OutputFormat, ResponseType};

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("valid regex"));
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>").expect("valid regex"));
static NOSCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<noscript\b[^>]*>.*?</noscript>").expect("valid regex"));
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// HTML minus scripts, styles, noscript fallbacks, and comments.
pub fn strip_html(html: &str) -> String {
    let out = SCRIPT_RE.replace_all(html, "");
    let out = STYLE_RE.replace_all(&out, "");
    let out = NOSCRIPT_RE.replace_all(&out, "");
    let out = COMMENT_RE.replace_all(&out, "");
    BLANK_LINES_RE.replace_all(&out, "\n\n").trim().to_string()
}

pub fn to_markdown(html: &str) -> String {
    html2md::parse_html(html)
}

/// Apply the requested output format in place. Base64 payloads are returned
/// untouched — there is no HTML to shape.
pub fn apply_format(result: &mut FetchResult, format: OutputFormat) {
    if result.response_type == ResponseType::Base64 {
        return;
    }

    match format {
        OutputFormat::Html => {}
        OutputFormat::HtmlStripped => {
            result.content = strip_html(&result.content);
        }
        OutputFormat::Markdown => {
            result.markdown = Some(to_markdown(&result.content));
        }
    }
}
