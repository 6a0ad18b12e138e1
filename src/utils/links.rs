//! URL helpers for links scraped from the source site.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Resolve a possibly relative href against a base URL.
///
/// Returns `None` for empty, fragment-only or `javascript:` hrefs.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    if let Ok(absolute) = Url::parse(href) {
        return Some(absolute.to_string());
    }
    Url::parse(base).ok()?.join(href).ok().map(|u| u.to_string())
}

static FILEPAGE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/filepage/(\d+)").unwrap());

/// Extract the numeric id from a `/filepage/{id}` URL.
pub fn extract_filepage_id(url: &str) -> Option<String> {
    FILEPAGE_ID.captures(url).map(|c| c[1].to_string())
}
