//! Locates rulebook-like documents for a catalog item.
//!
//! The structured files index is tried first. When it answers with anything
//! but success, the item's HTML files page is scraped instead, with a plain
//! `.pdf` link scan as the last resort. Every reference leaving the locator
//! has passed the rulebook classifier and the language filter.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::{CandidateId, DocumentReference, FileType};
use crate::scrapers::WebClient;
use crate::utils::{extract_filepage_id, resolve_url};

/// Title/filename keywords that mark a rulebook, in several languages.
const RULEBOOK_KEYWORDS: &[&str] = &[
    "rule",
    "rulebook",
    "manual",
    "instruction",
    "how to play",
    "gameplay",
    "regeln",
    "règles",
    "reglas",
    "regole",
    "règlement",
    "spelregels",
    "luật",
    "hướng dẫn",
    "quick start",
    "reference",
    "guide",
];

/// Index category ids used for rules and instructions.
const RULES_CATEGORIES: &[&str] = &["1", "2"];

const ALLOWED_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx"];

static HOW_TO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(rule|instruction|manual|guide|how.?to)").unwrap());

static FILEPAGE_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='/filepage/']").unwrap());
static PDF_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='.pdf']").unwrap());

/// Language names and the substrings that identify them, checked in order.
const LANGUAGES: &[(&str, &[&str])] = &[
    ("English", &["english", " en ", "(en)", "_en_", "-en-", "_en."]),
    ("German", &["german", "deutsch", " de ", "(de)", "_de_", "-de-", "_de."]),
    (
        "French",
        &["french", "français", "francais", " fr ", "(fr)", "_fr_", "-fr-", "_fr."],
    ),
    (
        "Spanish",
        &["spanish", "español", "espanol", " es ", "(es)", "_es_", "-es-", "_es."],
    ),
    ("Italian", &["italian", "italiano", " it ", "(it)", "_it_", "-it-", "_it."]),
    ("Dutch", &["dutch", "nederlands", " nl ", "(nl)", "_nl_", "-nl-", "_nl."]),
    ("Polish", &["polish", "polski", " pl ", "(pl)", "_pl_", "-pl-", "_pl."]),
    (
        "Portuguese",
        &["portuguese", "português", "portugues", " pt ", "(pt)", "_pt_", "-pt-", "_pt."],
    ),
    ("Japanese", &["japanese", "日本語", " jp ", "(jp)", "_jp_", "-jp-", "_jp."]),
    ("Chinese", &["chinese", "中文", " zh ", "(zh)", "_zh_", "-zh-", "_zh."]),
    ("Korean", &["korean", "한국어", " ko ", "(ko)", "_ko_", "-ko-", "_ko."]),
    (
        "Vietnamese",
        &["vietnamese", "tiếng việt", "viet", " vi ", "(vi)", "_vi_", "-vi-", "_vi."],
    ),
    ("Russian", &["russian", "русский", " ru ", "(ru)", "_ru_", "-ru-", "_ru."]),
    ("Czech", &["czech", "čeština", " cz ", "(cz)", "_cz_", "-cz-", "_cz."]),
    ("Hungarian", &["hungarian", "magyar", " hu ", "(hu)", "_hu_", "-hu-", "_hu."]),
];

/// Infer a language from free text (title, filename or link text).
pub fn detect_language(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    LANGUAGES
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| lower.contains(m)))
        .map(|(name, _)| *name)
}

/// Whether an entry passes the target-language filter.
///
/// An asserted language must match. Without one, the inferred language must
/// match or be undetermined.
pub fn language_allowed(asserted: Option<&str>, inferred: Option<&str>, target: &str) -> bool {
    match asserted.map(str::trim).filter(|l| !l.is_empty()) {
        Some(language) => language.eq_ignore_ascii_case(target),
        None => inferred.map_or(true, |l| l.eq_ignore_ascii_case(target)),
    }
}

/// Rulebook classifier.
///
/// `text` is a title or link text, `name` a filename or href.
pub fn is_target_document(text: &str, name: &str, category: Option<&str>) -> bool {
    let text = text.to_lowercase();
    let name = name.to_lowercase();

    if RULEBOOK_KEYWORDS
        .iter()
        .any(|k| text.contains(k) || name.contains(k))
    {
        return true;
    }

    if category.is_some_and(|c| RULES_CATEGORIES.contains(&c.trim())) {
        return true;
    }

    let path = name.split(['?', '#']).next().unwrap_or_default();
    ALLOWED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        && (HOW_TO.is_match(&name) || HOW_TO.is_match(&text))
}

/// File type from a filename or URL extension.
pub fn file_type_from_name(name: &str) -> FileType {
    let path = name.split(['?', '#']).next().unwrap_or_default();
    match path.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('/') => FileType::from_extension(ext),
        _ => FileType::Unknown,
    }
}

/// String field that may arrive as a JSON string or number.
fn field(entry: &Value, key: &str) -> String {
    match entry.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Parse the structured files index into filtered references.
pub fn parse_files_index(
    json: &str,
    item_id: CandidateId,
    site_url: &str,
    target_language: &str,
) -> Vec<DocumentReference> {
    let root: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            warn!("Files index for {} is not valid JSON: {}", item_id, e);
            return Vec::new();
        }
    };
    let Some(files) = root.get("files").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in files {
        let title = field(entry, "title");
        let filename = field(entry, "filename");
        let href = field(entry, "href");
        let file_id = field(entry, "fileid");
        let filepage_id = field(entry, "filepageid");
        let category = field(entry, "categoryid");
        let asserted = non_empty(field(entry, "language"));

        let inferred = detect_language(&format!("{} {}", title, filename));
        if !language_allowed(asserted.as_deref(), inferred, target_language) {
            debug!("Skipping '{}': language {:?}", title, asserted.as_deref().or(inferred));
            continue;
        }
        if !is_target_document(&title, &filename, Some(&category)) {
            continue;
        }

        let url = if !href.is_empty() {
            format!("{}{}", site_url, href)
        } else if !filepage_id.is_empty() {
            format!("{}/filepage/{}", site_url, filepage_id)
        } else {
            continue;
        };

        let display = if title.is_empty() { &filename } else { &title };
        let mut reference = DocumentReference::new(item_id, url, display.as_str())
            .with_file_type(file_type_from_name(&filename));
        if let Some(id) = non_empty(file_id).or_else(|| non_empty(filepage_id)) {
            reference = reference.with_file_id(id);
        }
        if let Some(language) = asserted.or_else(|| inferred.map(str::to_string)) {
            reference = reference.with_language(language);
        }
        out.push(reference);
    }
    out
}

fn link_text(element: scraper::ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scrape an item's HTML files page.
///
/// `/filepage/` links are preferred; bare `.pdf` links are only used when
/// none of those qualified.
pub fn parse_files_page(
    html: &str,
    item_id: CandidateId,
    site_url: &str,
    target_language: &str,
) -> Vec<DocumentReference> {
    let document = Html::parse_document(html);
    let mut out = Vec::new();

    for link in document.select(&FILEPAGE_LINK) {
        let href = link.value().attr("href").unwrap_or_default();
        let text = link_text(link);
        if !is_target_document(&text, href, None) {
            continue;
        }
        let Some(file_id) = extract_filepage_id(href) else {
            continue;
        };
        let language = detect_language(&text);
        if !language_allowed(None, language, target_language) {
            continue;
        }

        let mut reference =
            DocumentReference::new(item_id, format!("{}/filepage/{}", site_url, file_id), text);
        if let Some(language) = language {
            reference = reference.with_language(language);
        }
        out.push(reference);
    }

    if !out.is_empty() {
        return out;
    }

    for link in document.select(&PDF_LINK) {
        let href = link.value().attr("href").unwrap_or_default();
        let text = link_text(link);
        if !is_target_document(&text, href, None) {
            continue;
        }
        let language = detect_language(&format!("{} {}", text, href));
        if !language_allowed(None, language, target_language) {
            continue;
        }
        let Some(url) = resolve_url(site_url, href) else {
            continue;
        };

        let title = if text.is_empty() {
            href.rsplit('/').next().unwrap_or(href).to_string()
        } else {
            text
        };
        let mut reference =
            DocumentReference::new(item_id, url, title).with_file_type(file_type_from_name(href));
        if let Some(language) = language {
            reference = reference.with_language(language);
        }
        out.push(reference);
    }
    out
}

/// Finds document references for one item at a time.
pub struct DocumentLocator {
    client: Arc<dyn WebClient>,
    site_url: String,
    files_api_url: String,
    language: String,
}

impl DocumentLocator {
    pub fn new(
        client: Arc<dyn WebClient>,
        site_url: &str,
        files_api_url: &str,
        language: &str,
    ) -> Self {
        Self {
            client,
            site_url: site_url.trim_end_matches('/').to_string(),
            files_api_url: files_api_url.to_string(),
            language: language.to_string(),
        }
    }

    fn files_index_url(&self, item_id: CandidateId) -> String {
        format!(
            "{}?objectid={}&objecttype=thing&nosession=1&showcount=50&pageid=1&sort=hot",
            self.files_api_url, item_id
        )
    }

    /// Locate target-language rulebooks for an item, deduplicated by URL.
    pub async fn locate(&self, item_id: CandidateId) -> Vec<DocumentReference> {
        let found = match self.client.get(&self.files_index_url(item_id)).await {
            Ok(response) if response.is_success() => {
                parse_files_index(&response.text(), item_id, &self.site_url, &self.language)
            }
            Ok(response) => {
                debug!(
                    "Files index returned {} for {}, scraping files page",
                    response.status, item_id
                );
                self.scrape_files_page(item_id).await
            }
            Err(e) => {
                debug!("Files index failed for {} ({}), scraping files page", item_id, e);
                self.scrape_files_page(item_id).await
            }
        };

        let mut seen = HashSet::new();
        let references: Vec<DocumentReference> = found
            .into_iter()
            .filter(|r| seen.insert(r.source_url.clone()))
            .collect();

        info!("Found {} document(s) for item {}", references.len(), item_id);
        references
    }

    async fn scrape_files_page(&self, item_id: CandidateId) -> Vec<DocumentReference> {
        let url = format!("{}/boardgame/{}/files", self.site_url, item_id);
        match self.client.get(&url).await {
            Ok(response) if response.is_success() => {
                parse_files_page(&response.text(), item_id, &self.site_url, &self.language)
            }
            Ok(response) => {
                warn!("Files page for {} returned {}", item_id, response.status);
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to fetch files page for {}: {}", item_id, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeClient;

    const SITE: &str = "https://bgg.test";
    const FILES_API: &str = "https://api.bgg.test/api/files";

    fn locator(client: Arc<FakeClient>) -> DocumentLocator {
        DocumentLocator::new(client, SITE, FILES_API, "English")
    }

    fn index_url(id: u64) -> String {
        format!(
            "{}?objectid={}&objecttype=thing&nosession=1&showcount=50&pageid=1&sort=hot",
            FILES_API, id
        )
    }

    #[test]
    fn detects_languages_in_table_order() {
        assert_eq!(detect_language("Catan_rules_fr_v2.pdf"), Some("French"));
        assert_eq!(detect_language("Spielregeln Deutsch"), Some("German"));
        assert_eq!(detect_language("Rulebook (EN)"), Some("English"));
        assert_eq!(detect_language("Luật chơi tiếng Việt"), Some("Vietnamese"));
        assert_eq!(detect_language("Rulebook"), None);
    }

    #[test]
    fn language_filter() {
        assert!(!language_allowed(Some("French"), None, "English"));
        assert!(!language_allowed(None, Some("French"), "English"));
        assert!(language_allowed(None, None, "English"));
        assert!(language_allowed(Some("english"), Some("German"), "English"));
        assert!(language_allowed(Some(" "), Some("English"), "English"));
    }

    #[test]
    fn classifies_rulebooks() {
        assert!(is_target_document("Official Rulebook", "catan.pdf", None));
        assert!(is_target_document("Règles du jeu", "", None));
        assert!(is_target_document("Player aid", "aid.pdf", Some("2")));
        assert!(is_target_document("Scan", "/files/how-to-win.pdf", None));
        assert!(!is_target_document("Box art", "box.jpg", Some("5")));
        assert!(!is_target_document("Scoring pad", "pad.pdf", None));
    }

    #[test]
    fn file_types() {
        assert_eq!(file_type_from_name("rules.PDF"), FileType::Pdf);
        assert_eq!(file_type_from_name("rules.docx?dl=1"), FileType::Docx);
        assert_eq!(file_type_from_name("/filepage/12/rules"), FileType::Unknown);
    }

    #[test]
    fn parses_index_entries() {
        let json = r#"{"files": [
            {"title": "Rules", "filename": "catan_rules.pdf", "href": "/filepage/100/catan-rules",
             "fileid": 555, "filepageid": "100", "categoryid": "1", "language": "English"},
            {"title": "Règles", "filename": "regles_fr_.pdf", "href": "/filepage/101/regles",
             "fileid": "556", "categoryid": "1", "language": "French"},
            {"title": "", "filename": "Manual_fr_.pdf", "filepageid": 102, "categoryid": 1},
            {"title": "Quick reference", "filename": "ref.docx", "filepageid": 103},
            {"title": "Rule summary", "filename": "summary.pdf"},
            {"title": "Box scan", "filename": "box.jpg", "href": "/filepage/104/box", "categoryid": "7"}
        ]}"#;
        let refs = parse_files_index(json, 13, SITE, "English");
        assert_eq!(refs.len(), 2);

        assert_eq!(refs[0].source_url, "https://bgg.test/filepage/100/catan-rules");
        assert_eq!(refs[0].file_id_hint.as_deref(), Some("555"));
        assert_eq!(refs[0].language.as_deref(), Some("English"));
        assert_eq!(refs[0].file_type, FileType::Pdf);

        assert_eq!(refs[1].source_url, "https://bgg.test/filepage/103");
        assert_eq!(refs[1].title, "Quick reference");
        assert_eq!(refs[1].file_id_hint.as_deref(), Some("103"));
        assert_eq!(refs[1].file_type, FileType::Docx);
        assert_eq!(refs[1].language, None);
    }

    #[test]
    fn index_without_files_array_is_empty() {
        assert!(parse_files_index(r#"{"error": "nope"}"#, 1, SITE, "English").is_empty());
        assert!(parse_files_index("<html>", 1, SITE, "English").is_empty());
    }

    #[tokio::test]
    async fn locate_uses_index_and_dedups() {
        let client = Arc::new(FakeClient::new());
        client.route_html(
            &index_url(13),
            r#"{"files": [
                {"title": "Rules", "filename": "a.pdf", "href": "/filepage/1/a", "categoryid": "1"},
                {"title": "Rules (reupload)", "filename": "a.pdf", "href": "/filepage/1/a", "categoryid": "1"}
            ]}"#,
        );
        let refs = locator(client.clone()).locate(13).await;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].item_id, 13);
        assert_eq!(client.request_count(&format!("{}/boardgame/13/files", SITE)), 0);
    }

    #[tokio::test]
    async fn falls_back_to_files_page() {
        let client = Arc::new(FakeClient::new());
        client.route_status(&index_url(13), 403, "forbidden");
        client.route_html(
            &format!("{}/boardgame/13/files", SITE),
            r#"<html><body>
                <a href="/filepage/200/catan-rules">Catan Rules &amp; Setup</a>
                <a href="/filepage/201/regles">Règles (FR)</a>
                <a href="/filepage/202/scoring">Score sheet</a>
                <a href="https://cdn.bgg.test/rules.pdf">Rules PDF</a>
            </body></html>"#,
        );

        let refs = locator(client).locate(13).await;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].source_url, "https://bgg.test/filepage/200");
        assert_eq!(refs[0].title, "Catan Rules & Setup");
    }

    #[tokio::test]
    async fn pdf_links_only_when_no_filepage_links() {
        let client = Arc::new(FakeClient::new());
        client.route_status(&index_url(7), 500, "");
        client.route_html(
            &format!("{}/boardgame/7/files", SITE),
            r#"<a href="/files/7/rules_en_.pdf">Rules</a>
               <a href="/files/7/regeln_de_.pdf">Regeln</a>"#,
        );

        let refs = locator(client).locate(7).await;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].source_url, "https://bgg.test/files/7/rules_en_.pdf");
        assert_eq!(refs[0].language.as_deref(), Some("English"));
    }
}
