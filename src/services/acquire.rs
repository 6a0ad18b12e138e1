//! Document acquisition: an ordered chain of download strategies.
//!
//! Each strategy turns a [`DocumentReference`] into bytes or gives up. The
//! engine walks the chain until one produces a plausible payload. Hrefs any
//! strategy discovers along the way are shared with the later ones through
//! [`AttemptContext`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AcquisitionConfig, SourceConfig};
use crate::models::{AcquiredDocument, DocumentReference, FileType, StrategyKind};
use crate::scrapers::{BrowserSession, WebClient, WebResponse};
use crate::utils::{extract_filepage_id, resolve_url};

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("all strategies failed for {url} ({} tried)", .attempted.len())]
    Exhausted {
        url: String,
        attempted: Vec<StrategyKind>,
    },

    #[error("acquisition cancelled")]
    Cancelled,
}

/// Direct-download URL templates, tried in order with a file id.
const DIRECT_TEMPLATES: &[&str] = &[
    "/file/download/{id}",
    "/filepage/download/{id}",
    "/file/download_redirect/{id}",
];

/// Embedded document hrefs, most specific first.
static EMBEDDED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)href=["'](https?://cf\.geekdo-files\.com/[^"']+\.pdf)["']"#,
        r#"(?i)href=["'](https?://cf\.geekdo-images\.com/[^"']+\.pdf)["']"#,
        r#"(?i)href=["'](https?://[^"']+geekdo[^"']+\.pdf)["']"#,
        r#"(?i)href=["'](/file/download_redirect/[^"']+)["']"#,
        r#"(?i)href=["'](/file/download/[^"']+)["']"#,
        r#"(?i)href=["'](/filepage/download/[^"']+)["']"#,
        r#"(?i)href=["'](/filepage/download_redirect/[^"']+)["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Tuning for an acquisition run.
#[derive(Debug, Clone)]
pub struct AcquisitionOptions {
    pub site_url: String,
    /// Smallest payload accepted as a real document.
    pub min_bytes: usize,
    pub capture_timeout: Duration,
    /// Where total-failure screenshots go.
    pub diagnostics_dir: Option<PathBuf>,
}

impl AcquisitionOptions {
    pub fn from_config(
        source: &SourceConfig,
        acquisition: &AcquisitionConfig,
        diagnostics_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            site_url: source.site_url.trim_end_matches('/').to_string(),
            min_bytes: acquisition.min_bytes,
            capture_timeout: Duration::from_secs(acquisition.capture_timeout_secs),
            diagnostics_dir,
        }
    }
}

/// Whether the bytes look like a real document of the expected type.
pub fn is_plausible(bytes: &[u8], file_type: FileType, min_bytes: usize) -> bool {
    if bytes.is_empty() || bytes.len() < min_bytes || looks_like_html(bytes) {
        return false;
    }
    match file_type {
        FileType::Pdf => infer::get(bytes).is_some_and(|t| t.mime_type() == "application/pdf"),
        _ => true,
    }
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
    let head = head.trim_start();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<body")
}

/// Whether a response carries the expected document type, by header or by
/// sniffing the body.
fn response_matches(response: &WebResponse, file_type: FileType) -> bool {
    if !response.is_success() {
        return false;
    }
    if response
        .content_type()
        .is_some_and(|ct| file_type.matches_content_type(ct))
    {
        return true;
    }
    infer::get(&response.body).is_some_and(|t| file_type.matches_content_type(t.mime_type()))
}

/// Direct document hrefs embedded in a landing page, most specific first,
/// resolved against `site_url`.
pub fn find_embedded_links(html: &str, site_url: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |href: &str| {
        let href = href.replace("&amp;", "&");
        if let Some(url) = resolve_url(site_url, &href) {
            if !found.contains(&url) {
                found.push(url);
            }
        }
    };

    for pattern in EMBEDDED_PATTERNS.iter() {
        for captures in pattern.captures_iter(html) {
            push(&captures[1]);
        }
    }

    let document = Html::parse_document(html);
    for anchor in document.select(&ANCHOR) {
        let text = anchor.text().collect::<String>().to_lowercase();
        if text.contains("download") {
            if let Some(href) = anchor.value().attr("href") {
                push(href);
            }
        }
    }
    found
}

/// Shared state for one acquisition attempt.
pub struct AttemptContext<'a> {
    pub client: &'a dyn WebClient,
    pub browser: &'a mut dyn BrowserSession,
    pub options: &'a AcquisitionOptions,
    /// Download hrefs seen by earlier strategies, in discovery order.
    pub discovered_hrefs: Vec<String>,
}

impl AttemptContext<'_> {
    pub fn record_href(&mut self, href: String) {
        if !self.discovered_hrefs.contains(&href) {
            self.discovered_hrefs.push(href);
        }
    }

    pub fn plausible(&self, bytes: &[u8], file_type: FileType) -> bool {
        is_plausible(bytes, file_type, self.options.min_bytes)
    }
}

/// One way of turning a reference into bytes.
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn attempt(
        &self,
        reference: &DocumentReference,
        ctx: &mut AttemptContext<'_>,
    ) -> Option<Vec<u8>>;
}

/// Open the landing page in the browser, click download and intercept the
/// matching response in any tab.
pub struct BrowserCaptureStrategy;

#[async_trait]
impl AcquisitionStrategy for BrowserCaptureStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BrowserCapture
    }

    async fn attempt(
        &self,
        reference: &DocumentReference,
        ctx: &mut AttemptContext<'_>,
    ) -> Option<Vec<u8>> {
        let timeout = ctx.options.capture_timeout;
        match ctx
            .browser
            .capture_download(&reference.source_url, reference.file_type, timeout)
            .await
        {
            Ok(capture) => {
                for href in capture.discovered_hrefs {
                    ctx.record_href(href);
                }
                capture.payload
            }
            Err(e) => {
                debug!("Browser capture failed for {}: {:#}", reference.source_url, e);
                None
            }
        }
    }
}

/// Try the known direct-download URL templates with the file id.
pub struct PatternGuessStrategy;

#[async_trait]
impl AcquisitionStrategy for PatternGuessStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PatternGuess
    }

    async fn attempt(
        &self,
        reference: &DocumentReference,
        ctx: &mut AttemptContext<'_>,
    ) -> Option<Vec<u8>> {
        let id = reference
            .file_id_hint
            .clone()
            .or_else(|| extract_filepage_id(&reference.source_url))?;

        for template in DIRECT_TEMPLATES {
            let url = format!("{}{}", ctx.options.site_url, template.replace("{id}", &id));
            debug!("Trying direct download: {}", url);
            match ctx.client.get(&url).await {
                Ok(response) if response_matches(&response, reference.file_type) => {
                    if ctx.plausible(&response.body, reference.file_type) {
                        info!("Direct download success: {}", url);
                        return Some(response.body);
                    }
                }
                Ok(response) => debug!("Direct download {} -> {}", url, response.status),
                Err(e) => debug!("Direct download {} failed: {}", url, e),
            }
        }
        None
    }
}

/// Fetch the landing page over plain HTTP and follow an embedded href.
pub struct EmbeddedLinkStrategy;

#[async_trait]
impl AcquisitionStrategy for EmbeddedLinkStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::EmbeddedLink
    }

    async fn attempt(
        &self,
        reference: &DocumentReference,
        ctx: &mut AttemptContext<'_>,
    ) -> Option<Vec<u8>> {
        let landing = match ctx.client.get(&reference.source_url).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                debug!("Landing page {} -> {}", reference.source_url, response.status);
                return None;
            }
            Err(e) => {
                debug!("Landing page {} failed: {}", reference.source_url, e);
                return None;
            }
        };

        if response_matches(&landing, reference.file_type) {
            return Some(landing.body);
        }

        let links = find_embedded_links(&landing.text(), &ctx.options.site_url);
        if links.is_empty() {
            debug!("No embedded document link on {}", reference.source_url);
            return None;
        }
        for link in &links {
            ctx.record_href(link.clone());
        }

        for link in links {
            match ctx.client.get(&link).await {
                Ok(response) if response_matches(&response, reference.file_type) => {
                    if ctx.plausible(&response.body, reference.file_type) {
                        info!("Found document via embedded link: {}", link);
                        return Some(response.body);
                    }
                }
                Ok(response) => debug!("Embedded link {} -> {}", link, response.status),
                Err(e) => debug!("Embedded link {} failed: {}", link, e),
            }
        }
        None
    }
}

/// Replay discovered hrefs from inside the browser session.
pub struct AuthenticatedReplayStrategy;

#[async_trait]
impl AcquisitionStrategy for AuthenticatedReplayStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AuthenticatedReplay
    }

    async fn attempt(
        &self,
        reference: &DocumentReference,
        ctx: &mut AttemptContext<'_>,
    ) -> Option<Vec<u8>> {
        for href in ctx.discovered_hrefs.clone() {
            match ctx.browser.replay_request(&href).await {
                Ok(response)
                    if response.is_success()
                        && ctx.plausible(&response.data, reference.file_type) =>
                {
                    info!("Replayed {} in browser session", href);
                    return Some(response.data);
                }
                Ok(response) => debug!("Replay {} -> {}", href, response.status),
                Err(e) => debug!("Replay {} failed: {:#}", href, e),
            }
        }
        None
    }
}

/// Navigate straight to a discovered href (or the landing page when nothing
/// was discovered) and keep the body if its type matches.
pub struct NavigationCaptureStrategy;

#[async_trait]
impl AcquisitionStrategy for NavigationCaptureStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NavigationCapture
    }

    async fn attempt(
        &self,
        reference: &DocumentReference,
        ctx: &mut AttemptContext<'_>,
    ) -> Option<Vec<u8>> {
        let targets = if ctx.discovered_hrefs.is_empty() {
            vec![reference.source_url.clone()]
        } else {
            ctx.discovered_hrefs.clone()
        };
        let timeout = ctx.options.capture_timeout;

        for url in targets {
            match ctx
                .browser
                .navigate_capture(&url, reference.file_type, timeout)
                .await
            {
                Ok(Some(bytes)) if ctx.plausible(&bytes, reference.file_type) => {
                    return Some(bytes)
                }
                Ok(_) => debug!("Navigation to {} captured nothing usable", url),
                Err(e) => debug!("Navigation to {} failed: {:#}", url, e),
            }
        }
        None
    }
}

/// The default chain, in order.
pub fn default_strategies() -> Vec<Box<dyn AcquisitionStrategy>> {
    vec![
        Box::new(BrowserCaptureStrategy),
        Box::new(PatternGuessStrategy),
        Box::new(EmbeddedLinkStrategy),
        Box::new(AuthenticatedReplayStrategy),
        Box::new(NavigationCaptureStrategy),
    ]
}

/// Runs the strategy chain for one reference at a time.
///
/// Owns the browser session, so acquisitions are serialized by `&mut self`.
pub struct AcquisitionEngine {
    client: Arc<dyn WebClient>,
    browser: Box<dyn BrowserSession>,
    strategies: Vec<Box<dyn AcquisitionStrategy>>,
    options: AcquisitionOptions,
    cancel: CancellationToken,
}

impl AcquisitionEngine {
    pub fn new(
        client: Arc<dyn WebClient>,
        browser: Box<dyn BrowserSession>,
        options: AcquisitionOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            browser,
            strategies: default_strategies(),
            options,
            cancel,
        }
    }

    /// Replace the strategy chain.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn AcquisitionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Strategy indices in the order they will run for `reference`.
    ///
    /// With a file id hint, pattern guessing moves to the front.
    fn order_for(&self, reference: &DocumentReference) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.strategies.len()).collect();
        if reference.file_id_hint.is_some() {
            if let Some(pos) = self
                .strategies
                .iter()
                .position(|s| s.kind() == StrategyKind::PatternGuess)
            {
                let guess = order.remove(pos);
                order.insert(0, guess);
            }
        }
        order
    }

    /// Strategy kinds in the order they will run for `reference`.
    pub fn strategy_order(&self, reference: &DocumentReference) -> Vec<StrategyKind> {
        self.order_for(reference)
            .into_iter()
            .map(|i| self.strategies[i].kind())
            .collect()
    }

    /// Acquire the bytes for one reference.
    pub async fn acquire(
        &mut self,
        reference: &DocumentReference,
    ) -> Result<AcquiredDocument, AcquisitionError> {
        let order = self.order_for(reference);
        let Self {
            client,
            browser,
            strategies,
            options,
            cancel,
        } = self;

        let mut ctx = AttemptContext {
            client: client.as_ref(),
            browser: browser.as_mut(),
            options,
            discovered_hrefs: Vec::new(),
        };
        let mut attempted = Vec::with_capacity(order.len());

        for index in order {
            if cancel.is_cancelled() {
                return Err(AcquisitionError::Cancelled);
            }
            let strategy = &strategies[index];
            let kind = strategy.kind();
            attempted.push(kind);
            debug!("Trying {} for {}", kind, reference.source_url);

            if let Some(bytes) = strategy.attempt(reference, &mut ctx).await {
                if ctx.plausible(&bytes, reference.file_type) {
                    info!(
                        "Acquired {} ({} bytes) via {}",
                        reference.source_url,
                        bytes.len(),
                        kind
                    );
                    return Ok(AcquiredDocument::new(bytes, kind));
                }
                debug!(
                    "{} returned an implausible payload ({} bytes)",
                    kind,
                    bytes.len()
                );
            }
        }

        warn!(
            "All acquisition strategies failed for {}",
            reference.source_url
        );
        let used_browser = attempted.iter().any(|k| {
            matches!(
                k,
                StrategyKind::BrowserCapture
                    | StrategyKind::AuthenticatedReplay
                    | StrategyKind::NavigationCapture
            )
        });
        if used_browser {
            if let Some(ref dir) = options.diagnostics_dir {
                capture_failure_screenshot(ctx.browser, dir).await;
            }
        }

        Err(AcquisitionError::Exhausted {
            url: reference.source_url.clone(),
            attempted,
        })
    }

    /// Close the browser session.
    pub async fn shutdown(&mut self) {
        self.browser.close().await;
    }
}

async fn capture_failure_screenshot(browser: &mut dyn BrowserSession, dir: &Path) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        debug!("Cannot create {}: {}", dir.display(), e);
        return;
    }
    let path = dir.join(format!(
        "acquire_failed_{}.png",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    match browser.screenshot(&path).await {
        Ok(()) => info!("Saved failure screenshot to {}", path.display()),
        Err(e) => debug!("No failure screenshot: {:#}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::{BinaryFetchResponse, BrowserCapture};
    use crate::test_support::{browser_calls, call_log, pdf_bytes, CallLog, FakeBrowser, FakeClient};
    use tempfile::tempdir;

    const SITE: &str = "https://bgg.test";

    fn options(diagnostics: Option<PathBuf>) -> AcquisitionOptions {
        AcquisitionOptions {
            site_url: SITE.to_string(),
            min_bytes: 1000,
            capture_timeout: Duration::from_millis(50),
            diagnostics_dir: diagnostics,
        }
    }

    fn engine(client: Arc<FakeClient>, browser: FakeBrowser) -> AcquisitionEngine {
        AcquisitionEngine::new(
            client,
            Box::new(browser),
            options(None),
            CancellationToken::new(),
        )
    }

    fn position(log: &CallLog, prefix: &str) -> Option<usize> {
        log.lock().unwrap().iter().position(|e| e.starts_with(prefix))
    }

    #[test]
    fn plausibility() {
        assert!(is_plausible(&pdf_bytes(2048), FileType::Pdf, 1000));
        assert!(!is_plausible(&pdf_bytes(500), FileType::Pdf, 1000));
        let mut html = b"<!DOCTYPE html><html><body>Sign in</body></html>".to_vec();
        html.resize(4096, b' ');
        assert!(!is_plausible(&html, FileType::Pdf, 1000));
        assert!(!is_plausible(&html, FileType::Unknown, 1000));
        assert!(!is_plausible(&vec![0u8; 4096], FileType::Pdf, 1000));
        assert!(is_plausible(&vec![0u8; 4096], FileType::Docx, 1000));
    }

    #[test]
    fn embedded_links_most_specific_first() {
        let html = r#"
            <a href="/file/download/77">Get it</a>
            <a href="https://cf.geekdo-files.com/abc/rules.pdf">Rules</a>
            <a href="/some/where?x=1&amp;y=2">Download now</a>
        "#;
        let links = find_embedded_links(html, SITE);
        assert_eq!(
            links,
            vec![
                "https://cf.geekdo-files.com/abc/rules.pdf",
                "https://bgg.test/file/download/77",
                "https://bgg.test/some/where?x=1&y=2",
            ]
        );
    }

    #[test]
    fn hint_promotes_pattern_guess() {
        let log = call_log();
        let engine = engine(Arc::new(FakeClient::new()), FakeBrowser::new(log));
        let plain = DocumentReference::new(1, format!("{}/filepage/5", SITE), "Rules");
        assert_eq!(
            engine.strategy_order(&plain),
            vec![
                StrategyKind::BrowserCapture,
                StrategyKind::PatternGuess,
                StrategyKind::EmbeddedLink,
                StrategyKind::AuthenticatedReplay,
                StrategyKind::NavigationCapture,
            ]
        );
        let hinted = plain.with_file_id("99");
        assert_eq!(engine.strategy_order(&hinted)[0], StrategyKind::PatternGuess);
        assert_eq!(engine.strategy_order(&hinted)[1], StrategyKind::BrowserCapture);
    }

    #[tokio::test]
    async fn hinted_reference_needs_no_browser() {
        let log = call_log();
        let client = Arc::new(FakeClient::with_log(log.clone()));
        client.route_bytes(
            &format!("{}/file/download/99", SITE),
            "application/pdf",
            pdf_bytes(4096),
        );

        let mut engine = engine(client, FakeBrowser::new(log.clone()));
        let reference =
            DocumentReference::new(1, format!("{}/filepage/12/rules", SITE), "Rules").with_file_id("99");
        let document = engine.acquire(&reference).await.unwrap();

        assert_eq!(document.strategy, StrategyKind::PatternGuess);
        assert_eq!(document.len(), 4096);
        assert_eq!(document.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(browser_calls(&log), 0);
    }

    #[tokio::test]
    async fn without_hint_browser_runs_before_pattern_guess() {
        let log = call_log();
        let client = Arc::new(FakeClient::with_log(log.clone()));
        client.route_bytes(
            &format!("{}/filepage/download/55", SITE),
            "application/pdf",
            pdf_bytes(2048),
        );

        let mut engine = engine(client, FakeBrowser::new(log.clone()));
        let reference = DocumentReference::new(1, format!("{}/filepage/55/rules", SITE), "Rules");
        let document = engine.acquire(&reference).await.unwrap();

        assert_eq!(document.strategy, StrategyKind::PatternGuess);
        let capture = position(&log, "browser capture").unwrap();
        let guess = position(&log, &format!("http {}/file/download/55", SITE)).unwrap();
        assert!(capture < guess);
    }

    #[tokio::test]
    async fn landing_page_that_is_the_document() {
        let log = call_log();
        let client = Arc::new(FakeClient::with_log(log.clone()));
        let url = "https://cdn.bgg.test/rules.pdf";
        client.route_bytes(url, "application/pdf", pdf_bytes(3000));

        let mut engine = engine(client, FakeBrowser::new(log));
        let document = engine
            .acquire(&DocumentReference::new(1, url, "Rules"))
            .await
            .unwrap();
        assert_eq!(document.strategy, StrategyKind::EmbeddedLink);
    }

    #[tokio::test]
    async fn embedded_link_is_followed() {
        let log = call_log();
        let client = Arc::new(FakeClient::with_log(log.clone()));
        let landing = format!("{}/doc/rules-page", SITE);
        client.route_html(
            &landing,
            r#"<html><body><a href="https://cf.geekdo-files.com/x/rules.pdf">Rules</a></body></html>"#,
        );
        client.route_bytes(
            "https://cf.geekdo-files.com/x/rules.pdf",
            "application/pdf",
            pdf_bytes(5000),
        );

        let mut engine = engine(client, FakeBrowser::new(log));
        let document = engine
            .acquire(&DocumentReference::new(1, landing, "Rules"))
            .await
            .unwrap();
        assert_eq!(document.strategy, StrategyKind::EmbeddedLink);
    }

    #[tokio::test]
    async fn replay_uses_hrefs_from_capture() {
        let log = call_log();
        let client = Arc::new(FakeClient::with_log(log.clone()));
        let href = format!("{}/file/download_redirect/abc", SITE);

        let mut browser = FakeBrowser::new(log.clone());
        let mut capture = BrowserCapture::default();
        capture.record_href(href.clone());
        browser.capture = Some(capture);
        browser.replay.insert(
            href.clone(),
            BinaryFetchResponse {
                url: href.clone(),
                status: 200,
                content_type: "application/pdf".to_string(),
                data: pdf_bytes(2500),
            },
        );

        let mut engine = engine(client, browser);
        let reference = DocumentReference::new(1, format!("{}/doc/landing", SITE), "Rules");
        let document = engine.acquire(&reference).await.unwrap();
        assert_eq!(document.strategy, StrategyKind::AuthenticatedReplay);
        assert!(position(&log, &format!("browser replay {}", href)).is_some());
    }

    #[tokio::test]
    async fn navigation_is_the_last_resort() {
        let log = call_log();
        let client = Arc::new(FakeClient::with_log(log.clone()));
        let landing = format!("{}/doc/landing", SITE);

        let mut browser = FakeBrowser::new(log.clone());
        browser.navigate.insert(landing.clone(), pdf_bytes(2000));

        let mut engine = engine(client, browser);
        let document = engine
            .acquire(&DocumentReference::new(1, landing, "Rules"))
            .await
            .unwrap();
        assert_eq!(document.strategy, StrategyKind::NavigationCapture);
    }

    #[tokio::test]
    async fn small_payload_falls_through() {
        let log = call_log();
        let client = Arc::new(FakeClient::with_log(log.clone()));
        client.route_bytes(
            &format!("{}/file/download/7", SITE),
            "application/pdf",
            pdf_bytes(200),
        );
        client.route_bytes(
            &format!("{}/filepage/download/7", SITE),
            "application/pdf",
            pdf_bytes(1200),
        );

        let mut engine = engine(client, FakeBrowser::new(log));
        let reference = DocumentReference::new(1, format!("{}/filepage/7", SITE), "Rules")
            .with_file_id("7");
        let document = engine.acquire(&reference).await.unwrap();
        assert_eq!(document.strategy, StrategyKind::PatternGuess);
        assert_eq!(document.len(), 1200);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_strategy_and_screenshots() {
        let dir = tempdir().unwrap();
        let log = call_log();
        let client = Arc::new(FakeClient::with_log(log.clone()));
        let mut engine = AcquisitionEngine::new(
            client,
            Box::new(FakeBrowser::new(log.clone())),
            options(Some(dir.path().to_path_buf())),
            CancellationToken::new(),
        );

        let reference = DocumentReference::new(1, format!("{}/filepage/3", SITE), "Rules");
        match engine.acquire(&reference).await {
            Err(AcquisitionError::Exhausted { url, attempted }) => {
                assert_eq!(url, reference.source_url);
                assert_eq!(attempted.len(), 5);
                assert_eq!(attempted[0], StrategyKind::BrowserCapture);
            }
            other => panic!("expected exhaustion, got {:?}", other.map(|d| d.strategy)),
        }
        assert!(position(&log, "browser screenshot").is_some());
    }

    #[tokio::test]
    async fn cancelled_engine_does_nothing() {
        let log = call_log();
        let client = Arc::new(FakeClient::with_log(log.clone()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut engine =
            AcquisitionEngine::new(client, Box::new(FakeBrowser::new(log.clone())), options(None), cancel);

        let reference = DocumentReference::new(1, format!("{}/filepage/3", SITE), "Rules");
        assert!(matches!(
            engine.acquire(&reference).await,
            Err(AcquisitionError::Cancelled)
        ));
        assert!(log.lock().unwrap().is_empty());
    }
}
