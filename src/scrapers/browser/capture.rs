//! Download capture by network interception.
//!
//! Every tab involved in a capture gets a watcher task that forwards
//! responses whose MIME type matches the wanted file type. Tabs opened by
//! the click are picked up by polling the browser's page list.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::replay::fetch_in_page;
use super::stealth::STEALTH_SCRIPTS;
use super::types::BrowserCapture;
use super::ChromeSession;
use crate::models::FileType;
use crate::utils::resolve_url;

/// User agent presented by automated pages.
pub(super) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Download affordances, most specific first.
const DOWNLOAD_SELECTORS: &[&str] = &[
    "a[href*='/file/download/']",
    "a[href*='/file/download_redirect/']",
    "a[href*='/filepage/download/']",
    "a[href*='/filepage/download_redirect/']",
    "a.btn-primary",
];

const TAB_POLL_INTERVAL: Duration = Duration::from_millis(500);
const BODY_READ_ATTEMPTS: usize = 6;

/// JavaScript to wait for page ready state.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// A response that matched the wanted file type.
struct Intercepted {
    page: Page,
    request_id: Option<RequestId>,
    url: String,
}

/// Whether a URL looks like it serves a document directly.
pub(super) fn looks_like_document_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or("");
    path.ends_with(".pdf")
        || path.ends_with(".doc")
        || path.ends_with(".docx")
        || lower.contains("/file/download")
        || lower.contains("/filepage/download")
        || lower.contains("geekdo-files.com")
}

pub(super) async fn navigate_to_url(page: &Page, url: &str, timeout_secs: u64) -> Result<()> {
    debug!("Navigating to {}", url);
    let nav_params = NavigateParams::builder()
        .url(url)
        .build()
        .map_err(|e| anyhow::anyhow!("Invalid URL: {}", e))?;

    tokio::time::timeout(Duration::from_secs(timeout_secs), page.execute(nav_params))
        .await
        .map_err(|_| anyhow::anyhow!("Navigation timed out after {}s for {}", timeout_secs, url))?
        .map_err(|e| anyhow::anyhow!("Navigation failed for {}: {}", url, e))?;

    Ok(())
}

pub(super) async fn wait_for_page_ready(page: &Page, timeout_secs: u64) {
    match tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
    )
    .await
    {
        Ok(Ok(result)) => {
            let state: String = result
                .into_value()
                .unwrap_or_else(|_| "unknown".to_string());
            debug!("Page ready state: {}", state);
        }
        Ok(Err(e)) => debug!("Could not check ready state: {}", e),
        Err(_) => warn!("Timeout waiting for page ready state"),
    }
}

pub(super) async fn apply_stealth(page: &Page) {
    for script in STEALTH_SCRIPTS {
        if let Err(e) = page.evaluate(script.to_string()).await {
            debug!("Stealth script injection skipped: {}", e);
        }
    }
}

async fn read_response_body(page: &Page, request_id: &RequestId) -> Option<Vec<u8>> {
    // The body is not retrievable until loading finishes
    for _ in 0..BODY_READ_ATTEMPTS {
        match page
            .execute(GetResponseBodyParams::new(request_id.clone()))
            .await
        {
            Ok(resp) => {
                let body = &resp.result;
                let bytes = if body.base64_encoded {
                    base64::engine::general_purpose::STANDARD
                        .decode(&body.body)
                        .ok()?
                } else {
                    body.body.clone().into_bytes()
                };
                if !bytes.is_empty() {
                    return Some(bytes);
                }
            }
            Err(e) => debug!("Response body not ready: {}", e),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    None
}

fn spawn_response_watcher(
    page: Page,
    file_type: FileType,
    tx: mpsc::Sender<Intercepted>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = match page.event_listener::<EventResponseReceived>().await {
            Ok(events) => events,
            Err(e) => {
                debug!("Could not listen for responses: {}", e);
                return;
            }
        };

        while let Some(event) = events.next().await {
            if !file_type.matches_content_type(&event.response.mime_type) {
                continue;
            }
            debug!(
                "Intercepted {} ({})",
                event.response.url, event.response.mime_type
            );
            let hit = Intercepted {
                page: page.clone(),
                request_id: Some(event.request_id.clone()),
                url: event.response.url.clone(),
            };
            if tx.send(hit).await.is_err() {
                break;
            }
        }
    })
}

impl ChromeSession {
    /// Open a blank tab with network events enabled, replacing the last page.
    pub(super) async fn open_page(&mut self) -> Result<Page> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("browser not initialized after ensure_browser"))?;
        let page = browser.new_page("about:blank").await?;
        page.execute(SetUserAgentOverrideParams::new(
            BROWSER_USER_AGENT.to_string(),
        ))
        .await?;
        page.execute(EnableParams::default()).await?;

        if let Some(previous) = self.last_page.replace(page.clone()) {
            let _ = previous.close().await;
        }
        Ok(page)
    }

    async fn target_ids(&self) -> HashSet<TargetId> {
        match self.browser.as_ref() {
            Some(browser) => browser
                .pages()
                .await
                .unwrap_or_default()
                .iter()
                .map(|p| p.target_id().clone())
                .collect(),
            None => HashSet::new(),
        }
    }

    async fn new_tabs(&self, known: &mut HashSet<TargetId>) -> Vec<Page> {
        let Some(browser) = self.browser.as_ref() else {
            return Vec::new();
        };
        browser
            .pages()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|p| known.insert(p.target_id().clone()))
            .collect()
    }

    /// Click the most specific download affordance. Returns true if clicked.
    async fn click_download(&self, page: &Page, capture: &mut BrowserCapture) -> bool {
        for selector in DOWNLOAD_SELECTORS {
            let Ok(elements) = page.find_elements(*selector).await else {
                continue;
            };
            let Some(element) = elements.into_iter().next() else {
                continue;
            };
            if let Ok(Some(href)) = element.attribute("href").await {
                if let Some(url) = resolve_url(&self.site_url, &href) {
                    capture.record_href(url);
                }
            }
            if element.click().await.is_ok() {
                info!("Clicked download link ({})", selector);
                return true;
            }
        }

        if let Ok(elements) = page.find_elements("a, button").await {
            for element in elements {
                let text = element.inner_text().await.ok().flatten().unwrap_or_default();
                if !text.contains("Download") {
                    continue;
                }
                if let Ok(Some(href)) = element.attribute("href").await {
                    if let Some(url) = resolve_url(&self.site_url, &href) {
                        capture.record_href(url);
                    }
                }
                if element.click().await.is_ok() {
                    info!("Clicked element with text '{}'", text.trim());
                    return true;
                }
            }
        }

        false
    }

    /// Record every download-looking href without clicking.
    async fn collect_download_hrefs(&self, page: &Page, capture: &mut BrowserCapture) {
        let Ok(elements) = page.find_elements("a[href*='download']").await else {
            return;
        };
        for element in elements {
            if let Ok(Some(href)) = element.attribute("href").await {
                if let Some(url) = resolve_url(&self.site_url, &href) {
                    capture.record_href(url);
                }
            }
        }
    }

    async fn read_intercepted(&self, landing: &Page, hit: &Intercepted) -> Option<Vec<u8>> {
        if let Some(ref request_id) = hit.request_id {
            if let Some(bytes) = read_response_body(&hit.page, request_id).await {
                return Some(bytes);
            }
        }

        // Downloads often have no retrievable body; fetch the same URL in-session
        match fetch_in_page(landing, &hit.url).await {
            Ok(resp) if resp.is_success() && !resp.data.is_empty() => Some(resp.data),
            Ok(resp) => {
                debug!("In-page fetch of {} returned {}", hit.url, resp.status);
                None
            }
            Err(e) => {
                debug!("In-page fetch of {} failed: {}", hit.url, e);
                None
            }
        }
    }

    pub(super) async fn capture_download_inner(
        &mut self,
        landing_url: &str,
        file_type: FileType,
        timeout: Duration,
    ) -> Result<BrowserCapture> {
        let page = self.open_page().await?;
        let mut known = self.target_ids().await;

        let (tx, mut rx) = mpsc::channel::<Intercepted>(16);
        let mut watchers = vec![spawn_response_watcher(page.clone(), file_type, tx.clone())];

        navigate_to_url(&page, landing_url, self.config.timeout).await?;
        wait_for_page_ready(&page, self.config.timeout).await;
        if self.config.stealth {
            apply_stealth(&page).await;
        }

        let mut capture = BrowserCapture::default();
        if !self.click_download(&page, &mut capture).await {
            debug!("No download affordance clicked on {}", landing_url);
            self.collect_download_hrefs(&page, &mut capture).await;
        }

        let deadline = Instant::now() + timeout;
        let mut poll = tokio::time::interval(TAB_POLL_INTERVAL);
        let mut spawned: Vec<Page> = Vec::new();

        loop {
            tokio::select! {
                Some(hit) = rx.recv() => {
                    capture.record_href(hit.url.clone());
                    if let Some(bytes) = self.read_intercepted(&page, &hit).await {
                        info!("Captured {} bytes from {}", bytes.len(), hit.url);
                        capture.payload = Some(bytes);
                        break;
                    }
                }
                _ = poll.tick() => {
                    for tab in self.new_tabs(&mut known).await {
                        debug!("Watching new tab {:?}", tab.target_id());
                        let _ = tab.execute(EnableParams::default()).await;
                        watchers.push(spawn_response_watcher(tab.clone(), file_type, tx.clone()));
                        if let Ok(Some(url)) = tab.url().await {
                            if looks_like_document_url(&url) {
                                let _ = tx.try_send(Intercepted {
                                    page: tab.clone(),
                                    request_id: None,
                                    url,
                                });
                            }
                        }
                        spawned.push(tab);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("Capture timed out after {:?} on {}", timeout, landing_url);
                    break;
                }
            }
        }

        for watcher in watchers {
            watcher.abort();
        }
        for tab in spawned {
            let _ = tab.close().await;
        }

        Ok(capture)
    }

    pub(super) async fn navigate_capture_inner(
        &mut self,
        url: &str,
        file_type: FileType,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        let page = self.open_page().await?;
        let (tx, mut rx) = mpsc::channel::<Intercepted>(16);
        let watcher = spawn_response_watcher(page.clone(), file_type, tx);

        // Navigations that turn into downloads report an aborted load
        if let Err(e) = navigate_to_url(&page, url, self.config.timeout).await {
            debug!("Navigation to {} ended early: {}", url, e);
        }

        let mut body = None;
        if let Ok(Some(hit)) = tokio::time::timeout(timeout, rx.recv()).await {
            if let Some(ref request_id) = hit.request_id {
                body = read_response_body(&hit.page, request_id).await;
            }
        }
        watcher.abort();

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_document_url() {
        assert!(looks_like_document_url(
            "https://cf.geekdo-files.com/abc/Rules.pdf?x=1"
        ));
        assert!(looks_like_document_url(
            "https://boardgamegeek.com/file/download_redirect/123"
        ));
        assert!(looks_like_document_url("https://example.com/rules.DOCX"));
        assert!(!looks_like_document_url(
            "https://boardgamegeek.com/filepage/123/rules"
        ));
        assert!(!looks_like_document_url("https://example.com/pdf-viewer.html"));
    }
}
