//! Browser automation for logged-in document downloads.
//!
//! Uses chromiumoxide (CDP). The session is launched lazily on first use,
//! logs in once when credentials are configured, and is then reused for
//! every acquisition attempt. It is not safe to drive concurrently; callers
//! hold it behind `&mut`.

#[cfg(feature = "browser")]
mod capture;
mod config;
#[cfg(feature = "browser")]
mod login;
#[cfg(feature = "browser")]
mod replay;
#[cfg(feature = "browser")]
mod stealth;
mod types;

pub use config::BrowserEngineConfig;
pub use types::{BinaryFetchResponse, BrowserCapture};

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::FileType;

/// Operations the acquisition engine needs from a browser.
#[async_trait]
pub trait BrowserSession: Send {
    /// Open a landing page, click the most specific download affordance and
    /// intercept a matching response in that tab or any tab it opens.
    async fn capture_download(
        &mut self,
        landing_url: &str,
        file_type: FileType,
        timeout: Duration,
    ) -> Result<BrowserCapture>;

    /// Issue a GET from inside the session so cookies and auth apply.
    async fn replay_request(&mut self, url: &str) -> Result<BinaryFetchResponse>;

    /// Navigate straight to a URL and capture the body if its content type
    /// matches.
    async fn navigate_capture(
        &mut self,
        url: &str,
        file_type: FileType,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>>;

    /// Screenshot the most recently used page.
    async fn screenshot(&mut self, path: &Path) -> Result<()>;

    /// Shut the browser down.
    async fn close(&mut self);
}

#[cfg(feature = "browser")]
use anyhow::Context;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tokio::task::JoinHandle;
#[cfg(feature = "browser")]
use tracing::info;

/// chromiumoxide-backed browser session.
#[cfg(feature = "browser")]
pub struct ChromeSession {
    pub(crate) config: BrowserEngineConfig,
    pub(crate) site_url: String,
    pub(crate) credentials: Option<(String, String)>,
    pub(crate) browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    pub(crate) authenticated: bool,
    pub(crate) last_page: Option<Page>,
}

#[cfg(feature = "browser")]
impl ChromeSession {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    /// Create a session. Nothing is launched until the first call.
    pub fn new(
        config: BrowserEngineConfig,
        site_url: &str,
        credentials: Option<(String, String)>,
    ) -> Self {
        Self {
            config,
            site_url: site_url.trim_end_matches('/').to_string(),
            credentials,
            browser: None,
            handler: None,
            authenticated: false,
            last_page: None,
        }
    }

    fn find_chrome() -> Result<std::path::PathBuf> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Install it or set [browser] remote_url \
             to an existing DevTools endpoint"
        ))
    }

    /// Launch or connect to browser if not already running.
    pub(crate) async fn ensure_browser(&mut self) -> Result<()> {
        if self.browser.is_some() {
            return Ok(());
        }

        if let Some(remote_url) = self.config.remote_url.clone() {
            return self.connect_remote(&remote_url).await;
        }

        info!("Launching browser (headless={})", self.config.headless);

        let chrome_path = Self::find_chrome()?;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .request_timeout(Duration::from_secs(self.config.timeout));

        // with_head means NOT headless
        if !self.config.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        self.attach(browser, handler);
        Ok(())
    }

    /// Connect to a remote Chrome instance.
    async fn connect_remote(&mut self, url: &str) -> Result<()> {
        info!(
            "Connecting to remote browser at {} (timeout: {}s)",
            url, self.config.timeout
        );

        // Get WebSocket URL from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .context("Failed to connect to remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(self.config.timeout),
            ..Default::default()
        };

        let (browser, handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .context("Failed to connect to remote browser")?;

        self.attach(browser, handler);
        Ok(())
    }

    fn attach(&mut self, browser: Browser, mut handler: chromiumoxide::Handler) {
        self.handler = Some(tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        }));
        self.browser = Some(browser);
        self.authenticated = false;
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl BrowserSession for ChromeSession {
    async fn capture_download(
        &mut self,
        landing_url: &str,
        file_type: FileType,
        timeout: Duration,
    ) -> Result<BrowserCapture> {
        self.ensure_browser().await?;
        self.ensure_login().await;
        self.capture_download_inner(landing_url, file_type, timeout)
            .await
    }

    async fn replay_request(&mut self, url: &str) -> Result<BinaryFetchResponse> {
        self.ensure_browser().await?;
        self.ensure_login().await;
        self.replay_inner(url).await
    }

    async fn navigate_capture(
        &mut self,
        url: &str,
        file_type: FileType,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        self.ensure_browser().await?;
        self.ensure_login().await;
        self.navigate_capture_inner(url, file_type, timeout).await
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        use chromiumoxide::page::ScreenshotParams;

        let page = self
            .last_page
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no page open"))?;
        page.save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .context("Failed to save screenshot")?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(page) = self.last_page.take() {
            let _ = page.close().await;
        }
        if let Some(mut browser) = self.browser.take() {
            // Leave remote browsers running
            if self.config.remote_url.is_none() {
                let _ = browser.close().await;
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        self.authenticated = false;
    }
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct ChromeSession {
    _config: BrowserEngineConfig,
}

#[cfg(not(feature = "browser"))]
impl ChromeSession {
    pub fn new(
        config: BrowserEngineConfig,
        _site_url: &str,
        _credentials: Option<(String, String)>,
    ) -> Self {
        Self { _config: config }
    }
}

#[cfg(not(feature = "browser"))]
fn not_compiled() -> anyhow::Error {
    anyhow::anyhow!("Browser support not compiled. Rebuild with: cargo build --features browser")
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl BrowserSession for ChromeSession {
    async fn capture_download(
        &mut self,
        _landing_url: &str,
        _file_type: FileType,
        _timeout: Duration,
    ) -> Result<BrowserCapture> {
        Err(not_compiled())
    }

    async fn replay_request(&mut self, _url: &str) -> Result<BinaryFetchResponse> {
        Err(not_compiled())
    }

    async fn navigate_capture(
        &mut self,
        _url: &str,
        _file_type: FileType,
        _timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        Err(not_compiled())
    }

    async fn screenshot(&mut self, _path: &Path) -> Result<()> {
        Err(not_compiled())
    }

    async fn close(&mut self) {}
}
