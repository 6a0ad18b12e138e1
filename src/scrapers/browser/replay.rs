//! Credentialed request replay from inside a browser page.
//!
//! A `fetch()` issued by page JavaScript carries the session's cookies, so
//! it succeeds where a bare HTTP client is bounced to the login page.

use anyhow::{Context, Result};
use base64::Engine;
use chromiumoxide::Page;
use tracing::{debug, info};

use super::capture::{navigate_to_url, wait_for_page_ready};
use super::types::BinaryFetchResponse;
use super::ChromeSession;

/// Fetch `url` with `credentials: 'include'` from within `page`.
pub(super) async fn fetch_in_page(page: &Page, url: &str) -> Result<BinaryFetchResponse> {
    let url_literal = serde_json::to_string(url)?;
    let fetch_script = format!(
        r#"
        (async () => {{
            try {{
                const response = await fetch({}, {{
                    method: 'GET',
                    credentials: 'include',
                    headers: {{ 'Accept': 'application/pdf, application/msword, */*' }}
                }});

                const contentType = response.headers.get('content-type') || 'application/octet-stream';
                const bytes = new Uint8Array(await response.arrayBuffer());

                let binary = '';
                for (let i = 0; i < bytes.length; i++) {{
                    binary += String.fromCharCode(bytes[i]);
                }}

                return {{
                    status: response.status,
                    contentType: contentType,
                    data: btoa(binary)
                }};
            }} catch (e) {{
                return {{ error: e.toString() }};
            }}
        }})()
        "#,
        url_literal
    );

    let result: serde_json::Value = page
        .evaluate(fetch_script)
        .await?
        .into_value()
        .context("Failed to parse fetch result")?;

    if let Some(error) = result.get("error").and_then(|e| e.as_str()) {
        return Err(anyhow::anyhow!("JavaScript fetch failed: {}", error));
    }

    let status = result.get("status").and_then(|s| s.as_u64()).unwrap_or(0) as u16;
    let content_type = result
        .get("contentType")
        .and_then(|c| c.as_str())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data_b64 = result.get("data").and_then(|d| d.as_str()).unwrap_or("");

    let data = base64::engine::general_purpose::STANDARD
        .decode(data_b64)
        .context("Failed to decode base64 data")?;

    debug!(
        "In-page fetch of {} -> {} ({} bytes, {})",
        url,
        status,
        data.len(),
        content_type
    );

    Ok(BinaryFetchResponse {
        url: url.to_string(),
        status,
        content_type,
        data,
    })
}

impl ChromeSession {
    pub(super) async fn replay_inner(&mut self, url: &str) -> Result<BinaryFetchResponse> {
        // Reuse the last page when it is already on the site; fetch() is
        // same-origin with it and sends the session cookies.
        let page = match self.last_page.clone() {
            Some(page) => page,
            None => {
                let page = self.open_page().await?;
                navigate_to_url(&page, &self.site_url, self.config.timeout).await?;
                wait_for_page_ready(&page, self.config.timeout).await;
                page
            }
        };

        info!("Replaying request to {} in browser session", url);
        fetch_in_page(&page, url).await
    }
}
