//! Site login for the browser session.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use super::capture::{navigate_to_url, wait_for_page_ready};
use super::ChromeSession;

/// Markers present only when a user is signed in.
fn shows_signed_in(content: &str) -> bool {
    content.contains("Sign Out") || content.contains("/logout")
}

impl ChromeSession {
    /// Log in once per session when credentials are configured.
    ///
    /// A failed attempt is retried on the next call; failures never abort
    /// the caller, which simply proceeds anonymously.
    pub(crate) async fn ensure_login(&mut self) {
        if self.authenticated {
            return;
        }
        let Some((username, password)) = self.credentials.clone() else {
            return;
        };

        match self.login(&username, &password).await {
            Ok(true) => {
                info!("Logged in as {}", username);
                self.authenticated = true;
            }
            Ok(false) => warn!("Login did not succeed for {}", username),
            Err(e) => warn!("Login failed: {}", e),
        }
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<bool> {
        let page = self.open_page().await?;
        let login_url = format!("{}/login", self.site_url);
        navigate_to_url(&page, &login_url, self.config.timeout).await?;
        wait_for_page_ready(&page, self.config.timeout).await;

        if shows_signed_in(&page.content().await?) {
            debug!("Session already authenticated");
            return Ok(true);
        }

        page.find_element("input[name='username']")
            .await?
            .click()
            .await?
            .type_str(username)
            .await?;
        page.find_element("input[name='password']")
            .await?
            .click()
            .await?
            .type_str(password)
            .await?
            .press_key("Enter")
            .await?;

        tokio::time::sleep(Duration::from_secs(3)).await;
        wait_for_page_ready(&page, self.config.timeout).await;

        let content = page.content().await?;
        Ok(shows_signed_in(&content) || content.contains(username))
    }
}
