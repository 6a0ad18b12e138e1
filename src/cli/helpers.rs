//! Shared construction helpers for CLI commands.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, Settings};
use crate::discovery::DiscoveryOptions;
use crate::scrapers::{ChromeSession, HttpClient, WebClient};
use crate::services::{AcquisitionEngine, AcquisitionOptions, DetailFetcher, DocumentLocator};

/// HTTP client configured from settings, with the API bearer token if set.
pub fn http_client(settings: &Settings, config: &Config) -> Arc<dyn WebClient> {
    Arc::new(
        HttpClient::new(
            Duration::from_secs(settings.request_timeout),
            &settings.user_agent,
        )
        .with_bearer_token(config.source.auth_token.clone()),
    )
}

pub fn discovery_options(settings: &Settings, config: &Config) -> DiscoveryOptions {
    DiscoveryOptions::from_config(
        &config.source,
        &config.discovery,
        Some(settings.diagnostics_dir.clone()),
    )
}

pub fn detail_fetcher(client: Arc<dyn WebClient>, config: &Config) -> DetailFetcher {
    DetailFetcher::new(client, &config.source.api_url).with_retries(
        config.crawl.detail_retries,
        Duration::from_millis(config.discovery.politeness_delay_ms),
    )
}

pub fn document_locator(client: Arc<dyn WebClient>, config: &Config) -> DocumentLocator {
    DocumentLocator::new(
        client,
        &config.source.site_url,
        &config.source.files_api_url,
        &config.documents.language,
    )
}

/// Acquisition engine with a lazily launched browser session.
pub fn acquisition_engine(
    settings: &Settings,
    config: &Config,
    client: Arc<dyn WebClient>,
    cancel: CancellationToken,
) -> AcquisitionEngine {
    let browser = ChromeSession::new(
        config.browser.clone(),
        &config.source.site_url,
        config.acquisition.credentials(),
    );
    let options = AcquisitionOptions::from_config(
        &config.source,
        &config.acquisition,
        Some(settings.diagnostics_dir.clone()),
    );
    AcquisitionEngine::new(client, Box::new(browser), options, cancel)
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.2} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.2} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.2} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} bytes", bytes)
    }
}
