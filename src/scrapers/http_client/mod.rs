//! HTTP client for the source site and its APIs.

mod response;
mod user_agent;

pub use response::{parse_content_disposition_filename, WebResponse};
pub use user_agent::{resolve_user_agent, USER_AGENT};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use tracing::debug;

/// Error type for HTTP fetches.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Timeouts, connection failures, rate limiting, queued (202) and 5xx
    /// responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status == 429 || *status == 202 || *status >= 500,
            Self::Cancelled => false,
        }
    }
}

/// Minimal GET interface used by discovery, detail lookup, the locator and
/// the acquisition strategies.
#[async_trait]
pub trait WebClient: Send + Sync {
    /// Fetch a URL. Non-2xx statuses are returned as responses, not errors.
    async fn get(&self, url: &str) -> Result<WebResponse, FetchError>;
}

/// reqwest-backed client with a persistent cookie jar.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    bearer_token: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            bearer_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.is_empty());
        self
    }
}

#[async_trait]
impl WebClient for HttpClient {
    async fn get(&self, url: &str) -> Result<WebResponse, FetchError> {
        let mut request = self.client.get(url).header(ACCEPT, "*/*");
        if let Some(ref token) = self.bearer_token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        let final_url = response.url().to_string();

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let body = response.bytes().await?.to_vec();
        debug!("GET {} -> {} ({} bytes)", url, status.as_u16(), body.len());

        Ok(WebResponse {
            status,
            url: final_url,
            headers,
            body,
        })
    }
}

impl WebResponse {
    /// Turn a non-2xx response into a [`FetchError::Status`].
    pub fn error_for_status(self) -> Result<Self, FetchError> {
        if self.status.is_success() && self.status != StatusCode::ACCEPTED {
            Ok(self)
        } else {
            Err(FetchError::Status {
                status: self.status.as_u16(),
                url: self.url,
            })
        }
    }
}
