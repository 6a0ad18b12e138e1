//! Source-site access: plain HTTP and browser automation.

pub mod browser;
mod http_client;

pub use browser::{
    BinaryFetchResponse, BrowserCapture, BrowserEngineConfig, BrowserSession, ChromeSession,
};
pub use http_client::{
    parse_content_disposition_filename, resolve_user_agent, FetchError, HttpClient, WebClient,
    WebResponse, USER_AGENT,
};
