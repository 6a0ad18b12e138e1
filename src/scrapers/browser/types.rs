//! Browser session result types.

/// What a download-capture attempt produced.
#[derive(Debug, Clone, Default)]
pub struct BrowserCapture {
    /// Intercepted document bytes, if any response matched.
    pub payload: Option<Vec<u8>>,
    /// Download hrefs seen on the page, absolute, in discovery order.
    pub discovered_hrefs: Vec<String>,
}

impl BrowserCapture {
    /// Record an href once.
    pub fn record_href(&mut self, href: String) {
        if !self.discovered_hrefs.contains(&href) {
            self.discovered_hrefs.push(href);
        }
    }
}

/// Response from an in-page credentialed fetch.
#[derive(Debug, Clone)]
pub struct BinaryFetchResponse {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl BinaryFetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
