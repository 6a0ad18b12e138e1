//! In-crate fakes for the network, browser and persistence seams.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use crate::models::{DocumentReference, FileType, ItemRecord};
use crate::repository::{CatalogSink, RepositoryError};
use crate::scrapers::{
    BinaryFetchResponse, BrowserCapture, BrowserSession, FetchError, WebClient, WebResponse,
};

/// Ordered record of calls shared between fakes.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// A PDF body of the given size.
pub fn pdf_bytes(len: usize) -> Vec<u8> {
    let mut bytes = b"%PDF-1.4\n".to_vec();
    bytes.resize(len.max(9), b'0');
    bytes
}

type Responder = Box<dyn Fn(&str) -> Option<WebResponse> + Send + Sync>;

/// Routed fake HTTP client. Each URL has a queue of responses; the last one
/// repeats. Unrouted URLs go to the responder, if any, else answer 404.
pub struct FakeClient {
    routes: Mutex<HashMap<String, VecDeque<WebResponse>>>,
    responder: Mutex<Option<Responder>>,
    log: CallLog,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::with_log(call_log())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            responder: Mutex::new(None),
            log,
        }
    }

    pub fn route(&self, url: &str, response: WebResponse) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn route_status(&self, url: &str, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).unwrap();
        self.route(url, WebResponse::new(status, url, body.as_bytes().to_vec()));
    }

    pub fn route_html(&self, url: &str, html: &str) {
        self.route(
            url,
            WebResponse::new(StatusCode::OK, url, html.as_bytes().to_vec())
                .with_header("content-type", "text/html; charset=utf-8"),
        );
    }

    pub fn route_bytes(&self, url: &str, content_type: &str, body: Vec<u8>) {
        self.route(
            url,
            WebResponse::new(StatusCode::OK, url, body).with_header("content-type", content_type),
        );
    }

    /// Answer unrouted URLs dynamically.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str) -> Option<WebResponse> + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|entry| entry.strip_prefix("http ").map(str::to_string))
            .collect()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl WebClient for FakeClient {
    async fn get(&self, url: &str) -> Result<WebResponse, FetchError> {
        self.log.lock().unwrap().push(format!("http {}", url));
        let routed = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let response = routed.or_else(|| {
            self.responder
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|respond| respond(url))
        });
        Ok(response.unwrap_or_else(|| WebResponse::new(StatusCode::NOT_FOUND, url, Vec::new())))
    }
}

/// Scripted browser session that records every call.
pub struct FakeBrowser {
    log: CallLog,
    pub capture: Option<BrowserCapture>,
    pub replay: HashMap<String, BinaryFetchResponse>,
    pub navigate: HashMap<String, Vec<u8>>,
}

impl FakeBrowser {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            capture: None,
            replay: HashMap::new(),
            navigate: HashMap::new(),
        }
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

/// Count browser calls in a shared log.
pub fn browser_calls(log: &CallLog) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("browser "))
        .count()
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn capture_download(
        &mut self,
        landing_url: &str,
        _file_type: FileType,
        _timeout: Duration,
    ) -> Result<BrowserCapture> {
        self.record(format!("browser capture {}", landing_url));
        self.capture
            .clone()
            .ok_or_else(|| anyhow!("no download affordance"))
    }

    async fn replay_request(&mut self, url: &str) -> Result<BinaryFetchResponse> {
        self.record(format!("browser replay {}", url));
        self.replay
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("fetch failed"))
    }

    async fn navigate_capture(
        &mut self,
        url: &str,
        _file_type: FileType,
        _timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        self.record(format!("browser navigate {}", url));
        Ok(self.navigate.get(url).cloned())
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        self.record(format!("browser screenshot {}", path.display()));
        Ok(())
    }

    async fn close(&mut self) {
        self.record("browser close".to_string());
    }
}

/// Persistence collaborator that keeps everything in memory.
#[derive(Default)]
pub struct MemorySink {
    pub items: Mutex<HashMap<u64, ItemRecord>>,
    pub references: Mutex<Vec<DocumentReference>>,
    pub upserts: Mutex<usize>,
    /// Ids whose upsert fails.
    pub failing: Mutex<Vec<u64>>,
}

impl MemorySink {
    pub fn item_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.items.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl CatalogSink for MemorySink {
    fn upsert_item(&self, item: &ItemRecord) -> Result<(), RepositoryError> {
        if self.failing.lock().unwrap().contains(&item.id) {
            return Err(RepositoryError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        *self.upserts.lock().unwrap() += 1;
        self.items.lock().unwrap().insert(item.id, item.clone());
        Ok(())
    }

    fn insert_references(&self, references: &[DocumentReference]) -> Result<usize, RepositoryError> {
        let mut stored = self.references.lock().unwrap();
        let mut inserted = 0;
        for reference in references {
            let exists = stored
                .iter()
                .any(|r| r.item_id == reference.item_id && r.source_url == reference.source_url);
            if !exists {
                stored.push(reference.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
