//! Crawl orchestration.
//!
//! A [`Crawler`] owns the single background run: rank-mode discovery to
//! exhaustion, then sequence-mode. Candidates are buffered into batches; each
//! batch goes through the detail fetcher, the optional document locator and
//! the catalog sink before its ids are marked processed and the state file is
//! saved. Progress is broadcast as [`StatusEvent`]s.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{CrawlConfig, DiscoveryConfig};
use crate::discovery::{Candidate, Discovery, DiscoveryOptions, DiscoveryStream};
use crate::models::{CandidateId, CrawlStatus, LogLevel, Phase, RunState, StatusEvent};
use crate::repository::{CatalogSink, RepositoryError, StateError, StateStore};
use crate::scrapers::WebClient;
use crate::services::details::DetailFetcher;
use crate::services::locator::DocumentLocator;
use crate::utils::sleep_or_cancel;

/// Status channel capacity. Slow observers lag rather than block the crawl.
const STATUS_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("a crawl is already running")]
    AlreadyRunning,

    #[error("state store: {0}")]
    State(#[from] StateError),

    #[error("catalog sink: {0}")]
    Sink(#[from] RepositoryError),
}

/// Per-run crawl settings.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Explicit first listing page. `None` resumes from the saved cursor.
    pub start_page: Option<u32>,
    /// First page when there is no saved cursor.
    pub default_start_page: u32,
    /// Rank-mode page budget (`None` = unlimited).
    pub max_pages: Option<u32>,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub locate_documents: bool,
    pub document_delay: Duration,
    /// Continue with sequence-mode once rank-mode ends.
    pub sequence_enabled: bool,
    pub sequence_start: CandidateId,
}

impl CrawlOptions {
    pub fn from_config(crawl: &CrawlConfig, discovery: &DiscoveryConfig) -> Self {
        Self {
            start_page: None,
            default_start_page: discovery.start_page.max(1),
            max_pages: discovery.page_budget(),
            batch_size: crawl.batch_size.max(1),
            batch_delay: Duration::from_millis(crawl.batch_delay_ms),
            locate_documents: crawl.locate_documents,
            document_delay: Duration::from_millis(crawl.document_delay_ms),
            sequence_enabled: discovery.sequence_enabled,
            sequence_start: discovery.sequence_start.max(1),
        }
    }
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self::from_config(&CrawlConfig::default(), &DiscoveryConfig::default())
    }
}

/// Collaborators a crawler drives.
pub struct CrawlerParts {
    pub client: Arc<dyn WebClient>,
    pub details: DetailFetcher,
    pub locator: DocumentLocator,
    pub sink: Arc<dyn CatalogSink>,
    pub state: Arc<StateStore>,
    pub discovery: DiscoveryOptions,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    documents: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.documents.store(0, Ordering::Relaxed);
    }
}

struct Shared {
    parts: CrawlerParts,
    run_state: AtomicU8,
    counters: Counters,
    cancel: RwLock<CancellationToken>,
    events: broadcast::Sender<StatusEvent>,
}

/// Resets the run state when the run task ends, even by panic.
struct RunGuard<'a>(&'a AtomicU8);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(RunState::Idle as u8, Ordering::Release);
    }
}

/// Control surface for the crawl: `start`, `stop`, `status`, `subscribe`.
///
/// Cheap to clone; clones share the same run.
#[derive(Clone)]
pub struct Crawler {
    shared: Arc<Shared>,
}

impl Crawler {
    pub fn new(parts: CrawlerParts) -> Self {
        let (events, _) = broadcast::channel(STATUS_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                parts,
                run_state: AtomicU8::new(RunState::Idle as u8),
                counters: Counters::default(),
                cancel: RwLock::new(CancellationToken::new()),
                events,
            }),
        }
    }

    /// Start a run in the background.
    ///
    /// Rejected with [`CrawlError::AlreadyRunning`] while another run is
    /// active. The handle resolves to the final counters.
    pub fn start(
        &self,
        options: CrawlOptions,
    ) -> Result<JoinHandle<Result<CrawlStatus, CrawlError>>, CrawlError> {
        self.shared
            .run_state
            .compare_exchange(
                RunState::Idle as u8,
                RunState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| CrawlError::AlreadyRunning)?;

        self.shared.counters.reset();
        let cancel = CancellationToken::new();
        *self
            .shared
            .cancel
            .write()
            .unwrap_or_else(|e| e.into_inner()) = cancel.clone();

        let shared = self.shared.clone();
        Ok(tokio::spawn(async move {
            let _guard = RunGuard(&shared.run_state);
            let result = shared.run(&options, &cancel).await;
            match &result {
                Ok(()) if cancel.is_cancelled() => shared.emit(LogLevel::Info, "Crawl stopped"),
                Ok(()) => shared.emit(LogLevel::Info, "Crawl finished"),
                Err(e) => shared.emit(LogLevel::Error, format!("Crawl failed: {}", e)),
            }
            result.map(|_| shared.status())
        }))
    }

    /// Request a cooperative stop. Returns false when nothing is running.
    pub fn stop(&self) -> bool {
        let requested = self
            .shared
            .run_state
            .compare_exchange(
                RunState::Running as u8,
                RunState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if requested {
            self.shared
                .cancel
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .cancel();
            self.shared.emit(LogLevel::Info, "Stop requested");
        }
        requested
    }

    pub fn status(&self) -> CrawlStatus {
        self.shared.status()
    }

    /// Subscribe to live status events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.shared.events.subscribe()
    }
}

impl Shared {
    fn status(&self) -> CrawlStatus {
        CrawlStatus {
            state: RunState::from_u8(self.run_state.load(Ordering::Acquire)),
            processed: self.counters.processed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            documents: self.counters.documents.load(Ordering::Relaxed),
        }
    }

    /// Log through tracing and broadcast to observers.
    fn emit(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        // No receivers is fine.
        let _ = self.events.send(StatusEvent::new(level, message));
    }

    async fn run(&self, options: &CrawlOptions, cancel: &CancellationToken) -> Result<(), CrawlError> {
        let state = &self.parts.state;
        let saved_page = state.cursor(Phase::Rank).await;
        let rank_start = match options.start_page {
            Some(page) => u64::from(page.max(1)),
            None if saved_page > 0 => saved_page,
            None => u64::from(options.default_start_page),
        };

        self.emit(
            LogLevel::Info,
            format!("Starting crawl at rank page {}", rank_start),
        );
        self.run_phase(Phase::Rank, rank_start, options, cancel).await?;

        if cancel.is_cancelled() || !options.sequence_enabled {
            return Ok(());
        }

        let last_id = state.cursor(Phase::Sequence).await;
        let sequence_start = options.sequence_start.max(last_id.saturating_add(1));
        self.emit(
            LogLevel::Info,
            format!("Starting sequence phase at id {}", sequence_start),
        );
        self.run_phase(Phase::Sequence, sequence_start, options, cancel)
            .await
    }

    async fn run_phase(
        &self,
        phase: Phase,
        cursor: u64,
        options: &CrawlOptions,
        cancel: &CancellationToken,
    ) -> Result<(), CrawlError> {
        let mut discovery_options = self.parts.discovery.clone();
        discovery_options.max_pages = options.max_pages;
        let discovery = Discovery::new(self.parts.client.clone(), discovery_options, cancel.clone())
            .with_state(self.parts.state.clone());
        let DiscoveryStream {
            mut receiver,
            skipped,
            finished,
        } = discovery.discover(phase, cursor);

        let batch_size = options.batch_size.max(1);
        let mut batch: Vec<Candidate> = Vec::with_capacity(batch_size);
        let mut seen_skipped = 0;
        // Lowest cursor among candidates left uncommitted this run.
        let mut held_floor: Option<u64> = None;

        while let Some(candidate) = receiver.recv().await {
            let now_skipped = skipped.load(Ordering::Relaxed);
            self.counters
                .skipped
                .fetch_add(now_skipped - seen_skipped, Ordering::Relaxed);
            seen_skipped = now_skipped;

            if cancel.is_cancelled() {
                break;
            }
            // Ranks shift while paging; the same id can show up twice.
            if batch.iter().any(|c| c.id == candidate.id)
                || self.parts.state.is_processed(phase, candidate.id).await
            {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            batch.push(candidate);
            if batch.len() >= batch_size {
                self.process_batch(phase, &batch, &mut held_floor, options, cancel)
                    .await?;
                batch.clear();
                if !sleep_or_cancel(cancel, options.batch_delay).await {
                    break;
                }
            }
        }

        if !batch.is_empty() && !cancel.is_cancelled() {
            self.process_batch(phase, &batch, &mut held_floor, options, cancel)
                    .await?;
        }

        drop(receiver);
        let now_skipped = skipped.load(Ordering::Relaxed);
        self.counters
            .skipped
            .fetch_add(now_skipped - seen_skipped, Ordering::Relaxed);

        match finished.await {
            Ok(end) => self.emit(LogLevel::Info, format!("{} phase ended: {}", phase, end)),
            Err(e) => self.emit(
                LogLevel::Error,
                format!("{} discovery task failed: {}", phase, e),
            ),
        }
        Ok(())
    }

    /// Fetch, persist, mark and save one batch.
    ///
    /// The saved cursor never moves past `held_floor`, so a resumed run
    /// revisits every candidate that was held back.
    async fn process_batch(
        &self,
        phase: Phase,
        batch: &[Candidate],
        held_floor: &mut Option<u64>,
        options: &CrawlOptions,
        cancel: &CancellationToken,
    ) -> Result<(), CrawlError> {
        let ids: Vec<CandidateId> = batch.iter().map(|c| c.id).collect();
        self.emit(
            LogLevel::Debug,
            format!("Processing {} batch of {} ids", phase, ids.len()),
        );

        let items = self.parts.details.fetch(&ids, cancel).await;
        if items.is_empty() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            self.emit(
                LogLevel::Warn,
                format!(
                    "No details returned for {} ids starting at {}; batch left unprocessed",
                    ids.len(),
                    ids[0]
                ),
            );
            lower_floor(held_floor, batch.iter().map(|c| c.cursor));
            return Ok(());
        }

        // Ids not committed: persistence failed or lookups were cut short.
        let mut held_back: HashSet<CandidateId> = HashSet::new();
        let mut persisted = 0usize;
        let mut last_error = None;

        for (index, item) in items.iter().enumerate() {
            if let Err(e) = self.parts.sink.upsert_item(item) {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.emit(
                    LogLevel::Warn,
                    format!("Failed to store item {}: {}", item.id, e),
                );
                held_back.insert(item.id);
                last_error = Some(e);
                continue;
            }
            persisted += 1;

            if options.locate_documents {
                if cancel.is_cancelled() {
                    held_back.insert(item.id);
                    continue;
                }
                let references = self.parts.locator.locate(item.id).await;
                if !references.is_empty() {
                    match self.parts.sink.insert_references(&references) {
                        Ok(inserted) => {
                            self.counters
                                .documents
                                .fetch_add(inserted as u64, Ordering::Relaxed);
                            self.emit(
                                LogLevel::Info,
                                format!(
                                    "Found {} document(s) for {} ({})",
                                    references.len(),
                                    item.name,
                                    item.id
                                ),
                            );
                        }
                        Err(e) => {
                            self.counters.errors.fetch_add(1, Ordering::Relaxed);
                            self.emit(
                                LogLevel::Warn,
                                format!("Failed to store documents for {}: {}", item.id, e),
                            );
                            held_back.insert(item.id);
                            continue;
                        }
                    }
                }
                if index + 1 < items.len() {
                    sleep_or_cancel(cancel, options.document_delay).await;
                }
            }
            self.counters.processed.fetch_add(1, Ordering::Relaxed);
        }

        if persisted == 0 {
            if let Some(e) = last_error {
                return Err(CrawlError::Sink(e));
            }
        }

        lower_floor(
            held_floor,
            batch
                .iter()
                .filter(|c| held_back.contains(&c.id))
                .map(|c| c.cursor),
        );

        let committed: Vec<&Candidate> = batch
            .iter()
            .filter(|c| !held_back.contains(&c.id))
            .collect();
        if committed.is_empty() {
            return Ok(());
        }

        let state = &self.parts.state;
        let committed_ids: Vec<CandidateId> = committed.iter().map(|c| c.id).collect();
        state.mark_processed(phase, &committed_ids).await;
        if let Some(mut cursor) = committed.iter().map(|c| c.cursor).max() {
            if let Some(floor) = *held_floor {
                // Rank resumes at the cursor page, sequence one past it.
                let ceiling = match phase {
                    Phase::Rank => floor,
                    Phase::Sequence => floor.saturating_sub(1),
                };
                cursor = cursor.min(ceiling);
            }
            state.set_cursor(phase, cursor).await;
        }
        state.save().await?;

        let absent = ids.len().saturating_sub(items.len());
        self.emit(
            LogLevel::Info,
            format!(
                "Committed {} of {} ids ({} stored, {} not in source)",
                committed_ids.len(),
                ids.len(),
                persisted,
                absent
            ),
        );
        Ok(())
    }
}

fn lower_floor(floor: &mut Option<u64>, cursors: impl Iterator<Item = u64>) {
    if let Some(lowest) = cursors.min() {
        *floor = Some(floor.map_or(lowest, |f| f.min(lowest)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScrapeState;
    use crate::scrapers::WebResponse;
    use crate::test_support::{FakeClient, MemorySink};
    use reqwest::StatusCode;
    use tempfile::{tempdir, TempDir};

    const SITE: &str = "https://bgg.test";
    const API: &str = "https://bgg.test/xmlapi2";
    const FILES_API: &str = "https://api.bgg.test/api/files";

    fn rank_url(page: u32) -> String {
        format!("{}/browse/boardgame/page/{}", SITE, page)
    }

    fn rank_page(ids: &[u64], next: bool) -> String {
        let mut html = String::from("<html><body><table>");
        for id in ids {
            html.push_str(&format!(
                r#"<tr><td><a href="/boardgame/{id}/game-{id}">Game {id}</a></td></tr>"#
            ));
        }
        html.push_str("</table>");
        if next {
            html.push_str(r#"<a title="next page" href="/browse/boardgame/page/2">Next</a>"#);
        }
        html.push_str("</body></html>");
        html
    }

    /// Answers thing requests for every id except `missing`.
    fn serve_details(client: &FakeClient, missing: Vec<u64>) {
        client.respond_with(move |url| {
            let prefix = format!("{}/thing?id=", API);
            let ids = url.strip_prefix(&prefix)?.strip_suffix("&stats=1")?;
            let body: String = ids
                .split(',')
                .filter_map(|s| s.parse::<u64>().ok())
                .filter(|id| !missing.contains(id))
                .map(|id| {
                    format!(
                        r#"<item type="boardgame" id="{id}"><name type="primary" value="Game {id}" /></item>"#
                    )
                })
                .collect();
            Some(WebResponse::new(
                StatusCode::OK,
                url,
                format!("<items>{}</items>", body).into_bytes(),
            ))
        });
    }

    struct Harness {
        crawler: Crawler,
        sink: Arc<MemorySink>,
        state: Arc<StateStore>,
        _dir: TempDir,
    }

    fn harness(client: Arc<FakeClient>, state: ScrapeState, sequence_end: u64) -> Harness {
        let dir = tempdir().unwrap();
        let state = Arc::new(StateStore::new(dir.path().join("scraper_state.json"), state));
        harness_with(client, state, Arc::new(MemorySink::default()), sequence_end, dir)
    }

    fn harness_with(
        client: Arc<FakeClient>,
        state: Arc<StateStore>,
        sink: Arc<MemorySink>,
        sequence_end: u64,
        dir: TempDir,
    ) -> Harness {
        let crawler = Crawler::new(CrawlerParts {
            client: client.clone(),
            details: DetailFetcher::new(client.clone(), API).with_retries(0, Duration::ZERO),
            locator: DocumentLocator::new(client, SITE, FILES_API, "English"),
            sink: sink.clone(),
            state: state.clone(),
            discovery: DiscoveryOptions {
                site_url: SITE.to_string(),
                politeness_delay: Duration::ZERO,
                max_pages: None,
                sequence_end,
                diagnostics_dir: None,
            },
        });
        Harness {
            crawler,
            sink,
            state,
            _dir: dir,
        }
    }

    fn options(batch_size: usize) -> CrawlOptions {
        CrawlOptions {
            start_page: None,
            default_start_page: 1,
            max_pages: None,
            batch_size,
            batch_delay: Duration::ZERO,
            locate_documents: false,
            document_delay: Duration::ZERO,
            sequence_enabled: false,
            sequence_start: 1,
        }
    }

    fn two_page_client() -> Arc<FakeClient> {
        let client = Arc::new(FakeClient::new());
        client.route_html(&rank_url(1), &rank_page(&[1, 2, 3, 4, 5], true));
        client.route_html(&rank_url(2), &rank_page(&[6, 7], false));
        serve_details(&client, vec![]);
        client
    }

    #[tokio::test]
    async fn batch_size_does_not_change_outcome() {
        let small = harness(two_page_client(), ScrapeState::default(), 0);
        let large = harness(two_page_client(), ScrapeState::default(), 0);

        small.crawler.start(options(1)).unwrap().await.unwrap().unwrap();
        large.crawler.start(options(500)).unwrap().await.unwrap().unwrap();

        assert_eq!(small.sink.item_ids(), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(small.sink.item_ids(), large.sink.item_ids());
        let small_items = small.sink.items.lock().unwrap().clone();
        let large_items = large.sink.items.lock().unwrap().clone();
        assert_eq!(small_items, large_items);

        let small_state = small.state.snapshot().await;
        let large_state = large.state.snapshot().await;
        assert_eq!(small_state.processed_rank_ids, large_state.processed_rank_ids);
        assert_eq!(small_state.last_rank_page, 2);
        assert_eq!(large_state.last_rank_page, 2);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let h = harness(two_page_client(), ScrapeState::default(), 0);
        let mut opts = options(1);
        opts.batch_delay = Duration::from_secs(60);

        let handle = h.crawler.start(opts.clone()).unwrap();
        assert!(matches!(
            h.crawler.start(opts),
            Err(CrawlError::AlreadyRunning)
        ));
        assert!(h.crawler.stop());
        handle.await.unwrap().unwrap();
        assert_eq!(h.crawler.status().state, RunState::Idle);
        assert!(!h.crawler.stop());
    }

    #[tokio::test]
    async fn empty_detail_result_leaves_batch_unprocessed() {
        let client = Arc::new(FakeClient::new());
        client.route_html(&rank_url(1), &rank_page(&[1, 2, 3], false));
        client.route_status(&format!("{}/thing?id=1,2,3&stats=1", API), 400, "bad");

        let h = harness(client, ScrapeState::default(), 0);
        let status = h.crawler.start(options(10)).unwrap().await.unwrap().unwrap();

        assert_eq!(status.errors, 1);
        assert_eq!(status.processed, 0);
        let state = h.state.snapshot().await;
        assert!(state.processed_rank_ids.is_empty());
        assert_eq!(state.last_rank_page, 0);
    }

    #[tokio::test]
    async fn absent_ids_are_marked_and_failed_ids_are_not() {
        let client = Arc::new(FakeClient::new());
        client.route_html(&rank_url(1), &rank_page(&[1, 2, 3, 4], false));
        serve_details(&client, vec![2]);

        let h = harness(client, ScrapeState::default(), 0);
        h.sink.failing.lock().unwrap().push(3);
        let status = h.crawler.start(options(10)).unwrap().await.unwrap().unwrap();

        assert_eq!(status.processed, 2);
        assert_eq!(status.errors, 1);
        assert_eq!(h.sink.item_ids(), vec![1, 4]);
        let state = h.state.snapshot().await;
        assert_eq!(
            state.processed_rank_ids.iter().copied().collect::<Vec<_>>(),
            vec![1, 2, 4]
        );
    }

    #[tokio::test]
    async fn unrequested_items_in_detail_response_are_ignored() {
        let client = Arc::new(FakeClient::new());
        client.route_html(&rank_url(1), &rank_page(&[1], false));
        client.respond_with(|url| {
            let body = r#"<items><item type="boardgame" id="1"><name type="primary" value="Game 1" /></item><item type="boardgame" id="2"><name type="primary" value="Game 2" /></item></items>"#;
            Some(WebResponse::new(StatusCode::OK, url, body.as_bytes().to_vec()))
        });

        let h = harness(client, ScrapeState::default(), 0);
        let status = h.crawler.start(options(10)).unwrap().await.unwrap().unwrap();

        assert_eq!(status.processed, 1);
        assert_eq!(status.errors, 0);
        assert_eq!(h.sink.item_ids(), vec![1]);
        let state = h.state.snapshot().await;
        assert_eq!(state.processed_rank_ids.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn rank_cursor_stays_on_page_with_held_back_id() {
        let client = Arc::new(FakeClient::new());
        client.route_html(&rank_url(1), &rank_page(&[1, 2], true));
        client.route_html(&rank_url(2), &rank_page(&[3, 4], false));
        serve_details(&client, vec![]);

        let h = harness(client, ScrapeState::default(), 0);
        h.sink.failing.lock().unwrap().push(1);
        let status = h.crawler.start(options(2)).unwrap().await.unwrap().unwrap();

        assert_eq!(status.processed, 3);
        assert_eq!(h.sink.item_ids(), vec![2, 3, 4]);
        let state = h.state.snapshot().await;
        assert_eq!(state.last_rank_page, 1);
        assert!(!state.processed_rank_ids.contains(&1));
    }

    #[tokio::test]
    async fn sequence_cursor_stops_before_held_back_id() {
        let client = Arc::new(FakeClient::new());
        serve_details(&client, vec![]);

        let h = harness(client, ScrapeState::default(), 4);
        h.sink.failing.lock().unwrap().push(2);
        let mut opts = options(2);
        opts.sequence_enabled = true;
        h.crawler.start(opts).unwrap().await.unwrap().unwrap();

        let state = h.state.snapshot().await;
        assert_eq!(state.last_sequence_id, 1);
        assert_eq!(
            state.processed_sequence_ids.into_iter().collect::<Vec<_>>(),
            vec![1, 3, 4]
        );
    }

    #[tokio::test]
    async fn processed_ids_are_skipped() {
        let mut state = ScrapeState::default();
        state.processed_rank_ids.extend([2, 5]);
        let h = harness(two_page_client(), state, 0);

        let status = h.crawler.start(options(3)).unwrap().await.unwrap().unwrap();
        assert_eq!(status.skipped, 2);
        assert_eq!(status.processed, 5);
        assert_eq!(h.sink.item_ids(), vec![1, 3, 4, 6, 7]);
    }

    #[tokio::test]
    async fn replaying_a_batch_is_idempotent() {
        let client = two_page_client();
        let sink = Arc::new(MemorySink::default());

        let first_dir = tempdir().unwrap();
        let first_state = Arc::new(StateStore::new(
            first_dir.path().join("s.json"),
            ScrapeState::default(),
        ));
        let first = harness_with(client.clone(), first_state, sink.clone(), 0, first_dir);
        first.crawler.start(options(4)).unwrap().await.unwrap().unwrap();
        let items_after_first = sink.items.lock().unwrap().clone();

        // Crash before the state was saved: same sink, fresh state.
        let second_dir = tempdir().unwrap();
        let second_state = Arc::new(StateStore::new(
            second_dir.path().join("s.json"),
            ScrapeState::default(),
        ));
        let second = harness_with(client, second_state, sink.clone(), 0, second_dir);
        second.crawler.start(options(4)).unwrap().await.unwrap().unwrap();

        assert_eq!(*sink.upserts.lock().unwrap(), 14);
        assert_eq!(*sink.items.lock().unwrap(), items_after_first);
    }

    #[tokio::test]
    async fn documents_are_located_and_counted() {
        let client = Arc::new(FakeClient::new());
        client.route_html(&rank_url(1), &rank_page(&[13], false));
        client.route_html(
            &format!(
                "{}?objectid=13&objecttype=thing&nosession=1&showcount=50&pageid=1&sort=hot",
                FILES_API
            ),
            r#"{"files": [{"title": "Rules", "filename": "rules.pdf", "href": "/filepage/9/rules", "categoryid": "1"}]}"#,
        );
        serve_details(&client, vec![]);

        let h = harness(client, ScrapeState::default(), 0);
        let mut opts = options(5);
        opts.locate_documents = true;
        let status = h.crawler.start(opts).unwrap().await.unwrap().unwrap();

        assert_eq!(status.documents, 1);
        let references = h.sink.references.lock().unwrap().clone();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].source_url, "https://bgg.test/filepage/9/rules");
    }

    #[tokio::test]
    async fn sequence_resumes_after_saved_cursor() {
        let client = Arc::new(FakeClient::new());
        serve_details(&client, vec![]);
        let mut state = ScrapeState::default();
        state.last_sequence_id = 5;

        let h = harness(client, state, 8);
        let mut opts = options(2);
        opts.sequence_enabled = true;
        h.crawler.start(opts).unwrap().await.unwrap().unwrap();

        assert_eq!(h.sink.item_ids(), vec![6, 7, 8]);
        assert_eq!(h.state.cursor(Phase::Sequence).await, 8);
    }

    #[tokio::test]
    async fn stop_ends_the_run_and_broadcasts() {
        let client = Arc::new(FakeClient::new());
        serve_details(&client, vec![]);
        let h = harness(client, ScrapeState::default(), u64::MAX);
        let mut events = h.crawler.subscribe();

        let mut opts = options(2);
        opts.sequence_enabled = true;
        opts.batch_delay = Duration::from_secs(60);
        let handle = h.crawler.start(opts).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.crawler.status().processed < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.crawler.status().state, RunState::Running);

        assert!(h.crawler.stop());
        let status = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(status.processed, 2);
        assert_eq!(h.sink.item_ids(), vec![1, 2]);

        let mut messages = Vec::new();
        while let Ok(event) = events.try_recv() {
            messages.push(event.message);
        }
        assert!(messages.iter().any(|m| m == "Stop requested"));
        assert_eq!(messages.last().map(String::as_str), Some("Crawl stopped"));
    }
}
