//! Candidate discovery for both crawl phases.
//!
//! Each phase runs as a spawned producer that pushes [`Candidate`]s onto a
//! bounded channel. Producers check the cancellation token before every
//! send, skip ids the state store already has for their phase, and report
//! why they stopped through [`DiscoveryStream::finished`].

mod rank;
mod sequence;

pub use rank::{parse_rank_page, RankDiscovery, RankPage};
pub use sequence::SequenceDiscovery;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{DiscoveryConfig, SourceConfig};
use crate::models::{CandidateId, Phase};
use crate::repository::StateStore;
use crate::scrapers::WebClient;

/// Discovery channel capacity.
const CHANNEL_CAPACITY: usize = 256;

/// One discovered identifier and the cursor position it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: CandidateId,
    /// Listing page for rank mode, the id itself for sequence mode.
    pub cursor: u64,
}

/// Why a discovery producer stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEnd {
    /// The page budget was used up.
    PageBudget { pages: u32 },
    /// The last page had no "next page" link.
    NoNextPage { page: u32 },
    /// A page had no item links; its body was dumped when possible.
    EmptyPage { page: u32, dump: Option<PathBuf> },
    /// The sequence range ran out.
    RangeExhausted { last: CandidateId },
    Cancelled,
    /// The consumer dropped the receiver.
    ConsumerClosed,
}

impl fmt::Display for DiscoveryEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageBudget { pages } => write!(f, "page budget of {} reached", pages),
            Self::NoNextPage { page } => write!(f, "no next page after page {}", page),
            Self::EmptyPage { page, dump } => match dump {
                Some(path) => write!(
                    f,
                    "page {} had no item links (dumped to {})",
                    page,
                    path.display()
                ),
                None => write!(f, "page {} had no item links", page),
            },
            Self::RangeExhausted { last } => write!(f, "id range exhausted at {}", last),
            Self::Cancelled => f.write_str("cancelled"),
            Self::ConsumerClosed => f.write_str("consumer closed"),
        }
    }
}

/// Stream of candidates from one phase.
pub struct DiscoveryStream {
    /// Receiver for discovered candidates.
    pub receiver: mpsc::Receiver<Candidate>,
    /// Ids filtered because they were already processed.
    pub skipped: Arc<AtomicU64>,
    /// Resolves when the producer stops.
    pub finished: JoinHandle<DiscoveryEnd>,
}

impl DiscoveryStream {
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Drain the stream into a vector (mostly useful for tests and the CLI).
    pub async fn collect(mut self) -> (Vec<Candidate>, DiscoveryEnd) {
        let mut out = Vec::new();
        while let Some(candidate) = self.receiver.recv().await {
            out.push(candidate);
        }
        let end = self.finished.await.unwrap_or(DiscoveryEnd::Cancelled);
        (out, end)
    }
}

/// Discovery tuning shared by both phases.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub site_url: String,
    pub politeness_delay: Duration,
    /// Listing pages per run (`None` = unlimited).
    pub max_pages: Option<u32>,
    /// Inclusive upper bound for sequence mode.
    pub sequence_end: CandidateId,
    /// Where empty listing pages are dumped.
    pub diagnostics_dir: Option<PathBuf>,
}

impl DiscoveryOptions {
    pub fn from_config(
        source: &SourceConfig,
        discovery: &DiscoveryConfig,
        diagnostics_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            site_url: source.site_url.trim_end_matches('/').to_string(),
            politeness_delay: Duration::from_millis(discovery.politeness_delay_ms),
            max_pages: discovery.page_budget(),
            sequence_end: discovery.sequence_end,
            diagnostics_dir,
        }
    }
}

/// Pushes candidates to the consumer, applying the processed-id filter.
pub(crate) struct Emitter {
    tx: mpsc::Sender<Candidate>,
    cancel: CancellationToken,
    state: Option<Arc<StateStore>>,
    phase: Phase,
    skipped: Arc<AtomicU64>,
}

impl Emitter {
    /// Send one candidate. `Ok(false)` means it was filtered.
    pub(crate) async fn emit(&self, candidate: Candidate) -> Result<bool, DiscoveryEnd> {
        if self.cancel.is_cancelled() {
            return Err(DiscoveryEnd::Cancelled);
        }
        if let Some(ref state) = self.state {
            if state.is_processed(self.phase, candidate.id).await {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(false);
            }
        }
        tokio::select! {
            sent = self.tx.send(candidate) => sent
                .map(|_| true)
                .map_err(|_| DiscoveryEnd::ConsumerClosed),
            _ = self.cancel.cancelled() => Err(DiscoveryEnd::Cancelled),
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Entry point for `discover(phase, cursor)`.
pub struct Discovery {
    client: Arc<dyn WebClient>,
    options: DiscoveryOptions,
    state: Option<Arc<StateStore>>,
    cancel: CancellationToken,
}

impl Discovery {
    pub fn new(
        client: Arc<dyn WebClient>,
        options: DiscoveryOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            options,
            state: None,
            cancel,
        }
    }

    /// Filter out ids already processed in the given store.
    pub fn with_state(mut self, state: Arc<StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    /// Start discovering. `cursor` is the first page (rank) or first id
    /// (sequence).
    pub fn discover(&self, phase: Phase, cursor: u64) -> DiscoveryStream {
        let (tx, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let skipped = Arc::new(AtomicU64::new(0));
        let emitter = Emitter {
            tx,
            cancel: self.cancel.clone(),
            state: self.state.clone(),
            phase,
            skipped: skipped.clone(),
        };

        let finished = match phase {
            Phase::Rank => {
                let start_page = u32::try_from(cursor.max(1)).unwrap_or(u32::MAX);
                let source = RankDiscovery::new(self.client.clone(), self.options.clone());
                tokio::spawn(async move { source.run(start_page, emitter).await })
            }
            Phase::Sequence => {
                let source = SequenceDiscovery::new(cursor.max(1), self.options.sequence_end);
                tokio::spawn(async move { source.run(emitter).await })
            }
        };

        DiscoveryStream {
            receiver,
            skipped,
            finished,
        }
    }
}
