//! Rank-mode discovery over the paginated browse listing.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use super::{Candidate, DiscoveryEnd, DiscoveryOptions, Emitter};
use crate::models::CandidateId;
use crate::scrapers::{FetchError, WebClient};
use crate::utils::sleep_or_cancel;

static ITEM_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/boardgame/(\d+)/").unwrap());
static ITEM_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='/boardgame/']").unwrap());
static NEXT_PAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[title='next page']").unwrap());

/// Ids and pagination found on one listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankPage {
    /// Item ids in page order, each at most once.
    pub ids: Vec<CandidateId>,
    pub has_next: bool,
}

/// Extract item ids and the "next page" affordance from a listing page.
pub fn parse_rank_page(html: &str) -> RankPage {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for link in document.select(&ITEM_LINK) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Some(id) = ITEM_ID
            .captures(href)
            .and_then(|c| c[1].parse::<CandidateId>().ok())
        else {
            continue;
        };
        if id > 0 && seen.insert(id) {
            ids.push(id);
        }
    }

    RankPage {
        ids,
        has_next: document.select(&NEXT_PAGE).next().is_some(),
    }
}

/// Walks listing pages from a start page until a terminal signal.
pub struct RankDiscovery {
    client: Arc<dyn WebClient>,
    options: DiscoveryOptions,
}

impl RankDiscovery {
    pub fn new(client: Arc<dyn WebClient>, options: DiscoveryOptions) -> Self {
        Self { client, options }
    }

    fn page_url(&self, page: u32) -> String {
        format!("{}/browse/boardgame/page/{}", self.options.site_url, page)
    }

    pub(crate) async fn run(self, start_page: u32, emitter: Emitter) -> DiscoveryEnd {
        let cancel = emitter.cancel_token().clone();
        let mut page = start_page;
        let mut fetched = 0u32;

        loop {
            if let Some(budget) = self.options.max_pages {
                if fetched >= budget {
                    info!("Rank discovery: page budget of {} reached", budget);
                    return DiscoveryEnd::PageBudget { pages: budget };
                }
            }

            let Some(body) = self.fetch_page(page, &cancel).await else {
                return DiscoveryEnd::Cancelled;
            };
            fetched += 1;

            let listing = parse_rank_page(&body);
            if listing.ids.is_empty() {
                warn!("Rank page {} has no item links, stopping", page);
                let dump = self.dump_page(page, &body).await;
                return DiscoveryEnd::EmptyPage { page, dump };
            }

            debug!("Rank page {}: {} ids", page, listing.ids.len());
            for id in listing.ids {
                let candidate = Candidate {
                    id,
                    cursor: u64::from(page),
                };
                if let Err(end) = emitter.emit(candidate).await {
                    return end;
                }
            }

            if !listing.has_next {
                info!("Rank page {} has no next page, catalog exhausted", page);
                return DiscoveryEnd::NoNextPage { page };
            }

            if !sleep_or_cancel(&cancel, self.options.politeness_delay).await {
                return DiscoveryEnd::Cancelled;
            }
            page += 1;
        }
    }

    /// Fetch one page, retrying transient failures until it succeeds.
    /// Returns `None` only on cancellation.
    async fn fetch_page(
        &self,
        page: u32,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Option<String> {
        let url = self.page_url(page);
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let failure = match self.client.get(&url).await {
                Ok(response) => {
                    let status = response.status.as_u16();
                    if response.is_success() && status != 202 {
                        return Some(response.text());
                    }
                    let error = FetchError::Status {
                        status,
                        url: response.url.clone(),
                    };
                    if !error.is_transient() {
                        // Parsed anyway; a page with no links ends the phase.
                        warn!("Rank page {}: {}", page, error);
                        return Some(response.text());
                    }
                    error
                }
                Err(FetchError::Cancelled) => return None,
                Err(e) => e,
            };

            warn!(
                "Rank page {} fetch failed ({}), retrying in {:?}",
                page, failure, self.options.politeness_delay
            );
            if !sleep_or_cancel(cancel, self.options.politeness_delay).await {
                return None;
            }
        }
    }

    async fn dump_page(&self, page: u32, body: &str) -> Option<PathBuf> {
        let dir = self.options.diagnostics_dir.as_ref()?;
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("Failed to create diagnostics dir {}: {}", dir.display(), e);
            return None;
        }
        let path = dir.join(format!("failed_page_{}.html", page));
        match tokio::fs::write(&path, body).await {
            Ok(()) => {
                info!("Saved failed page to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to write {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::discovery::Discovery;
    use crate::models::{Phase, ScrapeState};
    use crate::repository::StateStore;
    use crate::test_support::FakeClient;

    const SITE: &str = "https://bgg.test";

    fn listing(ids: &[u64], next: bool) -> String {
        let mut html = String::from("<html><body><table>");
        for id in ids {
            html.push_str(&format!(
                "<tr><td><a href=\"/boardgame/{id}/game-{id}\">Game {id}</a></td>\
                 <td><a href=\"/boardgame/{id}/game-{id}/ratings\">ratings</a></td></tr>"
            ));
        }
        html.push_str("</table>");
        if next {
            html.push_str("<a href=\"/browse/boardgame/page/2\" title=\"next page\">Next</a>");
        }
        html.push_str("</body></html>");
        html
    }

    fn page_url(page: u32) -> String {
        format!("{}/browse/boardgame/page/{}", SITE, page)
    }

    fn options(max_pages: Option<u32>, diagnostics: Option<PathBuf>) -> DiscoveryOptions {
        DiscoveryOptions {
            site_url: SITE.to_string(),
            politeness_delay: Duration::from_millis(1),
            max_pages,
            sequence_end: 0,
            diagnostics_dir: diagnostics,
        }
    }

    fn ids(candidates: &[Candidate]) -> Vec<u64> {
        candidates.iter().map(|c| c.id).collect()
    }

    #[test]
    fn parse_dedups_within_page() {
        let page = parse_rank_page(&listing(&[13, 822, 13], true));
        assert_eq!(page.ids, vec![13, 822]);
        assert!(page.has_next);

        let last = parse_rank_page(&listing(&[9209], false));
        assert!(!last.has_next);
    }

    #[test]
    fn parse_ignores_links_without_trailing_slash() {
        let html = r#"<a href="/boardgame/13">x</a><a href="/boardgamedesigner/5/">y</a>"#;
        assert!(parse_rank_page(html).ids.is_empty());
    }

    #[tokio::test]
    async fn empty_page_stops_and_dumps() {
        let dir = tempdir().unwrap();
        let client = Arc::new(FakeClient::new());
        client.route_html(&page_url(1), &listing(&[1, 2], true));
        client.route_html(&page_url(2), &listing(&[3], true));
        client.route_html(&page_url(3), "<html><body>Please verify you are human</body></html>");
        client.route_html(&page_url(4), &listing(&[99], false));

        let discovery = Discovery::new(
            client.clone(),
            options(None, Some(dir.path().to_path_buf())),
            CancellationToken::new(),
        );
        let (candidates, end) = discovery.discover(Phase::Rank, 1).collect().await;

        assert_eq!(ids(&candidates), vec![1, 2, 3]);
        assert_eq!(candidates[2].cursor, 2);
        let dump = dir.path().join("failed_page_3.html");
        assert_eq!(
            end,
            DiscoveryEnd::EmptyPage {
                page: 3,
                dump: Some(dump.clone())
            }
        );
        assert!(std::fs::read_to_string(dump).unwrap().contains("verify you are human"));
        assert_eq!(client.request_count(&page_url(4)), 0);
    }

    #[tokio::test]
    async fn stops_when_no_next_page() {
        let client = Arc::new(FakeClient::new());
        client.route_html(&page_url(5), &listing(&[7, 8], false));

        let discovery = Discovery::new(client, options(None, None), CancellationToken::new());
        let (candidates, end) = discovery.discover(Phase::Rank, 5).collect().await;
        assert_eq!(ids(&candidates), vec![7, 8]);
        assert_eq!(end, DiscoveryEnd::NoNextPage { page: 5 });
    }

    #[tokio::test]
    async fn page_budget_is_relative_to_start() {
        let client = Arc::new(FakeClient::new());
        for page in 3..=6 {
            client.route_html(&page_url(page), &listing(&[u64::from(page) * 10], true));
        }

        let discovery = Discovery::new(client.clone(), options(Some(2), None), CancellationToken::new());
        let (candidates, end) = discovery.discover(Phase::Rank, 3).collect().await;
        assert_eq!(ids(&candidates), vec![30, 40]);
        assert_eq!(end, DiscoveryEnd::PageBudget { pages: 2 });
        assert_eq!(client.request_count(&page_url(5)), 0);
    }

    #[tokio::test]
    async fn retries_transient_failures_on_same_page() {
        let client = Arc::new(FakeClient::new());
        client.route_status(&page_url(1), 503, "busy");
        client.route_status(&page_url(1), 429, "slow down");
        client.route_html(&page_url(1), &listing(&[42], false));

        let discovery = Discovery::new(client.clone(), options(None, None), CancellationToken::new());
        let (candidates, _) = discovery.discover(Phase::Rank, 1).collect().await;
        assert_eq!(ids(&candidates), vec![42]);
        assert_eq!(client.request_count(&page_url(1)), 3);
    }

    #[tokio::test]
    async fn not_found_page_ends_phase() {
        let client = Arc::new(FakeClient::new());
        client.route_status(&page_url(1), 404, "gone");

        let discovery = Discovery::new(client.clone(), options(None, None), CancellationToken::new());
        let (candidates, end) = discovery.discover(Phase::Rank, 1).collect().await;
        assert!(candidates.is_empty());
        assert_eq!(end, DiscoveryEnd::EmptyPage { page: 1, dump: None });
        assert_eq!(client.request_count(&page_url(1)), 1);
    }

    #[tokio::test]
    async fn processed_ids_are_not_re_emitted() {
        let client = Arc::new(FakeClient::new());
        client.route_html(&page_url(1), &listing(&[1, 2, 3], false));

        let mut state = ScrapeState::default();
        state.processed_rank_ids.extend([1, 3]);
        state.processed_sequence_ids.insert(2);
        let store = Arc::new(StateStore::new("unused.json", state));

        let discovery = Discovery::new(client, options(None, None), CancellationToken::new())
            .with_state(store);
        let stream = discovery.discover(Phase::Rank, 1);
        let skipped = stream.skipped.clone();
        let (candidates, _) = stream.collect().await;

        assert_eq!(ids(&candidates), vec![2]);
        assert_eq!(skipped.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_yields_nothing() {
        let client = Arc::new(FakeClient::new());
        client.route_html(&page_url(1), &listing(&[1], true));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let discovery = Discovery::new(client, options(None, None), cancel);
        let (candidates, end) = discovery.discover(Phase::Rank, 1).collect().await;
        assert!(candidates.is_empty());
        assert_eq!(end, DiscoveryEnd::Cancelled);
    }
}
