//! Bulk detail lookups against the XML thing API.
//!
//! One request per batch. Failures never propagate: a batch that cannot be
//! fetched or parsed comes back empty, and a single bad `<item>` is dropped
//! without affecting its siblings.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use roxmltree::{Document, Node};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::{CandidateId, ItemRecord, Tag};
use crate::scrapers::WebClient;
use crate::utils::sleep_or_cancel;

/// Fetches [`ItemRecord`]s for batches of ids.
pub struct DetailFetcher {
    client: Arc<dyn WebClient>,
    api_url: String,
    retries: u32,
    retry_delay: Duration,
}

impl DetailFetcher {
    pub fn new(client: Arc<dyn WebClient>, api_url: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Retry transient failures (including "queued" 202s) this many times.
    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    fn batch_url(&self, ids: &[CandidateId]) -> String {
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!("{}/thing?id={}&stats=1", self.api_url, joined)
    }

    /// Fetch details for `ids`.
    ///
    /// An empty result for a non-empty input means nothing could be
    /// obtained, not that the items do not exist.
    pub async fn fetch(&self, ids: &[CandidateId], cancel: &CancellationToken) -> Vec<ItemRecord> {
        if ids.is_empty() {
            return Vec::new();
        }

        let url = self.batch_url(ids);
        info!("Fetching details for {} items", ids.len());

        let mut attempt = 0;
        let body = loop {
            let error = match self.client.get(&url).await {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => break response.text(),
                    Err(e) => e,
                },
                Err(e) => e,
            };

            if !error.is_transient() {
                error!("Detail API error: {}", error);
                return Vec::new();
            }
            if attempt >= self.retries {
                error!("Detail API error after {} retries: {}", attempt, error);
                return Vec::new();
            }
            attempt += 1;
            warn!(
                "Detail API transient failure ({}), retry {}/{} in {:?}",
                error, attempt, self.retries, self.retry_delay
            );
            if !sleep_or_cancel(cancel, self.retry_delay).await {
                return Vec::new();
            }
        };

        let requested: HashSet<CandidateId> = ids.iter().copied().collect();
        let mut seen = HashSet::with_capacity(ids.len());
        let mut items = parse_items(&body);
        // Only requested ids, once each.
        items.retain(|item| requested.contains(&item.id) && seen.insert(item.id));
        debug!("Parsed {} of {} requested items", items.len(), ids.len());
        items
    }
}

/// Parse a `<items>` document. Malformed documents yield an empty list;
/// malformed items are skipped.
pub fn parse_items(xml: &str) -> Vec<ItemRecord> {
    let doc = match Document::parse(xml) {
        Ok(doc) => doc,
        Err(e) => {
            error!("Detail API returned malformed XML: {}", e);
            return Vec::new();
        }
    };

    doc.root_element()
        .children()
        .filter(|n| n.has_tag_name("item"))
        .filter_map(|item| {
            let parsed = parse_item(item);
            if parsed.is_none() {
                warn!(
                    "Skipping malformed item (id={:?})",
                    item.attribute("id").unwrap_or("")
                );
            }
            parsed
        })
        .collect()
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

/// `value` attribute of a named child.
fn child_value<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name).and_then(|n| n.attribute("value"))
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn parse_item(item: Node<'_, '_>) -> Option<ItemRecord> {
    let id: CandidateId = item.attribute("id")?.trim().parse().ok()?;
    if id == 0 {
        return None;
    }

    let names: Vec<Node> = item.children().filter(|n| n.has_tag_name("name")).collect();
    let name = names
        .iter()
        .find(|n| n.attribute("type") == Some("primary"))
        .or_else(|| names.first())
        .and_then(|n| n.attribute("value"))
        .map(str::trim)
        .filter(|v| !v.is_empty())?;

    let mut record = ItemRecord::new(id, name);
    record.kind = item.attribute("type").map(str::to_string);
    record.year = child_value(item, "yearpublished").and_then(|v| v.parse().ok());
    record.description = child_text(item, "description");
    record.min_players = child_value(item, "minplayers").and_then(|v| v.parse().ok());
    record.max_players = child_value(item, "maxplayers").and_then(|v| v.parse().ok());
    record.min_time = child_value(item, "minplaytime").and_then(|v| v.parse().ok());
    record.max_time = child_value(item, "maxplaytime").and_then(|v| v.parse().ok());

    record.image_urls = ["image", "thumbnail"]
        .iter()
        .filter_map(|tag| child_text(item, tag))
        .collect();

    for link in item.children().filter(|n| n.has_tag_name("link")) {
        let Some(value) = link.attribute("value").filter(|v| !v.is_empty()) else {
            continue;
        };
        let tag = Tag::new(value, link.attribute("id").and_then(|v| v.parse().ok()));
        match link.attribute("type") {
            Some("boardgamedesigner") => record.designers.push(tag),
            Some("boardgameartist") => record.artists.push(tag),
            Some("boardgamepublisher") => record.publishers.push(tag),
            Some("boardgamecategory") => record.categories.push(tag),
            Some("boardgamemechanic") => record.mechanics.push(tag),
            _ => {}
        }
    }

    if let Some(ratings) = child(item, "statistics").and_then(|s| child(s, "ratings")) {
        record.avg_rating = child_value(ratings, "average").and_then(|v| v.parse().ok());
        record.rank = child(ratings, "ranks").and_then(|ranks| {
            ranks
                .children()
                .filter(|n| n.has_tag_name("rank"))
                .find(|r| r.attribute("name") == Some("boardgame") && r.attribute("id") == Some("1"))
                .and_then(|r| r.attribute("value"))
                .and_then(|v| v.parse().ok())
        });
    }

    Some(record)
}
