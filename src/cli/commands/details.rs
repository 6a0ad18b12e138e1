//! Detail lookup command.

use console::style;
use tokio_util::sync::CancellationToken;

use crate::cli::helpers::{detail_fetcher, http_client};
use crate::config::{Config, Settings};
use crate::repository::{CatalogRepository, CatalogSink};

/// Fetch item records and print them as JSON.
pub async fn cmd_details(
    settings: &Settings,
    config: &Config,
    ids: &[u64],
    store: bool,
) -> anyhow::Result<()> {
    let fetcher = detail_fetcher(http_client(settings, config), config);
    let items = fetcher.fetch(ids, &CancellationToken::new()).await;

    if items.is_empty() {
        eprintln!("{} No details returned", style("!").yellow());
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&items)?);

    if store {
        settings.ensure_directories()?;
        let repo = CatalogRepository::new(&settings.database_path())?;
        for item in &items {
            repo.upsert_item(item)?;
        }
        eprintln!(
            "{} Stored {} of {} items",
            style("✓").green(),
            items.len(),
            ids.len()
        );
    }
    Ok(())
}
