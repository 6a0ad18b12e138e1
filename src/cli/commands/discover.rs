//! Discovery-only commands: print candidate ids.

use std::sync::Arc;

use console::style;
use tokio_util::sync::CancellationToken;

use crate::cli::helpers::{discovery_options, http_client};
use crate::config::{Config, Settings};
use crate::discovery::{Discovery, DiscoveryOptions, DiscoveryStream};
use crate::models::Phase;
use crate::repository::StateStore;

async fn build(
    settings: &Settings,
    config: &Config,
    options: DiscoveryOptions,
    skip_processed: bool,
    cancel: CancellationToken,
) -> anyhow::Result<Discovery> {
    let discovery = Discovery::new(http_client(settings, config), options, cancel);
    if skip_processed {
        let state = StateStore::load(settings.state_path()).await?;
        return Ok(discovery.with_state(Arc::new(state)));
    }
    Ok(discovery)
}

/// Print ids as they arrive; Ctrl-C stops the producer.
async fn print_stream(stream: DiscoveryStream, cancel: CancellationToken) -> anyhow::Result<()> {
    let DiscoveryStream {
        mut receiver,
        skipped,
        finished,
    } = stream;

    let mut count = 0u64;
    loop {
        tokio::select! {
            candidate = receiver.recv() => match candidate {
                Some(candidate) => {
                    count += 1;
                    println!("{}\t{}", candidate.id, candidate.cursor);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => cancel.cancel(),
        }
    }

    let end = finished.await?;
    eprintln!(
        "{} {} ids ({} already processed), stopped: {}",
        style("✓").green(),
        count,
        skipped.load(std::sync::atomic::Ordering::Relaxed),
        end
    );
    Ok(())
}

/// Walk ranked listing pages.
pub async fn cmd_discover_rank(
    settings: &Settings,
    config: &Config,
    start_page: u32,
    max_pages: Option<u32>,
    skip_processed: bool,
) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let mut options = discovery_options(settings, config);
    if let Some(max_pages) = max_pages {
        options.max_pages = (max_pages > 0).then_some(max_pages);
    }

    let cancel = CancellationToken::new();
    let discovery = build(settings, config, options, skip_processed, cancel.clone()).await?;
    print_stream(
        discovery.discover(Phase::Rank, u64::from(start_page)),
        cancel,
    )
    .await
}

/// Enumerate an id range.
pub async fn cmd_discover_sequence(
    settings: &Settings,
    config: &Config,
    from: u64,
    to: Option<u64>,
    skip_processed: bool,
) -> anyhow::Result<()> {
    let mut options = discovery_options(settings, config);
    if let Some(to) = to {
        options.sequence_end = to;
    }

    let cancel = CancellationToken::new();
    let discovery = build(settings, config, options, skip_processed, cancel.clone()).await?;
    print_stream(discovery.discover(Phase::Sequence, from), cancel).await
}
