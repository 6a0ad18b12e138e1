//! Foreground crawl command.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::helpers::{detail_fetcher, discovery_options, document_locator, http_client};
use crate::config::{Config, Settings};
use crate::models::{CrawlStatus, LogLevel, StatusEvent};
use crate::repository::{CatalogRepository, StateStore};
use crate::services::{CrawlOptions, Crawler, CrawlerParts};

/// Command-line overrides for a crawl run.
pub struct CrawlArgs {
    pub start_page: Option<u32>,
    pub max_pages: Option<u32>,
    pub batch_size: Option<usize>,
    pub no_documents: bool,
    pub rank_only: bool,
}

fn crawl_options(config: &Config, args: &CrawlArgs) -> CrawlOptions {
    let mut options = CrawlOptions::from_config(&config.crawl, &config.discovery);
    options.start_page = args.start_page;
    if let Some(max_pages) = args.max_pages {
        // 0 means unlimited, as in the config file
        options.max_pages = (max_pages > 0).then_some(max_pages);
    }
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size.max(1);
    }
    if args.no_documents {
        options.locate_documents = false;
    }
    if args.rank_only {
        options.sequence_enabled = false;
    }
    options
}

fn status_line(status: &CrawlStatus) -> String {
    format!(
        "{} processed, {} skipped, {} errors, {} documents",
        status.processed, status.skipped, status.errors, status.documents
    )
}

/// Console line for a status event. Debug events are left to tracing.
fn event_line(event: &StatusEvent) -> Option<String> {
    let marker = match event.level {
        LogLevel::Debug => return None,
        LogLevel::Info => style("→").cyan(),
        LogLevel::Warn => style("!").yellow(),
        LogLevel::Error => style("✗").red(),
    };
    Some(format!(
        "{} {} {}",
        style(event.timestamp.format("%H:%M:%S")).dim(),
        marker,
        event.message
    ))
}

/// Run the crawler in the foreground until it finishes or Ctrl-C.
pub async fn cmd_crawl(settings: &Settings, config: &Config, args: CrawlArgs) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let client = http_client(settings, config);
    let state = Arc::new(StateStore::load(settings.state_path()).await?);
    let sink = Arc::new(CatalogRepository::new(&settings.database_path())?);

    let crawler = Crawler::new(CrawlerParts {
        client: client.clone(),
        details: detail_fetcher(client.clone(), config),
        locator: document_locator(client.clone(), config),
        sink,
        state,
        discovery: discovery_options(settings, config),
    });

    let options = crawl_options(config, &args);
    println!(
        "{} Crawling {} (batch size {}, documents {})",
        style("→").cyan(),
        config.source.site_url,
        options.batch_size,
        if options.locate_documents { "on" } else { "off" }
    );

    let mut events = crawler.subscribe();
    let mut handle = crawler.start(options)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = event_line(&event) {
                        spinner.println(line);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    spinner.println(format!("{} {} status events dropped", style("!").yellow(), n));
                }
                Err(RecvError::Closed) => break (&mut handle).await,
            },
            _ = tokio::signal::ctrl_c() => {
                if crawler.stop() {
                    spinner.println(format!(
                        "{} Stopping after the current request...",
                        style("!").yellow()
                    ));
                }
            }
            result = &mut handle => break result,
        }
        spinner.set_message(status_line(&crawler.status()));
    };
    spinner.finish_and_clear();

    // Flush whatever was broadcast after the last select round.
    while let Ok(event) = events.try_recv() {
        if let Some(line) = event_line(&event) {
            println!("{}", line);
        }
    }

    let status = result??;
    println!(
        "{} Crawl complete: {}",
        style("✓").green(),
        status_line(&status)
    );
    Ok(())
}
