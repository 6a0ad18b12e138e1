//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod crawl;
mod details;
mod discover;
mod documents;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};
use crate::models::Phase;

#[derive(Parser)]
#[command(name = "ruleacquire")]
#[command(about = "Board game catalog crawler and rulebook acquisition")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the catalog: rank listing pages, then the id sequence
    Crawl {
        /// First listing page (default: resume from saved state)
        #[arg(long)]
        start_page: Option<u32>,
        /// Listing pages to fetch this run (0 = unlimited)
        #[arg(long)]
        max_pages: Option<u32>,
        /// Ids per detail request
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Skip the document locator
        #[arg(long)]
        no_documents: bool,
        /// Stop after the rank phase
        #[arg(long)]
        rank_only: bool,
    },

    /// Print candidate ids without fetching details
    Discover {
        #[command(subcommand)]
        command: DiscoverCommands,
    },

    /// Fetch item details and print them as JSON
    Details {
        /// Item ids
        #[arg(required = true)]
        ids: Vec<u64>,
        /// Also store the records in the catalog
        #[arg(long)]
        store: bool,
    },

    /// Locate rulebook documents for an item
    Locate {
        /// Item id
        id: u64,
        /// Also store the references in the catalog
        #[arg(long)]
        store: bool,
    },

    /// Acquire one document through the strategy chain
    Acquire {
        /// Landing page or direct URL
        url: String,
        /// Source file id, enables direct download guesses
        #[arg(long)]
        file_id: Option<String>,
        /// Title used for the stored filename
        #[arg(long, default_value = "document")]
        title: String,
        /// Write here instead of the content-addressed documents directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Locate and acquire every document for an item
    FetchDocuments {
        /// Item id
        id: u64,
    },

    /// Inspect or edit resume state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
}

#[derive(Subcommand)]
enum DiscoverCommands {
    /// Ranked listing pages
    Rank {
        /// First listing page
        #[arg(long, default_value = "1")]
        start_page: u32,
        /// Listing pages to fetch (0 = unlimited)
        #[arg(long)]
        max_pages: Option<u32>,
        /// Hide ids already processed in saved state
        #[arg(long)]
        skip_processed: bool,
    },
    /// Every id in a range
    Sequence {
        /// First id
        #[arg(long, default_value = "1")]
        from: u64,
        /// Last id (default: configured sequence end)
        #[arg(long)]
        to: Option<u64>,
        /// Hide ids already processed in saved state
        #[arg(long)]
        skip_processed: bool,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Show cursors and processed counts
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear all progress
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Move a phase cursor
    SetCursor {
        /// rank or sequence
        phase: Phase,
        /// Page (rank) or last id (sequence)
        value: u64,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
    };
    let (settings, config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Crawl {
            start_page,
            max_pages,
            batch_size,
            no_documents,
            rank_only,
        } => {
            crawl::cmd_crawl(
                &settings,
                &config,
                crawl::CrawlArgs {
                    start_page,
                    max_pages,
                    batch_size,
                    no_documents,
                    rank_only,
                },
            )
            .await
        }
        Commands::Discover { command } => match command {
            DiscoverCommands::Rank {
                start_page,
                max_pages,
                skip_processed,
            } => {
                discover::cmd_discover_rank(
                    &settings,
                    &config,
                    start_page,
                    max_pages,
                    skip_processed,
                )
                .await
            }
            DiscoverCommands::Sequence {
                from,
                to,
                skip_processed,
            } => discover::cmd_discover_sequence(&settings, &config, from, to, skip_processed).await,
        },
        Commands::Details { ids, store } => {
            details::cmd_details(&settings, &config, &ids, store).await
        }
        Commands::Locate { id, store } => {
            documents::cmd_locate(&settings, &config, id, store).await
        }
        Commands::Acquire {
            url,
            file_id,
            title,
            output,
        } => documents::cmd_acquire(&settings, &config, &url, file_id, &title, output).await,
        Commands::FetchDocuments { id } => {
            documents::cmd_fetch_documents(&settings, &config, id).await
        }
        Commands::State { command } => match command {
            StateCommands::Show { json } => state::cmd_state_show(&settings, json).await,
            StateCommands::Reset { yes } => state::cmd_state_reset(&settings, yes).await,
            StateCommands::SetCursor { phase, value } => {
                state::cmd_state_set_cursor(&settings, phase, value).await
            }
        },
    }
}
