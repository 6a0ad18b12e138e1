//! Document commands: locate, acquire, fetch-documents.

use std::path::PathBuf;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::cli::helpers::{acquisition_engine, document_locator, format_bytes, http_client};
use crate::config::{Config, Settings};
use crate::models::{AcquiredDocument, DocumentReference, FileType};
use crate::repository::{CatalogRepository, CatalogSink};
use crate::services::{file_type_from_name, AcquisitionError};
use crate::storage::save_document;
use crate::utils::extract_filepage_id;

fn print_reference(reference: &DocumentReference) {
    println!("  {} {}", style("•").cyan(), style(&reference.title).bold());
    println!("    {:<10} {}", "URL:", reference.source_url);
    println!("    {:<10} {}", "Type:", reference.file_type);
    if let Some(ref language) = reference.language {
        println!("    {:<10} {}", "Language:", language);
    }
    if let Some(ref file_id) = reference.file_id_hint {
        println!("    {:<10} {}", "File id:", file_id);
    }
}

/// Locate rulebooks for one item.
pub async fn cmd_locate(
    settings: &Settings,
    config: &Config,
    item_id: u64,
    store: bool,
) -> anyhow::Result<()> {
    let locator = document_locator(http_client(settings, config), config);
    let references = locator.locate(item_id).await;

    if references.is_empty() {
        println!(
            "{} No {} rulebooks found for item {}",
            style("!").yellow(),
            config.documents.language,
            item_id
        );
        return Ok(());
    }

    println!(
        "{} {} document(s) for item {}",
        style("✓").green(),
        references.len(),
        item_id
    );
    for reference in &references {
        print_reference(reference);
    }

    if store {
        settings.ensure_directories()?;
        let repo = CatalogRepository::new(&settings.database_path())?;
        let inserted = repo.insert_references(&references)?;
        println!("{} Stored {} new reference(s)", style("✓").green(), inserted);
    }
    Ok(())
}

fn write_document(
    settings: &Settings,
    reference: &DocumentReference,
    document: &AcquiredDocument,
    output: Option<PathBuf>,
) -> anyhow::Result<PathBuf> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(&path, &document.bytes)?;
            Ok(path)
        }
        None => Ok(save_document(&settings.documents_dir, reference, document)?),
    }
}

/// Acquire one document by URL.
pub async fn cmd_acquire(
    settings: &Settings,
    config: &Config,
    url: &str,
    file_id: Option<String>,
    title: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    // Landing pages carry no extension; assume a PDF rulebook.
    let file_type = match file_type_from_name(url) {
        FileType::Unknown => FileType::Pdf,
        known => known,
    };
    let mut reference = DocumentReference::new(0, url, title).with_file_type(file_type);
    if let Some(id) = file_id.or_else(|| extract_filepage_id(url)) {
        reference = reference.with_file_id(id);
    }

    let mut engine = acquisition_engine(
        settings,
        config,
        http_client(settings, config),
        CancellationToken::new(),
    );
    let result = engine.acquire(&reference).await;
    engine.shutdown().await;

    let document = result?;
    let path = write_document(settings, &reference, &document, output)?;
    println!(
        "{} Acquired {} via {} -> {}",
        style("✓").green(),
        format_bytes(document.len() as u64),
        document.strategy,
        path.display()
    );
    Ok(())
}

/// Locate every rulebook for an item, store the references, then acquire
/// each one.
pub async fn cmd_fetch_documents(
    settings: &Settings,
    config: &Config,
    item_id: u64,
) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let client = http_client(settings, config);
    let references = document_locator(client.clone(), config)
        .locate(item_id)
        .await;
    if references.is_empty() {
        println!(
            "{} No {} rulebooks found for item {}",
            style("!").yellow(),
            config.documents.language,
            item_id
        );
        return Ok(());
    }

    let repo = CatalogRepository::new(&settings.database_path())?;
    repo.insert_references(&references)?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let mut engine = acquisition_engine(settings, config, client, cancel);
    let progress = ProgressBar::new(references.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut acquired = 0usize;
    let mut failed = 0usize;
    for reference in &references {
        progress.set_message(reference.title.clone());
        match engine.acquire(reference).await {
            Ok(document) => {
                let path = save_document(&settings.documents_dir, reference, &document)?;
                acquired += 1;
                progress.println(format!(
                    "{} {} ({}, {}) -> {}",
                    style("✓").green(),
                    reference.title,
                    format_bytes(document.len() as u64),
                    document.strategy,
                    path.display()
                ));
            }
            Err(AcquisitionError::Cancelled) => {
                progress.println(format!("{} Cancelled", style("!").yellow()));
                break;
            }
            Err(e) => {
                failed += 1;
                progress.println(format!("{} {}: {}", style("✗").red(), reference.title, e));
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();
    engine.shutdown().await;

    println!(
        "{} Item {}: {} acquired, {} failed",
        style("✓").green(),
        item_id,
        acquired,
        failed
    );
    Ok(())
}
