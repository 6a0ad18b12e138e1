//! Resume state commands.

use console::style;

use crate::config::Settings;
use crate::models::Phase;
use crate::repository::StateStore;

/// Show cursors and processed-set sizes.
pub async fn cmd_state_show(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let store = StateStore::load(settings.state_path()).await?;
    let state = store.snapshot().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("\n{}", style("Resume State").bold());
    println!("{}", "-".repeat(40));
    println!("{:<24} {}", "File:", store.path().display());
    println!("{:<24} {}", "Last rank page:", state.last_rank_page);
    println!("{:<24} {}", "Last sequence id:", state.last_sequence_id);
    println!(
        "{:<24} {}",
        "Processed (rank):",
        state.processed_rank_ids.len()
    );
    println!(
        "{:<24} {}",
        "Processed (sequence):",
        state.processed_sequence_ids.len()
    );
    if store.is_dirty().await {
        println!(
            "{} Legacy state was migrated in memory; run a crawl or set-cursor to save it",
            style("!").yellow()
        );
    }
    Ok(())
}

/// Clear all progress.
pub async fn cmd_state_reset(settings: &Settings, confirm: bool) -> anyhow::Result<()> {
    if !confirm {
        println!(
            "{} This clears both cursors and all processed ids. Re-run with --yes to confirm.",
            style("!").yellow()
        );
        return Ok(());
    }

    let store = StateStore::load(settings.state_path()).await?;
    store.reset().await;
    store.save().await?;
    println!("{} State reset", style("✓").green());
    Ok(())
}

/// Move one phase cursor.
pub async fn cmd_state_set_cursor(
    settings: &Settings,
    phase: Phase,
    value: u64,
) -> anyhow::Result<()> {
    if phase == Phase::Rank && u32::try_from(value).is_err() {
        anyhow::bail!("rank page {} is out of range", value);
    }

    let store = StateStore::load(settings.state_path()).await?;
    store.set_cursor(phase, value).await;
    store.save().await?;
    println!(
        "{} {} cursor set to {}",
        style("✓").green(),
        phase,
        value
    );
    Ok(())
}
