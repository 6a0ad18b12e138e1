//! JSON-file resume state.
//!
//! One writer (the crawler) mutates the state; a tokio mutex guards every
//! load, mutation and save. `save` is a no-op unless something changed.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::{CandidateId, Phase, ScrapeState};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

struct Inner {
    state: ScrapeState,
    dirty: bool,
}

/// Persisted cursors and processed-id sets for both phases.
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl StateStore {
    /// Wrap an in-memory state that will be saved to `path`.
    pub fn new(path: impl Into<PathBuf>, state: ScrapeState) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(Inner {
                state,
                dirty: false,
            }),
        }
    }

    /// Load the state file. A missing file yields a fresh zero state.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let (mut state, exists) = match tokio::fs::read(&path).await {
            Ok(bytes) => (serde_json::from_slice::<ScrapeState>(&bytes)?, true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (ScrapeState::default(), false),
            Err(e) => return Err(e.into()),
        };

        let migrated = state.migrate_legacy();
        if migrated {
            info!(
                "Migrated legacy processed ids into the rank set ({} ids)",
                state.processed_rank_ids.len()
            );
        }
        if exists {
            debug!(
                "Loaded state from {}: rank page {}, sequence id {}, {} rank ids, {} sequence ids",
                path.display(),
                state.last_rank_page,
                state.last_sequence_id,
                state.processed_rank_ids.len(),
                state.processed_sequence_ids.len()
            );
        }

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                state,
                dirty: migrated,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn is_processed(&self, phase: Phase, id: CandidateId) -> bool {
        self.inner.lock().await.state.processed(phase).contains(&id)
    }

    /// Add ids to a phase's processed set. Only call after the batch they
    /// belong to has been persisted.
    pub async fn mark_processed(&self, phase: Phase, ids: &[CandidateId]) {
        let mut inner = self.inner.lock().await;
        let set = inner.state.processed_mut(phase);
        let before = set.len();
        set.extend(ids.iter().copied());
        if set.len() != before {
            inner.dirty = true;
        }
    }

    /// Move a phase's resume cursor.
    pub async fn set_cursor(&self, phase: Phase, value: u64) {
        let mut inner = self.inner.lock().await;
        let changed = match phase {
            Phase::Rank => {
                let page = u32::try_from(value).unwrap_or(u32::MAX);
                std::mem::replace(&mut inner.state.last_rank_page, page) != page
            }
            Phase::Sequence => std::mem::replace(&mut inner.state.last_sequence_id, value) != value,
        };
        if changed {
            inner.dirty = true;
        }
    }

    /// Current cursor for a phase.
    pub async fn cursor(&self, phase: Phase) -> u64 {
        let inner = self.inner.lock().await;
        match phase {
            Phase::Rank => u64::from(inner.state.last_rank_page),
            Phase::Sequence => inner.state.last_sequence_id,
        }
    }

    pub async fn snapshot(&self) -> ScrapeState {
        self.inner.lock().await.state.clone()
    }

    /// Drop all progress.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = ScrapeState::default();
        inner.dirty = true;
    }

    pub async fn is_dirty(&self) -> bool {
        self.inner.lock().await.dirty
    }

    /// Write the state file if anything changed since the last save.
    ///
    /// Writes to a temporary sibling first, then renames over the target.
    /// Returns whether a write happened.
    pub async fn save(&self) -> Result<bool, StateError> {
        let mut inner = self.inner.lock().await;
        if !inner.dirty {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(&inner.state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        inner.dirty = false;
        debug!("Saved state to {}", self.path.display());
        Ok(true)
    }
}
