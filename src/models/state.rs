//! Resume state for both discovery phases.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::CandidateId;

/// Discovery phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Paginated ranked listing pages.
    Rank,
    /// Brute enumeration of the integer id space.
    Sequence,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rank => "rank",
            Self::Sequence => "sequence",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rank" => Ok(Self::Rank),
            "sequence" | "seq" => Ok(Self::Sequence),
            other => Err(format!("unknown phase '{}'", other)),
        }
    }
}

/// Persisted cursors and processed-id sets.
///
/// Serialized as camelCase JSON so the file stays readable and hand-editable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeState {
    #[serde(default)]
    pub last_rank_page: u32,
    #[serde(default)]
    pub last_sequence_id: CandidateId,
    #[serde(default)]
    pub processed_rank_ids: BTreeSet<CandidateId>,
    #[serde(default)]
    pub processed_sequence_ids: BTreeSet<CandidateId>,
    /// Older state files kept a single id list.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub processed_ids: BTreeSet<CandidateId>,
}

impl ScrapeState {
    /// Move the legacy `processedIds` list into the rank set.
    ///
    /// Returns true when the state changed.
    pub fn migrate_legacy(&mut self) -> bool {
        if self.processed_ids.is_empty() {
            return false;
        }
        if self.processed_rank_ids.is_empty() {
            self.processed_rank_ids = std::mem::take(&mut self.processed_ids);
        } else {
            self.processed_ids.clear();
        }
        true
    }

    pub fn processed(&self, phase: Phase) -> &BTreeSet<CandidateId> {
        match phase {
            Phase::Rank => &self.processed_rank_ids,
            Phase::Sequence => &self.processed_sequence_ids,
        }
    }

    pub fn processed_mut(&mut self, phase: Phase) -> &mut BTreeSet<CandidateId> {
        match phase {
            Phase::Rank => &mut self.processed_rank_ids,
            Phase::Sequence => &mut self.processed_sequence_ids,
        }
    }
}
