//! Catalog item models produced by the detail fetcher.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Source-side identifier of one catalog item.
pub type CandidateId = u64;

/// A free-text tag, optionally carrying the source's secondary identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl Tag {
    pub fn new(value: impl Into<String>, id: Option<u64>) -> Self {
        Self {
            value: value.into(),
            id,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{}:{}", self.value, id),
            None => f.write_str(&self.value),
        }
    }
}

/// Structured detail record for one catalog item.
///
/// Immutable once produced; merging with an existing row is the
/// persistence layer's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: CandidateId,
    /// Source item type (e.g. "boardgame", "boardgameexpansion").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub min_players: Option<u32>,
    pub max_players: Option<u32>,
    pub min_time: Option<u32>,
    pub max_time: Option<u32>,
    pub avg_rating: Option<f64>,
    pub rank: Option<u32>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub designers: Vec<Tag>,
    #[serde(default)]
    pub artists: Vec<Tag>,
    #[serde(default)]
    pub publishers: Vec<Tag>,
    #[serde(default)]
    pub categories: Vec<Tag>,
    #[serde(default)]
    pub mechanics: Vec<Tag>,
}

impl ItemRecord {
    /// Create a record with only the required fields set.
    pub fn new(id: CandidateId, name: impl Into<String>) -> Self {
        Self {
            id,
            kind: None,
            name: name.into(),
            year: None,
            description: None,
            min_players: None,
            max_players: None,
            min_time: None,
            max_time: None,
            avg_rating: None,
            rank: None,
            image_urls: Vec::new(),
            designers: Vec::new(),
            artists: Vec::new(),
            publishers: Vec::new(),
            categories: Vec::new(),
            mechanics: Vec::new(),
        }
    }

    /// Player count as a display range ("2-4", "1", or "?").
    pub fn player_range(&self) -> String {
        format_range(self.min_players, self.max_players)
    }

    /// Play time in minutes as a display range.
    pub fn time_range(&self) -> String {
        format_range(self.min_time, self.max_time)
    }
}

fn format_range(min: Option<u32>, max: Option<u32>) -> String {
    match (min, max) {
        (Some(a), Some(b)) if a == b => a.to_string(),
        (Some(a), Some(b)) => format!("{}-{}", a, b),
        (Some(a), None) | (None, Some(a)) => a.to_string(),
        (None, None) => "?".to_string(),
    }
}
