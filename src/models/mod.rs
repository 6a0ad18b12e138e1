//! Data models for catalog discovery and document acquisition.

mod document;
mod item;
mod state;
mod status;

pub use document::{AcquiredDocument, DocumentReference, FileType, StrategyKind};
pub use item::{CandidateId, ItemRecord, Tag};
pub use state::{Phase, ScrapeState};
pub use status::{CrawlStatus, LogLevel, RunState, StatusEvent};
