//! Service layer: detail lookups, document location and acquisition, and
//! the crawl orchestrator that ties them together.
//!
//! Services hold no UI concerns; the CLI drives them and renders progress.

pub mod acquire;
pub mod crawler;
pub mod details;
pub mod locator;

pub use acquire::{
    default_strategies, find_embedded_links, is_plausible, AcquisitionEngine, AcquisitionError,
    AcquisitionOptions, AcquisitionStrategy, AttemptContext,
};
pub use crawler::{CrawlError, CrawlOptions, Crawler, CrawlerParts};
pub use details::{parse_items, DetailFetcher};
pub use locator::{
    detect_language, file_type_from_name, is_target_document, language_allowed, DocumentLocator,
};
