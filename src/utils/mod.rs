//! Shared utility functions.
//!
//! - `links`: URL resolution and id extraction
//! - `pacing`: cancellable sleeps

mod links;
mod pacing;

pub use links::{extract_filepage_id, resolve_url};
pub use pacing::sleep_or_cancel;
