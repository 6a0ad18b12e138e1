//! Command-line front end.

mod commands;
mod helpers;

pub use commands::{is_verbose, run};
