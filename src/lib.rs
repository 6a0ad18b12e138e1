//! ruleacquire - board game catalog crawler and rulebook acquisition.
//!
//! Discovers catalog ids from ranked listing pages and by id sequence,
//! enriches them through the bulk XML API, locates target-language
//! rulebooks and acquires them through an ordered chain of download
//! strategies. Progress is resumable across runs.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod models;
pub mod repository;
pub mod scrapers;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod test_support;
