//! Cross-crate integration flows.

pub mod crawl;
pub mod persistence;
