//! API route definitions
//!
//! The Torznab endpoint lives with the indexer; only service routes are here.

pub mod health;
