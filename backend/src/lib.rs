//! MirCrew Torznab indexer
//!
//! Serves releases from the MirCrew forum to Sonarr/Radarr/Prowlarr. Hidden
//! magnets are revealed by thanking the first post of each thread.

pub mod api;
pub mod app;
pub mod config;
pub mod indexer;

pub use app::{AppState, build_app};
pub use config::Config;
