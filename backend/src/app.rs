//! Application state and HTTP router construction.

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::Config;
use crate::indexer::MirCrewIndexer;
use crate::indexer::torznab::{self, TorznabState};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub indexer: Arc<MirCrewIndexer>,
}

/// Build the full Axum router: /api (Torznab), /health and the trace layer.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(api::health::router())
        .merge(torznab::router(TorznabState {
            indexer: state.indexer.clone(),
            api_key: state.config.api_key.clone(),
        }))
        .layer(TraceLayer::new_for_http())
}
