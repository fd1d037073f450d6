//! Torznab API implementation
//!
//! Exposes the MirCrew indexer through the Torznab protocol used by
//! Sonarr, Radarr and Prowlarr.
//!
//! Endpoints:
//! - `GET /api?t=caps` - Get indexer capabilities
//! - `GET /api?t=search&q=...` - General search (`q=thread::<id>` for one thread)
//! - `GET /api?t=tvsearch&q=...&season=..&ep=..` - TV search
//! - `GET /api?t=movie&q=...` - Movie search
//!
//! The `apikey` parameter is checked only when an API key is configured. A
//! `t=search` without any criteria is answered with a fixed sample item.

pub mod request;
pub mod response;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{TimeZone, Utc};

use crate::indexer::QueryType;
use crate::indexer::categories::{ContentKind, cats};
use crate::indexer::mircrew::MirCrewIndexer;
use crate::indexer::types::{EpisodeInfo, SearchResultItem};
use request::TorznabRequest;
use response::{FeedChannel, TorznabError, TorznabResponse};

const INDEXER_TITLE: &str = "MirCrew";
const SAMPLE_TITLE: &str = "MirCrew.Indexer.Test.Response.SAMPLE.avi";
const SAMPLE_HASH: &str = "0123456789abcdef0123456789abcdef01234567";

/// Application state for Torznab routes
#[derive(Clone)]
pub struct TorznabState {
    pub indexer: Arc<MirCrewIndexer>,
    pub api_key: Option<String>,
}

/// Create the Torznab router
pub fn router(state: TorznabState) -> Router {
    Router::new()
        .route("/api", get(torznab_handler))
        .with_state(state)
}

/// Main Torznab endpoint handler
async fn torznab_handler(
    State(state): State<TorznabState>,
    Query(params): Query<TorznabRequest>,
) -> Response {
    if let Some(expected) = state.api_key.as_deref() {
        if params.apikey.as_deref() != Some(expected) {
            return TorznabError::unauthorized("Invalid API Key").into_response();
        }
    }

    if let Some(t) = params.t.as_deref() {
        if t.parse::<QueryType>().is_err() {
            return TorznabError::function_not_available(&format!(
                "{} is not supported by this indexer",
                t
            ))
            .into_response();
        }
    }

    let query = match params.to_query() {
        Ok(q) => q,
        Err(e) => return TorznabError::bad_request(&e.to_string()).into_response(),
    };

    if query.query_type == QueryType::Caps {
        let caps = state.indexer.capabilities();
        return TorznabResponse::capabilities(INDEXER_TITLE, &caps).into_response();
    }

    let base_url = state.indexer.session().base_url();
    let channel = FeedChannel {
        title: INDEXER_TITLE.to_string(),
        description: "MirCrew releases".to_string(),
        link: base_url.to_string(),
    };

    if query.is_indexer_test() {
        tracing::debug!("Answering indexer test request with sample item");
        let items = [sample_item(base_url)];
        return TorznabResponse::search_results(&channel, &items).into_response();
    }

    match state.indexer.search(&query).await {
        Ok(items) => TorznabResponse::search_results(&channel, &items).into_response(),
        Err(e) => {
            tracing::error!(
                query = %query.get_query_string(),
                error = %e,
                "Torznab search failed"
            );
            TorznabResponse::Error(TorznabError::from(&e)).into_response()
        }
    }
}

/// Fixed item returned to indexer test requests
fn sample_item(base_url: &str) -> SearchResultItem {
    SearchResultItem {
        title: SAMPLE_TITLE.to_string(),
        guid: format!("test-{}", SAMPLE_HASH),
        magnet_uri: format!("magnet:?xt=urn:btih:{}&dn={}", SAMPLE_HASH, SAMPLE_TITLE),
        info_hash: SAMPLE_HASH.to_string(),
        category: cats::MOVIES,
        kind: ContentKind::Movie,
        episode: EpisodeInfo::default(),
        thread_url: format!("{}/index.php", base_url),
        thread_id: 0,
        size: 1_000_000_000,
        publish_date: Utc
            .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::indexer::error::TransportErrorKind;
    use crate::indexer::mircrew::IndexerSettings;
    use crate::indexer::retry::RetryConfig;
    use crate::indexer::session::Credentials;
    use crate::indexer::testing::{FakeTransport, Method, pages, pages::ThreadFixture};

    const BASE: &str = "https://forum.test";

    fn app(transport: &Arc<FakeTransport>, api_key: Option<&str>) -> Router {
        let fast = RetryConfig {
            max_attempts: 2,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            multiplier: 1.0,
        };
        let settings = IndexerSettings {
            base_url: BASE.to_string(),
            login_retry: fast.clone(),
            fetch_retry: fast,
            ..IndexerSettings::default()
        };
        let indexer = MirCrewIndexer::new(
            transport.clone(),
            Credentials::new("user", "secret"),
            settings,
        );
        router(TorznabState {
            indexer: Arc::new(indexer),
            api_key: api_key.map(str::to_string),
        })
    }

    fn logged_in_transport() -> Arc<FakeTransport> {
        let transport = Arc::new(FakeTransport::default());
        transport
            .on_get("ucp.php", 200, &pages::login_form("tok"))
            .on_post("ucp.php?mode=login", 200, &pages::logged_in());
        transport
    }

    async fn call(app: Router, uri: &str) -> (StatusCode, String, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_caps_needs_no_login() {
        let transport = Arc::new(FakeTransport::default());
        let (status, content_type, body) = call(app(&transport, None), "/api?t=caps").await;

        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("application/rss+xml"));
        assert!(body.contains("<caps>"));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_api_key_enforced_when_configured() {
        let transport = Arc::new(FakeTransport::default());

        let (status, _, body) = call(app(&transport, Some("k")), "/api?t=caps").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains(r#"code="100""#));

        let (status, _, _) = call(app(&transport, Some("k")), "/api?t=caps&apikey=k").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_parameter_is_201() {
        let transport = Arc::new(FakeTransport::default());
        let (status, content_type, body) =
            call(app(&transport, None), "/api?t=tvsearch&q=x&season=abc").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(content_type.starts_with("application/xml"));
        assert!(body.contains(r#"code="201""#));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_type_is_203() {
        let transport = Arc::new(FakeTransport::default());
        let (status, _, body) = call(app(&transport, None), "/api?t=music&q=x").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains(r#"code="203""#));
    }

    #[tokio::test]
    async fn test_direct_thread_search_feed() {
        let transport = logged_in_transport();
        let thread = ThreadFixture::new(9001, 52, "Dexter S01E01 ITA")
            .magnet(pages::magnet('a', "Dexter.S01E01"));
        transport.on_get("viewtopic.php?t=180404", 200, &thread.render());

        let (status, _, body) =
            call(app(&transport, None), "/api?t=search&q=thread::180404").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<item>"));
        assert!(body.contains("https://forum.test/viewtopic.php?t=180404"));
        assert_eq!(transport.count(Method::Get, "search.php"), 0);
    }

    #[tokio::test]
    async fn test_bare_search_answers_sample_without_forum() {
        let transport = Arc::new(FakeTransport::default());
        let (status, content_type, body) =
            call(app(&transport, None), "/api?t=search&limit=100").await;

        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("application/rss+xml"));
        assert_eq!(body.matches("<item>").count(), 1);
        assert!(body.contains(SAMPLE_TITLE));
        assert!(body.contains(r#"value="1000000000""#));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_bad_thread_id_is_201() {
        let transport = Arc::new(FakeTransport::default());
        let (status, _, body) =
            call(app(&transport, None), "/api?t=search&q=thread::abc").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains(r#"code="201""#));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_login_failure_is_100() {
        let transport = Arc::new(FakeTransport::default());
        transport
            .on_get("ucp.php", 200, &pages::login_form("tok"))
            .on_post(
                "ucp.php?mode=login",
                200,
                &pages::login_error("tok", "Password errata"),
            );

        let (status, _, body) = call(app(&transport, None), "/api?t=search&q=dexter").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains(r#"code="100""#));
    }

    #[tokio::test]
    async fn test_login_unreachable_is_100() {
        let transport = Arc::new(FakeTransport::default());
        transport
            .on_get_error("index.php", TransportErrorKind::Connect)
            .on_get_error("ucp.php", TransportErrorKind::Connect);

        let (status, _, body) = call(app(&transport, None), "/api?t=search&q=dexter").await;

        // login cannot reach the forum, which is an authentication failure
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains(r#"code="100""#));
    }
}
