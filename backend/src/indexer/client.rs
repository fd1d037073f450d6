//! Forum client: query classification, search and thread fetch
//!
//! Every request goes through the [`SessionManager`]. Transient failures are
//! retried with backoff. An authorization failure invalidates the login the
//! request ran under (unless a concurrent request already replaced it) and is
//! retried exactly once after re-authenticating.

use std::sync::Arc;

use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use super::error::{FetchError, IndexerError, ParseError};
use super::parser;
use super::retry::{RetryConfig, retry_async};
use super::session::SessionManager;
use super::transport::HttpPage;

/// Prefix of a direct thread query, e.g. `thread::180404`
pub const THREAD_QUERY_PREFIX: &str = "thread::";

static EPISODE_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:[SE]\d{1,4}){1,2}\b").unwrap());

/// A classified search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForumQuery {
    /// Fetch one thread by id, bypassing forum search
    Direct(u64),
    /// Free-text forum search
    Keywords(String),
}

impl ForumQuery {
    pub fn parse(query: &str) -> Result<Self, IndexerError> {
        let trimmed = query.trim();

        let is_direct = trimmed
            .get(..THREAD_QUERY_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(THREAD_QUERY_PREFIX));
        if !is_direct {
            return Ok(ForumQuery::Keywords(trimmed.to_string()));
        }

        let id = trimmed[THREAD_QUERY_PREFIX.len()..].trim();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(IndexerError::InvalidQuery(
                ParseError::InvalidThreadId(id.to_string()).to_string(),
            ));
        }

        id.parse().map(ForumQuery::Direct).map_err(|_| {
            IndexerError::InvalidQuery(ParseError::InvalidThreadId(id.to_string()).to_string())
        })
    }
}

/// How a thread reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadOrigin {
    Search,
    Direct,
}

/// A forum thread to inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadReference {
    pub id: u64,
    /// Absolute thread URL
    pub url: String,
    pub title: Option<String>,
    /// Sub-forum id, when the search listing showed it
    pub forum_id: Option<u32>,
    pub origin: ThreadOrigin,
}

/// A fetched thread page.
#[derive(Debug, Clone)]
pub struct ThreadPage {
    pub reference: ThreadReference,
    pub body: String,
}

/// Forum client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Sub-forums searched (`fid[]`)
    pub search_forum_ids: Vec<u32>,
    /// Threads taken from one search
    pub max_threads: usize,
    pub fetch_retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            search_forum_ids: vec![25, 26, 51, 52],
            max_threads: 25,
            fetch_retry: RetryConfig::default(),
        }
    }
}

pub struct ForumClient {
    session: Arc<SessionManager>,
    config: ClientConfig,
}

impl ForumClient {
    pub fn new(session: Arc<SessionManager>, config: ClientConfig) -> Self {
        Self { session, config }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn thread_url(&self, thread_id: u64) -> String {
        self.session.url(&format!("viewtopic.php?t={}", thread_id))
    }

    /// Turn a query into the threads to inspect. Direct queries never search.
    pub async fn resolve(
        &self,
        query: &ForumQuery,
        year: Option<u32>,
    ) -> Result<Vec<ThreadReference>, IndexerError> {
        match query {
            ForumQuery::Direct(id) => {
                debug!(thread_id = %id, "Direct thread query");
                Ok(vec![ThreadReference {
                    id: *id,
                    url: self.thread_url(*id),
                    title: None,
                    forum_id: None,
                    origin: ThreadOrigin::Direct,
                }])
            }
            ForumQuery::Keywords(keywords) => match self.search(keywords, year).await {
                Ok(threads) => Ok(threads),
                Err(IndexerError::Fetch(e)) => Err(IndexerError::Unreachable(e.to_string())),
                Err(e) => Err(e),
            },
        }
    }

    /// Search thread titles in the configured sub-forums.
    pub async fn search(
        &self,
        keywords: &str,
        year: Option<u32>,
    ) -> Result<Vec<ThreadReference>, IndexerError> {
        let keywords = normalize_keywords(keywords, year);
        info!(keywords = %keywords, "Searching forum");

        let mut query: Vec<(String, String)> = vec![
            ("keywords".to_string(), keywords),
            ("sf".to_string(), "titleonly".to_string()),
            ("sr".to_string(), "topics".to_string()),
            ("sk".to_string(), "t".to_string()),
            ("sd".to_string(), "d".to_string()),
            ("st".to_string(), "0".to_string()),
        ];
        for fid in &self.config.search_forum_ids {
            query.push(("fid[]".to_string(), fid.to_string()));
        }

        let page = self.fetch_authenticated("search.php", &query).await?;

        let threads: Vec<ThreadReference> = parser::parse_search_results(&page.body)
            .into_iter()
            .take(self.config.max_threads)
            .map(|row| ThreadReference {
                id: row.thread_id,
                url: self.thread_url(row.thread_id),
                title: Some(row.title),
                forum_id: row.forum_id,
                origin: ThreadOrigin::Search,
            })
            .collect();

        debug!(count = threads.len(), "Search returned threads");
        Ok(threads)
    }

    /// Fetch a thread page inside the session.
    pub async fn fetch_thread(
        &self,
        reference: &ThreadReference,
    ) -> Result<ThreadPage, IndexerError> {
        let query = vec![("t".to_string(), reference.id.to_string())];
        let page = self.fetch_authenticated("viewtopic.php", &query).await?;

        Ok(ThreadPage {
            reference: reference.clone(),
            body: page.body,
        })
    }

    async fn fetch_authenticated(
        &self,
        href: &str,
        query: &[(String, String)],
    ) -> Result<HttpPage, IndexerError> {
        let generation = self.session.generation().await;
        match self.fetch_with_retry(href, query).await {
            Err(e) if e.is_authorization() => {
                warn!(url = %href, error = %e, "Session rejected, re-authenticating");
                self.session.invalidate_generation(generation).await;
                self.session.ensure_valid().await?;
                Ok(self.fetch_with_retry(href, query).await?)
            }
            other => Ok(other?),
        }
    }

    async fn fetch_with_retry(
        &self,
        href: &str,
        query: &[(String, String)],
    ) -> Result<HttpPage, FetchError> {
        retry_async(
            || self.fetch_once(href, query),
            FetchError::is_transient,
            &self.config.fetch_retry,
            href,
        )
        .await
    }

    async fn fetch_once(
        &self,
        href: &str,
        query: &[(String, String)],
    ) -> Result<HttpPage, FetchError> {
        let page = self.session.get(href, query).await?;

        if !page.is_success() {
            return Err(FetchError::Status {
                url: page.url,
                status: page.status,
            });
        }
        if page.body.trim().is_empty() {
            return Err(FetchError::EmptyBody { url: page.url });
        }
        if parser::shows_login_form(&page.body) {
            return Err(FetchError::SessionExpired { url: page.url });
        }

        Ok(page)
    }
}

/// Prepare free text for phpBB's title search.
///
/// Episode tokens and colons are dropped. With several words each one is
/// made mandatory with `+`. An empty query searches for the year.
pub fn normalize_keywords(query: &str, year: Option<u32>) -> String {
    let stripped = EPISODE_TOKEN_RE.replace_all(query, " ").replace(':', " ");
    let words: Vec<&str> = stripped.split_whitespace().collect();

    match words.len() {
        0 => year
            .map(|y| y.to_string())
            .unwrap_or_else(|| chrono::Utc::now().year().to_string()),
        1 => words[0].to_string(),
        _ => words
            .iter()
            .map(|w| format!("+{}", w))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::error::{AuthenticationError, TransportErrorKind};
    use crate::indexer::session::{Credentials, SessionConfig};
    use crate::indexer::testing::{FakeTransport, Method, pages};
    use assert_matches::assert_matches;
    use std::time::Duration;

    const BASE: &str = "https://forum.test";

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            multiplier: 1.0,
        }
    }

    fn client(transport: Arc<FakeTransport>) -> ForumClient {
        transport
            .on_get("ucp.php?mode=login", 200, pages::login_form("tok"))
            .on_post("ucp.php?mode=login", 200, pages::logged_in());
        client_with(transport)
    }

    fn client_with(transport: Arc<FakeTransport>) -> ForumClient {
        let session = SessionManager::new(
            transport,
            Credentials::new("member", "secret"),
            SessionConfig {
                login_retry: fast_retry(),
                ..SessionConfig::new(BASE)
            },
        );
        ForumClient::new(
            Arc::new(session),
            ClientConfig {
                fetch_retry: fast_retry(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_parse_direct_query() {
        assert_eq!(ForumQuery::parse("thread::180404").unwrap(), ForumQuery::Direct(180404));
        assert_eq!(ForumQuery::parse("  THREAD::42 ").unwrap(), ForumQuery::Direct(42));
        assert_eq!(
            ForumQuery::parse("Dexter Resurrection").unwrap(),
            ForumQuery::Keywords("Dexter Resurrection".to_string())
        );
    }

    #[test]
    fn test_parse_invalid_thread_id() {
        assert_matches!(ForumQuery::parse("thread::abc"), Err(IndexerError::InvalidQuery(_)));
        assert_matches!(ForumQuery::parse("thread::"), Err(IndexerError::InvalidQuery(_)));
        assert_matches!(ForumQuery::parse("thread::-5"), Err(IndexerError::InvalidQuery(_)));
    }

    #[test]
    fn test_normalize_keywords() {
        assert_eq!(
            normalize_keywords("Dexter: Resurrection S01E02", None),
            "+Dexter +Resurrection"
        );
        assert_eq!(normalize_keywords("Oppenheimer", None), "Oppenheimer");
        assert_eq!(normalize_keywords("S01", Some(2024)), "2024");
        assert_eq!(normalize_keywords("  ", Some(1999)), "1999");
    }

    #[tokio::test]
    async fn test_direct_query_makes_no_search_request() {
        let transport = Arc::new(FakeTransport::new());
        let client = client(transport.clone());

        let threads = client
            .resolve(&ForumQuery::Direct(180404), None)
            .await
            .unwrap();

        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].origin, ThreadOrigin::Direct);
        assert_eq!(threads[0].url, "https://forum.test/viewtopic.php?t=180404");
        assert_eq!(transport.count(Method::Get, "search.php"), 0);
    }

    #[tokio::test]
    async fn test_search_builds_forum_query() {
        let transport = Arc::new(FakeTransport::new());
        transport.on_get(
            "search.php",
            200,
            pages::search_results(&[
                (101, "Dexter", 52),
                (202, "Dexter New Blood", 51),
                (101, "Dexter", 52),
            ]),
        );
        let client = client(transport.clone());

        let threads = client
            .resolve(&ForumQuery::Keywords("Dexter S01".to_string()), None)
            .await
            .unwrap();

        assert_eq!(threads.iter().map(|t| t.id).collect::<Vec<_>>(), vec![101, 202]);
        assert_eq!(threads[0].forum_id, Some(52));

        let search = transport
            .requests()
            .into_iter()
            .find(|r| r.target.contains("search.php"))
            .unwrap();
        assert!(search.target.contains("keywords=Dexter&"));
        assert!(search.target.contains("sf=titleonly"));
        assert!(search.target.contains("fid[]=25&fid[]=26&fid[]=51&fid[]=52"));
    }

    #[tokio::test]
    async fn test_search_is_capped() {
        let rows: Vec<(u64, String, u32)> = (1..=40)
            .map(|i| (1000 + i, format!("T{}", i), 25))
            .collect();
        let rows: Vec<(u64, &str, u32)> = rows
            .iter()
            .map(|(id, t, f)| (*id, t.as_str(), *f))
            .collect();
        let transport = Arc::new(FakeTransport::new());
        transport.on_get("search.php", 200, pages::search_results(&rows));
        let client = client(transport);

        let threads = client.search("anything", None).await.unwrap();
        assert_eq!(threads.len(), 25);
    }

    #[tokio::test]
    async fn test_failed_search_is_unreachable() {
        let transport = Arc::new(FakeTransport::new());
        transport.on_get_error("search.php", TransportErrorKind::Timeout);
        let client = client(transport.clone());

        let result = client
            .resolve(&ForumQuery::Keywords("Dexter".to_string()), None)
            .await;
        assert_matches!(result, Err(IndexerError::Unreachable(_)));
        assert_eq!(transport.count(Method::Get, "search.php"), 3);
    }

    #[tokio::test]
    async fn test_transient_fetch_is_retried() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on_get("viewtopic.php?t=303", 502, "bad gateway")
            .on_get("viewtopic.php?t=303", 200, pages::logged_in());
        let client = client(transport.clone());
        let reference = client.resolve(&ForumQuery::Direct(303), None).await.unwrap().remove(0);

        client.fetch_thread(&reference).await.unwrap();
        assert_eq!(transport.count(Method::Get, "viewtopic.php?t=303"), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let transport = Arc::new(FakeTransport::new());
        transport.on_get("viewtopic.php?t=404", 404, "Argomento non trovato");
        let client = client(transport.clone());
        let reference = client.resolve(&ForumQuery::Direct(404), None).await.unwrap().remove(0);

        let result = client.fetch_thread(&reference).await;
        assert_matches!(result, Err(IndexerError::Fetch(FetchError::Status { status: 404, .. })));
        assert_eq!(transport.count(Method::Get, "viewtopic.php?t=404"), 1);
    }

    #[tokio::test]
    async fn test_forbidden_reauthenticates_once() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on_get("viewtopic.php?t=505", 403, "forbidden")
            .on_get("viewtopic.php?t=505", 200, pages::logged_in());
        let client = client(transport.clone());
        client.session().ensure_valid().await.unwrap();
        let reference = client.resolve(&ForumQuery::Direct(505), None).await.unwrap().remove(0);

        client.fetch_thread(&reference).await.unwrap();
        assert_eq!(transport.count(Method::Post, "mode=login"), 2);
        assert_eq!(transport.count(Method::Get, "viewtopic.php?t=505"), 2);
    }

    #[tokio::test]
    async fn test_login_page_instead_of_thread_reauthenticates() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on_get("viewtopic.php?t=606", 200, pages::login_form("expired"))
            .on_get("viewtopic.php?t=606", 200, pages::logged_in());
        let client = client(transport.clone());
        client.session().ensure_valid().await.unwrap();
        let reference = client.resolve(&ForumQuery::Direct(606), None).await.unwrap().remove(0);

        client.fetch_thread(&reference).await.unwrap();
        assert_eq!(transport.count(Method::Post, "mode=login"), 2);
    }

    #[tokio::test]
    async fn test_reauth_failure_is_authentication_error() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on_get("ucp.php?mode=login", 200, pages::login_form("tok"))
            .on_post("ucp.php?mode=login", 200, pages::logged_in())
            .on_post("ucp.php?mode=login", 200, pages::login_error("t", "Account bannato"))
            .on_get("viewtopic.php?t=707", 401, "unauthorized");
        let client = client_with(transport.clone());
        client.session().ensure_valid().await.unwrap();
        let reference = client.resolve(&ForumQuery::Direct(707), None).await.unwrap().remove(0);

        let result = client.fetch_thread(&reference).await;
        assert_matches!(
            result,
            Err(IndexerError::Authentication(AuthenticationError::Rejected { .. }))
        );
        assert_eq!(transport.count(Method::Get, "viewtopic.php?t=707"), 1);
    }
}
