//! MirCrew indexer: the single search entry point
//!
//! A search validates the session, resolves the query into forum threads,
//! unlocks each thread with bounded parallelism (keeping forum order) and
//! translates the magnets into result items. A failing thread is logged and
//! skipped; only authentication failures and an unreachable forum abort the
//! whole search.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::client::{ClientConfig, ForumClient, ForumQuery, ThreadReference};
use super::error::{IndexerError, IndexerResult};
use super::retry::RetryConfig;
use super::session::{Credentials, SessionConfig, SessionManager};
use super::transport::ForumTransport;
use super::translate::ResultTranslator;
use super::types::{SearchRequest, SearchResultItem, TorznabCapabilities};
use super::unlock::{MagnetUnlocker, UnlockedThread};

/// Tunables of the indexer
#[derive(Debug, Clone)]
pub struct IndexerSettings {
    pub base_url: String,
    pub login_retry: RetryConfig,
    pub fetch_retry: RetryConfig,
    pub session_max_age: Duration,
    pub search_forum_ids: Vec<u32>,
    pub max_threads: usize,
    pub max_results: usize,
    pub thread_concurrency: usize,
    /// Zero disables the result cache
    pub cache_ttl: Duration,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            base_url: "https://mircrew-releases.org".to_string(),
            login_retry: RetryConfig::default(),
            fetch_retry: RetryConfig::default(),
            session_max_age: Duration::from_secs(3600),
            search_forum_ids: vec![25, 26, 51, 52],
            max_threads: 25,
            max_results: 100,
            thread_concurrency: 2,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

pub struct MirCrewIndexer {
    session: Arc<SessionManager>,
    client: Arc<ForumClient>,
    unlocker: MagnetUnlocker,
    cache: SearchCache,
    max_results: usize,
    thread_concurrency: usize,
}

impl MirCrewIndexer {
    pub fn new(
        transport: Arc<dyn ForumTransport>,
        credentials: Credentials,
        settings: IndexerSettings,
    ) -> Self {
        let session = Arc::new(SessionManager::new(
            transport,
            credentials,
            SessionConfig {
                login_retry: settings.login_retry.clone(),
                max_age: settings.session_max_age,
                ..SessionConfig::new(settings.base_url.clone())
            },
        ));
        let client = Arc::new(ForumClient::new(
            session.clone(),
            ClientConfig {
                search_forum_ids: settings.search_forum_ids.clone(),
                max_threads: settings.max_threads,
                fetch_retry: settings.fetch_retry.clone(),
            },
        ));

        Self {
            unlocker: MagnetUnlocker::new(client.clone()),
            session,
            client,
            cache: SearchCache::new(settings.cache_ttl),
            max_results: settings.max_results.max(1),
            thread_concurrency: settings.thread_concurrency.max(1),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn capabilities(&self) -> TorznabCapabilities {
        TorznabCapabilities::new(self.max_results)
    }

    /// Run a search and return one page of results.
    pub async fn search(&self, request: &SearchRequest) -> IndexerResult<Vec<SearchResultItem>> {
        let query = ForumQuery::parse(request.term())?;
        let key = request.cache_key();

        if let Some(items) = self.cache.get(&key) {
            debug!(query = %request.get_query_string(), "Serving search from cache");
            return Ok(self.paginate(items, request));
        }

        self.session.ensure_valid().await?;
        let threads = self.client.resolve(&query, request.year).await?;
        let unlocked = self.unlock_all(&threads).await?;

        let items = ResultTranslator::new(request).translate(&unlocked);
        info!(
            query = %request.get_query_string(),
            threads = threads.len(),
            results = items.len(),
            "Search complete"
        );

        self.cache.insert(key, items.clone());
        Ok(self.paginate(items, request))
    }

    async fn unlock_all(&self, threads: &[ThreadReference]) -> IndexerResult<Vec<UnlockedThread>> {
        let pending: Vec<_> = threads
            .iter()
            .map(|reference| self.process_thread(reference))
            .collect();
        let outcomes: Vec<IndexerResult<UnlockedThread>> = stream::iter(pending)
            .buffered(self.thread_concurrency)
            .collect()
            .await;

        let mut unlocked = Vec::with_capacity(outcomes.len());
        let mut network_failures = 0;

        for (reference, outcome) in threads.iter().zip(outcomes) {
            match outcome {
                Ok(thread) => unlocked.push(thread),
                Err(e @ IndexerError::Authentication(_)) => {
                    error!(
                        thread_id = %reference.id,
                        error = %e,
                        "Authentication lost during search"
                    );
                    return Err(e);
                }
                Err(e) => {
                    if matches!(&e, IndexerError::Fetch(f) if f.is_network()) {
                        network_failures += 1;
                    }
                    warn!(thread_id = %reference.id, error = %e, "Skipping thread");
                }
            }
        }

        if !threads.is_empty() && network_failures == threads.len() {
            return Err(IndexerError::Unreachable(format!(
                "all {} thread fetches failed",
                threads.len()
            )));
        }

        Ok(unlocked)
    }

    async fn process_thread(&self, reference: &ThreadReference) -> IndexerResult<UnlockedThread> {
        let page = self.client.fetch_thread(reference).await?;
        self.unlocker.unlock(page).await
    }

    fn paginate(
        &self,
        items: Vec<SearchResultItem>,
        request: &SearchRequest,
    ) -> Vec<SearchResultItem> {
        let offset = request.offset.unwrap_or(0);
        let limit = request
            .limit
            .unwrap_or(self.max_results)
            .min(self.max_results);

        items.into_iter().skip(offset).take(limit).collect()
    }
}

impl std::fmt::Debug for MirCrewIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirCrewIndexer")
            .field("base_url", &self.session.base_url())
            .field("cached_searches", &self.cache.len())
            .finish()
    }
}

/// Simple in-memory search cache
#[derive(Clone)]
struct SearchCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

struct CacheEntry {
    items: Vec<SearchResultItem>,
    expires_at: Instant,
}

impl SearchCache {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn get(&self, key: &str) -> Option<Vec<SearchResultItem>> {
        let entries = self.entries.read();
        entries.get(key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.items.clone())
            } else {
                None
            }
        })
    }

    fn insert(&self, key: String, items: Vec<SearchResultItem>) {
        if self.ttl.is_zero() {
            return;
        }
        self.cleanup();
        self.entries.write().insert(
            key,
            CacheEntry {
                items,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Remove expired entries
    fn cleanup(&self) {
        let mut entries = self.entries.write();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::error::{TransportError, TransportErrorKind};
    use crate::indexer::testing::{FakeTransport, Method, pages, pages::ThreadFixture};
    use crate::indexer::transport::HttpPage;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    /// Suspends before every request so parallel thread fetches interleave.
    struct YieldingTransport(Arc<FakeTransport>);

    #[async_trait]
    impl ForumTransport for YieldingTransport {
        async fn get(
            &self,
            url: &str,
            query: &[(String, String)],
        ) -> Result<HttpPage, TransportError> {
            tokio::task::yield_now().await;
            self.0.get(url, query).await
        }

        async fn post_form(
            &self,
            url: &str,
            form: &[(String, String)],
            headers: &[(&'static str, String)],
        ) -> Result<HttpPage, TransportError> {
            tokio::task::yield_now().await;
            self.0.post_form(url, form, headers).await
        }

        fn reset_cookies(&self) {
            self.0.reset_cookies();
        }
    }

    fn fast_settings() -> IndexerSettings {
        let fast = RetryConfig {
            max_attempts: 2,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            multiplier: 1.0,
        };
        IndexerSettings {
            base_url: "https://forum.test".to_string(),
            login_retry: fast.clone(),
            fetch_retry: fast,
            ..Default::default()
        }
    }

    fn indexer(transport: Arc<FakeTransport>, settings: IndexerSettings) -> MirCrewIndexer {
        transport
            .on_get("ucp.php?mode=login", 200, pages::login_form("tok"))
            .on_post("ucp.php?mode=login", 200, pages::logged_in());
        MirCrewIndexer::new(transport, Credentials::new("member", "secret"), settings)
    }

    fn movie_thread(post_id: u64, c: char, dn: &str) -> String {
        ThreadFixture::new(post_id, 25, dn).magnet(pages::magnet(c, dn)).render()
    }

    #[tokio::test]
    async fn test_invalid_direct_query_touches_nothing() {
        let transport = Arc::new(FakeTransport::new());
        let indexer = indexer(transport.clone(), fast_settings());

        let result = indexer.search(&SearchRequest::search("thread::abc")).await;
        assert_matches!(result, Err(IndexerError::InvalidQuery(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_results_keep_forum_order() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on_get(
                "search.php",
                200,
                pages::search_results(&[(101, "A", 25), (202, "B", 25), (303, "C", 25)]),
            )
            .on_get("viewtopic.php?t=101", 200, movie_thread(1010, '1', "Alpha"))
            .on_get("viewtopic.php?t=202", 200, movie_thread(2020, '2', "Bravo"))
            .on_get("viewtopic.php?t=303", 200, movie_thread(3030, '3', "Charlie"));
        let settings = IndexerSettings {
            thread_concurrency: 3,
            ..fast_settings()
        };
        let indexer = indexer(transport, settings);

        let items = indexer.search(&SearchRequest::movie_search("x")).await.unwrap();
        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Bravo", "Charlie"]);
    }

    #[tokio::test]
    async fn test_parallel_rejections_share_one_relogin() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on_get("ucp.php?mode=login", 200, pages::login_form("tok"))
            .on_post("ucp.php?mode=login", 200, pages::logged_in())
            .on_get("search.php", 200, pages::search_results(&[(101, "A", 25), (202, "B", 25)]))
            .on_get("viewtopic.php?t=101", 403, "forbidden")
            .on_get("viewtopic.php?t=101", 200, movie_thread(1010, '1', "Alpha"))
            .on_get("viewtopic.php?t=202", 403, "forbidden")
            .on_get("viewtopic.php?t=202", 200, movie_thread(2020, '2', "Bravo"));
        let settings = IndexerSettings {
            thread_concurrency: 2,
            ..fast_settings()
        };
        let indexer = MirCrewIndexer::new(
            Arc::new(YieldingTransport(transport.clone())),
            Credentials::new("member", "secret"),
            settings,
        );

        let items = indexer.search(&SearchRequest::movie_search("x")).await.unwrap();

        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Bravo"]);
        // the initial login plus a single renewal for both rejected threads
        assert_eq!(transport.count(Method::Post, "mode=login"), 2);
        assert_eq!(transport.count(Method::Get, "viewtopic.php"), 4);
    }

    #[tokio::test]
    async fn test_all_threads_unreachable() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on_get("search.php", 200, pages::search_results(&[(101, "A", 25), (202, "B", 25)]))
            .on_get_error("viewtopic.php", TransportErrorKind::Timeout);
        let indexer = indexer(transport, fast_settings());

        let result = indexer.search(&SearchRequest::search("x")).await;
        assert_matches!(result, Err(IndexerError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_no_threads_is_empty_result() {
        let transport = Arc::new(FakeTransport::new());
        transport.on_get("search.php", 200, pages::search_results(&[]));
        let indexer = indexer(transport, fast_settings());

        let items = indexer.search(&SearchRequest::search("nothing")).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_search_is_cached() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on_get("search.php", 200, pages::search_results(&[(101, "A", 25)]))
            .on_get("viewtopic.php?t=101", 200, movie_thread(1010, '1', "Alpha"));
        let indexer = indexer(transport.clone(), fast_settings());

        indexer.search(&SearchRequest::search("alpha")).await.unwrap();
        indexer.search(&SearchRequest::search("Alpha ")).await.unwrap();

        assert_eq!(transport.count(Method::Get, "search.php"), 1);
        assert_eq!(transport.count(Method::Get, "viewtopic.php"), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let transport = Arc::new(FakeTransport::new());
        transport.on_get("search.php", 200, pages::search_results(&[]));
        let settings = IndexerSettings {
            cache_ttl: Duration::ZERO,
            ..fast_settings()
        };
        let indexer = indexer(transport.clone(), settings);

        indexer.search(&SearchRequest::search("a")).await.unwrap();
        indexer.search(&SearchRequest::search("a")).await.unwrap();
        assert_eq!(transport.count(Method::Get, "search.php"), 2);
    }

    #[tokio::test]
    async fn test_offset_and_limit() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on_get(
                "search.php",
                200,
                pages::search_results(&[(101, "A", 25), (202, "B", 25), (303, "C", 25)]),
            )
            .on_get("viewtopic.php?t=101", 200, movie_thread(1010, '1', "Alpha"))
            .on_get("viewtopic.php?t=202", 200, movie_thread(2020, '2', "Bravo"))
            .on_get("viewtopic.php?t=303", 200, movie_thread(3030, '3', "Charlie"));
        let indexer = indexer(transport, fast_settings());

        let request = SearchRequest {
            offset: Some(1),
            limit: Some(1),
            ..SearchRequest::search("x")
        };
        let items = indexer.search(&request).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Bravo");
    }
}
