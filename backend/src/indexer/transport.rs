//! HTTP transport for the forum
//!
//! Every request the indexer sends goes through a [`ForumTransport`]. The
//! production implementation wraps a `reqwest` client with a cookie jar, a
//! per-call timeout and a `governor` limiter so the forum is never hammered.
//! Tests swap in a scripted fake.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use reqwest::cookie::Jar;
use reqwest::{Client, header};
use tracing::debug;

use super::error::{TransportError, TransportErrorKind};

/// Browser user agents; one is picked per cookie jar.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// A fetched page.
#[derive(Debug, Clone)]
pub struct HttpPage {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Response body decoded as text
    pub body: String,
}

impl HttpPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal HTTP surface the indexer needs.
#[async_trait]
pub trait ForumTransport: Send + Sync {
    /// GET `url` with query parameters appended.
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpPage, TransportError>;

    /// POST an urlencoded form to `url` with extra request headers.
    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        headers: &[(&'static str, String)],
    ) -> Result<HttpPage, TransportError>;

    /// Drop every cookie, starting a fresh anonymous browser session.
    fn reset_cookies(&self);
}

/// Settings for [`ReqwestTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-call timeout
    pub timeout: Duration,
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Burst capacity
    pub burst_size: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            requests_per_second: 2,
            burst_size: 3,
        }
    }
}

/// `reqwest` backed transport with a shared cookie jar.
pub struct ReqwestTransport {
    /// Client bound to the cookie jar of the current browser session
    client: RwLock<Client>,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    config: TransportConfig,
}

impl ReqwestTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = Self::build_client(&config, Arc::new(Jar::default()))?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client: RwLock::new(client),
            limiter: Arc::new(RateLimiter::direct(quota)),
            config,
        })
    }

    fn build_client(config: &TransportConfig, jar: Arc<Jar>) -> reqwest::Result<Client> {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("it-IT,it;q=0.9,en-US;q=0.8,en;q=0.7"),
        );

        Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .cookie_provider(jar)
            .timeout(config.timeout)
            .gzip(true)
            .deflate(true)
            .build()
    }

    fn current_client(&self) -> Client {
        self.client.read().clone()
    }

    async fn read_page(url: &str, response: reqwest::Response) -> Result<HttpPage, TransportError> {
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| map_reqwest_error(url, e))?;

        Ok(HttpPage {
            url: final_url,
            status,
            body,
        })
    }
}

#[async_trait]
impl ForumTransport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpPage, TransportError> {
        self.limiter.until_ready().await;
        debug!(url = %url, params = query.len(), "GET");

        let response = self
            .current_client()
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        Self::read_page(url, response).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        headers: &[(&'static str, String)],
    ) -> Result<HttpPage, TransportError> {
        self.limiter.until_ready().await;
        debug!(url = %url, fields = form.len(), "POST");

        let mut request = self.current_client().post(url).form(form);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        Self::read_page(url, response).await
    }

    fn reset_cookies(&self) {
        match Self::build_client(&self.config, Arc::new(Jar::default())) {
            Ok(client) => {
                *self.client.write() = client;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to rebuild HTTP client, keeping previous cookies"
                );
            }
        }
    }
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(url, kind, error.to_string())
}
