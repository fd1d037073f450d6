//! Application configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::indexer::mircrew::IndexerSettings;
use crate::indexer::retry::RetryConfig;
use crate::indexer::session::Credentials;
use crate::indexer::transport::TransportConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub host: String,

    /// Server port
    pub port: u16,

    /// Optional Torznab API key; requests are unauthenticated when unset
    pub api_key: Option<String>,

    /// Forum login
    pub credentials: Credentials,

    /// Forum root URL
    pub base_url: String,

    /// Per-request HTTP timeout
    pub http_timeout: Duration,

    /// Outgoing request pacing
    pub requests_per_second: u32,

    pub fetch_max_retries: u32,
    pub login_max_attempts: u32,

    /// How long a login is trusted before it is revalidated
    pub session_max_age: Duration,

    /// Threads unlocked in parallel per search
    pub thread_concurrency: usize,

    /// Threads considered per search
    pub max_threads: usize,

    /// Items per response
    pub max_results: usize,

    /// Result cache lifetime (0 disables)
    pub cache_ttl: Duration,

    /// Sub-forums passed as `fid[]` to the forum search
    pub search_forum_ids: Vec<u32>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of a variable
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let username = var("MIRCREW_USERNAME").context("MIRCREW_USERNAME is required")?;
        let password = var("MIRCREW_PASSWORD").context("MIRCREW_PASSWORD is required")?;

        let search_forum_ids = match var("SEARCH_FORUM_IDS") {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse::<u32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("Invalid SEARCH_FORUM_IDS")?,
            None => vec![25, 26, 51, 52],
        };
        if search_forum_ids.is_empty() {
            bail!("SEARCH_FORUM_IDS must name at least one forum");
        }

        Ok(Self {
            host: var("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),

            port: var("API_PORT")
                .unwrap_or_else(|| "9118".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            api_key: var("API_KEY"),

            credentials: Credentials::new(username, password),

            base_url: var("MIRCREW_BASE_URL")
                .unwrap_or_else(|| "https://mircrew-releases.org".to_string())
                .trim_end_matches('/')
                .to_string(),

            http_timeout: Duration::from_secs(
                var("HTTP_TIMEOUT_SECS")
                    .unwrap_or_else(|| "30".to_string())
                    .parse()
                    .context("Invalid HTTP_TIMEOUT_SECS")?,
            ),

            requests_per_second: var("REQUESTS_PER_SECOND")
                .unwrap_or_else(|| "2".to_string())
                .parse()
                .context("Invalid REQUESTS_PER_SECOND")?,

            fetch_max_retries: var("FETCH_MAX_RETRIES")
                .unwrap_or_else(|| "3".to_string())
                .parse()
                .context("Invalid FETCH_MAX_RETRIES")?,

            login_max_attempts: var("LOGIN_MAX_ATTEMPTS")
                .unwrap_or_else(|| "3".to_string())
                .parse()
                .context("Invalid LOGIN_MAX_ATTEMPTS")?,

            session_max_age: Duration::from_secs(
                var("SESSION_MAX_AGE_SECS")
                    .unwrap_or_else(|| "3600".to_string())
                    .parse()
                    .context("Invalid SESSION_MAX_AGE_SECS")?,
            ),

            thread_concurrency: var("THREAD_CONCURRENCY")
                .unwrap_or_else(|| "2".to_string())
                .parse()
                .context("Invalid THREAD_CONCURRENCY")?,

            max_threads: var("MAX_THREADS")
                .unwrap_or_else(|| "25".to_string())
                .parse()
                .context("Invalid MAX_THREADS")?,

            max_results: var("MAX_RESULTS")
                .unwrap_or_else(|| "100".to_string())
                .parse()
                .context("Invalid MAX_RESULTS")?,

            cache_ttl: Duration::from_secs(
                var("CACHE_TTL_SECS")
                    .unwrap_or_else(|| "300".to_string())
                    .parse()
                    .context("Invalid CACHE_TTL_SECS")?,
            ),

            search_forum_ids,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.http_timeout,
            requests_per_second: self.requests_per_second,
            ..TransportConfig::default()
        }
    }

    pub fn indexer_settings(&self) -> IndexerSettings {
        IndexerSettings {
            base_url: self.base_url.clone(),
            login_retry: RetryConfig::with_attempts(self.login_max_attempts),
            fetch_retry: RetryConfig::with_attempts(self.fetch_max_retries),
            session_max_age: self.session_max_age,
            search_forum_ids: self.search_forum_ids.clone(),
            max_threads: self.max_threads,
            max_results: self.max_results.max(1),
            thread_concurrency: self.thread_concurrency.max(1),
            cache_ttl: self.cache_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    const CREDENTIALS: [(&str, &str); 2] =
        [("MIRCREW_USERNAME", "member"), ("MIRCREW_PASSWORD", "secret")];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&CREDENTIALS)).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:9118");
        assert_eq!(config.base_url, "https://mircrew-releases.org");
        assert_eq!(config.api_key, None);
        assert_eq!(config.search_forum_ids, vec![25, 26, 51, 52]);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));

        let settings = config.indexer_settings();
        assert_eq!(settings.max_threads, 25);
        assert_eq!(settings.thread_concurrency, 2);
        assert_eq!(settings.login_retry.max_attempts, 3);
        assert_eq!(config.transport().timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_credentials_is_an_error() {
        let err = Config::from_lookup(lookup(&[("MIRCREW_USERNAME", "member")])).unwrap_err();
        assert!(err.to_string().contains("MIRCREW_PASSWORD"));

        let err = Config::from_lookup(lookup(&[
            ("MIRCREW_USERNAME", " "),
            ("MIRCREW_PASSWORD", "secret"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MIRCREW_USERNAME"));
    }

    #[test]
    fn test_overrides() {
        let mut vars = CREDENTIALS.to_vec();
        vars.extend([
            ("MIRCREW_BASE_URL", "https://forum.test/"),
            ("API_KEY", "k"),
            ("SEARCH_FORUM_IDS", "25, 52"),
            ("CACHE_TTL_SECS", "0"),
            ("THREAD_CONCURRENCY", "0"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.base_url, "https://forum.test");
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.search_forum_ids, vec![25, 52]);
        assert_eq!(config.cache_ttl, Duration::ZERO);
        assert_eq!(config.indexer_settings().thread_concurrency, 1);
    }

    #[test]
    fn test_invalid_number() {
        let mut vars = CREDENTIALS.to_vec();
        vars.push(("API_PORT", "http"));
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("API_PORT"));
    }
}
