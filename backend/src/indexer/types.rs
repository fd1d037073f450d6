//! Core types for the indexer
//!
//! These types are modeled after the Torznab specification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::categories::{ContentKind, TORZNAB_CATEGORIES, TorznabCategory};

/// Type of search query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// General text search
    #[default]
    Search,
    /// TV show search (supports season/episode)
    TvSearch,
    /// Movie search
    MovieSearch,
    /// Capabilities request
    Caps,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryType::Search => write!(f, "search"),
            QueryType::TvSearch => write!(f, "tvsearch"),
            QueryType::MovieSearch => write!(f, "movie"),
            QueryType::Caps => write!(f, "caps"),
        }
    }
}

impl std::str::FromStr for QueryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "search" | "q" => Ok(QueryType::Search),
            "tvsearch" | "tv-search" | "tv" => Ok(QueryType::TvSearch),
            "movie" | "movie-search" | "moviesearch" => Ok(QueryType::MovieSearch),
            "caps" | "capabilities" => Ok(QueryType::Caps),
            _ => Err(anyhow::anyhow!("Unknown query type: {}", s)),
        }
    }
}

/// A search request in Torznab terms
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// The type of search
    pub query_type: QueryType,

    /// Free-text search term, or `thread::<id>` for a direct thread lookup
    pub search_term: Option<String>,

    /// Categories to search in (Torznab category IDs)
    pub categories: Vec<i32>,

    /// Season number
    pub season: Option<u32>,
    /// Episode number
    pub episode: Option<u32>,
    /// Release year, used as the search term when nothing else is given
    pub year: Option<u32>,

    /// Maximum number of results
    pub limit: Option<usize>,
    /// Offset for pagination
    pub offset: Option<usize>,
}

impl SearchRequest {
    /// Create a new search query
    pub fn search(term: &str) -> Self {
        Self {
            query_type: QueryType::Search,
            search_term: Some(term.to_string()),
            ..Default::default()
        }
    }

    /// Create a TV search query
    pub fn tv_search(term: &str) -> Self {
        Self {
            query_type: QueryType::TvSearch,
            search_term: Some(term.to_string()),
            ..Default::default()
        }
    }

    /// Create a movie search query
    pub fn movie_search(term: &str) -> Self {
        Self {
            query_type: QueryType::MovieSearch,
            search_term: Some(term.to_string()),
            ..Default::default()
        }
    }

    /// Add season/episode to a TV search
    pub fn with_season_episode(mut self, season: u32, episode: Option<u32>) -> Self {
        self.season = Some(season);
        self.episode = episode;
        self
    }

    /// Add categories to the query
    pub fn with_categories(mut self, cats: Vec<i32>) -> Self {
        self.categories = cats;
        self
    }

    /// A bare `t=search` with nothing to look for. Torznab clients send this
    /// to test the indexer, and it is answered without touching the forum.
    pub fn is_indexer_test(&self) -> bool {
        self.query_type == QueryType::Search
            && self.term().is_empty()
            && self.categories.is_empty()
            && self.season.is_none()
            && self.episode.is_none()
            && self.year.is_none()
            && self.offset.unwrap_or(0) == 0
    }

    /// Trimmed search term, `""` when absent
    pub fn term(&self) -> &str {
        self.search_term.as_deref().map(str::trim).unwrap_or("")
    }

    /// Get the query string for display/logging
    pub fn get_query_string(&self) -> String {
        let mut parts = vec![];

        if !self.term().is_empty() {
            parts.push(self.term().to_string());
        }

        if let Some(season) = self.season {
            match self.episode {
                Some(ep) => parts.push(format!("S{:02}E{:02}", season, ep)),
                None => parts.push(format!("S{:02}", season)),
            }
        }

        parts.join(" ")
    }

    /// Cache key for the result set of this query; paging is not part of it
    pub fn cache_key(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut normalized = self.clone();
        normalized.search_term = Some(self.term().to_lowercase());
        normalized.limit = None;
        normalized.offset = None;
        normalized.categories.sort_unstable();
        normalized.categories.dedup();

        let json = serde_json::to_string(&normalized).unwrap_or_default();
        let hash = Sha256::digest(json.as_bytes());
        format!("{:x}", hash)
    }
}

/// Search parameters advertised for a search mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParam {
    Q,
    Cat,
    Season,
    Ep,
}

impl SearchParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchParam::Q => "q",
            SearchParam::Cat => "cat",
            SearchParam::Season => "season",
            SearchParam::Ep => "ep",
        }
    }
}

/// Capabilities of the indexer (Torznab-compatible)
#[derive(Debug, Clone)]
pub struct TorznabCapabilities {
    /// Maximum results per page
    pub limits_max: usize,
    /// Default results per page
    pub limits_default: usize,
    pub search_params: Vec<SearchParam>,
    pub tv_search_params: Vec<SearchParam>,
    pub movie_search_params: Vec<SearchParam>,
    pub categories: &'static [TorznabCategory],
}

impl TorznabCapabilities {
    pub fn new(max_results: usize) -> Self {
        use SearchParam::*;

        Self {
            limits_max: max_results,
            limits_default: max_results,
            search_params: vec![Q, Cat, Season, Ep],
            tv_search_params: vec![Q, Cat, Season, Ep],
            movie_search_params: vec![Q, Cat],
            categories: TORZNAB_CATEGORIES,
        }
    }

    /// Comma separated list for the `supportedParams` attribute
    pub fn params_attr(params: &[SearchParam]) -> String {
        params
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Season/episode markers recovered from a release title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Last episode of a multi-episode release (`S01E01-E03`)
    pub episode_end: Option<u32>,
}

/// One release in a search response. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub title: String,
    /// Unique identifier: `<thread id>-<info hash>`
    pub guid: String,
    pub magnet_uri: String,
    /// Lowercase hex info-hash
    pub info_hash: String,
    /// Torznab category ID
    pub category: i32,
    pub kind: ContentKind,
    pub episode: EpisodeInfo,
    /// Forum thread the magnet was found in
    pub thread_url: String,
    pub thread_id: u64,
    /// Size in bytes, exact or estimated
    pub size: u64,
    pub publish_date: DateTime<Utc>,
}

impl SearchResultItem {
    /// Forum releases carry no swarm data
    pub const SEEDERS: u32 = 1;
    pub const PEERS: u32 = 2;
}
