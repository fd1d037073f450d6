//! Torznab request parsing
//!
//! Parses query parameters into SearchRequest structs.

use anyhow::{Result, anyhow};
use serde::Deserialize;

use crate::indexer::{QueryType, SearchRequest};

/// Torznab API request parameters
#[derive(Debug, Deserialize, Default)]
pub struct TorznabRequest {
    /// Query type: search, tvsearch, movie, caps
    pub t: Option<String>,
    /// Search query, or `thread::<id>`
    pub q: Option<String>,
    /// API key
    pub apikey: Option<String>,
    /// Categories (comma-separated)
    pub cat: Option<String>,
    /// Result limit
    pub limit: Option<String>,
    /// Result offset
    pub offset: Option<String>,

    // TV-specific
    /// Season number
    pub season: Option<String>,
    /// Episode number
    pub ep: Option<String>,

    pub year: Option<String>,
}

impl TorznabRequest {
    /// Convert to a SearchRequest
    pub fn to_query(&self) -> Result<SearchRequest> {
        let query_type = match self.t.as_deref() {
            None => QueryType::Search,
            Some(t) => t.parse()?,
        };

        let categories = match self.cat.as_deref() {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| parse_number::<i32>("cat", s))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let search_term = self
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);

        Ok(SearchRequest {
            query_type,
            search_term,
            categories,
            season: optional_number("season", self.season.as_deref())?,
            episode: optional_number("ep", self.ep.as_deref())?,
            year: optional_number("year", self.year.as_deref())?,
            limit: optional_number("limit", self.limit.as_deref())?,
            offset: optional_number("offset", self.offset.as_deref())?,
        })
    }
}

fn optional_number<T: std::str::FromStr>(name: &str, value: Option<&str>) -> Result<Option<T>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => parse_number(name, raw).map(Some),
    }
}

/// Keeps the digits of a parameter (`S01` -> `1`); a value without digits,
/// or one that overflows, is malformed.
fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(anyhow!("Invalid value for {}: {}", name, raw.trim()));
    }
    digits
        .parse()
        .map_err(|_| anyhow!("Invalid value for {}: {}", name, raw.trim()))
}
