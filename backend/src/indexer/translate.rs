//! Translation of unlocked magnets into search result items
//!
//! Title, category, season/episode and size are derived here; request filters
//! (category, season, episode) and info-hash de-duplication are applied in the
//! same pass so the first occurrence of a hash always wins.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::categories::{self, ContentKind};
use super::types::{EpisodeInfo, SearchRequest, SearchResultItem};
use super::unlock::{UnlockedMagnet, UnlockedThread};

static EPISODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bS(\d{1,2})[ ._-]?E(\d{1,3})(?:\s*-\s*(?:S\d{1,2})?E?(\d{1,3})\b)?").unwrap()
});
static CROSS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})x(\d{2,3})(?:-(\d{2,3}))?\b").unwrap());
static SEASON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bS(\d{1,2})\b").unwrap());
static SEASON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:season|stagione)\s*(\d{1,2})\b").unwrap());
static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*(TB|TiB|GB|GiB|MB|MiB|KB|KiB)\b").unwrap()
});

/// Parse season/episode markers from a release title.
pub fn parse_episode(title: &str) -> EpisodeInfo {
    for re in [&*EPISODE_RE, &*CROSS_RE] {
        if let Some(caps) = re.captures(title) {
            let episode = capture_number(caps.get(2));
            return EpisodeInfo {
                season: capture_number(caps.get(1)),
                episode,
                episode_end: capture_number(caps.get(3)).filter(|end| Some(*end) > episode),
            };
        }
    }

    let season = SEASON_RE
        .captures(title)
        .or_else(|| SEASON_WORD_RE.captures(title))
        .and_then(|caps| capture_number(caps.get(1)));

    EpisodeInfo {
        season,
        ..Default::default()
    }
}

fn capture_number(m: Option<regex::Match<'_>>) -> Option<u32> {
    m.and_then(|m| m.as_str().parse().ok())
}

/// Whether `info` satisfies the requested season and episode.
///
/// Items without the requested marker never match; a season pack does not
/// satisfy an episode request.
pub fn episode_matches(info: &EpisodeInfo, season: Option<u32>, episode: Option<u32>) -> bool {
    if let Some(season) = season {
        if info.season != Some(season) {
            return false;
        }
    }

    match (episode, info.episode) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(wanted), Some(first)) => {
            let last = info.episode_end.unwrap_or(first);
            (first..=last).contains(&wanted)
        }
    }
}

/// Parse a human readable size token (`1.5 GB`, `[700MB]`) into bytes.
pub fn parse_size(title: &str) -> Option<u64> {
    let caps = SIZE_RE.captures(title)?;
    let value: f64 = caps[1].replace(',', ".").parse().ok()?;
    let multiplier: f64 = match caps[2].to_ascii_uppercase().as_str() {
        "TB" | "TIB" => 1024f64.powi(4),
        "GB" | "GIB" => 1024f64.powi(3),
        "MB" | "MIB" => 1024f64.powi(2),
        _ => 1024.0,
    };

    let bytes = value * multiplier;
    (bytes >= 1.0).then_some(bytes as u64)
}

/// Turns unlocked threads into result items for one request.
pub struct ResultTranslator<'a> {
    request: &'a SearchRequest,
    now: DateTime<Utc>,
    seen: HashSet<String>,
}

impl<'a> ResultTranslator<'a> {
    pub fn new(request: &'a SearchRequest) -> Self {
        Self::at(request, Utc::now())
    }

    /// Translator using `now` as the fallback publish date.
    pub fn at(request: &'a SearchRequest, now: DateTime<Utc>) -> Self {
        Self {
            request,
            now,
            seen: HashSet::new(),
        }
    }

    /// Translate threads in order, filtering and de-duplicating as it goes.
    pub fn translate(&mut self, threads: &[UnlockedThread]) -> Vec<SearchResultItem> {
        threads
            .iter()
            .flat_map(|thread| thread.magnets.iter().map(move |magnet| (thread, magnet)))
            .filter_map(|(thread, magnet)| self.translate_one(thread, magnet))
            .collect()
    }

    fn translate_one(
        &mut self,
        thread: &UnlockedThread,
        magnet: &UnlockedMagnet,
    ) -> Option<SearchResultItem> {
        let item = self.build(thread, magnet);

        if !categories::category_requested(&self.request.categories, item.category) {
            return None;
        }
        if !episode_matches(&item.episode, self.request.season, self.request.episode) {
            return None;
        }
        if !self.seen.insert(item.info_hash.to_ascii_lowercase()) {
            return None;
        }

        Some(item)
    }

    fn build(&self, thread: &UnlockedThread, magnet: &UnlockedMagnet) -> SearchResultItem {
        let title = magnet
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or(thread.title.as_deref())
            .or(thread.reference.title.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Thread {}", thread.reference.id));

        let category = categories::classify_forum(thread.forum_id.or(thread.reference.forum_id));
        let size = magnet
            .exact_length
            .or_else(|| parse_size(&title))
            .unwrap_or_else(|| categories::default_size(category));

        SearchResultItem {
            guid: format!("{}-{}", thread.reference.id, magnet.info_hash),
            episode: parse_episode(&title),
            kind: ContentKind::from_torznab(category),
            magnet_uri: magnet.uri.clone(),
            info_hash: magnet.info_hash.clone(),
            category,
            thread_url: thread.reference.url.clone(),
            thread_id: thread.reference.id,
            size,
            publish_date: thread.posted_at.unwrap_or(self.now),
            title,
        }
    }
}
