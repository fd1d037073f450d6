//! Torznab category definitions and the forum sub-forum table
//!
//! Standard Torznab categories follow the Newznab numbering scheme.
//! Main categories are in thousands (2000, 5000, etc.) and subcategories
//! add tens (2010, 2020, etc.). Every MirCrew sub-forum maps to exactly one
//! of them; sub-forums missing from the table classify as "Other".

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// A mapping from a forum sub-forum id to a Torznab standard category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryMapping {
    /// The forum's sub-forum id (the `f=` parameter)
    pub forum_id: u32,
    /// The Torznab standard category ID
    pub torznab_cat: i32,
    /// Description of the sub-forum
    pub description: String,
}

impl CategoryMapping {
    pub fn new(forum_id: u32, torznab_cat: i32, desc: impl Into<String>) -> Self {
        Self {
            forum_id,
            torznab_cat,
            description: desc.into(),
        }
    }
}

/// A Torznab category definition
#[derive(Debug, Clone)]
pub struct TorznabCategory {
    pub id: i32,
    pub name: &'static str,
    pub parent_id: Option<i32>,
}

impl TorznabCategory {
    pub const fn new(id: i32, name: &'static str, parent_id: Option<i32>) -> Self {
        Self {
            id,
            name,
            parent_id,
        }
    }
}

/// Torznab categories this indexer can emit
pub static TORZNAB_CATEGORIES: &[TorznabCategory] = &[
    // Movies (2000)
    TorznabCategory::new(2000, "Movies", None),
    TorznabCategory::new(2020, "Movies/Other", Some(2000)),
    // Audio (3000)
    TorznabCategory::new(3000, "Audio", None),
    TorznabCategory::new(3030, "Audio/Audiobook", Some(3000)),
    // TV (5000)
    TorznabCategory::new(5000, "TV", None),
    TorznabCategory::new(5070, "TV/Anime", Some(5000)),
    TorznabCategory::new(5080, "TV/Documentary", Some(5000)),
    // Books (7000)
    TorznabCategory::new(7000, "Books", None),
    TorznabCategory::new(7010, "Books/Mags", Some(7000)),
    TorznabCategory::new(7020, "Books/EBook", Some(7000)),
    TorznabCategory::new(7030, "Books/Comics", Some(7000)),
    // Other (8000)
    TorznabCategory::new(8000, "Other", None),
];

/// Common category constants for easy reference
pub mod cats {
    pub const MOVIES: i32 = 2000;
    pub const AUDIO: i32 = 3000;
    pub const TV: i32 = 5000;
    pub const BOOKS: i32 = 7000;
    pub const OTHER: i32 = 8000;

    pub const MOVIES_OTHER: i32 = 2020;
    pub const AUDIO_AUDIOBOOK: i32 = 3030;
    pub const TV_ANIME: i32 = 5070;
    pub const TV_DOCUMENTARY: i32 = 5080;
    pub const BOOKS_MAGS: i32 = 7010;
    pub const BOOKS_EBOOK: i32 = 7020;
    pub const BOOKS_COMICS: i32 = 7030;
}

/// Static sub-forum table of mircrew-releases.org
pub static FORUM_CATEGORIES: Lazy<Vec<CategoryMapping>> = Lazy::new(|| {
    vec![
        // Movies
        CategoryMapping::new(25, cats::MOVIES, "Video Releases"),
        CategoryMapping::new(26, cats::MOVIES, "Releases Film"),
        // TV
        CategoryMapping::new(51, cats::TV, "Releases TV Stagioni in corso"),
        CategoryMapping::new(52, cats::TV, "Releases TV Stagioni complete"),
        CategoryMapping::new(29, cats::TV_DOCUMENTARY, "Documentari"),
        CategoryMapping::new(30, cats::TV, "TV Show"),
        CategoryMapping::new(31, cats::TV, "Teatro"),
        // Anime
        CategoryMapping::new(33, cats::TV_ANIME, "Animazione Releases"),
        CategoryMapping::new(34, cats::MOVIES_OTHER, "Anime - Movies"),
        CategoryMapping::new(35, cats::TV_ANIME, "Anime - Serie"),
        CategoryMapping::new(36, cats::MOVIES_OTHER, "Cartoon - Movies"),
        CategoryMapping::new(37, cats::TV_ANIME, "Cartoon - Serie"),
        // Books
        CategoryMapping::new(39, cats::BOOKS, "Libreria Releases"),
        CategoryMapping::new(40, cats::BOOKS_EBOOK, "E-Books"),
        CategoryMapping::new(41, cats::AUDIO_AUDIOBOOK, "A-Books"),
        CategoryMapping::new(42, cats::BOOKS_COMICS, "Comics"),
        CategoryMapping::new(43, cats::BOOKS_MAGS, "Edicola"),
        // Audio
        CategoryMapping::new(45, cats::AUDIO, "Music Releases"),
        CategoryMapping::new(46, cats::AUDIO, "Musica - Audio"),
    ]
});

/// Coarse content kind used by downstream automation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Movie,
    Tv,
    Other,
}

impl ContentKind {
    pub fn from_torznab(cat: i32) -> Self {
        match cat / 1000 {
            2 => ContentKind::Movie,
            5 => ContentKind::Tv,
            _ => ContentKind::Other,
        }
    }
}

/// Map a sub-forum id to its Torznab category; unknown or missing ids are "Other".
pub fn classify_forum(forum_id: Option<u32>) -> i32 {
    forum_id
        .and_then(|id| FORUM_CATEGORIES.iter().find(|m| m.forum_id == id))
        .map(|m| m.torznab_cat)
        .unwrap_or(cats::OTHER)
}

/// Get a category by ID
pub fn get_category(id: i32) -> Option<&'static TorznabCategory> {
    TORZNAB_CATEGORIES.iter().find(|c| c.id == id)
}

/// Expand categories to include all subcategories
/// E.g., [5000] -> [5000, 5070, 5080]
pub fn expand_categories(categories: &[i32]) -> Vec<i32> {
    let mut expanded = vec![];

    for &cat in categories {
        expanded.push(cat);

        for torznab_cat in TORZNAB_CATEGORIES {
            if torznab_cat.parent_id == Some(cat) {
                expanded.push(torznab_cat.id);
            }
        }
    }

    expanded.sort();
    expanded.dedup();
    expanded
}

/// Whether an item in `cat` satisfies a request for `requested` categories.
/// An empty request accepts everything.
pub fn category_requested(requested: &[i32], cat: i32) -> bool {
    requested.is_empty() || expand_categories(requested).contains(&cat)
}

/// Typical release size for a category, used when nothing better is known
pub fn default_size(cat: i32) -> u64 {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;

    match cat / 1000 {
        2 => 10 * GB,
        5 => 2 * GB,
        3 | 7 => 512 * MB,
        _ => GB,
    }
}
