//! Forum markup parsing
//!
//! This is the only module that knows what the phpBB pages look like. All
//! selectors and structural markers live here so a theme change on the forum
//! only touches this file; the session, unlock and translate logic work with
//! the plain structs returned below.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::error::ParseError;
use super::magnet::{self, MagnetUri};

static FORM_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("form").unwrap());
static INPUT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("input[name]").unwrap());
static PASSWORD_INPUT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input[name='password']").unwrap());
static LOGOUT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href*='mode=logout']").unwrap());
static ERROR_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.error, p.error, span.error, div.alert-danger, .login-error").unwrap()
});

static SEARCH_ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("li.row, div.row, li.bg1, li.bg2, div.bg1, div.bg2").unwrap()
});
static TOPIC_TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.topictitle").unwrap());
static FORUM_LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href*='viewforum.php']").unwrap());

static THREAD_TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h2.topic-title a, h2.topic-title").unwrap());
static CRUMB_FORUM_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".crumb a[href*='viewforum.php'], .breadcrumbs a[href*='viewforum.php']")
        .unwrap()
});
static POST_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("div.post").unwrap());
static CONTENT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("div.content").unwrap());
static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static HIDEBOX_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse(".hidebox").unwrap());
static THANKS_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[id^='lnk_thanks_post']").unwrap());
static TIME_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("time[datetime]").unwrap());

static POST_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^p(\d+)$").unwrap());
static THREAD_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&;]t=(\d+)").unwrap());
static FORUM_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&;]f=(\d+)").unwrap());

/// Phrases the forum uses when a submitted form carried a stale token
const STALE_FORM_PHRASES: &[&str] = &[
    "il form inviato non è valido",
    "the submitted form was invalid",
    "form not valid",
];

/// Hidden fields of the phpBB login form.
#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub fields: Vec<(String, String)>,
}

impl LoginForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    /// The CSRF token phpBB embeds in every state-changing form.
    pub fn form_token(&self) -> Option<&str> {
        self.field("form_token")
    }
}

/// What a page says about the login state.
#[derive(Debug, Clone, Default)]
pub struct LoginIndicators {
    /// A logout link is present
    pub has_logout_control: bool,
    /// A login form (password input) is present
    pub has_login_form: bool,
    /// Absolute or relative href of the logout link
    pub logout_href: Option<String>,
    /// Text of the forum's error box, if any
    pub error_message: Option<String>,
}

impl LoginIndicators {
    /// Whether the error box reports a stale or invalid form submission.
    pub fn is_stale_form(&self) -> bool {
        self.error_message.as_deref().is_some_and(|msg| {
            let msg = msg.to_lowercase();
            STALE_FORM_PHRASES.iter().any(|phrase| msg.contains(phrase))
        })
    }
}

/// One thread row of a search result listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRow {
    pub thread_id: u64,
    pub title: String,
    pub href: String,
    pub forum_id: Option<u32>,
}

/// The thanks button attached to a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThanksControl {
    pub href: String,
    /// The button already offers to withdraw thanks
    pub already_thanked: bool,
}

/// The first post of a thread, as far as magnets are concerned.
#[derive(Debug, Clone)]
pub struct FirstPost {
    pub post_id: u64,
    /// Magnet URIs visible in the post, cleaned and de-duplicated, in page order
    pub magnets: Vec<String>,
    /// Number of hidden-content placeholders still locked
    pub locked_placeholders: usize,
    pub thanks: Option<ThanksControl>,
    pub posted_at: Option<DateTime<Utc>>,
}

/// Everything extracted from a thread page.
#[derive(Debug, Clone)]
pub struct ThreadDocument {
    pub title: Option<String>,
    pub forum_id: Option<u32>,
    pub first_post: FirstPost,
}

/// Extract the login form fields. Returns `None` when the page has no login form.
pub fn parse_login_form(html: &str) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    let form = find_login_form(&document)?;

    let fields = form
        .select(&INPUT_SELECTOR)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or("");
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    Some(LoginForm { fields })
}

/// Inspect a page for logged-in / logged-out markers.
pub fn login_indicators(html: &str) -> LoginIndicators {
    let document = Html::parse_document(html);

    let logout = document.select(&LOGOUT_SELECTOR).next();
    let error_message = document
        .select(&ERROR_SELECTOR)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|text| !text.is_empty());

    LoginIndicators {
        has_logout_control: logout.is_some(),
        has_login_form: find_login_form(&document).is_some(),
        logout_href: logout
            .and_then(|a| a.value().attr("href"))
            .map(|href| href.to_string()),
        error_message,
    }
}

/// Whether the forum served its login form instead of content.
pub fn shows_login_form(html: &str) -> bool {
    let indicators = login_indicators(html);
    indicators.has_login_form && !indicators.has_logout_control
}

fn find_login_form(document: &Html) -> Option<ElementRef<'_>> {
    document.select(&FORM_SELECTOR).find(|form| {
        let action = form.value().attr("action").unwrap_or("");
        action.contains("mode=login")
            || form.value().attr("id") == Some("login")
            || form.select(&PASSWORD_INPUT_SELECTOR).next().is_some()
    })
}

/// Parse a `search.php` result listing into thread rows, in forum order.
pub fn parse_search_results(html: &str) -> Vec<SearchRow> {
    let document = Html::parse_document(html);
    let mut rows: Vec<SearchRow> = Vec::new();

    for row in document.select(&SEARCH_ROW_SELECTOR) {
        let Some(link) = row.select(&TOPIC_TITLE_SELECTOR).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Some(thread_id) = thread_id_from_href(href) else {
            continue;
        };
        if rows.iter().any(|r| r.thread_id == thread_id) {
            continue;
        }

        let title = collapse_whitespace(&link.text().collect::<String>());
        let forum_id = row
            .select(&FORUM_LINK_SELECTOR)
            .filter_map(|a| a.value().attr("href"))
            .find_map(forum_id_from_href);

        rows.push(SearchRow {
            thread_id,
            title,
            href: href.to_string(),
            forum_id,
        });
    }

    rows
}

/// Parse a `viewtopic.php` page. Only the first post is inspected.
pub fn parse_thread(html: &str) -> Result<ThreadDocument, ParseError> {
    let document = Html::parse_document(html);

    let post = document
        .select(&POST_SELECTOR)
        .next()
        .ok_or(ParseError::MissingFirstPost)?;

    let post_id = post
        .value()
        .attr("id")
        .and_then(|id| POST_ID_RE.captures(id))
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .ok_or_else(|| ParseError::Markup("first post has no numeric id".to_string()))?;

    let content = post.select(&CONTENT_SELECTOR).next().unwrap_or(post);

    let mut magnets: Vec<String> = Vec::new();
    for anchor in content.select(&ANCHOR_SELECTOR) {
        let href = anchor.value().attr("href").unwrap_or("");
        if !magnet::is_magnet_href(href) {
            continue;
        }
        if let Some(parsed) = MagnetUri::parse(href) {
            if !magnets.contains(&parsed.uri) {
                magnets.push(parsed.uri);
            }
        }
    }

    let locked_placeholders = content
        .select(&HIDEBOX_SELECTOR)
        .filter(|el| !el.value().classes().any(|c| c == "unhide"))
        .count();

    let own_thanks_id = format!("lnk_thanks_post{}", post_id);
    let thanks = post
        .select(&THANKS_SELECTOR)
        .next()
        .or_else(|| {
            document
                .select(&THANKS_SELECTOR)
                .find(|a| a.value().attr("id") == Some(own_thanks_id.as_str()))
        })
        .and_then(|a| a.value().attr("href"))
        .map(|href| ThanksControl {
            already_thanked: href.contains("rthanks="),
            href: href.to_string(),
        });

    let posted_at = post
        .select(&TIME_SELECTOR)
        .filter_map(|t| t.value().attr("datetime"))
        .find_map(|dt| DateTime::parse_from_rfc3339(dt).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let title = document
        .select(&THREAD_TITLE_SELECTOR)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|t| !t.is_empty());

    let forum_id = document
        .select(&CRUMB_FORUM_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(forum_id_from_href)
        .last()
        .or_else(|| thanks.as_ref().and_then(|t| forum_id_from_href(&t.href)));

    Ok(ThreadDocument {
        title,
        forum_id,
        first_post: FirstPost {
            post_id,
            magnets,
            locked_placeholders,
            thanks,
            posted_at,
        },
    })
}

/// Extract the `t=` parameter of a topic link.
pub fn thread_id_from_href(href: &str) -> Option<u64> {
    THREAD_PARAM_RE
        .captures(href)
        .and_then(|caps| caps[1].parse().ok())
}

/// Extract the `f=` parameter of a forum link.
pub fn forum_id_from_href(href: &str) -> Option<u32> {
    FORUM_PARAM_RE
        .captures(href)
        .and_then(|caps| caps[1].parse().ok())
}

/// Resolve a page-relative href (`./viewtopic.php?...`) against the forum root.
pub fn absolute_url(base_url: &str, href: &str) -> String {
    let base = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };

    Url::parse(&base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| {
            let path = href.trim_start_matches("./").trim_start_matches('/');
            format!("{}{}", base, path)
        })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn login_page() -> String {
        r#"<html><body>
        <form action="./ucp.php?mode=login&amp;redirect=index.php" method="post" id="login">
          <input type="text" name="username" value="">
          <input type="password" name="password">
          <input type="hidden" name="sid" value="abc123">
          <input type="hidden" name="form_token" value="tok987">
          <input type="hidden" name="creation_time" value="1700000000">
          <input type="hidden" name="redirect" value="index.php">
        </form></body></html>"#
            .to_string()
    }

    #[test]
    fn test_parse_login_form_fields() {
        let form = parse_login_form(&login_page()).unwrap();
        assert_eq!(form.form_token(), Some("tok987"));
        assert_eq!(form.field("sid"), Some("abc123"));
        assert_eq!(form.field("creation_time"), Some("1700000000"));
        assert_eq!(form.field("username"), None);
    }

    #[test]
    fn test_login_indicators() {
        let logged_in = r#"<a href="./ucp.php?mode=logout&amp;sid=abc">Esci</a>"#;
        let indicators = login_indicators(logged_in);
        assert!(indicators.has_logout_control);
        assert!(!indicators.has_login_form);
        assert_eq!(
            indicators.logout_href.as_deref(),
            Some("./ucp.php?mode=logout&sid=abc")
        );

        let rejected = format!(
            r#"<div class="error">Hai inserito una password errata.</div>{}"#,
            login_page()
        );
        let indicators = login_indicators(&rejected);
        assert!(indicators.has_login_form);
        assert!(!indicators.has_logout_control);
        assert!(!indicators.is_stale_form());
        assert!(shows_login_form(&rejected));

        let stale = r#"<div class="error">Il form inviato non è valido. Prova di nuovo.</div>"#;
        assert!(login_indicators(stale).is_stale_form());
    }

    #[test]
    fn test_parse_search_results() {
        let html = r#"
        <ul class="topiclist">
          <li class="row bg1">
            <a href="./viewtopic.php?f=52&amp;t=180404&amp;hilit=dexter" class="topictitle">Dexter: Resurrection - Stagione 1</a>
            in <a href="./viewforum.php?f=52">Releases TV</a>
          </li>
          <li class="row bg2">
            <a href="./viewtopic.php?t=170001" class="topictitle">Dexter New Blood</a>
            in <a href="./viewforum.php?f=51">TV in corso</a>
          </li>
          <li class="row bg1"><span>no title link</span></li>
        </ul>"#;

        let rows = parse_search_results(html);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].thread_id, 180404);
        assert_eq!(rows[0].title, "Dexter: Resurrection - Stagione 1");
        assert_eq!(rows[0].forum_id, Some(52));
        assert_eq!(rows[1].thread_id, 170001);
        assert_eq!(rows[1].forum_id, Some(51));
    }

    #[test]
    fn test_parse_thread_first_post_only() {
        let html = format!(
            r#"
        <div class="navbar"><span class="crumb"><a href="./viewforum.php?f=52">TV</a></span></div>
        <h2 class="topic-title"><a href="./viewtopic.php?t=180404">Dexter: Resurrection</a></h2>
        <div id="p515262" class="post has-profile bg2">
          <p class="author"><time datetime="2025-07-11T18:30:00+00:00">11 lug 2025</time></p>
          <ul class="post-buttons">
            <li><a id="lnk_thanks_post515262" href="./viewtopic.php?f=52&amp;p=515262&amp;thanks=515262&amp;to_id=2">Grazie</a></li>
          </ul>
          <div class="content">
            <a href="magnet:?xt=urn:btih:{a}&amp;dn=Dexter.S01E01">E01</a>
            <a href="magnet:?xt=urn:btih:{a}&amp;dn=Dexter.S01E01">dup</a>
            <dl class="hidebox hi"><dt>Nascosto</dt><dd>Ringrazia per vedere</dd></dl>
          </div>
        </div>
        <div id="p515300" class="post bg1">
          <div class="content"><a href="magnet:?xt=urn:btih:{b}">reply magnet</a></div>
        </div>"#,
            a = HASH_A,
            b = HASH_B
        );

        let thread = parse_thread(&html).unwrap();
        assert_eq!(thread.title.as_deref(), Some("Dexter: Resurrection"));
        assert_eq!(thread.forum_id, Some(52));

        let post = thread.first_post;
        assert_eq!(post.post_id, 515262);
        assert_eq!(post.magnets.len(), 1);
        assert!(post.magnets[0].contains(HASH_A));
        assert_eq!(post.locked_placeholders, 1);
        let thanks = post.thanks.unwrap();
        assert!(!thanks.already_thanked);
        assert!(thanks.href.contains("thanks=515262"));
        assert!(post.posted_at.is_some());
    }

    #[test]
    fn test_unhidden_box_is_not_locked() {
        let html = r#"<div id="p10" class="post"><div class="content">
            <dl class="hidebox unhide"><dd><a href="magnet:?xt=urn:btih:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa">m</a></dd></dl>
            <a id="lnk_thanks_post10" href="./viewtopic.php?f=25&amp;p=10&amp;rthanks=10">Rimuovi</a>
        </div></div>"#;
        let post = parse_thread(html).unwrap().first_post;
        assert_eq!(post.locked_placeholders, 0);
        assert_eq!(post.magnets.len(), 1);
        assert!(post.thanks.unwrap().already_thanked);
    }

    #[test]
    fn test_thread_without_posts_is_parse_error() {
        let err = parse_thread("<html><body><p>Argomento non trovato</p></body></html>");
        assert!(matches!(err, Err(ParseError::MissingFirstPost)));
    }

    #[test]
    fn test_href_params() {
        assert_eq!(thread_id_from_href("./viewtopic.php?f=52&t=180404"), Some(180404));
        assert_eq!(thread_id_from_href("./viewtopic.php?p=5"), None);
        assert_eq!(forum_id_from_href("./viewforum.php?f=26"), Some(26));
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(
            absolute_url("https://mircrew-releases.org", "./viewtopic.php?t=1"),
            "https://mircrew-releases.org/viewtopic.php?t=1"
        );
        assert_eq!(
            absolute_url("https://mircrew-releases.org/", "https://other/x"),
            "https://other/x"
        );
    }
}
