//! Scripted in-memory transport and forum page fixtures
//!
//! Routes match on a substring of `url?query`; the longest matching pattern
//! wins. Each route replays its queued responses in order and keeps repeating
//! the last one. Unmatched requests get an empty 404.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error::{TransportError, TransportErrorKind};
use super::transport::{ForumTransport, HttpPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A request seen by the fake.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// `url?k=v&...` with query parameters unencoded
    pub target: String,
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
enum Reply {
    Page { status: u16, body: String },
    Fail(TransportErrorKind),
}

struct Route {
    method: Method,
    pattern: String,
    replies: VecDeque<Reply>,
}

#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
    cookie_resets: AtomicU32,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(&self, pattern: &str, status: u16, body: impl Into<String>) -> &Self {
        self.push(Method::Get, pattern, Reply::Page {
            status,
            body: body.into(),
        })
    }

    pub fn on_get_error(&self, pattern: &str, kind: TransportErrorKind) -> &Self {
        self.push(Method::Get, pattern, Reply::Fail(kind))
    }

    pub fn on_post(&self, pattern: &str, status: u16, body: impl Into<String>) -> &Self {
        self.push(Method::Post, pattern, Reply::Page {
            status,
            body: body.into(),
        })
    }

    pub fn on_post_error(&self, pattern: &str, kind: TransportErrorKind) -> &Self {
        self.push(Method::Post, pattern, Reply::Fail(kind))
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests of `method` whose target contains `pattern`.
    pub fn count(&self, method: Method, pattern: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.target.contains(pattern))
            .count()
    }

    pub fn cookie_resets(&self) -> u32 {
        self.cookie_resets.load(Ordering::SeqCst)
    }

    fn push(&self, method: Method, pattern: &str, reply: Reply) -> &Self {
        let mut routes = self.routes.lock();
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.pattern == pattern)
        {
            Some(route) => route.replies.push_back(reply),
            None => routes.push(Route {
                method,
                pattern: pattern.to_string(),
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    fn respond(&self, method: Method, target: &str) -> Result<HttpPage, TransportError> {
        let mut routes = self.routes.lock();
        let route = routes
            .iter_mut()
            .filter(|r| r.method == method && target.contains(r.pattern.as_str()))
            .max_by_key(|r| r.pattern.len());

        let reply = match route {
            Some(route) if route.replies.len() > 1 => route.replies.pop_front(),
            Some(route) => route.replies.front().cloned(),
            None => None,
        };

        match reply {
            Some(Reply::Page { status, body }) => Ok(HttpPage {
                url: target.to_string(),
                status,
                body,
            }),
            Some(Reply::Fail(kind)) => Err(TransportError::new(target, kind, "scripted failure")),
            None => Ok(HttpPage {
                url: target.to_string(),
                status: 404,
                body: String::new(),
            }),
        }
    }
}

fn target(url: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let params: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, sep, params.join("&"))
}

#[async_trait]
impl ForumTransport for FakeTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpPage, TransportError> {
        let target = target(url, query);
        self.requests.lock().push(RecordedRequest {
            method: Method::Get,
            target: target.clone(),
            form: Vec::new(),
            headers: Vec::new(),
        });
        self.respond(Method::Get, &target)
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        headers: &[(&'static str, String)],
    ) -> Result<HttpPage, TransportError> {
        self.requests.lock().push(RecordedRequest {
            method: Method::Post,
            target: url.to_string(),
            form: form.to_vec(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });
        self.respond(Method::Post, url)
    }

    fn reset_cookies(&self) {
        self.cookie_resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// HTML fixtures shaped like the forum's prosilver theme.
pub mod pages {
    /// Login page carrying a CSRF token.
    pub fn login_form(token: &str) -> String {
        format!(
            r#"<html><body>
            <form action="./ucp.php?mode=login" method="post" id="login">
              <input type="text" name="username" value="">
              <input type="password" name="password">
              <input type="hidden" name="sid" value="sid-{token}">
              <input type="hidden" name="form_token" value="{token}">
              <input type="hidden" name="creation_time" value="1700000000">
              <input type="hidden" name="redirect" value="index.php">
            </form></body></html>"#
        )
    }

    /// Login page after a failed submission.
    pub fn login_error(token: &str, message: &str) -> String {
        format!(r#"<div class="error">{}</div>{}"#, message, login_form(token))
    }

    /// Any page as seen by a logged-in member.
    pub fn logged_in() -> String {
        r#"<html><body><ul class="nav"><li><a href="./ucp.php?mode=logout&amp;sid=s1">Esci</a></li></ul>
        <p>Bentornato</p></body></html>"#
            .to_string()
    }

    /// A search listing with `(thread id, title, forum id)` rows.
    pub fn search_results(rows: &[(u64, &str, u32)]) -> String {
        let items: String = rows
            .iter()
            .map(|(id, title, forum)| {
                format!(
                    r#"<li class="row bg1"><dl><dt>
                    <a href="./viewtopic.php?f={forum}&amp;t={id}" class="topictitle">{title}</a>
                    in <a href="./viewforum.php?f={forum}">Forum {forum}</a></dt></dl></li>"#
                )
            })
            .collect();
        format!(
            r#"<html><body><a href="./ucp.php?mode=logout&amp;sid=s1">Esci</a>
            <ul class="topiclist topics">{}</ul></body></html>"#,
            items
        )
    }

    /// State of the thanks button on a fixture post.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Thanks {
        Missing,
        Available,
        AlreadyGiven,
    }

    /// Builder for a thread page.
    #[derive(Debug, Clone)]
    pub struct ThreadFixture {
        pub post_id: u64,
        pub forum_id: u32,
        pub title: String,
        pub magnets: Vec<String>,
        pub locked: usize,
        pub thanks: Thanks,
        pub posted: Option<String>,
        pub reply_magnets: Vec<String>,
    }

    impl ThreadFixture {
        pub fn new(post_id: u64, forum_id: u32, title: &str) -> Self {
            Self {
                post_id,
                forum_id,
                title: title.to_string(),
                magnets: Vec::new(),
                locked: 0,
                thanks: Thanks::Available,
                posted: Some("2025-07-11T18:30:00+00:00".to_string()),
                reply_magnets: Vec::new(),
            }
        }

        pub fn magnet(mut self, uri: impl Into<String>) -> Self {
            self.magnets.push(uri.into());
            self
        }

        pub fn locked(mut self, placeholders: usize) -> Self {
            self.locked = placeholders;
            self
        }

        pub fn thanks(mut self, thanks: Thanks) -> Self {
            self.thanks = thanks;
            self
        }

        pub fn reply_magnet(mut self, uri: impl Into<String>) -> Self {
            self.reply_magnets.push(uri.into());
            self
        }

        pub fn render(&self) -> String {
            let post_id = self.post_id;
            let forum_id = self.forum_id;

            let thanks = match self.thanks {
                Thanks::Missing => String::new(),
                Thanks::Available => format!(
                    r#"<li><a id="lnk_thanks_post{post_id}" href="./viewtopic.php?f={forum_id}&amp;p={post_id}&amp;thanks={post_id}&amp;to_id=2">Grazie</a></li>"#
                ),
                Thanks::AlreadyGiven => format!(
                    r#"<li><a id="lnk_thanks_post{post_id}" href="./viewtopic.php?f={forum_id}&amp;p={post_id}&amp;rthanks={post_id}&amp;to_id=2">Rimuovi grazie</a></li>"#
                ),
            };
            let magnets: String = self
                .magnets
                .iter()
                .map(|m| {
                    format!(
                        r#"<p><a href="{}" class="postlink">magnet</a></p>"#,
                        m.replace('&', "&amp;")
                    )
                })
                .collect();
            let hidden: String = (0..self.locked)
                .map(|_| {
                    concat!(
                        r#"<dl class="hidebox hi"><dt>Contenuto nascosto</dt>"#,
                        r#"<dd>Ringrazia per vedere il link</dd></dl>"#,
                    )
                })
                .collect();
            let posted = self
                .posted
                .as_ref()
                .map(|dt| format!(r#"<time datetime="{dt}">data</time>"#))
                .unwrap_or_default();
            let replies: String = self
                .reply_magnets
                .iter()
                .map(|m| {
                    format!(
                        r#"<div id="p{}" class="post bg1"><div class="content"><a href="{}">m</a></div></div>"#,
                        post_id + 1,
                        m.replace('&', "&amp;")
                    )
                })
                .collect();

            format!(
                r#"<html><body>
                <div class="navbar"><ul class="nav-breadcrumbs"><li class="breadcrumbs">
                  <span class="crumb"><a href="./index.php">Indice</a></span>
                  <span class="crumb"><a href="./viewforum.php?f={forum_id}">Forum</a></span>
                </li></ul><a href="./ucp.php?mode=logout&amp;sid=s1">Esci</a></div>
                <h2 class="topic-title"><a href="./viewtopic.php?t=1">{title}</a></h2>
                <div id="p{post_id}" class="post has-profile bg2"><div class="inner">
                  <div class="postbody">
                    <ul class="post-buttons">{thanks}</ul>
                    <p class="author">{posted}</p>
                    <div class="content">{magnets}{hidden}</div>
                  </div>
                </div></div>
                {replies}
                </body></html>"#,
                title = self.title
            )
        }
    }

    /// A magnet URI with a hex info-hash made of `c` and the given display name.
    pub fn magnet(c: char, dn: &str) -> String {
        let hash = c.to_string().repeat(40);
        format!("magnet:?xt=urn:btih:{}&dn={}", hash, dn)
    }
}
