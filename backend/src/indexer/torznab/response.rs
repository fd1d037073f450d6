//! Torznab XML response generation
//!
//! Generates RSS 2.0 XML with Torznab extensions.

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::io::Cursor;

use crate::indexer::error::IndexerError;
use crate::indexer::{SearchResultItem, TorznabCapabilities};

/// Channel metadata of a feed
#[derive(Debug, Clone)]
pub struct FeedChannel {
    pub title: String,
    pub description: String,
    pub link: String,
}

/// Torznab response wrapper
pub enum TorznabResponse {
    Xml(String),
    Error(TorznabError),
}

impl TorznabResponse {
    /// Create a capabilities response
    pub fn capabilities(title: &str, caps: &TorznabCapabilities) -> Self {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .ok();

        writer.write_event(Event::Start(BytesStart::new("caps"))).ok();

        // <server title="..."/>
        let mut server = BytesStart::new("server");
        server.push_attribute(("title", title));
        writer.write_event(Event::Empty(server)).ok();

        // <limits default="..." max="..."/>
        let mut limits = BytesStart::new("limits");
        limits.push_attribute(("default", caps.limits_default.to_string().as_str()));
        limits.push_attribute(("max", caps.limits_max.to_string().as_str()));
        writer.write_event(Event::Empty(limits)).ok();

        writer
            .write_event(Event::Start(BytesStart::new("searching")))
            .ok();
        write_search_element(
            &mut writer,
            "search",
            &TorznabCapabilities::params_attr(&caps.search_params),
        );
        write_search_element(
            &mut writer,
            "tv-search",
            &TorznabCapabilities::params_attr(&caps.tv_search_params),
        );
        write_search_element(
            &mut writer,
            "movie-search",
            &TorznabCapabilities::params_attr(&caps.movie_search_params),
        );
        writer
            .write_event(Event::End(BytesEnd::new("searching")))
            .ok();

        // <categories> with subcategories nested under their parent
        writer
            .write_event(Event::Start(BytesStart::new("categories")))
            .ok();

        for parent in caps.categories.iter().filter(|c| c.parent_id.is_none()) {
            let mut elem = BytesStart::new("category");
            elem.push_attribute(("id", parent.id.to_string().as_str()));
            elem.push_attribute(("name", parent.name));

            let children: Vec<_> = caps
                .categories
                .iter()
                .filter(|c| c.parent_id == Some(parent.id))
                .collect();

            if children.is_empty() {
                writer.write_event(Event::Empty(elem)).ok();
                continue;
            }

            writer.write_event(Event::Start(elem)).ok();
            for child in children {
                let mut subcat = BytesStart::new("subcat");
                subcat.push_attribute(("id", child.id.to_string().as_str()));
                subcat.push_attribute(("name", child.name));
                writer.write_event(Event::Empty(subcat)).ok();
            }
            writer
                .write_event(Event::End(BytesEnd::new("category")))
                .ok();
        }

        writer
            .write_event(Event::End(BytesEnd::new("categories")))
            .ok();

        writer.write_event(Event::End(BytesEnd::new("caps"))).ok();

        let xml = String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default();
        TorznabResponse::Xml(xml)
    }

    /// Create a search results response
    pub fn search_results(channel: &FeedChannel, items: &[SearchResultItem]) -> Self {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .ok();

        // <rss version="2.0" xmlns:atom="..." xmlns:torznab="...">
        let mut rss = BytesStart::new("rss");
        rss.push_attribute(("version", "2.0"));
        rss.push_attribute(("xmlns:atom", "http://www.w3.org/2005/Atom"));
        rss.push_attribute(("xmlns:torznab", "http://torznab.com/schemas/2015/feed"));
        writer.write_event(Event::Start(rss)).ok();

        writer
            .write_event(Event::Start(BytesStart::new("channel")))
            .ok();

        write_text_element(&mut writer, "title", &channel.title);
        write_text_element(&mut writer, "description", &channel.description);
        write_text_element(&mut writer, "link", &channel.link);
        write_text_element(&mut writer, "language", "it-it");

        for item in items {
            write_release_item(&mut writer, item);
        }

        writer
            .write_event(Event::End(BytesEnd::new("channel")))
            .ok();
        writer.write_event(Event::End(BytesEnd::new("rss"))).ok();

        let xml = String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default();
        TorznabResponse::Xml(xml)
    }
}

impl IntoResponse for TorznabResponse {
    fn into_response(self) -> Response {
        match self {
            TorznabResponse::Xml(xml) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
                xml,
            )
                .into_response(),
            TorznabResponse::Error(err) => err.into_response(),
        }
    }
}

/// Torznab error response
#[derive(Debug)]
pub struct TorznabError {
    code: i32,
    description: String,
    status: StatusCode,
}

impl TorznabError {
    pub fn new(code: i32, description: impl Into<String>, status: StatusCode) -> Self {
        Self {
            code,
            description: description.into(),
            status,
        }
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self::new(100, msg, StatusCode::UNAUTHORIZED)
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::new(201, msg, StatusCode::BAD_REQUEST)
    }

    pub fn function_not_available(msg: &str) -> Self {
        Self::new(203, msg, StatusCode::BAD_REQUEST)
    }

    pub fn indexer_error(msg: &str) -> Self {
        Self::new(900, msg, StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn to_xml(&self) -> String {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .ok();

        let mut error = BytesStart::new("error");
        error.push_attribute(("code", self.code.to_string().as_str()));
        error.push_attribute(("description", self.description.as_str()));
        writer.write_event(Event::Empty(error)).ok();

        String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
    }
}

impl From<&IndexerError> for TorznabError {
    fn from(error: &IndexerError) -> Self {
        match error {
            IndexerError::Authentication(e) => Self::new(
                100,
                format!("Forum login failed: {}", e),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            IndexerError::InvalidQuery(msg) => Self::bad_request(msg),
            IndexerError::Unreachable(msg) => Self::new(
                900,
                format!("Forum unreachable: {}", msg),
                StatusCode::BAD_GATEWAY,
            ),
            other => Self::indexer_error(&other.to_string()),
        }
    }
}

impl IntoResponse for TorznabError {
    fn into_response(self) -> Response {
        // Torznab clients read the error from the XML body
        let xml = self.to_xml();
        (
            self.status,
            [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
            xml,
        )
            .into_response()
    }
}

// Helper functions for XML generation

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, text: &str) {
    writer.write_event(Event::Start(BytesStart::new(name))).ok();
    writer.write_event(Event::Text(BytesText::new(text))).ok();
    writer.write_event(Event::End(BytesEnd::new(name))).ok();
}

fn write_search_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, params: &str) {
    let mut elem = BytesStart::new(name);
    elem.push_attribute(("available", "yes"));
    elem.push_attribute(("supportedParams", params));
    writer.write_event(Event::Empty(elem)).ok();
}

fn write_torznab_attr(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, value: &str) {
    let mut attr = BytesStart::new("torznab:attr");
    attr.push_attribute(("name", name));
    attr.push_attribute(("value", value));
    writer.write_event(Event::Empty(attr)).ok();
}

fn write_release_item(writer: &mut Writer<Cursor<Vec<u8>>>, item: &SearchResultItem) {
    writer
        .write_event(Event::Start(BytesStart::new("item")))
        .ok();

    write_text_element(writer, "title", &item.title);

    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", "false"));
    writer.write_event(Event::Start(guid)).ok();
    writer.write_event(Event::Text(BytesText::new(&item.guid))).ok();
    writer.write_event(Event::End(BytesEnd::new("guid"))).ok();

    write_text_element(writer, "link", &item.magnet_uri);
    write_text_element(writer, "comments", &item.thread_url);
    write_text_element(writer, "pubDate", &format_rfc2822(&item.publish_date));

    let size = item.size.to_string();
    write_text_element(writer, "size", &size);
    write_text_element(writer, "category", &item.category.to_string());

    let mut enclosure = BytesStart::new("enclosure");
    enclosure.push_attribute(("url", item.magnet_uri.as_str()));
    enclosure.push_attribute(("length", size.as_str()));
    enclosure.push_attribute(("type", "application/x-bittorrent"));
    writer.write_event(Event::Empty(enclosure)).ok();

    write_torznab_attr(writer, "category", &item.category.to_string());
    write_torznab_attr(writer, "size", &size);
    write_torznab_attr(writer, "seeders", &SearchResultItem::SEEDERS.to_string());
    write_torznab_attr(writer, "peers", &SearchResultItem::PEERS.to_string());
    write_torznab_attr(writer, "infohash", &item.info_hash);
    write_torznab_attr(writer, "magneturl", &item.magnet_uri);

    if let Some(season) = item.episode.season {
        write_torznab_attr(writer, "season", &season.to_string());
    }
    if let Some(episode) = item.episode.episode {
        write_torznab_attr(writer, "episode", &episode.to_string());
    }

    write_torznab_attr(writer, "downloadvolumefactor", "0");
    write_torznab_attr(writer, "uploadvolumefactor", "1");

    writer.write_event(Event::End(BytesEnd::new("item"))).ok();
}

fn format_rfc2822(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S %z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::categories::{ContentKind, cats};
    use crate::indexer::types::EpisodeInfo;
    use chrono::TimeZone;

    fn item() -> SearchResultItem {
        SearchResultItem {
            title: "Dexter Resurrection S01E02 <ITA>".to_string(),
            guid: format!("180404-{}", "a".repeat(40)),
            magnet_uri: format!("magnet:?xt=urn:btih:{}&dn=Dexter", "a".repeat(40)),
            info_hash: "a".repeat(40),
            category: cats::TV,
            kind: ContentKind::Tv,
            episode: EpisodeInfo {
                season: Some(1),
                episode: Some(2),
                episode_end: None,
            },
            thread_url: "https://forum.test/viewtopic.php?t=180404".to_string(),
            thread_id: 180404,
            size: 2048,
            publish_date: Utc.with_ymd_and_hms(2025, 7, 11, 18, 30, 0).unwrap(),
        }
    }

    fn xml(response: TorznabResponse) -> String {
        match response {
            TorznabResponse::Xml(xml) => xml,
            TorznabResponse::Error(_) => panic!("expected xml"),
        }
    }

    #[test]
    fn test_search_results_xml() {
        let channel = FeedChannel {
            title: "MirCrew".to_string(),
            description: "MirCrew releases".to_string(),
            link: "https://forum.test".to_string(),
        };
        let xml = xml(TorznabResponse::search_results(&channel, &[item()]));

        assert!(xml.contains(r#"xmlns:torznab="http://torznab.com/schemas/2015/feed""#));
        assert!(xml.contains("<title>Dexter Resurrection S01E02 &lt;ITA&gt;</title>"));
        assert!(xml.contains("<pubDate>Fri, 11 Jul 2025 18:30:00 +0000</pubDate>"));
        assert!(xml.contains("<comments>https://forum.test/viewtopic.php?t=180404</comments>"));
        assert!(xml.contains(r#"<torznab:attr name="season" value="1"/>"#));
        assert!(xml.contains(r#"<torznab:attr name="episode" value="2"/>"#));
        assert!(xml.contains(r#"<torznab:attr name="downloadvolumefactor" value="0"/>"#));
        assert!(xml.contains(r#"<torznab:attr name="seeders" value="1"/>"#));
        assert!(xml.contains("&amp;dn=Dexter"));
    }

    #[test]
    fn test_capabilities_xml() {
        let caps = TorznabCapabilities::new(100);
        let xml = xml(TorznabResponse::capabilities("MirCrew", &caps));

        assert!(xml.contains(r#"<limits default="100" max="100"/>"#));
        assert!(xml.contains(r#"<tv-search available="yes" supportedParams="q,cat,season,ep"/>"#));
        assert!(xml.contains(r#"<category id="5000" name="TV">"#));
        assert!(xml.contains(r#"<subcat id="5070" name="TV/Anime"/>"#));
        assert!(xml.contains(r#"<category id="8000" name="Other"/>"#));
    }

    #[test]
    fn test_error_mapping() {
        use crate::indexer::error::AuthenticationError;

        let auth = TorznabError::from(&IndexerError::from(AuthenticationError::CsrfUnavailable));
        assert_eq!(auth.code(), 100);
        assert_eq!(auth.status(), StatusCode::SERVICE_UNAVAILABLE);

        let invalid = TorznabError::from(&IndexerError::InvalidQuery("bad id".into()));
        assert_eq!(invalid.code(), 201);
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let down = TorznabError::from(&IndexerError::Unreachable("timeout".into()));
        assert_eq!(down.code(), 900);
        assert_eq!(down.status(), StatusCode::BAD_GATEWAY);

        assert!(down.to_xml().contains(r#"<error code="900""#));
    }
}
