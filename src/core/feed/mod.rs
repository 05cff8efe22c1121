//! The [`Feed`] object: a set of entries read from a URL, plus whether the
//! document behind that URL was a readable feed at all.

pub mod fetcher;
pub mod parser;
pub mod types;

use serde::Serialize;
use url::Url;

use crate::core::config::FetchConfig;
use fetcher::{fetch_document_with_retry, FetchError};
use parser::{parse_feed_bytes, FeedParseError};
use types::{Author, Entry, FeedFormat, ParsedFeed};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("invalid feed URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] FeedParseError),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Feed {
    source_url: Option<Url>,
    format: Option<FeedFormat>,
    title: String,
    home_page_url: Option<String>,
    authors: Vec<Author>,
    entries: Vec<Entry>,
    is_valid: bool,
}

impl Feed {
    /// Fetches and parses `url`. Failures never surface as errors here: they
    /// are logged and produce an invalid feed with no entries.
    pub async fn from_url(client: &reqwest::Client, config: &FetchConfig, url: &str) -> Self {
        match Self::try_from_url(client, config, url).await {
            Ok(feed) => feed,
            Err(error) => {
                tracing::warn!(url, %error, "feed is not valid");
                Self::invalid(Url::parse(url.trim()).ok())
            }
        }
    }

    pub async fn try_from_url(
        client: &reqwest::Client,
        config: &FetchConfig,
        url: &str,
    ) -> Result<Self, FeedError> {
        let parsed_url = Url::parse(url.trim()).map_err(|source| FeedError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let document =
            fetch_document_with_retry(client, &parsed_url, config.max_body_bytes, config.max_retries)
                .await?;
        let feed = Self::from_bytes(
            &document.body,
            document.content_type.as_deref(),
            Some(&document.url),
        )?;
        tracing::info!(
            url = %document.url,
            format = ?feed.format,
            entries = feed.entries.len(),
            "loaded feed"
        );
        Ok(feed)
    }

    /// Parses an already-fetched document. `base_url` is where the document
    /// came from and anchors relative links.
    pub fn from_bytes(
        raw: &[u8],
        content_type: Option<&str>,
        base_url: Option<&Url>,
    ) -> Result<Self, FeedParseError> {
        let parsed = parse_feed_bytes(raw, content_type, base_url)?;
        Ok(Self::from_parsed(parsed, base_url.cloned()))
    }

    pub fn from_parsed(parsed: ParsedFeed, source_url: Option<Url>) -> Self {
        Self {
            source_url,
            format: Some(parsed.format),
            title: parsed.title,
            home_page_url: parsed.home_page_url,
            authors: parsed.authors,
            entries: parsed.entries,
            is_valid: true,
        }
    }

    pub fn invalid(source_url: Option<Url>) -> Self {
        Self {
            source_url,
            format: None,
            title: String::new(),
            home_page_url: None,
            authors: Vec::new(),
            entries: Vec::new(),
            is_valid: false,
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn format(&self) -> Option<FeedFormat> {
        self.format
    }

    pub fn source_url(&self) -> Option<&Url> {
        self.source_url.as_ref()
    }

    pub fn home_page_url(&self) -> Option<&str> {
        self.home_page_url.as_deref()
    }

    pub fn authors(&self) -> &[Author] {
        &self.authors
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recently updated entry. Entries without timestamps lose to
    /// dated ones; ties keep the earliest in document order.
    pub fn latest_entry(&self) -> Option<&Entry> {
        self.entries
            .iter()
            .reduce(|best, candidate| {
                if candidate.timestamp() > best.timestamp() {
                    candidate
                } else {
                    best
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::CONTENT_TYPE, StatusCode};
    use axum::routing::get;
    use axum::Router;

    async fn spawn_test_server() -> (String, tokio::task::JoinHandle<()>) {
        let app = Router::new()
            .route(
                "/releases.html",
                get(|| async {
                    (
                        [(CONTENT_TYPE, "text/html; charset=utf-8")],
                        include_str!("../../../fixtures/releases.xhtml"),
                    )
                }),
            )
            .route(
                "/about.html",
                get(|| async {
                    (
                        [(CONTENT_TYPE, "text/html")],
                        include_str!("../../../fixtures/no-feed.xhtml"),
                    )
                }),
            )
            .route(
                "/feed.json",
                get(|| async {
                    (
                        [(CONTENT_TYPE, "application/feed+json")],
                        include_str!("../../../fixtures/sample.jsonfeed.json"),
                    )
                }),
            )
            .route("/gone", get(|| async { StatusCode::GONE }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        let join_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        (format!("http://{address}"), join_handle)
    }

    fn test_config() -> FetchConfig {
        FetchConfig {
            max_retries: 0,
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn hatom_page_becomes_valid_feed() {
        let (base, server_task) = spawn_test_server().await;
        let client = reqwest::Client::new();
        let url = format!("{base}/releases.html");

        let feed = Feed::from_url(&client, &test_config(), &url).await;
        assert!(feed.is_valid());
        assert_eq!(feed.format(), Some(FeedFormat::HAtom));
        assert_eq!(feed.title(), "Widget Release Notes");
        assert_eq!(feed.entries().len(), 3);
        assert_eq!(
            feed.entries()[0].link.as_deref(),
            Some(format!("{base}/1.2").as_str())
        );
        assert_eq!(feed.source_url().map(Url::as_str), Some(url.as_str()));

        server_task.abort();
    }

    #[tokio::test]
    async fn json_feed_is_valid() {
        let (base, server_task) = spawn_test_server().await;
        let client = reqwest::Client::new();

        let feed = Feed::from_url(&client, &test_config(), &format!("{base}/feed.json")).await;
        assert!(feed.is_valid());
        assert_eq!(feed.format(), Some(FeedFormat::JsonFeed));
        assert_eq!(feed.len(), 2);

        server_task.abort();
    }

    #[tokio::test]
    async fn failures_produce_invalid_empty_feeds() {
        let (base, server_task) = spawn_test_server().await;
        let client = reqwest::Client::new();
        let config = test_config();

        let plain_page = Feed::from_url(&client, &config, &format!("{base}/about.html")).await;
        assert!(!plain_page.is_valid());
        assert!(plain_page.entries().is_empty());

        let gone = Feed::from_url(&client, &config, &format!("{base}/gone")).await;
        assert!(!gone.is_valid());
        assert!(gone.source_url().is_some());

        let error = Feed::try_from_url(&client, &config, &format!("{base}/gone"))
            .await
            .expect_err("410 must fail");
        assert!(matches!(
            error,
            FeedError::Fetch(FetchError::HttpStatus(410))
        ));

        let padded = Feed::from_url(&client, &config, &format!("  {base}/gone\n")).await;
        assert!(!padded.is_valid());
        assert_eq!(
            padded.source_url().map(Url::as_str),
            Some(format!("{base}/gone").as_str())
        );

        let bogus = Feed::from_url(&client, &config, "not a url").await;
        assert!(!bogus.is_valid());
        assert!(bogus.source_url().is_none());

        server_task.abort();
    }

    #[test]
    fn empty_hfeed_is_valid_but_empty() {
        let page = br#"<html><body><div class="hfeed"><h1>Nothing yet</h1></div></body></html>"#;
        let feed = Feed::from_bytes(page, Some("text/html"), None).expect("page must parse");
        assert!(feed.is_valid());
        assert!(feed.is_empty());
    }

    #[test]
    fn latest_entry_prefers_newest_timestamp() {
        let page = include_bytes!("../../../fixtures/releases.xhtml");
        let feed = Feed::from_bytes(page, None, None).expect("fixture must parse");
        let latest = feed.latest_entry().expect("feed has entries");
        assert_eq!(latest.title, "Widget 1.2 released");

        let entries = feed.into_entries();
        assert_eq!(entries.len(), 3);
    }
}
