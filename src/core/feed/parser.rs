use feed_rs::model::Entry as XmlEntry;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use super::types::{Author, Enclosure, Entry, FeedFormat, ParsedFeed};
use crate::core::hatom::markup::parse_datetime;
use crate::core::hatom::{parse_hatom, HAtomError};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, thiserror::Error)]
pub enum FeedParseError {
    #[error("feed payload is empty")]
    EmptyPayload,
    #[error("xml feed parse error: {0}")]
    Xml(#[from] feed_rs::parser::ParseFeedError),
    #[error("json feed parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hAtom parse error: {0}")]
    HAtom(#[from] HAtomError),
    #[error("document is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeed {
    title: Option<String>,
    home_page_url: Option<String>,
    feed_url: Option<String>,
    #[serde(default)]
    authors: Vec<JsonFeedAuthor>,
    author: Option<JsonFeedAuthor>,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedItem {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    summary: Option<String>,
    content_text: Option<String>,
    content_html: Option<String>,
    date_published: Option<String>,
    date_modified: Option<String>,
    #[serde(default)]
    authors: Vec<JsonFeedAuthor>,
    author: Option<JsonFeedAuthor>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    attachments: Vec<JsonFeedAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedAuthor {
    name: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedAttachment {
    url: String,
    mime_type: Option<String>,
    title: Option<String>,
    size_in_bytes: Option<u64>,
}

pub fn parse_feed_bytes(
    raw: &[u8],
    content_type: Option<&str>,
    base_url: Option<&Url>,
) -> Result<ParsedFeed, FeedParseError> {
    let trimmed = trim_leading_ascii_whitespace(raw);
    if trimmed.is_empty() {
        return Err(FeedParseError::EmptyPayload);
    }
    let format = sniff_format(trimmed, content_type);
    tracing::debug!(?format, content_type, "detected feed format");
    match format {
        FeedFormat::JsonFeed => parse_json_feed(trimmed),
        FeedFormat::HAtom => {
            let text = std::str::from_utf8(trimmed)?;
            Ok(parse_hatom(text, base_url)?)
        }
        FeedFormat::XmlFeed => parse_xml_feed(trimmed, base_url),
    }
}

/// Decides which parser reads the payload. `raw` must already be trimmed.
pub fn sniff_format(raw: &[u8], content_type: Option<&str>) -> FeedFormat {
    if raw.first() == Some(&b'{') {
        return FeedFormat::JsonFeed;
    }
    if content_type.is_some_and(|value| value.to_ascii_lowercase().contains("html")) {
        return FeedFormat::HAtom;
    }
    let head = String::from_utf8_lossy(&raw[..raw.len().min(4096)]);
    match first_element_name(&head) {
        Some(name) if name.eq_ignore_ascii_case("html") => FeedFormat::HAtom,
        _ => FeedFormat::XmlFeed,
    }
}

/// Stable identifier for entries whose source gives none.
pub fn synthesize_entry_id(title: &str, link: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.trim().as_bytes());
    hasher.update(b"::");
    hasher.update(link.trim().as_bytes());
    hasher.update(b"::");
    hasher.update(content.trim().as_bytes());
    let bytes = hasher.finalize();
    format!("urn:sha256:{bytes:x}")
}

fn first_element_name(text: &str) -> Option<String> {
    let mut rest = text;
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("<?") {
            rest = &after[after.find("?>")? + 2..];
        } else if let Some(after) = rest.strip_prefix("<!--") {
            rest = &after[after.find("-->")? + 3..];
        } else if let Some(after) = rest.strip_prefix("<!") {
            let lowered = after.to_ascii_lowercase();
            if lowered.starts_with("doctype html") {
                return Some("html".to_string());
            }
            rest = &after[after.find('>')? + 1..];
        } else if let Some(after) = rest.strip_prefix('<') {
            let name: String = after
                .chars()
                .take_while(|c| !c.is_whitespace() && *c != '>' && *c != '/')
                .collect();
            let local = name.rsplit(':').next().unwrap_or_default().to_string();
            return Some(local).filter(|local| !local.is_empty());
        } else {
            return None;
        }
    }
}

fn parse_xml_feed(raw: &[u8], base_url: Option<&Url>) -> Result<ParsedFeed, FeedParseError> {
    let feed = feed_rs::parser::Builder::new()
        .base_uri(base_url.map(Url::as_str))
        .build()
        .parse(raw)?;
    let title = feed
        .title
        .as_ref()
        .map(|text| text.content.clone())
        .unwrap_or_else(|| "Untitled Feed".to_string());
    let home_page_url = feed
        .links
        .iter()
        .find(|link| link.rel.as_deref().is_none_or(|rel| rel == "alternate"))
        .or_else(|| feed.links.first())
        .map(|link| link.href.clone());
    let authors = feed.authors.iter().map(author_from_person).collect();
    let entries = feed.entries.iter().map(entry_from_xml).collect();

    Ok(ParsedFeed {
        format: FeedFormat::XmlFeed,
        title,
        home_page_url,
        feed_url: base_url.map(ToString::to_string),
        authors,
        entries,
    })
}

fn parse_json_feed(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let feed: JsonFeed = serde_json::from_slice(raw)?;
    let title = feed.title.unwrap_or_else(|| "Untitled Feed".to_string());
    let authors = json_authors(feed.authors, feed.author);
    let entries = feed
        .items
        .into_iter()
        .map(|item| {
            let title = item.title.unwrap_or_else(|| "Untitled Entry".to_string());
            let content = item.content_html.or(item.content_text);
            let id = item.id.or_else(|| item.url.clone()).unwrap_or_else(|| {
                synthesize_entry_id(
                    &title,
                    item.url.as_deref().unwrap_or_default(),
                    content.as_deref().unwrap_or_default(),
                )
            });
            let published = item.date_published.as_deref().and_then(parse_datetime);
            let updated = item
                .date_modified
                .as_deref()
                .and_then(parse_datetime)
                .or(published);
            Entry {
                id,
                title,
                link: item.url,
                summary: item.summary,
                content,
                published,
                updated,
                authors: json_authors(item.authors, item.author),
                tags: item.tags,
                enclosures: item
                    .attachments
                    .into_iter()
                    .map(|attachment| Enclosure {
                        url: attachment.url,
                        mime_type: attachment.mime_type,
                        length: attachment.size_in_bytes,
                        title: attachment.title,
                    })
                    .collect(),
            }
        })
        .collect();

    Ok(ParsedFeed {
        format: FeedFormat::JsonFeed,
        title,
        home_page_url: feed.home_page_url,
        feed_url: feed.feed_url,
        authors,
        entries,
    })
}

fn json_authors(authors: Vec<JsonFeedAuthor>, legacy: Option<JsonFeedAuthor>) -> Vec<Author> {
    authors
        .into_iter()
        .chain(legacy)
        .filter_map(|author| {
            let name = author.name.or_else(|| author.url.clone())?;
            Some(Author {
                name,
                url: author.url,
                email: None,
            })
        })
        .collect()
}

fn author_from_person(person: &feed_rs::model::Person) -> Author {
    Author {
        name: person.name.clone(),
        url: person.uri.clone(),
        email: person.email.clone(),
    }
}

fn entry_from_xml(entry: &XmlEntry) -> Entry {
    let title = entry
        .title
        .as_ref()
        .map(|text| text.content.clone())
        .unwrap_or_else(|| "Untitled Entry".to_string());
    let link = entry
        .links
        .iter()
        .find(|link| link.rel.as_deref().is_none_or(|rel| rel == "alternate"))
        .map(|entry_link| entry_link.href.clone());
    let summary = entry.summary.as_ref().map(|text| text.content.clone());
    let content = entry
        .content
        .as_ref()
        .and_then(|content| content.body.clone());
    let id = if entry.id.trim().is_empty() {
        link.clone().unwrap_or_else(|| {
            synthesize_entry_id(
                &title,
                "",
                content.as_deref().or(summary.as_deref()).unwrap_or_default(),
            )
        })
    } else {
        entry.id.clone()
    };

    let mut enclosures: Vec<Enclosure> = entry
        .links
        .iter()
        .filter(|link| link.rel.as_deref() == Some("enclosure"))
        .map(|link| Enclosure {
            url: link.href.clone(),
            mime_type: link.media_type.clone(),
            length: link.length,
            title: link.title.clone(),
        })
        .collect();
    for media in &entry.media {
        for media_content in &media.content {
            let Some(url) = &media_content.url else {
                continue;
            };
            if enclosures.iter().any(|known| known.url == url.as_str()) {
                continue;
            }
            enclosures.push(Enclosure {
                url: url.to_string(),
                mime_type: media_content.content_type.as_ref().map(ToString::to_string),
                length: media_content.size,
                title: media.title.as_ref().map(|text| text.content.clone()),
            });
        }
    }

    Entry {
        id,
        title,
        link,
        summary,
        content,
        published: entry.published,
        updated: entry.updated.or(entry.published),
        authors: entry.authors.iter().map(author_from_person).collect(),
        tags: entry
            .categories
            .iter()
            .map(|category| category.label.clone().unwrap_or_else(|| category.term.clone()))
            .collect(),
        enclosures,
    }
}

fn trim_leading_ascii_whitespace(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);
    let mut index = 0;
    while index < raw.len() && raw[index].is_ascii_whitespace() {
        index += 1;
    }
    &raw[index..]
}
