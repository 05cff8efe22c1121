//! Sparkle appcast output.
//!
//! An appcast is an RSS 2.0 channel where each item describes one release
//! and its first enclosure is the download Sparkle installs.

use std::io::Cursor;

use quick_xml::events::{BytesCData, BytesDecl, BytesText, Event};
use quick_xml::Writer;

use crate::core::feed::types::{Enclosure, Entry};
use crate::core::feed::Feed;

pub const SPARKLE_NAMESPACE: &str = "http://www.andymatuschak.org/xml-namespaces/sparkle";
const DEFAULT_ENCLOSURE_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Default)]
pub struct AppcastOptions {
    pub description: Option<String>,
    pub language: Option<String>,
    pub only_with_enclosures: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AppcastError {
    #[error("xml write error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("appcast output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub fn render_appcast(feed: &Feed, options: &AppcastOptions) -> Result<String, AppcastError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let link = feed
        .home_page_url()
        .map(ToString::to_string)
        .or_else(|| feed.source_url().map(ToString::to_string))
        .unwrap_or_default();
    let description = options
        .description
        .clone()
        .unwrap_or_else(|| format!("Most recent changes to {}", feed.title()));
    let items: Vec<&Entry> = feed
        .entries()
        .iter()
        .filter(|entry| !options.only_with_enclosures || !entry.enclosures.is_empty())
        .collect();

    writer
        .create_element("rss")
        .with_attributes([("version", "2.0"), ("xmlns:sparkle", SPARKLE_NAMESPACE)])
        .write_inner_content(|writer| {
            writer.create_element("channel").write_inner_content(|writer| {
                writer
                    .create_element("title")
                    .write_text_content(BytesText::new(feed.title()))?;
                writer
                    .create_element("link")
                    .write_text_content(BytesText::new(&link))?;
                writer
                    .create_element("description")
                    .write_text_content(BytesText::new(&description))?;
                if let Some(language) = &options.language {
                    writer
                        .create_element("language")
                        .write_text_content(BytesText::new(language))?;
                }
                for entry in &items {
                    write_item(writer, entry)?;
                }
                Ok::<(), quick_xml::Error>(())
            })?;
            Ok::<(), quick_xml::Error>(())
        })?;

    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8(bytes)?)
}

fn write_item(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    entry: &Entry,
) -> Result<(), quick_xml::Error> {
    writer.create_element("item").write_inner_content(|writer| {
        writer
            .create_element("title")
            .write_text_content(BytesText::new(&entry.title))?;
        if let Some(link) = &entry.link {
            writer
                .create_element("link")
                .write_text_content(BytesText::new(link))?;
        }
        if let Some(description) = entry.content.as_ref().or(entry.summary.as_ref()) {
            writer
                .create_element("description")
                .write_cdata_content(BytesCData::new(cdata_safe(description)))?;
        }
        if let Some(timestamp) = entry.timestamp() {
            writer
                .create_element("pubDate")
                .write_text_content(BytesText::new(&timestamp.to_rfc2822()))?;
        }
        writer
            .create_element("guid")
            .with_attribute(("isPermaLink", "false"))
            .write_text_content(BytesText::new(&entry.id))?;
        if let Some(enclosure) = entry.enclosures.first() {
            write_enclosure(writer, entry, enclosure)?;
        }
        Ok::<(), quick_xml::Error>(())
    })?;
    Ok(())
}

fn write_enclosure(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    entry: &Entry,
    enclosure: &Enclosure,
) -> Result<(), quick_xml::Error> {
    let length = enclosure.length.unwrap_or(0).to_string();
    let mime_type = enclosure
        .mime_type
        .as_deref()
        .unwrap_or(DEFAULT_ENCLOSURE_TYPE);
    let version = enclosure
        .title
        .as_deref()
        .and_then(extract_version)
        .or_else(|| extract_version(&entry.title));

    let mut element = writer
        .create_element("enclosure")
        .with_attribute(("url", enclosure.url.as_str()))
        .with_attribute(("length", length.as_str()))
        .with_attribute(("type", mime_type));
    if let Some(version) = &version {
        element = element.with_attribute(("sparkle:version", version.as_str()));
    }
    element.write_empty()?;
    Ok(())
}

/// The version a release title announces: its last whitespace-separated
/// token that starts with a digit, without a leading `v`.
pub fn extract_version(title: &str) -> Option<String> {
    title
        .split_whitespace()
        .map(|token| token.trim_start_matches(['v', 'V']))
        .map(|token| token.trim_end_matches(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|token| token.starts_with(|c: char| c.is_ascii_digit()))
        .last()
        .map(ToString::to_string)
}

/// CDATA sections cannot contain `]]>`; split it across two sections.
fn cdata_safe(text: &str) -> String {
    text.replace("]]>", "]]]]><![CDATA[>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn fixture_feed() -> Feed {
        let page = include_bytes!("../../../fixtures/releases.xhtml");
        let base = Url::parse("https://example.com/releases/").expect("base url must parse");
        Feed::from_bytes(page, Some("application/xhtml+xml"), Some(&base))
            .expect("fixture must parse")
    }

    #[test]
    fn renders_items_with_sparkle_enclosures() {
        let appcast = render_appcast(&fixture_feed(), &AppcastOptions::default())
            .expect("appcast must render");

        assert!(appcast.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(appcast.contains(&format!("xmlns:sparkle=\"{SPARKLE_NAMESPACE}\"")));
        assert!(appcast.contains("<title>Widget Release Notes</title>"));
        assert_eq!(appcast.matches("<item>").count(), 3);
        assert!(appcast.contains(
            "<enclosure url=\"https://example.com/downloads/Widget-1.2.zip\" length=\"1048576\" type=\"application/zip\" sparkle:version=\"1.2\"/>"
        ));
        assert!(appcast.contains(
            "url=\"https://example.com/downloads/Widget-1.0.dmg\" length=\"0\" type=\"application/octet-stream\" sparkle:version=\"1.0\""
        ));
        assert!(appcast.contains("Mar 2007 12:00:00 +0000</pubDate>"));
        assert!(appcast.contains("<![CDATA[<p>First public release.</p>]]>"));
    }

    #[test]
    fn skips_entries_without_enclosures_when_asked() {
        let options = AppcastOptions {
            only_with_enclosures: true,
            language: Some("en".to_string()),
            ..AppcastOptions::default()
        };
        let appcast = render_appcast(&fixture_feed(), &options).expect("appcast must render");

        assert_eq!(appcast.matches("<item>").count(), 2);
        assert!(!appcast.contains("Widget 1.1"));
        assert!(appcast.contains("<language>en</language>"));
    }

    #[test]
    fn invalid_feed_renders_empty_channel() {
        let appcast = render_appcast(&Feed::invalid(None), &AppcastOptions::default())
            .expect("appcast must render");
        assert!(appcast.contains("<channel>"));
        assert!(!appcast.contains("<item>"));
    }

    #[test]
    fn extracts_versions_from_release_titles() {
        assert_eq!(extract_version("Widget 1.2 released").as_deref(), Some("1.2"));
        assert_eq!(extract_version("Widget v2.0b3").as_deref(), Some("2.0b3"));
        assert_eq!(extract_version("Version 3 (build 412)").as_deref(), Some("412"));
        assert_eq!(extract_version("Spring cleaning"), None);
    }

    #[test]
    fn cdata_terminators_are_split() {
        assert_eq!(cdata_safe("a]]>b"), "a]]]]><![CDATA[>b");
    }
}
