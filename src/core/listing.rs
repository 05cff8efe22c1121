use std::fmt::Write;

use crate::core::feed::types::Entry;
use crate::core::feed::Feed;

#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    #[error("failed to render entry markup: {0}")]
    Html(#[from] html2text::Error),
    #[error(transparent)]
    Format(#[from] std::fmt::Error),
}

/// Plain-text listing of a feed for terminals.
pub fn render_text(feed: &Feed, width: usize) -> Result<String, ListingError> {
    let mut out = String::new();
    if !feed.is_valid() {
        let source = feed
            .source_url()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<unknown>".to_string());
        writeln!(out, "{source}: not a valid feed")?;
        return Ok(out);
    }

    writeln!(out, "{} ({} entries)", feed.title(), feed.len())?;
    for entry in feed.entries() {
        writeln!(out)?;
        write_entry(&mut out, entry, width)?;
    }
    Ok(out)
}

fn write_entry(out: &mut String, entry: &Entry, width: usize) -> Result<(), ListingError> {
    writeln!(out, "* {}", entry.title)?;
    if let Some(timestamp) = entry.timestamp() {
        writeln!(out, "  {}", timestamp.format("%Y-%m-%d %H:%M UTC"))?;
    }
    if let Some(link) = &entry.link {
        writeln!(out, "  {link}")?;
    }
    if !entry.authors.is_empty() {
        let names: Vec<&str> = entry.authors.iter().map(|author| author.name.as_str()).collect();
        writeln!(out, "  by {}", names.join(", "))?;
    }
    if !entry.tags.is_empty() {
        writeln!(out, "  tags: {}", entry.tags.join(", "))?;
    }
    for enclosure in &entry.enclosures {
        writeln!(out, "  download: {}", enclosure.url)?;
    }
    if let Some(markup) = entry.summary.as_ref().or(entry.content.as_ref()) {
        let text = markup_to_text(markup, width.saturating_sub(2).max(20))?;
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            writeln!(out, "  {line}")?;
        }
    }
    Ok(())
}

pub fn markup_to_text(markup: &str, width: usize) -> Result<String, ListingError> {
    let text = html2text::config::plain().string_from_read(markup.as_bytes(), width)?;
    Ok(text.trim_end().to_string())
}
