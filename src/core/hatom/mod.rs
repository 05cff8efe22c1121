//! hAtom 0.1 microformat parsing for XHTML pages.
//!
//! A page declares feed content with `hfeed` and `hentry` class names. Each
//! entry's properties are found by class name inside the entry element, never
//! inside an entry nested below it.

pub mod markup;

use roxmltree::{Document, Node, ParsingOptions};
use url::Url;

use crate::core::feed::parser::synthesize_entry_id;
use crate::core::feed::types::{Author, Enclosure, Entry, FeedFormat, ParsedFeed};
use markup::{
    collapsed_text, expand_html_entities, has_class, has_rel, inner_markup, is_heading, is_tag,
    parse_datetime, property_value, resolve_href, scoped_elements, tag_from_href,
};

const ENTRY: &str = "hentry";
const FEED: &str = "hfeed";

#[derive(Debug, thiserror::Error)]
pub enum HAtomError {
    #[error("invalid XHTML markup: {0}")]
    Markup(String),
    #[error("document declares no hfeed or hentry elements")]
    NoFeedContent,
}

pub fn parse_hatom(document: &str, base_url: Option<&Url>) -> Result<ParsedFeed, HAtomError> {
    let prepared = expand_html_entities(document);
    let mut options = ParsingOptions::default();
    options.allow_dtd = true;
    let doc = Document::parse_with_options(&prepared, options)
        .map_err(|error| HAtomError::Markup(error.to_string()))?;

    let feeds: Vec<Node<'_, '_>> = doc
        .descendants()
        .filter(|node| node.is_element() && has_class(*node, FEED))
        .collect();
    let entry_nodes: Vec<Node<'_, '_>> = doc
        .descendants()
        .filter(|node| node.is_element() && has_class(*node, ENTRY))
        .collect();
    if feeds.is_empty() && entry_nodes.is_empty() {
        return Err(HAtomError::NoFeedContent);
    }

    let base = effective_base(&doc, base_url);
    let document_title = document_title(&doc);
    let title = feeds
        .first()
        .and_then(|feed| {
            scoped_elements(*feed, ENTRY)
                .into_iter()
                .find(|node| has_class(*node, "feed-title"))
        })
        .map(collapsed_text)
        .filter(|text| !text.is_empty())
        .or_else(|| document_title.clone())
        .unwrap_or_else(|| "Untitled Feed".to_string());
    let feed_scope = feeds.first().copied().unwrap_or_else(|| doc.root_element());
    let mut authors = scope_authors(feed_scope);
    if authors.is_empty() {
        authors = address_authors(&doc, None);
    }

    let context = EntryContext {
        doc: &doc,
        base: base.as_ref(),
        document_title: document_title.as_deref(),
    };
    let mut entries = Vec::with_capacity(entry_nodes.len());
    for node in entry_nodes {
        match context.entry(node) {
            Some(entry) => entries.push(entry),
            None => tracing::debug!(
                element_id = node.attribute("id").unwrap_or_default(),
                "skipping hentry without a title"
            ),
        }
    }
    tracing::debug!(
        feeds = feeds.len(),
        entries = entries.len(),
        "parsed hAtom document"
    );

    Ok(ParsedFeed {
        format: FeedFormat::HAtom,
        title,
        home_page_url: base.as_ref().map(ToString::to_string),
        feed_url: None,
        authors,
        entries,
    })
}

struct EntryContext<'d, 'input> {
    doc: &'d Document<'input>,
    base: Option<&'d Url>,
    document_title: Option<&'d str>,
}

impl<'d, 'input> EntryContext<'d, 'input> {
    fn entry(&self, node: Node<'d, 'input>) -> Option<Entry> {
        let scope = scoped_elements(node, ENTRY);
        let find = |class: &str| scope.iter().copied().find(|child| has_class(*child, class));

        let title = find("entry-title")
            .map(collapsed_text)
            .filter(|text| !text.is_empty())
            .or_else(|| {
                scope
                    .iter()
                    .copied()
                    .find(|child| is_heading(*child))
                    .map(collapsed_text)
                    .filter(|text| !text.is_empty())
            })
            .or_else(|| self.document_title.map(ToString::to_string))?;

        let summary = joined_markup(&scope, "entry-summary");
        let content = joined_markup(&scope, "entry-content");
        let link = scope
            .iter()
            .copied()
            .filter(|child| is_link_element(*child) && has_rel(*child, "bookmark"))
            .find_map(|child| child.attribute("href"))
            .map(|href| resolve_href(self.base, href));

        let published = find("published").and_then(|child| parse_datetime(&property_value(child)));
        let updated = find("updated")
            .and_then(|child| parse_datetime(&property_value(child)))
            .or(published);

        let mut authors: Vec<Author> = scope
            .iter()
            .copied()
            .filter(|child| is_vcard_author(*child))
            .filter_map(author_from_vcard)
            .collect();
        if authors.is_empty() {
            authors = self.inherited_authors(node);
        }

        let mut tags = Vec::new();
        for child in scope.iter().copied().filter(|child| has_rel(*child, "tag")) {
            let tag = child
                .attribute("href")
                .and_then(|href| tag_from_href(self.base, href))
                .or_else(|| Some(collapsed_text(child)).filter(|text| !text.is_empty()));
            if let Some(tag) = tag {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }

        let enclosures = scope
            .iter()
            .copied()
            .filter(|child| is_link_element(*child) && has_rel(*child, "enclosure"))
            .filter_map(|child| self.enclosure(child))
            .collect();

        let id = match (&link, node.attribute("id")) {
            (Some(permalink), _) => permalink.clone(),
            (None, Some(element_id)) => self.fragment_id(element_id),
            (None, None) => synthesize_entry_id(
                &title,
                "",
                content.as_deref().or(summary.as_deref()).unwrap_or_default(),
            ),
        };

        Some(Entry {
            id,
            title,
            link,
            summary,
            content,
            published,
            updated,
            authors,
            tags,
            enclosures,
        })
    }

    fn inherited_authors(&self, entry: Node<'d, 'input>) -> Vec<Author> {
        let feed_scope = entry
            .ancestors()
            .skip(1)
            .find(|ancestor| has_class(*ancestor, FEED))
            .unwrap_or_else(|| self.doc.root_element());
        let declared = scope_authors(feed_scope);
        if declared.is_empty() {
            address_authors(self.doc, Some(entry))
        } else {
            declared
        }
    }

    fn enclosure(&self, node: Node<'d, 'input>) -> Option<Enclosure> {
        let href = node.attribute("href").map(str::trim).filter(|href| !href.is_empty())?;
        Some(Enclosure {
            url: resolve_href(self.base, href),
            mime_type: node.attribute("type").map(ToString::to_string),
            length: node
                .attribute("length")
                .and_then(|length| length.trim().parse().ok()),
            title: node
                .attribute("title")
                .map(ToString::to_string)
                .or_else(|| Some(collapsed_text(node)).filter(|text| !text.is_empty())),
        })
    }

    fn fragment_id(&self, element_id: &str) -> String {
        match self.base {
            Some(base) => {
                let mut url = base.clone();
                url.set_fragment(Some(element_id));
                url.to_string()
            }
            None => format!("#{element_id}"),
        }
    }
}

fn joined_markup(scope: &[Node<'_, '_>], class: &str) -> Option<String> {
    let parts: Vec<String> = scope
        .iter()
        .copied()
        .filter(|child| has_class(*child, class))
        .map(inner_markup)
        .filter(|markup| !markup.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

fn is_link_element(node: Node<'_, '_>) -> bool {
    is_tag(node, "a") || is_tag(node, "link") || is_tag(node, "area")
}

fn is_vcard_author(node: Node<'_, '_>) -> bool {
    has_class(node, "author") && has_class(node, "vcard")
}

/// Authors declared inside `scope` but outside every entry. A scope that is
/// itself an entry declares none.
fn scope_authors(scope: Node<'_, '_>) -> Vec<Author> {
    if has_class(scope, ENTRY) {
        return Vec::new();
    }
    scoped_elements(scope, ENTRY)
        .into_iter()
        .filter(|node| is_vcard_author(*node))
        .filter_map(author_from_vcard)
        .collect()
}

/// The `address.author` closest to `anchor`: the innermost ancestor holding
/// one wins, preferring the last one before the anchor. Without an anchor the
/// first in the document is used.
fn address_authors<'a, 'input>(
    doc: &'a Document<'input>,
    anchor: Option<Node<'a, 'input>>,
) -> Vec<Author> {
    let nearest = match anchor {
        Some(anchor) => {
            let position = anchor.range().start;
            anchor.ancestors().skip(1).find_map(|ancestor| {
                let candidates: Vec<Node<'a, 'input>> =
                    ancestor.descendants().filter(is_author_address).collect();
                candidates
                    .iter()
                    .rev()
                    .find(|node| node.range().start < position)
                    .or_else(|| candidates.first())
                    .copied()
            })
        }
        None => doc.descendants().find(is_author_address),
    };

    nearest
        .and_then(|node| {
            if has_class(node, "vcard") {
                author_from_vcard(node)
            } else {
                node.descendants()
                    .find(|child| has_class(*child, "vcard"))
                    .and_then(author_from_vcard)
            }
        })
        .into_iter()
        .collect()
}

fn is_author_address(node: &Node<'_, '_>) -> bool {
    is_tag(*node, "address") && has_class(*node, "author")
}

fn author_from_vcard(card: Node<'_, '_>) -> Option<Author> {
    let property = |class: &str| card.descendants().find(|node| has_class(*node, class));

    let name = property("fn")
        .map(property_value)
        .filter(|name| !name.is_empty())
        .or_else(|| Some(collapsed_text(card)).filter(|text| !text.is_empty()))?;
    let url = property("url").and_then(|node| node.attribute("href").map(ToString::to_string));
    let email = property("email").map(|node| {
        node.attribute("href")
            .map(|href| href.trim_start_matches("mailto:").to_string())
            .unwrap_or_else(|| collapsed_text(node))
    });

    Some(Author { name, url, email })
}

fn document_title(doc: &Document<'_>) -> Option<String> {
    let titles: Vec<Node<'_, '_>> = doc
        .descendants()
        .filter(|node| is_tag(*node, "title"))
        .collect();
    titles
        .iter()
        .find(|node| node.parent().is_some_and(|parent| is_tag(parent, "head")))
        .or_else(|| titles.first())
        .map(|node| collapsed_text(*node))
        .filter(|title| !title.is_empty())
}

/// The URL relative references resolve against: the page URL, overridden by
/// a `<base href>` element when one is present.
fn effective_base(doc: &Document<'_>, base_url: Option<&Url>) -> Option<Url> {
    let declared = doc
        .descendants()
        .find(|node| is_tag(*node, "base"))
        .and_then(|node| node.attribute("href"));
    match (base_url, declared) {
        (Some(base), Some(href)) => base.join(href).ok().or_else(|| Some(base.clone())),
        (None, Some(href)) => Url::parse(href).ok(),
        (Some(base), None) => Some(base.clone()),
        (None, None) => None,
    }
}
