//! Helpers for reading microformat markup out of a `roxmltree` document.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::escape::resolve_html5_entity;
use roxmltree::Node;
use url::Url;

/// Entities every XML parser already understands.
const XML_ENTITIES: &[&str] = &["amp", "lt", "gt", "quot", "apos"];

/// Rewrites HTML named entities into numeric character references so the
/// document can be read by an XML parser. Unknown names are left untouched.
pub fn expand_html_entities(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(position) = rest.find('&') {
        output.push_str(&rest[..position]);
        let candidate = &rest[position + 1..];
        let name_len = candidate
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(candidate.len());
        let name = &candidate[..name_len];
        let replacement = Some(name)
            .filter(|name| !name.is_empty() && !XML_ENTITIES.contains(name))
            .filter(|_| candidate[name_len..].starts_with(';'))
            .and_then(resolve_html5_entity);

        match replacement {
            Some(characters) => {
                for character in characters.chars() {
                    output.push_str(&format!("&#{};", u32::from(character)));
                }
                rest = &candidate[name_len + 1..];
            }
            None => {
                output.push('&');
                rest = candidate;
            }
        }
    }

    output.push_str(rest);
    output
}

pub fn has_class(node: Node<'_, '_>, class: &str) -> bool {
    node.attribute("class")
        .is_some_and(|value| value.split_whitespace().any(|token| token == class))
}

pub fn has_rel(node: Node<'_, '_>, rel: &str) -> bool {
    node.attribute("rel").is_some_and(|value| {
        value
            .split_whitespace()
            .any(|token| token.eq_ignore_ascii_case(rel))
    })
}

pub fn is_tag(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name().eq_ignore_ascii_case(name)
}

pub fn is_heading(node: Node<'_, '_>) -> bool {
    ["h1", "h2", "h3", "h4", "h5", "h6"]
        .iter()
        .any(|name| is_tag(node, name))
}

/// Elements below `root` in document order, without descending into (or
/// yielding) elements that carry the `boundary` class.
pub fn scoped_elements<'a, 'input>(
    root: Node<'a, 'input>,
    boundary: &str,
) -> Vec<Node<'a, 'input>> {
    let mut found = Vec::new();
    let mut stack: Vec<Node<'a, 'input>> = root.children().filter(Node::is_element).collect();
    stack.reverse();

    while let Some(node) = stack.pop() {
        if has_class(node, boundary) {
            continue;
        }
        found.push(node);
        let mut children: Vec<Node<'a, 'input>> =
            node.children().filter(Node::is_element).collect();
        children.reverse();
        stack.extend(children);
    }

    found
}

/// All descendant text with runs of whitespace collapsed to single spaces.
pub fn collapsed_text(node: Node<'_, '_>) -> String {
    let raw: String = node
        .descendants()
        .filter(Node::is_text)
        .filter_map(|text| text.text())
        .collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The source markup between an element's start and end tags.
pub fn inner_markup(node: Node<'_, '_>) -> String {
    let (Some(first), Some(last)) = (node.first_child(), node.last_child()) else {
        return String::new();
    };
    let text = node.document().input_text();
    text.get(first.range().start..last.range().end)
        .map(|markup| markup.trim().to_string())
        .unwrap_or_default()
}

/// Reads a property value using the subset of the value-class pattern that
/// hAtom pages use in practice.
pub fn property_value(node: Node<'_, '_>) -> String {
    let parts: Vec<String> = node
        .descendants()
        .skip(1)
        .filter(|child| has_class(*child, "value"))
        .filter(|child| {
            !child
                .ancestors()
                .skip(1)
                .take_while(|ancestor| ancestor.id() != node.id())
                .any(|ancestor| has_class(ancestor, "value"))
        })
        .map(property_value)
        .filter(|value| !value.is_empty())
        .collect();
    if !parts.is_empty() {
        return join_value_parts(&parts);
    }

    let attribute = if is_tag(node, "time") {
        node.attribute("datetime")
    } else {
        node.attribute("title")
    };
    match attribute.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => value.to_string(),
        None => collapsed_text(node),
    }
}

/// A separate date and time part combine into one datetime.
fn join_value_parts(parts: &[String]) -> String {
    match parts {
        [date, time]
            if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok() && !time.starts_with('T') =>
        {
            format!("{date}T{time}")
        }
        _ => parts.concat(),
    }
}

pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

pub fn resolve_href(base: Option<&Url>, href: &str) -> String {
    let href = href.trim();
    base.and_then(|base| base.join(href).ok())
        .map(String::from)
        .unwrap_or_else(|| href.to_string())
}

/// The tag named by a rel-tag link: its last non-empty path segment.
pub fn tag_from_href(base: Option<&Url>, href: &str) -> Option<String> {
    let resolved = resolve_href(base, href);
    let segment = match Url::parse(&resolved) {
        Ok(url) => url
            .path_segments()
            .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
            .map(ToString::to_string)?,
        Err(_) => resolved
            .split(['?', '#'])
            .next()
            .and_then(|path| path.split('/').filter(|segment| !segment.is_empty()).last())
            .map(ToString::to_string)?,
    };

    if segment.contains(['=', '&']) {
        return Some(segment);
    }
    url::form_urlencoded::parse(segment.as_bytes())
        .next()
        .map(|(name, _)| name.trim().to_string())
        .filter(|tag| !tag.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn expands_html_entities_but_keeps_xml_ones() {
        let expanded = expand_html_entities("a&nbsp;b &amp; c&hellip; &bogus; & d");
        assert_eq!(expanded, "a&#160;b &amp; c&#8230; &bogus; & d");
    }

    #[test]
    fn expands_the_full_html5_entity_set() {
        let expanded = expand_html_entities("&Oacute;scar &eth;&THORN; &alpha;&le;&beta;");
        assert_eq!(expanded, "&#211;scar &#240;&#222; &#945;&#8804;&#946;");
    }

    #[test]
    fn value_class_parts_are_joined() {
        let doc = roxmltree::Document::parse(
            r#"<abbr class="published" title="ignored"><span class="value">2007-03-01</span>T<span class="value">09:30:00Z</span></abbr>"#,
        )
        .expect("markup must parse");
        assert_eq!(property_value(doc.root_element()), "2007-03-01T09:30:00Z");
    }

    #[test]
    fn nested_value_elements_are_read_once() {
        let doc = roxmltree::Document::parse(
            r#"<span class="updated"><span class="value"><span class="value">2007-03-01</span></span></span>"#,
        )
        .expect("markup must parse");
        assert_eq!(property_value(doc.root_element()), "2007-03-01");
    }

    #[test]
    fn time_datetime_and_title_attributes_win_over_text() {
        let doc = roxmltree::Document::parse(
            r#"<p><time datetime="2007-03-01">March</time><abbr title="2007-02-01">Feb</abbr><span>2007-01-01</span></p>"#,
        )
        .expect("markup must parse");
        let values: Vec<String> = doc
            .root_element()
            .children()
            .filter(Node::is_element)
            .map(property_value)
            .collect();
        assert_eq!(values, vec!["2007-03-01", "2007-02-01", "2007-01-01"]);
    }

    #[test]
    fn parses_common_hatom_date_forms() {
        let expected = Utc.with_ymd_and_hms(2007, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(parse_datetime("2007-03-01T09:30:00Z"), Some(expected));
        assert_eq!(parse_datetime("2007-03-01T10:30:00+0100"), Some(expected));
        assert_eq!(parse_datetime("2007-03-01T09:30:00"), Some(expected));
        assert_eq!(
            parse_datetime("2007-03-01"),
            Some(Utc.with_ymd_and_hms(2007, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime("last tuesday"), None);
    }

    #[test]
    fn tag_uses_last_path_segment() {
        let base = Url::parse("https://example.com/blog/").expect("base url must parse");
        assert_eq!(
            tag_from_href(Some(&base), "/tags/release+notes/").as_deref(),
            Some("release notes")
        );
        assert_eq!(
            tag_from_href(None, "https://example.com/tag/caf%C3%A9").as_deref(),
            Some("café")
        );
    }

    #[test]
    fn scoped_elements_stop_at_boundary() {
        let doc = roxmltree::Document::parse(
            r#"<div><p class="a"/><div class="hentry"><p class="b"/></div><p class="c"/></div>"#,
        )
        .expect("markup must parse");
        let classes: Vec<&str> = scoped_elements(doc.root_element(), "hentry")
            .into_iter()
            .filter_map(|node| node.attribute("class"))
            .collect();
        assert_eq!(classes, vec!["a", "c"]);
    }
}
