//! Declarative field extraction over item HTML fragments.
//!
//! Items arrive as outer-HTML strings captured in the page; everything here
//! is pure parsing, which keeps the mapping semantics testable without a
//! browser.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::model::{ExtractFrom, FieldMapping};

const URL_ATTRIBUTES: [&str; 2] = ["href", "src"];

/// Applies every mapping to one item fragment. Mappings that match nothing
/// or produce an empty value leave no key; a mapping whose selector fails
/// to parse is logged and skipped.
pub fn extract_fields(
    item_html: &str,
    base_url: &Url,
    mappings: &BTreeMap<String, FieldMapping>,
) -> Value {
    let fragment = Html::parse_fragment(item_html);
    let root = fragment.root_element();
    let mut out = Map::new();
    for (path, mapping) in mappings {
        match extract_one(root, base_url, mapping) {
            Ok(Some(value)) => set_path(&mut out, path, Value::String(value)),
            Ok(None) => {}
            Err(reason) => debug!(field = %path, %reason, "skipping field mapping"),
        }
    }
    Value::Object(out)
}

fn extract_one(
    root: ElementRef<'_>,
    base_url: &Url,
    mapping: &FieldMapping,
) -> Result<Option<String>, String> {
    let selector = mapping.selector.trim();
    let matches: Vec<ElementRef<'_>> = if selector == ":scope" || selector == "*" {
        vec![root]
    } else {
        let parsed =
            Selector::parse(selector).map_err(|err| format!("invalid selector: {err:?}"))?;
        root.select(&parsed).collect()
    };
    if matches.is_empty() {
        return Ok(None);
    }

    let value = match mapping.extract_from {
        ExtractFrom::Text => {
            let joined = matches
                .iter()
                .map(|element| collapse_whitespace(&element.text().collect::<String>()))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            joined
        }
        ExtractFrom::Attribute => {
            let name = mapping
                .attribute_name
                .as_deref()
                .ok_or_else(|| "attribute_name missing".to_string())?;
            let raw = matches
                .iter()
                .find_map(|element| element.value().attr(name))
                .unwrap_or("")
                .trim()
                .to_string();
            if URL_ATTRIBUTES.contains(&name) && !raw.is_empty() {
                resolve_url(base_url, &raw).unwrap_or(raw)
            } else {
                raw
            }
        }
        ExtractFrom::Html => matches
            .first()
            .map(|element| element.inner_html().trim().to_string())
            .unwrap_or_default(),
    };

    if value.is_empty() {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve_url(base: &Url, candidate: &str) -> Option<String> {
    base.join(candidate).ok().map(|url| url.to_string())
}

/// Writes `value` at a dot-separated path, creating intermediate objects.
/// A non-object standing where an intermediate object is needed gets
/// replaced.
fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut current = target;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else { return };
        current = next;
    }
}

/// Removes every subtree matching one of `selectors` and returns the
/// remaining fragment HTML.
pub fn strip_excluded(html: &str, selectors: &[String]) -> String {
    if selectors.is_empty() {
        return html.to_string();
    }
    let mut fragment = Html::parse_fragment(html);
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            debug!(selector = %raw, "invalid exclusion selector, ignoring");
            continue;
        };
        let ids: Vec<_> = fragment.select(&selector).map(|element| element.id()).collect();
        for id in ids {
            if let Some(mut node) = fragment.tree.get_mut(id) {
                node.detach();
            }
        }
    }
    fragment.root_element().html()
}

/// Finds the detail-page link inside one item: the configured selector when
/// present, otherwise the first same-host http(s) anchor that is not a
/// fragment, `javascript:` or `mailto:` link.
pub fn find_detail_url(item_html: &str, base_url: &Url, link_selector: Option<&str>) -> Option<String> {
    let fragment = Html::parse_fragment(item_html);
    let selector_text = link_selector.unwrap_or("a[href]");
    let selector = Selector::parse(selector_text).ok()?;
    for anchor in fragment.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
        {
            continue;
        }
        let Ok(resolved) = base_url.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        if link_selector.is_none() && resolved.host_str() != base_url.host_str() {
            continue;
        }
        return Some(resolved.to_string());
    }
    None
}
