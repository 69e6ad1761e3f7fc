//! HTML → [`PageRecord`] extraction.
//!
//! Everything here is pure: the same document, page URL and root URL always
//! produce the same record. Parsing goes through html5ever via `scraper`,
//! which accepts any input, so malformed markup degrades to empty fields
//! instead of failing.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use reqwest::Url;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

use crate::data_models::{Headings, Image, Link, NO_ALT_TEXT, NO_TITLE, PageRecord};

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}

static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static META: Lazy<Selector> = Lazy::new(|| selector("meta"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static IMAGE: Lazy<Selector> = Lazy::new(|| selector("img[src]"));
static HEADINGS: Lazy<Vec<(u8, Selector)>> =
    Lazy::new(|| (1..=6).map(|level| (level, selector(&format!("h{level}")))).collect());

/// Scheme and host match; the port is not compared.
pub fn same_origin(url: &Url, reference: &Url) -> bool {
    url.scheme() == reference.scheme() && url.host_str() == reference.host_str()
}

/// Builds the record for one page. `page_url` is the page's identity and the
/// base for its links; `root_url` is the crawl root, used for the same-origin
/// filter and as the base for image sources. `child_pages` is left empty.
pub fn extract(html: &str, page_url: &Url, root_url: &Url) -> PageRecord {
    let document = Html::parse_document(html);

    PageRecord {
        url: page_url.to_string(),
        title: title(&document),
        meta: meta(&document),
        headings: headings(&document),
        links: links(&document, page_url, root_url),
        images: images(&document, root_url),
        text: visible_text(&document),
        child_pages: Vec::new(),
    }
}

/// Trimmed text fragments of an element, joined by single spaces.
fn stripped_text(element: ElementRef) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn title(document: &Html) -> Option<String> {
    match document.select(&TITLE).next() {
        Some(element) => {
            let text = element.text().collect::<String>();
            (!text.is_empty()).then(|| text.trim().to_string())
        }
        None => Some(NO_TITLE.to_string()),
    }
}

fn meta(document: &Html) -> IndexMap<String, String> {
    let mut meta = IndexMap::new();
    for element in document.select(&META) {
        let attrs = element.value();
        let key = attrs
            .attr("name")
            .filter(|name| !name.is_empty())
            .or_else(|| attrs.attr("property").filter(|prop| !prop.is_empty()));
        if let Some(key) = key {
            // a later tag with the same key replaces the value, keeping its position
            meta.insert(key.to_string(), attrs.attr("content").unwrap_or("").to_string());
        }
    }
    meta
}

fn headings(document: &Html) -> Headings {
    let mut headings = Headings::default();
    for (level, sel) in HEADINGS.iter() {
        if let Some(slot) = headings.level_mut(*level) {
            slot.extend(document.select(sel).map(stripped_text));
        }
    }
    headings
}

fn links(document: &Html, page_url: &Url, root_url: &Url) -> Vec<Link> {
    let mut links = Vec::new();
    for element in document.select(&ANCHOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        match page_url.join(href) {
            Ok(resolved) if same_origin(&resolved, root_url) => links.push(Link {
                text: stripped_text(element),
                url: resolved.to_string(),
            }),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("skipping href {href:?} on {page_url}: {e}");
            }
        }
    }
    links
}

fn images(document: &Html, root_url: &Url) -> Vec<Image> {
    document
        .select(&IMAGE)
        .filter_map(|element| {
            let attrs = element.value();
            let src = root_url.join(attrs.attr("src")?).ok()?;
            Some(Image {
                src: src.to_string(),
                alt: attrs.attr("alt").unwrap_or(NO_ALT_TEXT).to_string(),
            })
        })
        .collect()
}

/// Every text node outside `<script>`/`<style>`, trimmed and space-joined.
fn visible_text(document: &Html) -> String {
    text_fragments(document).join(" ")
}

fn text_fragments(document: &Html) -> Vec<String> {
    let mut fragments = Vec::new();
    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let text = text.text.trim();
        if text.is_empty() {
            continue;
        }
        let hidden = node.ancestors().any(|ancestor| {
            matches!(ancestor.value(), Node::Element(e) if matches!(e.name(), "script" | "style"))
        });
        if hidden {
            continue;
        }
        // html5ever keeps <noscript> content as raw markup, so parse it again
        let in_noscript = node
            .parent()
            .and_then(|parent| parent.value().as_element())
            .is_some_and(|e| e.name() == "noscript");
        if in_noscript {
            fragments.extend(text_fragments(&Html::parse_fragment(text)));
        } else {
            fragments.push(text.to_string());
        }
    }
    fragments
}
