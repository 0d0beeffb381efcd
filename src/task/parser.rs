//! Link extraction for fetched pages

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// What a task keeps from a fetched page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// Text of the `<title>` element
    pub title: Option<String>,

    /// Absolute HTTP(S) links, fragments stripped, first occurrence order
    pub links: Vec<String>,
}

/// Parses a page and collects its outgoing links
///
/// Links come from `<a href>` (except `download` anchors) and
/// `<link rel="canonical">`. Non-web schemes and same-page anchors are
/// dropped.
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    let title = Selector::parse("title").ok().and_then(|selector| {
        document
            .select(&selector)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    });

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for query in ["a[href]", "link[rel='canonical'][href]"] {
        let Ok(selector) = Selector::parse(query) else {
            continue;
        };

        for element in document.select(&selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            let resolved = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url));

            if let Some(link) = resolved {
                if seen.insert(link.clone()) {
                    links.push(link);
                }
            }
        }
    }

    ParsedPage { title, links }
}

fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    url.set_fragment(None);
    Some(url.to_string())
}
