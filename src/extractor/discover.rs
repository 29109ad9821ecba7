use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

use crate::extractor::canonical::canonicalize;
use crate::fetcher::PageResponse;

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static LOC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<loc>\s*(.*?)\s*</loc>").unwrap());

/// What an index page lists.
#[derive(Debug, PartialEq, Eq)]
pub enum IndexListing {
    /// Canonical article URLs in discovery order, deduplicated.
    Articles(Vec<Url>),
    /// Child sitemaps of a `<sitemapindex>`.
    Sitemaps(Vec<Url>),
}

/// Link filter applied to every candidate.
pub struct LinkFilter<'a> {
    pub container: &'a Selector,
    pub pattern: Option<&'a Regex>,
}

pub fn parse_index(page: &PageResponse, filter: &LinkFilter<'_>) -> IndexListing {
    if page.is_xml() {
        let locs = sitemap_locs(&page.body_utf8);
        if page.body_utf8.contains("<sitemapindex") {
            return IndexListing::Sitemaps(locs);
        }
        return IndexListing::Articles(select_candidates(locs, &page.url_final, filter));
    }

    let hrefs = html_hrefs(&page.body_utf8, filter.container);
    let resolved = hrefs
        .iter()
        .filter(|href| !is_non_navigational(href))
        .filter_map(|href| page.url_final.join(href).ok())
        .collect();
    IndexListing::Articles(select_candidates(resolved, &page.url_final, filter))
}

/// `href`s from the first container that has any, or the whole document.
fn html_hrefs(html: &str, container: &Selector) -> Vec<String> {
    let document = Html::parse_document(html);
    let collect = |root: scraper::ElementRef<'_>| -> Vec<String> {
        root.select(&ANCHOR)
            .filter_map(|a| a.value().attr("href"))
            .map(|href| href.trim().to_string())
            .collect()
    };

    document
        .select(container)
        .map(collect)
        .find(|hrefs| !hrefs.is_empty())
        .unwrap_or_else(|| collect(document.root_element()))
}

fn sitemap_locs(xml: &str) -> Vec<Url> {
    LOC_REGEX
        .captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| unescape_xml(m.as_str()))
        .filter_map(|loc| Url::parse(&loc).ok())
        .collect()
}

fn unescape_xml(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

fn is_non_navigational(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    href.is_empty()
        || href.starts_with('#')
        || ["mailto:", "javascript:", "tel:", "data:"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
}

/// Canonicalize, keep same-host http(s) links that match the pattern, drop
/// the index itself and duplicates. First occurrence keeps its position.
fn select_candidates(urls: Vec<Url>, index_url: &Url, filter: &LinkFilter<'_>) -> Vec<Url> {
    let index_canonical = canonicalize(index_url);
    let mut seen = HashSet::new();

    urls.into_iter()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .filter(|u| u.host_str() == index_url.host_str())
        .map(|u| canonicalize(&u))
        .filter(|u| *u != index_canonical)
        .filter(|u| filter.pattern.is_none_or(|p| p.is_match(u.as_str())))
        .filter(|u| seen.insert(u.as_str().to_string()))
        .collect()
}
