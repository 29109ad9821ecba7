use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::extractor::{ExtractOptions, ExtractionError, Extractor};
use crate::fetcher::{FetchError, PageResponse, PageSource};

const ROOT: &str = "https://help.example.com/hc/en-us";

/// In-memory site. Pages can be delayed to force out-of-order completion.
#[derive(Default)]
struct FakeSite {
    pages: HashMap<String, (String, Duration)>,
    failing: HashMap<String, StatusCode>,
    requests: Mutex<Vec<String>>,
}

impl FakeSite {
    fn page(mut self, url: &str, html: String, delay_ms: u64) -> Self {
        self.pages
            .insert(url.to_string(), (html, Duration::from_millis(delay_ms)));
        self
    }

    fn failing(mut self, url: &str, status: StatusCode) -> Self {
        self.failing.insert(url.to_string(), status);
        self
    }

    fn requests_for(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl PageSource for FakeSite {
    async fn fetch(&self, url: &Url) -> Result<PageResponse, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(status) = self.failing.get(url.as_str()) {
            return Err(FetchError::Http {
                status: *status,
                retriable: status.is_server_error(),
            });
        }
        let (html, delay) = self
            .pages
            .get(url.as_str())
            .cloned()
            .ok_or(FetchError::Http {
                status: StatusCode::NOT_FOUND,
                retriable: false,
            })?;
        tokio::time::sleep(delay).await;
        Ok(PageResponse::from_html(url.clone(), html))
    }
}

fn index_html(paths: &[&str]) -> String {
    let links: String = paths
        .iter()
        .map(|p| format!(r#"<li><a href="{p}">{p}</a></li>"#))
        .collect();
    format!("<html><body><nav><a href=\"/login\">Login</a></nav><main><ul>{links}</ul></main></body></html>")
}

fn article_html(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{title} | Help</title></head><body><nav>Menu</nav><article><h1>{title}</h1><p>{body}</p></article></body></html>"
    )
}

fn options(concurrency: usize) -> ExtractOptions {
    let config = Config::new("key", Url::parse(ROOT).unwrap(), "/tmp/unused")
        .with_fetch_concurrency(concurrency);
    ExtractOptions::from_config(&config).unwrap()
}

fn url(path: &str) -> String {
    format!("https://help.example.com{path}")
}

#[tokio::test]
async fn test_crawl_yields_articles_in_discovery_order() {
    let paths = ["/a/1", "/a/2", "/a/3", "/a/4"];
    // Earlier articles respond slower so completion order is reversed.
    let mut site = FakeSite::default().page(ROOT, index_html(&paths), 0);
    for (i, path) in paths.iter().enumerate() {
        let body = format!("Body of article number {i} with enough words to be content.");
        site = site.page(&url(path), article_html(&format!("Article {i}"), &body), 40 - i as u64 * 10);
    }

    let extractor = Extractor::new(site, options(4));
    let crawl = extractor.crawl(&Url::parse(ROOT).unwrap()).await.unwrap();
    assert_eq!(crawl.links.len(), 4);

    let articles: Vec<_> = crawl.articles.collect().await;
    let titles: Vec<String> = articles
        .into_iter()
        .map(|a| a.unwrap().title)
        .collect();
    assert_eq!(titles, vec!["Article 0", "Article 1", "Article 2", "Article 3"]);
}

#[tokio::test]
async fn test_article_fields() {
    let site = FakeSite::default()
        .page(ROOT, index_html(&["/a/1/?utm_source=index"]), 0)
        .page(
            &url("/a/1"),
            article_html("Pairing", "Open the   app and PAIR the screen."),
            0,
        );

    let extractor = Extractor::new(site, options(2));
    let crawl = extractor.crawl(&Url::parse(ROOT).unwrap()).await.unwrap();
    let articles: Vec<_> = crawl.articles.collect().await;
    let article = articles.into_iter().next().unwrap().unwrap();

    assert_eq!(article.canonical_url.as_str(), url("/a/1"));
    assert_eq!(article.title, "Pairing");
    assert!(article.body_text.contains("Open the app and PAIR the screen."));
    assert!(!article.body_text.contains("Menu"));
    assert_eq!(article.discovered_at_index, 0);
    assert_eq!(
        article.content_fingerprint,
        crate::extractor::fingerprint(&article.body_text)
    );
}

#[tokio::test]
async fn test_article_failure_is_skipped_not_fatal() {
    let site = FakeSite::default()
        .page(ROOT, index_html(&["/a/1", "/a/2", "/a/3"]), 0)
        .page(&url("/a/1"), article_html("One", "First article body text with several more words."), 0)
        .failing(&url("/a/2"), StatusCode::BAD_GATEWAY)
        .page(&url("/a/3"), article_html("Three", "Third article body text with several more words."), 0);

    let extractor = Extractor::new(site, options(2));
    let crawl = extractor.crawl(&Url::parse(ROOT).unwrap()).await.unwrap();
    let results: Vec<_> = crawl.articles.collect().await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    let skipped = results[1].as_ref().unwrap_err();
    assert_eq!(skipped.url.as_str(), url("/a/2"));
    assert!(results[2].is_ok());

    // 502 is retriable: fetched twice before giving up
    assert_eq!(extractor.source().requests_for(&url("/a/2")), 2);
}

#[tokio::test]
async fn test_empty_article_is_skipped() {
    let site = FakeSite::default()
        .page(ROOT, index_html(&["/a/1"]), 0)
        .page(&url("/a/1"), "<html><body></body></html>".to_string(), 0);

    let extractor = Extractor::new(site, options(1));
    let crawl = extractor.crawl(&Url::parse(ROOT).unwrap()).await.unwrap();
    let results: Vec<_> = crawl.articles.collect().await;
    assert!(matches!(
        results[0],
        Err(ref skipped) if matches!(skipped.error, FetchError::EmptyContent(_))
    ));
}

#[tokio::test]
async fn test_index_failure_is_fatal() {
    let site = FakeSite::default().failing(ROOT, StatusCode::SERVICE_UNAVAILABLE);
    let extractor = Extractor::new(site, options(1));

    let result = extractor.crawl(&Url::parse(ROOT).unwrap()).await;
    assert!(matches!(result, Err(ExtractionError::IndexFetch { .. })));
}

#[tokio::test]
async fn test_index_without_links_is_fatal() {
    let site = FakeSite::default().page(ROOT, "<html><body><main>No links</main></body></html>".to_string(), 0);
    let extractor = Extractor::new(site, options(1));

    let result = extractor.crawl(&Url::parse(ROOT).unwrap()).await;
    assert!(matches!(result, Err(ExtractionError::NoCandidates(_))));
}

#[tokio::test]
async fn test_max_articles_truncates_candidates() {
    let site = FakeSite::default().page(ROOT, index_html(&["/a/1", "/a/2", "/a/3"]), 0);
    let config = Config::new("key", Url::parse(ROOT).unwrap(), "/tmp/unused").with_max_articles(2);
    let extractor = Extractor::new(site, ExtractOptions::from_config(&config).unwrap());

    let discovery = extractor.discover(&Url::parse(ROOT).unwrap()).await.unwrap();
    assert_eq!(discovery.links.len(), 2);
    assert_eq!(discovery.links[1].as_str(), url("/a/2"));
    assert!(discovery.complete);
}

#[tokio::test]
async fn test_sitemap_index_is_expanded() {
    let sitemap_index = r#"<?xml version="1.0"?><sitemapindex>
        <sitemap><loc>https://help.example.com/sitemap-1.xml</loc></sitemap>
        <sitemap><loc>https://help.example.com/sitemap-missing.xml</loc></sitemap>
        </sitemapindex>"#;
    let child = r#"<?xml version="1.0"?><urlset>
        <url><loc>https://help.example.com/a/1</loc></url>
        <url><loc>https://help.example.com/a/2</loc></url>
        </urlset>"#;
    let site = FakeSite::default()
        .page(ROOT, sitemap_index.to_string(), 0)
        .page(&url("/sitemap-1.xml"), child.to_string(), 0);
    let extractor = Extractor::new(site, options(1));

    let discovery = extractor.discover(&Url::parse(ROOT).unwrap()).await.unwrap();
    let links: Vec<&str> = discovery.links.iter().map(Url::as_str).collect();
    assert_eq!(links, vec![url("/a/1"), url("/a/2")]);
    // The missing child makes the listing partial
    assert!(!discovery.complete);
}

#[tokio::test]
async fn test_failed_child_sitemap_marks_crawl_incomplete() {
    let sitemap_index = r#"<?xml version="1.0"?><sitemapindex>
        <sitemap><loc>https://help.example.com/sm-a.xml</loc></sitemap>
        <sitemap><loc>https://help.example.com/sm-b.xml</loc></sitemap>
        </sitemapindex>"#;
    let child_a = r#"<?xml version="1.0"?><urlset><url><loc>https://help.example.com/a/1</loc></url></urlset>"#;
    let child_b = r#"<?xml version="1.0"?><urlset><url><loc>https://help.example.com/a/2</loc></url></urlset>"#;
    let body = "A sitemap listed article with enough words to count as content.";
    let site = FakeSite::default()
        .page(ROOT, sitemap_index.to_string(), 0)
        .page(&url("/sm-a.xml"), child_a.to_string(), 0)
        .page(&url("/sm-b.xml"), child_b.to_string(), 0)
        .page(&url("/a/1"), article_html("One", body), 0)
        .page(&url("/a/2"), article_html("Two", body), 0);
    let healthy = Extractor::new(site, options(1));

    let crawl = healthy.crawl(&Url::parse(ROOT).unwrap()).await.unwrap();
    assert!(crawl.complete);
    assert_eq!(crawl.links.len(), 2);

    let site = FakeSite::default()
        .page(ROOT, sitemap_index.to_string(), 0)
        .page(&url("/sm-a.xml"), child_a.to_string(), 0)
        .failing(&url("/sm-b.xml"), StatusCode::SERVICE_UNAVAILABLE)
        .page(&url("/a/1"), article_html("One", body), 0);
    let degraded = Extractor::new(site, options(1));

    let crawl = degraded.crawl(&Url::parse(ROOT).unwrap()).await.unwrap();
    assert!(!crawl.complete);
    let links: Vec<&str> = crawl.links.iter().map(Url::as_str).collect();
    assert_eq!(links, vec![url("/a/1")]);
    let articles: Vec<_> = crawl.articles.collect().await;
    assert_eq!(articles.len(), 1);
    assert!(articles[0].is_ok());
}

#[cfg(feature = "fuzz")]
mod fuzz {
    use super::*;
    use crate::extractor::build_article;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_build_article_never_panics(html in ".*") {
            let page = PageResponse::from_html(Url::parse("https://example.com/a").unwrap(), html);
            let canonical = Url::parse("https://example.com/a").unwrap();
            let _ = build_article(&page, &canonical, 0, &options(1));
        }
    }
}
