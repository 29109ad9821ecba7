//! Crawl a source index and turn every linked article into an [`Article`].
//!
//! The index fetch is the only fatal step. Article pages are fetched with
//! bounded concurrency but yielded in discovery order; a page that cannot be
//! fetched or parsed is reported as a skip and the crawl continues.

pub mod canonical;
pub mod cleaner;
pub mod discover;
pub mod errors;
pub mod model;
pub mod reader;

#[cfg(test)]
mod tests;

pub use canonical::canonicalize;
pub use errors::ExtractionError;
pub use model::{Article, fingerprint};

use futures::stream::{self, BoxStream, StreamExt};
use regex::Regex;
use scraper::Selector;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{Config, ConfigError};
use crate::extractor::discover::{IndexListing, LinkFilter, parse_index};
use crate::fetcher::{FetchError, PageResponse, PageSource};

/// Fetch attempts per article page for retriable errors.
const ARTICLE_FETCH_ATTEMPTS: usize = 2;

/// Compiled extraction settings.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub content_selector: Selector,
    pub link_selector: Selector,
    pub link_pattern: Option<Regex>,
    pub max_articles: Option<usize>,
    pub concurrency: usize,
}

impl ExtractOptions {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let selector = |field: &'static str, raw: &str| {
            Selector::parse(raw).map_err(|e| ConfigError::InvalidValue {
                field,
                reason: format!("invalid CSS selector: {e}"),
            })
        };
        let link_pattern = config
            .link_pattern()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                field: "link_pattern",
                reason: e.to_string(),
            })?;

        Ok(Self {
            content_selector: selector("content_selector", config.content_selector())?,
            link_selector: selector("link_selector", config.link_selector())?,
            link_pattern,
            max_articles: config.max_articles(),
            concurrency: config.fetch_concurrency().max(1),
        })
    }
}

/// An article page that was discovered but could not be turned into an Article.
#[derive(Debug)]
pub struct SkippedArticle {
    pub url: Url,
    pub error: FetchError,
}

/// Candidate links found under an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub links: Vec<Url>,
    /// False when part of the listing could not be read, e.g. a child
    /// sitemap failed. An incomplete set says nothing about removals.
    pub complete: bool,
}

/// Result of a crawl: the discovered link set plus a lazy, ordered article stream.
pub struct Crawl<'a> {
    pub links: Vec<Url>,
    pub complete: bool,
    pub articles: BoxStream<'a, Result<Article, SkippedArticle>>,
}

pub struct Extractor<S> {
    source: S,
    options: ExtractOptions,
}

impl<S: PageSource> Extractor<S> {
    pub fn new(source: S, options: ExtractOptions) -> Self {
        Self { source, options }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch the index and start the article stream. Nothing is fetched
    /// beyond the index until the stream is polled.
    pub async fn crawl(&self, root: &Url) -> Result<Crawl<'_>, ExtractionError> {
        let Discovery { links, complete } = self.discover(root).await?;
        info!(candidates = links.len(), complete, "discovered article links");

        let source = &self.source;
        let options = &self.options;
        let articles = stream::iter(links.clone().into_iter().enumerate())
            .map(move |(index, url)| fetch_article(source, options, index, url))
            .buffered(options.concurrency)
            .boxed();

        Ok(Crawl {
            links,
            complete,
            articles,
        })
    }

    /// Candidate article URLs, canonical and in discovery order.
    #[instrument(skip(self), fields(root = %root))]
    pub async fn discover(&self, root: &Url) -> Result<Discovery, ExtractionError> {
        let index = self
            .source
            .fetch(root)
            .await
            .map_err(|source| ExtractionError::IndexFetch {
                url: root.to_string(),
                source,
            })?;

        let filter = LinkFilter {
            container: &self.options.link_selector,
            pattern: self.options.link_pattern.as_ref(),
        };

        let (mut links, complete) = match parse_index(&index, &filter) {
            IndexListing::Articles(links) => (links, true),
            IndexListing::Sitemaps(children) => self.expand_sitemaps(children, &filter).await,
        };

        if let Some(max) = self.options.max_articles
            && links.len() > max
        {
            debug!(discovered = links.len(), max, "truncating candidate list");
            links.truncate(max);
        }

        if links.is_empty() {
            return Err(ExtractionError::NoCandidates(root.to_string()));
        }
        Ok(Discovery { links, complete })
    }

    /// One level of `<sitemapindex>` nesting. A child that fails is skipped
    /// and the listing is reported incomplete.
    async fn expand_sitemaps(
        &self,
        children: Vec<Url>,
        filter: &LinkFilter<'_>,
    ) -> (Vec<Url>, bool) {
        let mut links: Vec<Url> = Vec::new();
        let mut complete = true;
        for child in children {
            match self.source.fetch(&child).await {
                Ok(page) => {
                    if let IndexListing::Articles(found) = parse_index(&page, filter) {
                        for url in found {
                            if !links.contains(&url) {
                                links.push(url);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(sitemap = %child, error = %e, "skipping child sitemap");
                    complete = false;
                }
            }
        }
        (links, complete)
    }
}

async fn fetch_article<S: PageSource>(
    source: &S,
    options: &ExtractOptions,
    index: usize,
    url: Url,
) -> Result<Article, SkippedArticle> {
    let mut attempt = 0;
    let page = loop {
        attempt += 1;
        match source.fetch(&url).await {
            Ok(page) => break page,
            Err(e) if e.should_retry() && attempt < ARTICLE_FETCH_ATTEMPTS => {
                debug!(url = %url, error = %e, "retrying article fetch");
            }
            Err(error) => {
                warn!(url = %url, error = %error, "skipping article");
                return Err(SkippedArticle { url, error });
            }
        }
    };

    match build_article(&page, &url, index, options) {
        Ok(article) => Ok(article),
        Err(error) => {
            warn!(url = %url, error = %error, "skipping article");
            Err(SkippedArticle { url, error })
        }
    }
}

/// Parse a fetched page into an Article keyed by the discovered canonical URL.
pub fn build_article(
    page: &PageResponse,
    canonical_url: &Url,
    index: usize,
    options: &ExtractOptions,
) -> Result<Article, FetchError> {
    let read = reader::extract(&page.body_utf8, &page.url_final, &options.content_selector)
        .ok_or_else(|| FetchError::EmptyContent(canonical_url.to_string()))?;

    let body = cleaner::strip_boilerplate(&read.text);
    if read.title.trim().is_empty() || body.is_empty() {
        return Err(FetchError::EmptyContent(canonical_url.to_string()));
    }

    if canonicalize(&page.url_final) != *canonical_url {
        debug!(link = %canonical_url, landed = %page.url_final, "article redirected");
    }

    Ok(Article::new(canonical_url.clone(), read.title, body, index)
        .with_validators(page.etag(), page.last_modified()))
}
