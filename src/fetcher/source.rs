use async_trait::async_trait;
use url::Url;

use crate::fetcher::{FetchError, PageResponse};

/// Network seam of the extractor: anything that can turn a URL into a page.
///
/// [`HttpFetcher`](crate::fetcher::HttpFetcher) is the production
/// implementation; tests plug in in-memory fakes.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<PageResponse, FetchError>;
}
