use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::uploader::{IngestDocument, IngestionApi, ItemOutcome, UploadError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("siphon/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct BatchRequest<'a> {
    documents: &'a [IngestDocument],
}

#[derive(Deserialize)]
struct BatchResponse {
    results: Vec<ItemOutcome>,
}

/// reqwest-backed [`IngestionApi`].
#[derive(Debug, Clone)]
pub struct HttpIngestionClient {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl HttpIngestionClient {
    pub fn new(
        endpoint: Url,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, UploadError> {
        let client = ClientBuilder::new()
            .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| UploadError::Permanent(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
        })
    }

    /// `{endpoint}/<segments...>`, keeping any path prefix on the endpoint.
    fn url_for(&self, segments: &[&str]) -> Result<Url, UploadError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| UploadError::Permanent(format!("endpoint {} cannot be a base", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl IngestionApi for HttpIngestionClient {
    #[instrument(skip_all, fields(documents = documents.len()))]
    async fn submit(&self, documents: &[IngestDocument]) -> Result<Vec<ItemOutcome>, UploadError> {
        let url = self.url_for(&["documents", "batch"])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&BatchRequest { documents })
            .send()
            .await
            .map_err(UploadError::from_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::from_status(status, &body, retry_after));
        }

        let parsed: BatchResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Permanent(format!("undecodable batch response: {e}")))?;
        debug!(results = parsed.results.len(), "batch accepted");
        Ok(parsed.results)
    }

    #[instrument(skip(self))]
    async fn delete(&self, remote_id: &str) -> Result<(), UploadError> {
        let url = self.url_for(&["documents", remote_id])?;
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(UploadError::from_reqwest_error)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(UploadError::from_status(status, &body, retry_after))
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
