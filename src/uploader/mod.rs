//! Batch submission to the hosted ingestion API.
//!
//! [`Uploader::upload_batch`] owns the retry loop and turns the backend's
//! response into one [`ArticleOutcome`] per submitted article. It never
//! touches the store; the orchestrator records the outcomes.

pub mod api;
pub mod client;
pub mod errors;
pub mod retry;

pub use api::{IngestDocument, IngestionApi, ItemOutcome};
#[cfg(test)]
pub use api::MockIngestionApi;
pub use client::HttpIngestionClient;
pub use errors::UploadError;
pub use retry::{RetryPolicy, jittered};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::extractor::Article;

/// Resolution of one article after its batch was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleOutcome {
    Uploaded { remote_id: String },
    Failed { reason: String },
}

impl ArticleOutcome {
    pub fn is_uploaded(&self) -> bool {
        matches!(self, Self::Uploaded { .. })
    }
}

/// Result of one batch: per-article outcomes in submission order plus the
/// number of API calls it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub outcomes: Vec<ArticleOutcome>,
    pub attempts: u32,
}

impl BatchOutcome {
    fn all_failed(len: usize, reason: String, attempts: u32) -> Self {
        Self {
            outcomes: vec![ArticleOutcome::Failed { reason }; len],
            attempts,
        }
    }

    pub fn uploaded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_uploaded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.uploaded()
    }
}

pub struct Uploader<A> {
    api: A,
    policy: RetryPolicy,
}

impl<A: IngestionApi> Uploader<A> {
    pub fn new(api: A, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    /// Submit `articles` as one batch, retrying transient failures per the
    /// policy. Never fails as a whole: an exhausted or permanent error marks
    /// every article failed, and so does cancellation during a backoff wait.
    ///
    /// A server `Retry-After` can stretch a wait but never past the policy's
    /// `max_delay`.
    #[instrument(skip_all, fields(batch = batch_index, items = articles.len()))]
    pub async fn upload_batch(
        &self,
        batch_index: usize,
        articles: &[Article],
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let documents: Vec<IngestDocument> = articles.iter().map(IngestDocument::from).collect();

        let mut attempt = 0;
        let results = loop {
            attempt += 1;
            match self.api.submit(&documents).await {
                Ok(results) => break results,
                Err(err) if err.should_retry() => match self.policy.delay_for(attempt) {
                    Some(delay) => {
                        let delay = jittered(delay)
                            .max(err.retry_after().unwrap_or_default())
                            .min(self.policy.max_delay());
                        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "batch submission failed, retrying");
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                warn!(attempt, "cancelled during backoff");
                                return BatchOutcome::all_failed(
                                    articles.len(),
                                    format!("cancelled after {attempt} attempts: {err}"),
                                    attempt,
                                );
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        warn!(attempt, error = %err, "batch submission failed, giving up");
                        return BatchOutcome::all_failed(
                            articles.len(),
                            format!("gave up after {attempt} attempts: {err}"),
                            attempt,
                        );
                    }
                },
                Err(err) => {
                    warn!(attempt, error = %err, "batch rejected");
                    return BatchOutcome::all_failed(articles.len(), err.to_string(), attempt);
                }
            }
        };

        if results.len() != articles.len() {
            warn!(
                expected = articles.len(),
                received = results.len(),
                "result count mismatch"
            );
            // Remote ids we cannot attribute are dropped so nothing cites them.
            for remote_id in results.iter().filter_map(|r| r.remote_id.as_deref()) {
                self.delete_quietly(remote_id).await;
            }
            return BatchOutcome::all_failed(
                articles.len(),
                format!(
                    "result count mismatch: sent {}, received {}",
                    articles.len(),
                    results.len()
                ),
                attempt,
            );
        }

        let mut outcomes = Vec::with_capacity(articles.len());
        for (article, result) in articles.iter().zip(results) {
            outcomes.push(self.resolve_item(article, result).await);
        }
        let outcome = BatchOutcome { outcomes, attempts: attempt };
        info!(
            uploaded = outcome.uploaded(),
            failed = outcome.failed(),
            attempts = attempt,
            "batch resolved"
        );
        outcome
    }

    async fn resolve_item(&self, article: &Article, result: ItemOutcome) -> ArticleOutcome {
        let submitted = article.canonical_url.as_str();
        match result {
            ItemOutcome {
                error: Some(error),
                remote_id,
                ..
            } => {
                // A rejected item must not leave a citable document behind
                if let Some(remote_id) = remote_id {
                    warn!(submitted, remote_id = %remote_id, error = %error, "rejected item carried a remote id");
                    self.delete_quietly(&remote_id).await;
                }
                ArticleOutcome::Failed { reason: error }
            }
            ItemOutcome {
                remote_id: Some(remote_id),
                url,
                ..
            } => match url {
                Some(cited) if cited != submitted => {
                    warn!(submitted, cited = %cited, remote_id = %remote_id, "citation mismatch");
                    self.delete_quietly(&remote_id).await;
                    ArticleOutcome::Failed {
                        reason: format!("citation mismatch: backend cites {cited}"),
                    }
                }
                _ => ArticleOutcome::Uploaded { remote_id },
            },
            ItemOutcome { .. } => ArticleOutcome::Failed {
                reason: "backend returned neither remote id nor error".to_string(),
            },
        }
    }

    /// Best-effort removal of a remote document; returns whether it is gone.
    pub async fn delete_quietly(&self, remote_id: &str) -> bool {
        match self.api.delete(remote_id).await {
            Ok(()) => true,
            Err(err) => {
                warn!(remote_id, error = %err, "failed to delete remote document");
                false
            }
        }
    }
}
