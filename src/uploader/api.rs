use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::extractor::Article;
use crate::uploader::UploadError;

/// One document in a batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestDocument {
    pub url: String,
    pub title: String,
    pub text: String,
}

impl From<&Article> for IngestDocument {
    fn from(article: &Article) -> Self {
        Self {
            url: article.canonical_url.to_string(),
            title: article.title.clone(),
            text: article.to_markdown(),
        }
    }
}

/// Backend verdict for one submitted document, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemOutcome {
    /// URL the backend will cite for this document, when it echoes one.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn accepted(url: &str, remote_id: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            remote_id: Some(remote_id.to_string()),
            error: None,
        }
    }

    pub fn rejected(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Hosted knowledge-base ingestion endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IngestionApi: Send + Sync {
    /// Submit a batch; returns one outcome per document.
    async fn submit(&self, documents: &[IngestDocument]) -> Result<Vec<ItemOutcome>, UploadError>;

    /// Remove a previously uploaded document. Already-gone counts as success.
    async fn delete(&self, remote_id: &str) -> Result<(), UploadError>;
}
