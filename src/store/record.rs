use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extractor::Article;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
    Removed,
}

/// Persisted upload state for one canonical URL. Latest write wins; every
/// write is also appended to the history log.
///
/// `remote_id` is only ever set while `status` is `Uploaded`. The
/// transition methods below are the only way the orchestrator changes a
/// record, and each of them keeps that true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub canonical_url: String,
    pub title: String,
    pub content_fingerprint: String,
    pub remote_id: Option<String>,
    pub status: UploadStatus,
    pub last_attempt: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Superseded remote documents still waiting to be deleted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retired_remote_ids: Vec<String>,
}

impl UploadRecord {
    /// Record for an article about to be submitted. A live remote document
    /// from an earlier upload is queued for retirement.
    pub fn pending(article: &Article, previous: Option<&UploadRecord>) -> Self {
        let mut retired_remote_ids = Vec::new();
        let mut attempt_count = 0;
        if let Some(previous) = previous {
            retired_remote_ids.extend(previous.retired_remote_ids.iter().cloned());
            retired_remote_ids.extend(previous.remote_id.iter().cloned());
            attempt_count = previous.attempt_count;
        }
        Self {
            canonical_url: article.canonical_url.to_string(),
            title: article.title.clone(),
            content_fingerprint: article.content_fingerprint.clone(),
            remote_id: None,
            status: UploadStatus::Pending,
            last_attempt: previous.and_then(|p| p.last_attempt),
            attempt_count,
            last_error: None,
            retired_remote_ids,
        }
    }

    /// True unless this record is an upload of exactly `fingerprint`.
    pub fn needs_upload(&self, fingerprint: &str) -> bool {
        !(self.status == UploadStatus::Uploaded && self.content_fingerprint == fingerprint)
    }

    pub fn mark_uploaded(&mut self, remote_id: String, at: DateTime<Utc>) {
        self.status = UploadStatus::Uploaded;
        self.remote_id = Some(remote_id);
        self.attempt_count += 1;
        self.last_attempt = Some(at);
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        if let Some(remote_id) = self.remote_id.take() {
            self.retired_remote_ids.push(remote_id);
        }
        self.status = UploadStatus::Failed;
        self.attempt_count += 1;
        self.last_attempt = Some(at);
        self.last_error = Some(reason.into());
    }

    /// The article left the source and its remote document is gone.
    pub fn mark_removed(&mut self, at: DateTime<Utc>) {
        self.status = UploadStatus::Removed;
        self.remote_id = None;
        self.last_attempt = Some(at);
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn article(body: &str) -> Article {
        Article::new(Url::parse("https://example.com/a/1").unwrap(), "One", body, 0)
    }

    #[test]
    fn test_needs_upload_rule() {
        let a = article("body v1");
        let mut record = UploadRecord::pending(&a, None);
        assert!(record.needs_upload(&a.content_fingerprint));

        record.mark_failed("boom", Utc::now());
        assert!(record.needs_upload(&a.content_fingerprint));

        record.mark_uploaded("file-1".to_string(), Utc::now());
        assert!(!record.needs_upload(&a.content_fingerprint));
        assert!(record.needs_upload(&article("body v2").content_fingerprint));
    }

    #[test]
    fn test_reupload_retires_previous_remote_id() {
        let a = article("body v1");
        let mut first = UploadRecord::pending(&a, None);
        first.mark_uploaded("file-1".to_string(), Utc::now());

        let b = article("body v2");
        let second = UploadRecord::pending(&b, Some(&first));
        assert_eq!(second.status, UploadStatus::Pending);
        assert_eq!(second.remote_id, None);
        assert_eq!(second.retired_remote_ids, vec!["file-1".to_string()]);
        assert_eq!(second.attempt_count, 1);
        assert_eq!(second.content_fingerprint, b.content_fingerprint);
    }

    #[test]
    fn test_remote_id_only_while_uploaded() {
        let mut record = UploadRecord::pending(&article("x"), None);
        record.mark_uploaded("file-9".to_string(), Utc::now());
        assert_eq!(record.attempt_count, 1);

        record.mark_failed("citation mismatch", Utc::now());
        assert_eq!(record.remote_id, None);
        assert_eq!(record.retired_remote_ids, vec!["file-9".to_string()]);
        assert_eq!(record.attempt_count, 2);

        record.mark_removed(Utc::now());
        assert_eq!(record.status, UploadStatus::Removed);
        assert_eq!(record.remote_id, None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&UploadStatus::Uploaded).unwrap();
        assert_eq!(json, "\"uploaded\"");
    }
}
