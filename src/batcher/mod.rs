//! Diffing extracted articles against the store and cutting the result into
//! upload batches.

use std::collections::HashSet;
use tracing::debug;

use crate::config::Config;
use crate::extractor::Article;
use crate::store::{Store, UploadStatus};

/// Per-batch limits. Both are at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_items: usize,
    pub max_bytes: usize,
}

impl BatchLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_items: config.batch_max_items().max(1),
            max_bytes: config.batch_max_bytes().max(1),
        }
    }
}

/// An article that needs uploading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpload {
    pub article: Article,
    /// Remote document of the stored version, superseded by this upload.
    pub previous_remote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadBatch {
    pub index: usize,
    pub items: Vec<PlannedUpload>,
}

impl UploadBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        self.items.iter().map(|i| i.article.encoded_len()).sum()
    }

    pub fn articles(&self) -> Vec<Article> {
        self.items.iter().map(|i| i.article.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPlan {
    pub batches: Vec<UploadBatch>,
    /// Articles already uploaded at their current fingerprint.
    pub unchanged: usize,
    /// Later occurrences of an already-seen canonical URL.
    pub duplicates: usize,
}

impl UploadPlan {
    pub fn to_upload(&self) -> usize {
        self.batches.iter().map(UploadBatch::len).sum()
    }
}

/// Compute the to-upload set and partition it, preserving input order.
pub fn plan(articles: Vec<Article>, store: &Store, limits: BatchLimits) -> UploadPlan {
    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    let mut unchanged = 0;
    let mut duplicates = 0;

    for article in articles {
        let key = article.canonical_url.as_str().to_string();
        if !seen.insert(key.clone()) {
            debug!(url = %key, "dropping duplicate article");
            duplicates += 1;
            continue;
        }

        let stored = store.get(&key);
        if stored.is_some_and(|r| !r.needs_upload(&article.content_fingerprint)) {
            unchanged += 1;
            continue;
        }
        let previous_remote_id = stored
            .filter(|r| r.status == UploadStatus::Uploaded)
            .and_then(|r| r.remote_id.clone());
        pending.push(PlannedUpload {
            article,
            previous_remote_id,
        });
    }

    UploadPlan {
        batches: partition(pending, limits),
        unchanged,
        duplicates,
    }
}

/// Greedy in-order partition. An item larger than `max_bytes` on its own
/// gets a batch to itself.
pub fn partition(items: Vec<PlannedUpload>, limits: BatchLimits) -> Vec<UploadBatch> {
    let mut batches = Vec::new();
    let mut current: Vec<PlannedUpload> = Vec::new();
    let mut current_bytes = 0;

    for item in items {
        let size = item.article.encoded_len();
        if !current.is_empty()
            && (current.len() >= limits.max_items || current_bytes + size > limits.max_bytes)
        {
            batches.push(UploadBatch {
                index: batches.len(),
                items: std::mem::take(&mut current),
            });
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(item);
    }
    if !current.is_empty() {
        batches.push(UploadBatch {
            index: batches.len(),
            items: current,
        });
    }
    batches
}

/// Stored uploads whose URL was not among the links discovered this run.
pub fn removed_candidates(store: &Store, discovered: &HashSet<String>) -> Vec<String> {
    store
        .all()
        .filter(|r| r.status == UploadStatus::Uploaded && !discovered.contains(&r.canonical_url))
        .map(|r| r.canonical_url.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UploadRecord;
    use chrono::Utc;
    use tempfile::TempDir;
    use url::Url;

    fn article(i: usize, body: &str) -> Article {
        Article::new(
            Url::parse(&format!("https://help.example.com/a/{i}")).unwrap(),
            format!("T{i}"),
            body,
            i,
        )
    }

    fn planned(i: usize, bytes: usize) -> PlannedUpload {
        // Title "T{i}" is 2 bytes for single-digit i
        PlannedUpload {
            article: article(i, &"x".repeat(bytes - 2)),
            previous_remote_id: None,
        }
    }

    fn limits(max_items: usize, max_bytes: usize) -> BatchLimits {
        BatchLimits {
            max_items,
            max_bytes,
        }
    }

    fn indices(batches: &[UploadBatch]) -> Vec<Vec<usize>> {
        batches
            .iter()
            .map(|b| b.items.iter().map(|i| i.article.discovered_at_index).collect())
            .collect()
    }

    #[test]
    fn test_partition_by_item_count() {
        let items = (0..5).map(|i| planned(i, 10)).collect();
        let batches = partition(items, limits(2, 1000));
        assert_eq!(indices(&batches), vec![vec![0, 1], vec![2, 3], vec![4]]);
        assert_eq!(batches[2].index, 2);
    }

    #[test]
    fn test_partition_by_bytes() {
        let items = (0..4).map(|i| planned(i, 40)).collect();
        let batches = partition(items, limits(10, 100));
        assert_eq!(indices(&batches), vec![vec![0, 1], vec![2, 3]]);
        assert!(batches.iter().all(|b| b.encoded_len() <= 100));
    }

    #[test]
    fn test_oversized_article_travels_alone() {
        let items = vec![planned(0, 30), planned(1, 500), planned(2, 30)];
        let batches = partition(items, limits(10, 100));
        assert_eq!(indices(&batches), vec![vec![0], vec![1], vec![2]]);
        assert_eq!(batches[1].encoded_len(), 500);
    }

    #[test]
    fn test_plan_against_store() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).unwrap();

        // 0: uploaded and unchanged, 1: uploaded but changed, 2: failed, 3: new
        let mut r0 = UploadRecord::pending(&article(0, "same"), None);
        r0.mark_uploaded("file-0".to_string(), Utc::now());
        let mut r1 = UploadRecord::pending(&article(1, "old"), None);
        r1.mark_uploaded("file-1".to_string(), Utc::now());
        let mut r2 = UploadRecord::pending(&article(2, "same"), None);
        r2.mark_failed("boom", Utc::now());
        for r in [r0, r1, r2] {
            store.upsert(r).unwrap();
        }

        let articles = vec![
            article(0, "same"),
            article(1, "new"),
            article(2, "same"),
            article(3, "fresh"),
            article(1, "duplicate"),
        ];
        let plan = plan(articles, &store, limits(20, 1 << 20));

        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.duplicates, 1);
        assert_eq!(plan.to_upload(), 3);
        assert_eq!(indices(&plan.batches), vec![vec![1, 2, 3]]);
        let items = &plan.batches[0].items;
        assert_eq!(items[0].previous_remote_id.as_deref(), Some("file-1"));
        assert_eq!(items[0].article.body_text, "new");
        assert_eq!(items[1].previous_remote_id, None);
    }

    #[test]
    fn test_removed_candidates() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let mut gone = UploadRecord::pending(&article(0, "a"), None);
        gone.mark_uploaded("file-0".to_string(), Utc::now());
        let mut kept = UploadRecord::pending(&article(1, "b"), None);
        kept.mark_uploaded("file-1".to_string(), Utc::now());
        let never = UploadRecord::pending(&article(2, "c"), None);
        for r in [gone, kept, never] {
            store.upsert(r).unwrap();
        }

        let discovered: HashSet<String> = [article(1, "b").canonical_url.to_string()].into();
        assert_eq!(
            removed_candidates(&store, &discovered),
            vec!["https://help.example.com/a/0".to_string()]
        );
    }

    #[cfg(feature = "fuzz")]
    mod fuzz {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_batches_respect_limits(
                sizes in proptest::collection::vec(2usize..300, 0..60),
                max_items in 1usize..10,
                max_bytes in 1usize..400,
            ) {
                let items: Vec<_> = sizes
                    .iter()
                    .enumerate()
                    .map(|(i, &s)| PlannedUpload {
                        article: article(i, &"x".repeat(s)),
                        previous_remote_id: None,
                    })
                    .collect();
                let total = items.len();
                let batches = partition(items, limits(max_items, max_bytes));

                let flattened: Vec<usize> = indices(&batches).concat();
                prop_assert_eq!(flattened, (0..total).collect::<Vec<_>>());
                for batch in &batches {
                    prop_assert!(batch.len() <= max_items);
                    prop_assert!(batch.encoded_len() <= max_bytes || batch.len() == 1);
                }
            }
        }
    }
}
