//! Drives one run: extract, diff, upload, then retire and prune remote
//! documents, and finally write the run report.
//!
//! There is no in-progress checkpoint. Anything not recorded as uploaded at
//! its current fingerprint is picked up again by the next run.

pub mod report;


pub use report::{RunOutcome, RunPhase, RunResult};

use chrono::Utc;
use futures::StreamExt;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::batcher::{self, BatchLimits, UploadBatch};
use crate::config::{Config, ConfigError};
use crate::extractor::{Article, ExtractOptions, ExtractionError, Extractor};
use crate::fetcher::PageSource;
use crate::store::{Store, StoreError, UploadRecord};
use crate::uploader::{ArticleOutcome, IngestionApi, Uploader};
use report::RunTally;

pub struct Orchestrator<S, A> {
    config: Config,
    store: Store,
    extractor: Extractor<S>,
    uploader: Uploader<A>,
    run_id: Uuid,
    phase: RunPhase,
    tally: RunTally,
}

struct Extracted {
    links: Vec<Url>,
    complete: bool,
    articles: Vec<Article>,
}

impl<S: PageSource, A: IngestionApi> Orchestrator<S, A> {
    pub fn new(config: Config, store: Store, source: S, api: A) -> Result<Self, ConfigError> {
        let options = ExtractOptions::from_config(&config)?;
        let uploader = Uploader::new(api, config.retry_policy());
        Ok(Self {
            extractor: Extractor::new(source, options),
            uploader,
            store,
            config,
            run_id: Uuid::new_v4(),
            phase: RunPhase::Idle,
            tally: RunTally::default(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run to completion. Never fails: fatal conditions are reported through
    /// [`RunResult::outcome`].
    pub async fn run(mut self, cancel: CancellationToken) -> RunResult {
        let started_at = Utc::now();
        info!(run_id = %self.run_id, source = %self.config.source_url(), "run started");

        self.enter(RunPhase::Extracting);
        let extracted = match self.extract().await {
            Ok(extracted) => extracted,
            Err(err) => {
                error!(run_id = %self.run_id, error = %err, "extraction failed");
                return self.finish(started_at, RunOutcome::Fatal, Some(err.to_string()));
            }
        };
        if cancel.is_cancelled() {
            return self.finish(started_at, RunOutcome::Interrupted, None);
        }

        self.enter(RunPhase::Diffing);
        self.tally.seen = extracted.articles.len();
        let plan = batcher::plan(
            extracted.articles,
            &self.store,
            BatchLimits::from_config(&self.config),
        );
        self.tally.new_or_changed = plan.to_upload();
        info!(
            run_id = %self.run_id,
            to_upload = plan.to_upload(),
            unchanged = plan.unchanged,
            duplicates = plan.duplicates,
            batches = plan.batches.len(),
            "diff complete"
        );
        for item in plan.batches.iter().flat_map(|b| &b.items) {
            if let Err(err) = self.store.write_snapshot(&item.article) {
                warn!(url = %item.article.canonical_url, error = %err, "failed to write snapshot");
            }
        }

        self.enter(RunPhase::Uploading);
        let mut outcome = RunOutcome::Completed;
        for batch in &plan.batches {
            if cancel.is_cancelled() {
                outcome = RunOutcome::Interrupted;
                break;
            }
            if batch.index > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        outcome = RunOutcome::Interrupted;
                        break;
                    }
                    _ = tokio::time::sleep(self.config.batch_pause()) => {}
                }
            }
            self.upload(batch, &cancel).await;
        }
        if outcome == RunOutcome::Interrupted {
            warn!(run_id = %self.run_id, "run interrupted, remaining batches left for the next run");
        }

        self.retire_superseded().await;
        if self.config.prune_removed() && outcome == RunOutcome::Completed {
            if extracted.complete {
                let discovered: HashSet<String> =
                    extracted.links.iter().map(|u| u.to_string()).collect();
                self.prune(&discovered).await;
            } else {
                warn!(run_id = %self.run_id, "link set incomplete, skipping prune");
            }
        }

        self.finish(started_at, outcome, None)
    }

    fn enter(&mut self, phase: RunPhase) {
        info!(run_id = %self.run_id, from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }

    async fn extract(&mut self) -> Result<Extracted, ExtractionError> {
        let crawl = self.extractor.crawl(self.config.source_url()).await?;
        let links = crawl.links;
        let complete = crawl.complete;
        let mut stream = crawl.articles;
        let mut articles = Vec::with_capacity(links.len());
        let mut skipped = 0;
        while let Some(item) = stream.next().await {
            match item {
                Ok(article) => articles.push(article),
                // Already logged by the extractor.
                Err(_) => skipped += 1,
            }
        }
        drop(stream);
        self.tally.skipped = skipped;
        info!(
            run_id = %self.run_id,
            links = links.len(),
            extracted = articles.len(),
            skipped,
            "extraction complete"
        );
        Ok(Extracted {
            links,
            complete,
            articles,
        })
    }

    async fn upload(&mut self, batch: &UploadBatch, cancel: &CancellationToken) {
        self.tally.batches += 1;
        for item in &batch.items {
            let previous = self.store.get(item.article.canonical_url.as_str()).cloned();
            let record = UploadRecord::pending(&item.article, previous.as_ref());
            self.save(record);
        }

        let result = self
            .uploader
            .upload_batch(batch.index, &batch.articles(), cancel)
            .await;

        let now = Utc::now();
        for (item, outcome) in batch.items.iter().zip(result.outcomes) {
            let key = item.article.canonical_url.as_str();
            let mut record = match self.store.get(key) {
                Some(record) => record.clone(),
                None => UploadRecord::pending(&item.article, None),
            };
            match outcome {
                ArticleOutcome::Uploaded { remote_id } => {
                    debug!(url = key, remote_id = %remote_id, "article uploaded");
                    record.mark_uploaded(remote_id, now);
                    self.tally.uploaded += 1;
                }
                ArticleOutcome::Failed { reason } => {
                    warn!(url = key, reason = %reason, "article upload failed");
                    record.mark_failed(reason, now);
                    self.tally.failed += 1;
                }
            }
            self.save(record);
        }
    }

    /// Delete remote documents superseded by a newer upload. Ids that cannot
    /// be deleted stay queued on their record.
    async fn retire_superseded(&mut self) {
        let queued: Vec<UploadRecord> = self
            .store
            .all()
            .filter(|r| !r.retired_remote_ids.is_empty())
            .cloned()
            .collect();

        for mut record in queued {
            let mut remaining = Vec::new();
            for remote_id in std::mem::take(&mut record.retired_remote_ids) {
                if !self.uploader.delete_quietly(&remote_id).await {
                    remaining.push(remote_id);
                }
            }
            debug!(url = %record.canonical_url, remaining = remaining.len(), "retired superseded documents");
            record.retired_remote_ids = remaining;
            self.save(record);
        }
    }

    /// Retire uploads whose article is no longer linked from the source.
    async fn prune(&mut self, discovered: &HashSet<String>) {
        for url in batcher::removed_candidates(&self.store, discovered) {
            let Some(mut record) = self.store.get(&url).cloned() else {
                continue;
            };
            if let Some(remote_id) = record.remote_id.clone()
                && !self.uploader.delete_quietly(&remote_id).await
            {
                continue;
            }
            info!(url = %url, "article removed from source, retired");
            record.mark_removed(Utc::now());
            self.save(record);
            self.tally.removed += 1;
        }
    }

    fn save(&mut self, record: UploadRecord) {
        let url = record.canonical_url.clone();
        if let Err(err) = self.store.upsert(record) {
            self.log_store_error(&url, &err);
        }
    }

    fn log_store_error(&mut self, url: &str, err: &StoreError) {
        error!(url, error = %err, "failed to persist upload record");
        self.tally.store_errors += 1;
    }

    fn finish(
        mut self,
        started_at: chrono::DateTime<Utc>,
        outcome: RunOutcome,
        fatal_error: Option<String>,
    ) -> RunResult {
        self.enter(RunPhase::Done);
        let result = std::mem::take(&mut self.tally).finish(self.run_id, started_at, outcome, fatal_error);

        info!(
            run_id = %result.run_id,
            outcome = ?result.outcome,
            articles_seen = result.articles_seen,
            articles_new_or_changed = result.articles_new_or_changed,
            articles_uploaded = result.articles_uploaded,
            articles_failed = result.articles_failed,
            articles_skipped = result.articles_skipped,
            articles_removed = result.articles_removed,
            batches = result.batches,
            store_errors = result.store_errors,
            "run finished"
        );
        match self.store.write_report(&result) {
            Ok(path) => debug!(path = %path.display(), "run report written"),
            Err(err) => error!(error = %err, "failed to write run report"),
        }
        result
    }
}
