//! On-disk corpus state.
//!
//! Layout under the state directory:
//!
//! - `records.json`: canonical URL → [`UploadRecord`], rewritten atomically
//! - `history.jsonl`: every upsert, appended
//! - `store.lock`: advisory lock held for the lifetime of a [`Store`]
//! - `articles/`: markdown snapshot of each article queued for upload
//! - `reports/`: one JSON run report per run

pub mod errors;
pub mod record;

pub use errors::StoreError;
pub use record::{UploadRecord, UploadStatus};

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::extractor::Article;
use crate::orchestrator::RunResult;

const RECORDS_FILE: &str = "records.json";
const HISTORY_FILE: &str = "history.jsonl";
const LOCK_FILE: &str = "store.lock";
const SNAPSHOT_DIR: &str = "articles";
const REPORT_DIR: &str = "reports";
const MAX_SLUG_LEN: usize = 60;

#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    records: BTreeMap<String, UploadRecord>,
    // Held only for its lock; released when the store is dropped.
    _lock: File,
}

impl Store {
    /// Open (creating if needed) the store under `root` and take its lock.
    ///
    /// A `records.json` that does not parse is moved aside and the store
    /// starts empty.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;

        let lock_path = root.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;
        match lock.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(StoreError::Locked(root)),
            Err(TryLockError::Error(e)) => return Err(StoreError::io(&lock_path, e)),
        }

        let records = load_records(&root)?;
        info!(path = %root.display(), records = records.len(), "store opened");
        Ok(Self {
            root,
            records,
            _lock: lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, canonical_url: &str) -> Option<&UploadRecord> {
        self.records.get(canonical_url)
    }

    /// Records ordered by canonical URL.
    pub fn all(&self) -> impl Iterator<Item = &UploadRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace the record for its URL, then persist.
    pub fn upsert(&mut self, record: UploadRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(&record)?;
        self.records.insert(record.canonical_url.clone(), record);
        self.persist()?;
        self.append_history(&line)
    }

    fn persist(&self) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&self.records)?;
        let path = self.root.join(RECORDS_FILE);
        let tmp = self.root.join(format!("{RECORDS_FILE}.tmp"));

        let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(&json)
            .and_then(|()| file.sync_all())
            .map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))
    }

    fn append_history(&self, line: &str) -> Result<(), StoreError> {
        let path = self.root.join(HISTORY_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        writeln!(file, "{line}").map_err(|e| StoreError::io(&path, e))
    }

    /// Write the markdown snapshot of an article queued for upload.
    pub fn write_snapshot(&self, article: &Article) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(SNAPSHOT_DIR);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let short_fp: String = article.content_fingerprint.chars().take(8).collect();
        let path = dir.join(format!("{}-{short_fp}.md", slugify(&article.title)));
        fs::write(&path, article.to_markdown()).map_err(|e| StoreError::io(&path, e))?;
        debug!(path = %path.display(), "snapshot written");
        Ok(path)
    }

    /// Write the final report of a run under `reports/`.
    pub fn write_report(&self, result: &RunResult) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(REPORT_DIR);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let path = dir.join(format!(
            "run-{}-{}.json",
            result.started_at.format("%Y%m%dT%H%M%SZ"),
            result.run_id.simple()
        ));
        let json = serde_json::to_vec_pretty(result)?;
        fs::write(&path, json).map_err(|e| StoreError::io(&path, e))?;
        Ok(path)
    }
}

fn load_records(root: &Path) -> Result<BTreeMap<String, UploadRecord>, StoreError> {
    let path = root.join(RECORDS_FILE);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(StoreError::io(&path, e)),
    };

    match serde_json::from_str(&raw) {
        Ok(records) => Ok(records),
        Err(e) => {
            let aside = root.join(format!("{RECORDS_FILE}.corrupt"));
            warn!(
                path = %path.display(),
                moved_to = %aside.display(),
                error = %e,
                "store is corrupt, starting empty"
            );
            fs::rename(&path, &aside).map_err(|e| StoreError::io(&path, e))?;
            Ok(BTreeMap::new())
        }
    }
}

/// Lowercase ASCII slug of a title for snapshot file names.
fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "article".to_string()
    } else {
        slug.to_string()
    }
}
