use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use url::Url;

static SPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static BLANK_LINES_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// One extracted article. Produced fresh on every crawl and never mutated;
/// a changed page is a new `Article` with the same `canonical_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub canonical_url: Url,
    pub title: String,
    pub body_text: String,
    pub content_fingerprint: String,
    pub extracted_at: DateTime<Utc>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Position of the link in the index listing.
    pub discovered_at_index: usize,
}

impl Article {
    pub fn new(
        canonical_url: Url,
        title: impl Into<String>,
        body_text: impl Into<String>,
        discovered_at_index: usize,
    ) -> Self {
        let body_text = body_text.into();
        Self {
            canonical_url,
            title: title.into(),
            content_fingerprint: fingerprint(&body_text),
            body_text,
            extracted_at: Utc::now(),
            etag: None,
            last_modified: None,
            discovered_at_index,
        }
    }

    pub fn with_validators(mut self, etag: Option<String>, last_modified: Option<String>) -> Self {
        self.etag = etag;
        self.last_modified = last_modified;
        self
    }

    /// Size counted against the batch byte limit: UTF-8 length of title plus body.
    pub fn encoded_len(&self) -> usize {
        self.title.len() + self.body_text.len()
    }

    /// Markdown rendering shared by the upload payload and the audit snapshot.
    /// The `Article URL:` line is what the assistant cites.
    pub fn to_markdown(&self) -> String {
        format!(
            "# {}\n\nArticle URL: {}\n\n{}\n",
            self.title, self.canonical_url, self.body_text
        )
    }
}

/// Hex MD5 over the normalized body. Equal for bodies that differ only in
/// whitespace or letter case.
pub fn fingerprint(body_text: &str) -> String {
    format!("{:x}", md5::compute(normalize_for_fingerprint(body_text)))
}

/// Collapse every whitespace run to one space, trim, lowercase.
pub fn normalize_for_fingerprint(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Collapse horizontal whitespace and blank-line runs while keeping paragraph breaks.
pub fn normalize_whitespace(text: &str) -> String {
    let spaced = SPACE_REGEX.replace_all(text.trim(), " ");
    let lines: Vec<&str> = spaced.lines().map(str::trim).collect();
    BLANK_LINES_REGEX
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}
