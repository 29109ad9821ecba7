use thiserror::Error;

use crate::fetcher::FetchError;

/// Failure that leaves the run without a candidate set. Always fatal.
///
/// Per-article problems are [`FetchError`]s and never become this type.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("failed to fetch index page {url}: {source}")]
    IndexFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("index page {0} lists no article links")]
    NoCandidates(String),
}
