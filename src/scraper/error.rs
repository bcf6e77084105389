//! Shared error type for the source adapter.

use super::client::FetchError;
use thiserror::Error;

/// Book-level scraping failure. Any of these aborts the build.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Invalid fiction URL or id: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Could not parse story page: {message}")]
    ParseStoryPage { message: String },

    #[error("Could not parse chapter list on story page: {reason}")]
    ChapterListParse { reason: String },

    #[error("No chapters found (possibly deleted or access restricted).")]
    NoChapters,
}

impl ScraperError {
    /// The story page returned 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ScraperError::Fetch(FetchError::NotFound { .. }))
    }

    /// The source site is down (HTTP 522).
    pub fn is_source_outage(&self) -> bool {
        matches!(self, ScraperError::Fetch(FetchError::ServiceUnavailable { .. }))
    }
}
