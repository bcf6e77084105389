//! Source-site access: the polite HTTP client, the [BookSource] trait and the Royal Road adapter.

mod client;
mod error;

pub mod royalroad;

pub use client::{Fetch, FetchError, PoliteClient, PoliteClientBuilder};
pub use error::ScraperError;
pub use royalroad::{RoyalRoad, ROYALROAD_BASE};

use crate::model::{ChapterRef, ScrapedBook, ScrapedChapter};
use reqwest::Url;

/// Strip known site suffix from the end of a page title (e.g. " | Royal Road") so that titles
/// containing " - " or " | " in the actual title are preserved.
pub fn strip_title_site_suffix(s: &str, suffixes: &[&str]) -> String {
    let mut t = s.trim();
    for suffix in suffixes {
        if t.ends_with(suffix) {
            t = t[..t.len() - suffix.len()].trim();
            break;
        }
    }
    t.to_string()
}

/// Turn the user's argument into a fiction index URL.
///
/// Accepts a numeric fiction id (`21220`) or a Royal Road fiction URL. Chapter URLs and other
/// hosts are rejected.
pub fn resolve_fiction_url(input: &str) -> Result<String, ScraperError> {
    let input = input.trim();
    let invalid = |reason: &str| ScraperError::InvalidUrl {
        input: input.to_string(),
        reason: reason.to_string(),
    };
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        return Ok(format!("{}/fiction/{}", ROYALROAD_BASE, input));
    }
    let url = Url::parse(input).map_err(|e| invalid(&e.to_string()))?;
    let host = url.host_str().ok_or_else(|| invalid("URL has no host"))?;
    if !host.ends_with("royalroad.com") {
        return Err(invalid("not a Royal Road URL"));
    }
    if url.path().contains("/chapter/") {
        return Err(invalid(
            "expected a fiction (index) URL, not a chapter URL, e.g. https://www.royalroad.com/fiction/21220",
        ));
    }
    if fiction_id(input).is_none() {
        return Err(invalid("URL path has no /fiction/<id>"));
    }
    Ok(input.to_string())
}

/// The numeric id following `/fiction/` in a fiction URL.
pub fn fiction_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    segments.find(|s| *s == "fiction")?;
    segments
        .next()
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        .map(String::from)
}

/// A site adapter: turns fetched pages into book and chapter data.
///
/// Downloads go through the caller's [Fetch] so the same politeness and retry policy applies
/// to pages and images alike.
pub trait BookSource {
    /// Origin prefixed to site-relative resource addresses.
    fn base_origin(&self) -> &str;

    /// Scrape the fiction index page. Fails with [ScraperError::NoChapters] when the chapter
    /// list is empty.
    fn scrape_book(&self, fetcher: &mut dyn Fetch, url: &str) -> Result<ScrapedBook, ScraperError>;

    fn scrape_chapter(
        &self,
        fetcher: &mut dyn Fetch,
        chapter: &ChapterRef,
    ) -> Result<ScrapedChapter, ScraperError>;
}
