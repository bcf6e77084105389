//! Data model shared by the source adapter, the chapter assembler and the container writer.
//!
//! Source adapters produce [ScrapedBook] and [ScrapedChapter]; the build pipeline consumes them.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Used when the source does not report when the book was last updated.
pub const UNKNOWN_UPDATED_DATE: &str = "1980-01-01";

/// Book-level metadata templated into the package and navigation documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    /// Source-side identifier (the fiction id on Royal Road).
    #[serde(rename = "sourceId")]
    pub source_id: String,
    /// ISO `YYYY-MM-DD`.
    #[serde(rename = "lastUpdated", default = "unknown_updated_date")]
    pub last_updated: String,
}

fn unknown_updated_date() -> String {
    UNKNOWN_UPDATED_DATE.to_string()
}

impl BookMetadata {
    pub fn new(title: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: None,
            description: None,
            source_id: source_id.into(),
            last_updated: unknown_updated_date(),
        }
    }
}

/// One entry of the source's chapter list, in TOC order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    pub title: String,
    pub url: String,
    /// 1-based order from the TOC.
    pub index: u32,
}

/// Result of scraping a book's index page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedBook {
    pub metadata: BookMetadata,
    #[serde(rename = "chapterRefs")]
    pub chapter_refs: Vec<ChapterRef>,
    #[serde(rename = "coverAddress")]
    pub cover_address: Option<String>,
}

/// Where an author note sat in the original page relative to the chapter body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotePlacement {
    BeforeContent,
    AfterContent,
}

/// An author note block, already serialized to markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFragment {
    pub html: String,
    pub placement: NotePlacement,
}

/// Result of scraping a single chapter page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapedChapter {
    /// Serialized chapter body; `None` when the page had no content container.
    #[serde(rename = "mainContent")]
    pub main_content: Option<String>,
    pub notes: Vec<NoteFragment>,
    #[serde(rename = "authorBio")]
    pub author_bio: Option<String>,
    #[serde(rename = "authorAvatar")]
    pub author_avatar: Option<String>,
}

/// Two-digit month for an English month name, or `None` if unrecognized.
pub fn month_number(month: &str) -> Option<&'static str> {
    let n = match month.trim() {
        "January" => "01",
        "February" => "02",
        "March" => "03",
        "April" => "04",
        "May" => "05",
        "June" => "06",
        "July" => "07",
        "August" => "08",
        "September" => "09",
        "October" => "10",
        "November" => "11",
        "December" => "12",
        _ => return None,
    };
    Some(n)
}

/// Convert a timestamp such as `"Sunday, March 5, 2023 10:41 AM"` to `2023-03-05`.
///
/// Only the month, day and year are read; the weekday and time of day are ignored. Returns
/// `None` when the text does not have that shape.
pub fn format_updated_date(text: &str) -> Option<String> {
    let date: Vec<&str> = text.split_whitespace().skip(1).take(3).collect();
    if date.len() < 3 {
        return None;
    }
    NaiveDate::parse_from_str(&date.join(" "), "%B %d, %Y")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Calendar date of an ISO 8601 timestamp (`2022-06-07T10:00:00Z`), with or without offset.
pub fn iso_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.date_naive())
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.date()))
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn metadata_defaults_to_unknown_date() {
        let meta = BookMetadata::new("Mother of Learning", "21220");
        assert_eq!(meta.last_updated, "1980-01-01");
        assert!(meta.author.is_none());
        assert!(meta.description.is_none());
    }

    #[test]
    fn metadata_missing_date_deserializes_to_sentinel() -> Result<(), Box<dyn Error>> {
        let meta: BookMetadata = serde_json::from_str(
            r#"{"title":"T","author":null,"description":null,"sourceId":"1"}"#,
        )?;
        assert_eq!(meta.last_updated, UNKNOWN_UPDATED_DATE);
        Ok(())
    }

    #[test]
    fn month_number_known_and_unknown() {
        assert_eq!(month_number("January"), Some("01"));
        assert_eq!(month_number("December"), Some("12"));
        assert_eq!(month_number("Smarch"), None);
    }

    #[test]
    fn format_updated_date_royal_road_shape() {
        assert_eq!(
            format_updated_date("Sunday, March 5, 2023 10:41 AM").as_deref(),
            Some("2023-03-05")
        );
        assert_eq!(
            format_updated_date("Friday, November 17, 2017 4:00 PM").as_deref(),
            Some("2017-11-17")
        );
    }

    #[test]
    fn format_updated_date_rejects_garbage() {
        assert!(format_updated_date("").is_none());
        assert!(format_updated_date("yesterday").is_none());
        assert!(format_updated_date("Sunday, Smarch 5, 2023").is_none());
        assert!(format_updated_date("Sunday, March 45, 2023").is_none());
        assert!(format_updated_date("Monday, February 30, 2023 1:00 PM").is_none());
    }

    #[test]
    fn iso_date_accepts_offsets_and_bare_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2022, 6, 7);
        assert_eq!(iso_date("2022-06-07T10:00:00Z"), expected);
        assert_eq!(iso_date("2022-06-07T23:30:00+02:00"), expected);
        assert_eq!(iso_date("2022-06-07T10:00:00.123"), expected);
        assert_eq!(iso_date("2022-06-07"), expected);
        assert_eq!(iso_date("June 7th"), None);
    }
}
