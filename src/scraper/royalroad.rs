//! Royal Road adapter. Parses the fiction page (metadata, chapter list, cover, last update) and
//! chapter pages (body, author notes, author bio and avatar).
//!
//! Cloudflare: the client keeps a cookie jar and sends a browser-like User-Agent; captcha is not
//! handled.

use crate::epub::chapter::note_precedes_content;
use crate::model::{
    format_updated_date, iso_date, BookMetadata, ChapterRef, NoteFragment, NotePlacement,
    ScrapedBook, ScrapedChapter,
};
use crate::scraper::error::ScraperError;
use crate::scraper::{fiction_id, strip_title_site_suffix, BookSource, Fetch};
use log::{debug, info, warn};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

pub const ROYALROAD_BASE: &str = "https://www.royalroad.com";

const TITLE_SUFFIXES: &[&str] = &[" | Royal Road", " _ Royal Road", " - Royal Road"];

/// Parse a CSS selector or return a parse error (avoids panics from Selector::parse).
fn parse_selector(sel: &str) -> Result<Selector, ScraperError> {
    Selector::parse(sel).map_err(|e| ScraperError::ParseStoryPage {
        message: format!("invalid selector {:?}: {}", sel, e),
    })
}

/// Royal Road source. Stateless; all downloads go through the caller's fetcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoyalRoad;

impl RoyalRoad {
    pub fn new() -> Self {
        Self
    }
}

/// Shape of one entry in window.chapters (relative url, order 0-based, isUnlocked).
#[derive(Debug, Deserialize)]
struct WindowChapter {
    title: String,
    url: String,
    #[serde(default)]
    order: u32,
    #[serde(rename = "isUnlocked", default = "default_true")]
    is_unlocked: bool,
    #[serde(default)]
    date: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Fiction page metadata before it is combined with the fiction id.
#[derive(Debug, Default, PartialEq, Eq)]
struct StoryPage {
    title: Option<String>,
    author: Option<String>,
    description: Option<String>,
    cover_address: Option<String>,
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// JSON-LD `Book` block, if the page has one.
fn parse_json_ld(html: &str) -> Option<StoryPage> {
    let open = "<script type=\"application/ld+json\">";
    let start = html.find(open)? + open.len();
    let end = html[start..]
        .find("</script>")
        .map(|i| start + i)
        .unwrap_or(html.len());
    let v: serde_json::Value = serde_json::from_str(html[start..end].trim()).ok()?;
    if v.get("@type").and_then(|t| t.as_str()) != Some("Book") {
        return None;
    }
    let text = |key: &str| {
        v.get(key)
            .and_then(|n| n.as_str())
            .map(String::from)
            .and_then(non_empty)
    };
    Some(StoryPage {
        title: text("name"),
        author: v
            .get("author")
            .and_then(|a| a.get("name"))
            .and_then(|n| n.as_str())
            .map(String::from)
            .and_then(non_empty),
        description: text("description").map(|d| strip_html_tags(&d)),
        cover_address: text("image"),
    })
}

/// Extract metadata from fiction page HTML: JSON-LD Book first, DOM for whatever it lacks.
fn parse_metadata(html: &str) -> Result<StoryPage, ScraperError> {
    let json_ld = parse_json_ld(html).unwrap_or_default();

    let doc = Html::parse_document(html);
    let first_text = |sel: &Selector| {
        doc.select(sel)
            .next()
            .map(|e| e.text().collect::<String>())
            .and_then(non_empty)
    };
    let first_attr = |sel: &Selector, attr: &str| {
        doc.select(sel)
            .next()
            .and_then(|e| e.value().attr(attr).map(String::from))
            .and_then(non_empty)
    };

    let title = json_ld
        .title
        .or_else(|| first_text(&parse_selector("h1.font-white").ok()?))
        .or_else(|| {
            first_text(&parse_selector("title").ok()?)
                .map(|t| strip_title_site_suffix(&t, TITLE_SUFFIXES))
                .and_then(non_empty)
        });
    let author = json_ld
        .author
        .or_else(|| first_attr(&parse_selector("meta[property=\"books:author\"]").ok()?, "content"))
        .or_else(|| first_text(&parse_selector("h4 a.font-white").ok()?));
    let description = json_ld.description.or_else(|| {
        first_text(&parse_selector("div.description").ok()?)
            .or_else(|| first_text(&parse_selector("[property=\"description\"]").ok()?))
    });
    let cover_address = parse_selector("div.cover-art-container img")
        .ok()
        .and_then(|sel| first_attr(&sel, "src"))
        .or(json_ld.cover_address)
        .or_else(|| first_attr(&parse_selector("meta[property=\"og:image\"]").ok()?, "content"));

    if title.is_none() {
        return Err(ScraperError::ParseStoryPage {
            message: "missing title (selector or structure may have changed)".to_string(),
        });
    }
    Ok(StoryPage {
        title,
        author,
        description,
        cover_address,
    })
}

fn strip_html_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("\n\n\n", "\n\n").trim().to_string()
}

/// Extract the window.chapters array from the page script.
fn window_chapters(html: &str) -> Result<Vec<WindowChapter>, ScraperError> {
    let needle = "window.chapters = ";
    let start = html
        .find(needle)
        .ok_or_else(|| ScraperError::ChapterListParse {
            reason: "window.chapters not found".to_string(),
        })?;
    let after_assign = start + needle.len();
    let array_slice = extract_json_array_with_strings(&html[after_assign..]).ok_or_else(|| {
        ScraperError::ChapterListParse {
            reason: "could not extract window.chapters array".to_string(),
        }
    })?;
    serde_json::from_str(array_slice).map_err(|e| ScraperError::ChapterListParse {
        reason: e.to_string(),
    })
}

fn absolute_url(href: &str) -> Result<String, ScraperError> {
    let base = Url::parse(ROYALROAD_BASE).map_err(|e| ScraperError::ChapterListParse {
        reason: e.to_string(),
    })?;
    base.join(href)
        .map(|u| u.to_string())
        .map_err(|e| ScraperError::ChapterListParse {
            reason: format!("bad chapter link {:?}: {}", href, e),
        })
}

/// Chapter list from window.chapters, in TOC order. Locked (premium) chapters are skipped.
fn parse_window_chapter_refs(html: &str) -> Result<Vec<ChapterRef>, ScraperError> {
    let mut chapters = window_chapters(html)?;
    chapters.sort_by_key(|c| c.order);
    let locked = chapters.iter().filter(|c| !c.is_unlocked).count();
    if locked > 0 {
        warn!("Skipping {} locked (premium) chapter(s)", locked);
    }
    let mut refs = Vec::with_capacity(chapters.len());
    for ch in chapters.into_iter().filter(|c| c.is_unlocked) {
        refs.push(ChapterRef {
            title: ch.title.trim().to_string(),
            url: absolute_url(&ch.url)?,
            index: ch.order + 1,
        });
    }
    Ok(refs)
}

/// Chapter list from the `#chapters` table: one row per chapter, link in the first cell.
fn parse_chapter_table(html: &str) -> Result<Vec<ChapterRef>, ScraperError> {
    let doc = Html::parse_document(html);
    let row_sel = parse_selector("table#chapters tbody tr")?;
    let link_sel = parse_selector("td a[href]")?;
    let mut refs = Vec::new();
    for row in doc.select(&row_sel) {
        let Some(link) = row.select(&link_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        refs.push(ChapterRef {
            title: link.text().collect::<String>().trim().to_string(),
            url: absolute_url(href)?,
            index: refs.len() as u32 + 1,
        });
    }
    Ok(refs)
}

/// window.chapters first; the chapter table when the script is missing or unreadable.
fn parse_chapter_refs(html: &str) -> Result<Vec<ChapterRef>, ScraperError> {
    match parse_window_chapter_refs(html) {
        Ok(refs) => Ok(refs),
        Err(e) => {
            let refs = parse_chapter_table(html)?;
            if refs.is_empty() {
                return Err(e);
            }
            debug!("window.chapters unavailable ({}); using chapter table", e);
            Ok(refs)
        }
    }
}

/// Date of the most recent chapter as `YYYY-MM-DD`.
///
/// Uses the `title` of the last `<time>` in the chapter table, falling back to the newest
/// window.chapters date.
fn parse_last_updated(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let time_sel = parse_selector("table#chapters time[title]").ok()?;
    let from_table = doc
        .select(&time_sel)
        .filter_map(|t| t.value().attr("title"))
        .last()
        .and_then(format_updated_date);
    from_table.or_else(|| {
        window_chapters(html)
            .ok()?
            .iter()
            .filter_map(|c| c.date.as_deref().and_then(iso_date))
            .max()
            .map(|d| d.format("%Y-%m-%d").to_string())
    })
}

/// Find the matching closing bracket for the first '[' in s, skipping content inside JSON strings.
fn extract_json_array_with_strings(s: &str) -> Option<&str> {
    let start = s.find('[')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (byte_offset, c) in s[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            if c == '\\' {
                escape = true;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + byte_offset + 1]);
                }
            }
            '"' => in_string = true,
            _ => {}
        }
    }
    None
}

/// Parse a chapter page: the content container, author notes with their position relative to
/// it, and the author bio and avatar from the sidebar.
fn parse_chapter_page(html: &str) -> Result<ScrapedChapter, ScraperError> {
    let doc = Html::parse_document(html);
    let content_sel = parse_selector("div.chapter-inner.chapter-content")?;
    let note_sel = parse_selector("div.portlet-body.author-note")?;
    let bio_icon_sel = parse_selector("i.fa.fa-info-circle")?;
    let avatar_sel = parse_selector("div.avatar-container-general img")?;

    let content = doc.select(&content_sel).next();
    let notes = doc
        .select(&note_sel)
        .map(|note| NoteFragment {
            html: note.html(),
            placement: match content {
                Some(c) if note_precedes_content(note, c) => NotePlacement::BeforeContent,
                _ => NotePlacement::AfterContent,
            },
        })
        .collect();

    // the info icon sits inside the bio paragraph; an empty bio renders as just "Bio:"
    let author_bio = doc
        .select(&bio_icon_sel)
        .next()
        .and_then(|icon| icon.parent())
        .and_then(ElementRef::wrap)
        .map(|p| p.text().collect::<String>())
        .and_then(non_empty)
        .filter(|bio| bio != "Bio:");
    let author_avatar = doc
        .select(&avatar_sel)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(String::from)
        .and_then(non_empty);

    Ok(ScrapedChapter {
        main_content: content.map(|c| c.html()),
        notes,
        author_bio,
        author_avatar,
    })
}

impl BookSource for RoyalRoad {
    fn base_origin(&self) -> &str {
        ROYALROAD_BASE
    }

    fn scrape_book(&self, fetcher: &mut dyn Fetch, url: &str) -> Result<ScrapedBook, ScraperError> {
        info!("Finding {}", url);
        let html = fetcher.fetch_text(url)?;

        let page = parse_metadata(&html)?;
        let chapter_refs = parse_chapter_refs(&html)?;
        if chapter_refs.is_empty() {
            return Err(ScraperError::NoChapters);
        }

        let title = page.title.unwrap_or_default();
        let source_id = fiction_id(url).unwrap_or_else(|| url.to_string());
        let mut metadata = BookMetadata::new(title, source_id);
        if page.author.is_none() {
            warn!("Unable to find the author of {}", metadata.title);
        }
        if page.description.is_none() {
            warn!("Unable to find the description of {}", metadata.title);
        }
        metadata.author = page.author;
        metadata.description = page.description;
        match parse_last_updated(&html) {
            Some(date) => metadata.last_updated = date,
            None => debug!("No update date on story page; using {}", metadata.last_updated),
        }

        Ok(ScrapedBook {
            metadata,
            chapter_refs,
            cover_address: page.cover_address,
        })
    }

    fn scrape_chapter(
        &self,
        fetcher: &mut dyn Fetch,
        chapter: &ChapterRef,
    ) -> Result<ScrapedChapter, ScraperError> {
        let html = fetcher.fetch_text(&chapter.url)?;
        parse_chapter_page(&html)
    }
}
