//! Chapter reconstruction: merge the extracted body with its author notes, point image
//! references at archive entries and wrap the result in the chapter template.

use super::item::ChapterPage;
use super::template::{TemplateError, Templates};
use super::xml_escape;
use crate::model::{NoteFragment, NotePlacement, ScrapedChapter};
use log::warn;
use scraper::ElementRef;
use std::collections::HashSet;

/// Stems used by the fixed front-matter documents.
const RESERVED_SLUGS: &[&str] = &["cover", "author", "toc", "content"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// A chapter to be written: display name plus its unique file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub name: String,
    pub slug: String,
}

/// Hands out unique, filesystem-safe slugs for one book.
#[derive(Debug)]
pub struct SlugRegistry {
    taken: HashSet<String>,
}

impl Default for SlugRegistry {
    fn default() -> Self {
        Self {
            taken: RESERVED_SLUGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SlugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chapter name and return its slug: `x`, then `x_2`, `x_3`, … on collision.
    pub fn register(&mut self, name: &str) -> Chapter {
        let name = name.trim().to_string();
        let base = sanitize_slug(&name);
        let mut slug = base.clone();
        let mut suffix = 2u32;
        while self.taken.contains(&slug) {
            slug = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        self.taken.insert(slug.clone());
        Chapter { name, slug }
    }
}

/// Replace each run of non-word characters with `_`. Word characters are alphanumerics and `_`.
pub fn sanitize_slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    if out.is_empty() {
        out.push_str("chapter");
    }
    out
}

/// Whether `note` came before `content` in the source page.
///
/// Walks the sibling chain starting after the note's parent; reaching `content` before the end
/// of the chain means the note precedes it.
pub fn note_precedes_content(note: ElementRef<'_>, content: ElementRef<'_>) -> bool {
    let Some(parent) = note.parent() else {
        return false;
    };
    let mut cursor = parent.next_sibling();
    while let Some(node) = cursor {
        if node.id() == content.id() {
            return true;
        }
        cursor = node.next_sibling();
    }
    false
}

/// Merge the chapter body with up to two author notes.
///
/// One note is placed according to its recorded position. Two notes always wrap the body as
/// first note, body, second note; their recorded positions are not consulted.
pub fn merge_fragments(main: Option<&str>, notes: &[NoteFragment], label: &str) -> String {
    let content = match main {
        Some(m) => m.to_string(),
        None => {
            warn!("Unable to find content for chapter {}", label);
            "<div></div>".to_string()
        }
    };
    match notes {
        [] => content,
        [note] => match note.placement {
            NotePlacement::BeforeContent => format!("<div>{}{}</div>", note.html, content),
            NotePlacement::AfterContent => format!("<div>{}{}</div>", content, note.html),
        },
        [first, second, rest @ ..] => {
            if !rest.is_empty() {
                warn!(
                    "Chapter {} has {} author notes; only the first two are kept",
                    label,
                    notes.len()
                );
            }
            format!("<div>{}{}{}</div>", first.html, content, second.html)
        }
    }
}

/// Builds chapter documents from scraped chapter pages.
#[derive(Debug, Clone, Copy)]
pub struct ChapterAssembler<'t> {
    templates: &'t Templates,
}

impl<'t> ChapterAssembler<'t> {
    pub fn new(templates: &'t Templates) -> Self {
        Self { templates }
    }

    /// Merge, resolve images through `resolve_image` (source address → archive name) and template.
    pub fn assemble<E, F>(
        &self,
        chapter: &Chapter,
        scraped: &ScrapedChapter,
        resolve_image: F,
    ) -> Result<ChapterPage, E>
    where
        E: From<TemplateError>,
        F: FnMut(&str) -> Result<String, E>,
    {
        let merged = merge_fragments(scraped.main_content.as_deref(), &scraped.notes, &chapter.slug);
        let merged = rewrite_image_sources(&merged, resolve_image)?;
        let xhtml = self.templates.render_chapter(&[
            ("title", &xml_escape(&chapter.name)),
            ("content", &to_xhtml(&merged)),
        ])?;
        Ok(ChapterPage::new(&chapter.slug, &chapter.name, xhtml))
    }
}

/// Rewrite the `src` of every `<img>` in `fragment` with the value returned by `resolve`.
/// Images without a `src` are left alone.
pub fn rewrite_image_sources<E, F>(fragment: &str, mut resolve: F) -> Result<String, E>
where
    F: FnMut(&str) -> Result<String, E>,
{
    let mut out = String::with_capacity(fragment.len());
    let mut pos = 0;
    while let Some(lt) = fragment[pos..].find('<').map(|i| pos + i) {
        let Some(end) = find_tag_end(fragment, lt) else {
            break;
        };
        let tag = &fragment[lt..=end];
        if tag_name(tag).eq_ignore_ascii_case("img") {
            out.push_str(&fragment[pos..lt]);
            match find_attribute(tag, "src") {
                Some((start, stop, value)) => {
                    let name = resolve(&decode_entities(value))?;
                    out.push_str(&tag[..start]);
                    out.push('"');
                    out.push_str(&xml_escape(&name));
                    out.push('"');
                    out.push_str(&tag[stop..]);
                }
                None => {
                    warn!("img without src");
                    out.push_str(tag);
                }
            }
        } else {
            out.push_str(&fragment[pos..=end]);
        }
        pos = end + 1;
    }
    out.push_str(&fragment[pos..]);
    Ok(out)
}

/// Make HTML-serialized markup acceptable to an XML parser: self-close void elements and
/// spell out `&nbsp;` numerically.
pub fn to_xhtml(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len() + 16);
    let mut pos = 0;
    while let Some(lt) = fragment[pos..].find('<').map(|i| pos + i) {
        let Some(end) = find_tag_end(fragment, lt) else {
            break;
        };
        out.push_str(&fragment[pos..lt]);
        let tag = &fragment[lt..=end];
        let name = tag_name(tag).to_ascii_lowercase();
        if VOID_ELEMENTS.contains(&name.as_str()) && !tag.ends_with("/>") {
            out.push_str(tag[..tag.len() - 1].trim_end());
            out.push_str("/>");
        } else {
            out.push_str(tag);
        }
        pos = end + 1;
    }
    out.push_str(&fragment[pos..]);
    out.replace("&nbsp;", "&#160;")
}

/// Index of the `>` closing the tag that opens at `lt`, skipping quoted attribute values.
/// Comments end at `-->`, and declarations and processing instructions at the first `>`; quotes
/// inside them carry no meaning.
fn find_tag_end(s: &str, lt: usize) -> Option<usize> {
    let rest = &s[lt..];
    if rest.starts_with("<!--") {
        return rest[4..].find("-->").map(|i| lt + 4 + i + 2);
    }
    if rest.starts_with("<!") || rest.starts_with("<?") {
        return rest.find('>').map(|i| lt + i);
    }
    let mut quote: Option<u8> = None;
    for (i, b) in s.as_bytes().iter().enumerate().skip(lt + 1) {
        match (quote, *b) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, b'"') | (None, b'\'') => quote = Some(*b),
            (None, b'>') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Element name of a tag such as `<img src=…>`; empty for closing tags, comments and text.
fn tag_name(tag: &str) -> &str {
    let inner = &tag[1..];
    let end = inner
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(inner.len());
    &inner[..end]
}

/// Locate attribute `name` in `tag`. Returns the byte span of the raw value (quotes included)
/// and the unquoted value.
fn find_attribute<'a>(tag: &'a str, name: &str) -> Option<(usize, usize, &'a str)> {
    let bytes = tag.as_bytes();
    let mut i = 1 + tag_name(tag).len();
    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] == b'>' {
            return None;
        }
        let name_start = i;
        while i < bytes.len() && !matches!(bytes[i], b'=' | b'>' | b'/') && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let attr = &tag[name_start..i];
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let value_start = i;
        let (value, value_end) = match bytes.get(i) {
            Some(&q) if q == b'"' || q == b'\'' => {
                let close = tag[i + 1..].find(q as char).map(|j| i + 1 + j)?;
                (&tag[i + 1..close], close + 1)
            }
            _ => {
                let stop = tag[i..]
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .map(|j| i + j)
                    .unwrap_or(tag.len());
                (&tag[i..stop], stop)
            }
        };
        if attr.eq_ignore_ascii_case(name) {
            return Some((value_start, value_end, value));
        }
        i = value_end;
    }
    None
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
