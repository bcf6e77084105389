//! Resource items: the self-describing units of container content.
//!
//! Every file under `OEBPS/` is a [ResourceItem]. An item knows its archive name, how it is
//! listed in the package manifest and spine, and how it appears in the NCX navigation map.

use super::template::{TemplateError, Templates};
use super::{html_escape_text, xml_escape};
use crate::model::BookMetadata;
use std::fmt;

/// Spine priorities. Items sharing a priority keep their push order.
pub const PRIORITY_NONE: u32 = 0;
pub const PRIORITY_COVER: u32 = 1;
pub const PRIORITY_AUTHOR: u32 = 2;
pub const PRIORITY_TOC: u32 = 3;
pub const PRIORITY_CHAPTER: u32 = 4;

/// Media type for a file extension (with leading dot). Unknown extensions are treated as JPEG.
pub fn media_type(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        ".xhtml" => "application/xhtml+xml",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".svg" => "image/svg+xml",
        ".css" => "text/css",
        ".ncx" => "application/x-dtbncx+xml",
        ".opf" => "application/oebps-package+xml",
        _ => "image/jpeg",
    }
}

/// The descriptive attributes shared by all item kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDescriptor {
    /// Path stem relative to `OEBPS/`, e.g. `Images/0` or `cover`.
    pub short_name: String,
    /// Extension including the dot.
    pub extension: String,
    /// Manifest id. Empty excludes the item from the manifest.
    pub id_ref: String,
    /// 0 excludes the item from the spine and the navigation map.
    pub spine_priority: u32,
    /// Navigation label. Empty excludes the item from the navigation map.
    pub nav_text: String,
    /// Manifest `properties` attribute.
    pub properties: Option<&'static str>,
}

impl ItemDescriptor {
    fn new(short_name: impl Into<String>, extension: &str, id_ref: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            extension: extension.to_string(),
            id_ref: id_ref.into(),
            spine_priority: PRIORITY_NONE,
            nav_text: String::new(),
            properties: None,
        }
    }

    fn in_spine(mut self, priority: u32, nav_text: impl Into<String>) -> Self {
        self.spine_priority = priority;
        self.nav_text = nav_text.into();
        self
    }
}

/// One addressable piece of container content.
///
/// Implementors provide the descriptor and the payload; the manifest, spine and navigation
/// entries are derived from the descriptor.
pub trait ResourceItem: fmt::Debug + Send + Sync {
    fn descriptor(&self) -> &ItemDescriptor;

    /// Payload bytes written to `OEBPS/<name>`.
    fn data(&self) -> &[u8];

    /// `short_name + extension`, the path relative to `OEBPS/`.
    fn name(&self) -> String {
        let d = self.descriptor();
        format!("{}{}", d.short_name, d.extension)
    }

    fn id_ref(&self) -> &str {
        &self.descriptor().id_ref
    }

    fn spine_priority(&self) -> u32 {
        self.descriptor().spine_priority
    }

    fn media_type(&self) -> &'static str {
        media_type(&self.descriptor().extension)
    }

    /// `<item>` line for the package manifest, or `None` when the item has no id.
    fn manifest_entry(&self) -> Option<String> {
        let d = self.descriptor();
        if d.id_ref.is_empty() {
            return None;
        }
        let properties = d
            .properties
            .map(|p| format!(" properties=\"{}\"", p))
            .unwrap_or_default();
        Some(format!(
            " <item id=\"{}\" href=\"{}\" media-type=\"{}\"{} />",
            xml_escape(&d.id_ref),
            xml_escape(&self.name()),
            self.media_type(),
            properties
        ))
    }

    /// `<itemref>` line for the spine, or `None` when the item is not part of the reading order.
    fn spine_entry(&self) -> Option<String> {
        let d = self.descriptor();
        if d.spine_priority == PRIORITY_NONE {
            return None;
        }
        Some(format!(" <itemref idref=\"{}\"/>", xml_escape(&d.id_ref)))
    }

    /// `<navPoint>` for the NCX navigation map, or `None` when the item has no label.
    fn nav_entry(&self, play_order: u32) -> Option<String> {
        let d = self.descriptor();
        if d.nav_text.is_empty() {
            return None;
        }
        Some(format!(
            "<navPoint id=\"navPoint-{order}\" playOrder=\"{order}\"><navLabel><text>{}</text></navLabel><content src=\"{}\"/></navPoint>",
            xml_escape(&d.nav_text),
            xml_escape(&self.name()),
            order = play_order
        ))
    }
}

/// A chapter document, `OEBPS/<slug>.xhtml`.
#[derive(Debug, Clone)]
pub struct ChapterPage {
    descriptor: ItemDescriptor,
    xhtml: String,
}

impl ChapterPage {
    /// `xhtml` is the complete, already-templated document.
    pub fn new(slug: &str, title: &str, xhtml: String) -> Self {
        let descriptor = ItemDescriptor::new(slug, ".xhtml", format!("CHAPTER{}", slug))
            .in_spine(PRIORITY_CHAPTER, title);
        Self { descriptor, xhtml }
    }

    pub fn xhtml(&self) -> &str {
        &self.xhtml
    }
}

impl ResourceItem for ChapterPage {
    fn descriptor(&self) -> &ItemDescriptor {
        &self.descriptor
    }

    fn data(&self) -> &[u8] {
        self.xhtml.as_bytes()
    }
}

/// A fetched image, `OEBPS/Images/<n><ext>`.
#[derive(Debug, Clone)]
pub struct ImageItem {
    descriptor: ItemDescriptor,
    bytes: Vec<u8>,
    source: String,
}

impl ImageItem {
    pub fn new(identity: usize, extension: &str, bytes: Vec<u8>, source: impl Into<String>) -> Self {
        Self {
            descriptor: ItemDescriptor::new(
                format!("Images/{}", identity),
                extension,
                format!("img{}", identity),
            ),
            bytes,
            source: source.into(),
        }
    }

    /// Normalized address the image was fetched from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl ResourceItem for ImageItem {
    fn descriptor(&self) -> &ItemDescriptor {
        &self.descriptor
    }

    fn data(&self) -> &[u8] {
        &self.bytes
    }
}

/// The cover page, `OEBPS/cover.xhtml`.
#[derive(Debug, Clone)]
pub struct CoverPage {
    descriptor: ItemDescriptor,
    xhtml: String,
}

impl CoverPage {
    /// `image` is the archive-relative name of the cover image, if one was found.
    pub fn render(templates: &Templates, title: &str, image: Option<&str>) -> Result<Self, TemplateError> {
        let cover_image = image
            .map(|src| {
                format!(
                    "    <img src=\"{}\" alt=\"{}\"/>",
                    xml_escape(src),
                    xml_escape(title)
                )
            })
            .unwrap_or_default();
        let xhtml = templates.render_cover(&[
            ("title", &xml_escape(title)),
            ("cover_image", &cover_image),
        ])?;
        Ok(Self {
            descriptor: ItemDescriptor::new("cover", ".xhtml", "cover").in_spine(PRIORITY_COVER, title),
            xhtml,
        })
    }
}

impl ResourceItem for CoverPage {
    fn descriptor(&self) -> &ItemDescriptor {
        &self.descriptor
    }

    fn data(&self) -> &[u8] {
        self.xhtml.as_bytes()
    }
}

/// Title page with author details, `OEBPS/author.xhtml`.
#[derive(Debug, Clone)]
pub struct AuthorPage {
    descriptor: ItemDescriptor,
    xhtml: String,
}

impl AuthorPage {
    pub fn render(
        templates: &Templates,
        title: &str,
        author: Option<&str>,
        bio: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<Self, TemplateError> {
        let byline = author
            .map(|a| format!("    <h2>By: {}</h2>", html_escape_text(a)))
            .unwrap_or_default();
        let bio = bio
            .map(|b| {
                format!(
                    "    <div class=\"author-description\">{}</div>",
                    html_escape_text(b)
                )
            })
            .unwrap_or_default();
        let avatar = avatar
            .map(|src| format!("    <img src=\"{}\" alt=\"Author\"/>", xml_escape(src)))
            .unwrap_or_default();
        let xhtml = templates.render_author(&[
            ("title", &xml_escape(title)),
            ("byline", &byline),
            ("bio", &bio),
            ("avatar", &avatar),
        ])?;
        Ok(Self {
            descriptor: ItemDescriptor::new("author", ".xhtml", "author")
                .in_spine(PRIORITY_AUTHOR, "Author"),
            xhtml,
        })
    }
}

impl ResourceItem for AuthorPage {
    fn descriptor(&self) -> &ItemDescriptor {
        &self.descriptor
    }

    fn data(&self) -> &[u8] {
        self.xhtml.as_bytes()
    }
}

/// Visible table of contents, `OEBPS/toc.xhtml`. Doubles as the EPUB 3 navigation document,
/// so it carries no NCX label of its own.
#[derive(Debug, Clone)]
pub struct TableOfContents {
    descriptor: ItemDescriptor,
    xhtml: String,
}

impl TableOfContents {
    /// `entries` are `(display title, archive-relative href)` in reading order.
    pub fn render(templates: &Templates, entries: &[(String, String)]) -> Result<Self, TemplateError> {
        let list = entries
            .iter()
            .map(|(title, href)| {
                format!(
                    "      <li><a href=\"{}\">{}</a></li>",
                    xml_escape(href),
                    html_escape_text(title)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let xhtml = templates.render_toc(&[("entries", &list)])?;
        let mut descriptor = ItemDescriptor::new("toc", ".xhtml", "toc").in_spine(PRIORITY_TOC, "");
        descriptor.properties = Some("nav");
        Ok(Self { descriptor, xhtml })
    }
}

impl ResourceItem for TableOfContents {
    fn descriptor(&self) -> &ItemDescriptor {
        &self.descriptor
    }

    fn data(&self) -> &[u8] {
        self.xhtml.as_bytes()
    }
}

/// The book stylesheet, `OEBPS/Styles/RRStyle.css`.
#[derive(Debug, Clone)]
pub struct StyleSheet {
    descriptor: ItemDescriptor,
    css: String,
}

impl StyleSheet {
    pub fn new(css: impl Into<String>) -> Self {
        Self {
            descriptor: ItemDescriptor::new("Styles/RRStyle", ".css", "RRStyle"),
            css: css.into(),
        }
    }
}

impl ResourceItem for StyleSheet {
    fn descriptor(&self) -> &ItemDescriptor {
        &self.descriptor
    }

    fn data(&self) -> &[u8] {
        self.css.as_bytes()
    }
}

/// The package document, `OEBPS/content.opf`. Not listed in its own manifest.
#[derive(Debug, Clone)]
pub struct PackageDocument {
    descriptor: ItemDescriptor,
    xml: String,
}

impl PackageDocument {
    pub fn render(
        templates: &Templates,
        metadata: &BookMetadata,
        manifest: &str,
        spine: &str,
        modified: &str,
    ) -> Result<Self, TemplateError> {
        let xml = templates.render_package(&[
            ("title", &xml_escape(&metadata.title)),
            ("author", &xml_escape(metadata.author.as_deref().unwrap_or_default())),
            (
                "description",
                &xml_escape(metadata.description.as_deref().unwrap_or_default()),
            ),
            ("date_updated", &xml_escape(&metadata.last_updated)),
            ("modified", modified),
            ("book_id", &xml_escape(&metadata.source_id)),
            ("manifest", manifest),
            ("spine", spine),
        ])?;
        Ok(Self {
            descriptor: ItemDescriptor::new("content", ".opf", ""),
            xml,
        })
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }
}

impl ResourceItem for PackageDocument {
    fn descriptor(&self) -> &ItemDescriptor {
        &self.descriptor
    }

    fn data(&self) -> &[u8] {
        self.xml.as_bytes()
    }
}

/// The NCX navigation document, `OEBPS/toc.ncx`.
#[derive(Debug, Clone)]
pub struct NavigationDocument {
    descriptor: ItemDescriptor,
    xml: String,
}

impl NavigationDocument {
    pub fn render(
        templates: &Templates,
        metadata: &BookMetadata,
        nav_points: &str,
    ) -> Result<Self, TemplateError> {
        let xml = templates.render_navigation(&[
            ("book_id", &xml_escape(&metadata.source_id)),
            ("title", &xml_escape(&metadata.title)),
            ("author", &xml_escape(metadata.author.as_deref().unwrap_or_default())),
            ("nav_points", nav_points),
        ])?;
        Ok(Self {
            descriptor: ItemDescriptor::new("toc", ".ncx", "ncx"),
            xml,
        })
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }
}

impl ResourceItem for NavigationDocument {
    fn descriptor(&self) -> &ItemDescriptor {
        &self.descriptor
    }

    fn data(&self) -> &[u8] {
        self.xml.as_bytes()
    }
}
