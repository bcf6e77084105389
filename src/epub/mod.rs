//! EPUB container assembly: resource items, the priority-ordered item group, image cache,
//! chapter reconstruction, templates and the container writer.

pub mod chapter;
pub mod group;
pub mod images;
pub mod item;
pub mod template;
pub mod writer;

pub use chapter::{Chapter, ChapterAssembler, SlugRegistry};
pub use group::{ItemGroup, ItemHandle};
pub use images::ImageCache;
pub use item::{
    AuthorPage, ChapterPage, CoverPage, ImageItem, NavigationDocument, PackageDocument,
    ResourceItem, StyleSheet, TableOfContents,
};
pub use template::{TemplateError, Templates};
pub use writer::{ContainerWriter, WriterState};

use crate::scraper::FetchError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the container writer.
///
/// Maps to CLI exit code 3, except [EpubError::Fetch], which is a source failure.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("No free file name for \"{base}\" after {attempts} attempts")]
    NamingExhausted { base: String, attempts: u32 },

    #[error("Failed to create EPUB file: {}: {source}", path.display())]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("EPUB container is already finalized")]
    Finalized,

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// An image download failed in a way that must stop the build (source outage).
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to write EPUB archive: {0}")]
    Io(#[from] std::io::Error),
}

/// Escape text for XML attribute values and element content.
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Escape text for XHTML element content.
pub fn html_escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
