//! Container writer: owns the archive, the item group and the image cache for one book.
//!
//! Lifecycle: [ContainerWriter::create] opens the archive and writes the two fixed entries,
//! items are pushed while populated, and [ContainerWriter::complete] generates the package and
//! navigation documents, writes every payload and seals the archive. After that every mutating
//! call fails with [EpubError::Finalized].

use super::group::{in_spine, ItemGroup, ItemHandle};
use super::images::ImageCache;
use super::item::{ImageItem, NavigationDocument, PackageDocument};
use super::template::Templates;
use super::EpubError;
use crate::model::BookMetadata;
use crate::scraper::Fetch;
use log::{debug, info};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const EXTENSION: &str = "epub";

/// Suffixes `1..=MAX_NAME_RETRIES` are tried after the bare name.
pub const MAX_NAME_RETRIES: u32 = 10;

/// Characters that never make it into an output filename.
const UNSAFE_FILENAME_CHARS: &[char] = &[
    '\'', '"', '{', '}', '/', '\\', '<', '>', '`', '!', '@', '#', '$', '%', '&', '*', '-', '_', '+',
    '|', '?', '=', ':',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Populated,
    Finalized,
}

/// Collapse every run of unsafe characters and whitespace in `title` to a single space.
pub fn sanitize_filename(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut in_run = false;
    for c in title.chars() {
        if c.is_whitespace() || UNSAFE_FILENAME_CHARS.contains(&c) {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        "book".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Current UTC time as `YYYY-MM-DDThh:mm:ssZ`.
pub fn modified_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Writes one EPUB container.
pub struct ContainerWriter<W: Write + Seek> {
    zip: Option<ZipWriter<W>>,
    state: WriterState,
    items: ItemGroup,
    images: ImageCache,
    templates: Templates,
    path: Option<PathBuf>,
    deflated: SimpleFileOptions,
}

impl ContainerWriter<File> {
    /// Create `<dir>/<sanitized title>.epub`, falling back to `<base>1.epub` … `<base>10.epub`
    /// when the name is taken or not writable.
    pub fn create(
        dir: &Path,
        title: &str,
        templates: Templates,
        images: ImageCache,
    ) -> Result<Self, EpubError> {
        let base = sanitize_filename(title);
        let (file, path) = open_unique(dir, &base)?;
        info!("making epub {}", path.display());
        let mut writer = Self::from_writer(file, templates, images)?;
        writer.path = Some(path);
        Ok(writer)
    }
}

/// An existing file or one we may not write to sends the writer on to the next name.
fn is_name_collision(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::AlreadyExists | ErrorKind::PermissionDenied)
}

fn open_unique(dir: &Path, base: &str) -> Result<(File, PathBuf), EpubError> {
    for attempt in 0..=MAX_NAME_RETRIES {
        let file_name = if attempt == 0 {
            format!("{}.{}", base, EXTENSION)
        } else {
            format!("{}{}.{}", base, attempt, EXTENSION)
        };
        let path = dir.join(file_name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if is_name_collision(e.kind()) => {
                debug!("{} unavailable ({}), trying next name", path.display(), e);
            }
            Err(source) => return Err(EpubError::CreateFile { path, source }),
        }
    }
    Err(EpubError::NamingExhausted {
        base: base.to_string(),
        attempts: MAX_NAME_RETRIES + 1,
    })
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Start a container on any seekable sink and write `mimetype` and `META-INF/container.xml`.
    pub fn from_writer(sink: W, templates: Templates, images: ImageCache) -> Result<Self, EpubError> {
        let stored = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        let deflated = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .compression_level(Some(6))
            .unix_permissions(0o644);

        let mut zip = ZipWriter::new(sink);
        // mimetype must be first and uncompressed
        zip.start_file("mimetype", stored)?;
        zip.write_all(MIMETYPE)?;
        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(templates.container().as_bytes())?;

        Ok(Self {
            zip: Some(zip),
            state: WriterState::Populated,
            items: ItemGroup::new(),
            images,
            templates,
            path: None,
            deflated,
        })
    }

    /// Path of the archive on disk, when created with [ContainerWriter::create].
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    pub fn items(&self) -> &ItemGroup {
        &self.items
    }

    fn ensure_open(&self) -> Result<(), EpubError> {
        match self.state {
            WriterState::Populated => Ok(()),
            WriterState::Finalized => Err(EpubError::Finalized),
        }
    }

    pub fn push_item(&mut self, item: ItemHandle) -> Result<(), EpubError> {
        self.ensure_open()?;
        debug!("push {} (priority {})", item.name(), item.spine_priority());
        self.items.append(item);
        Ok(())
    }

    /// Resolve an image through the cache; a newly fetched image is pushed as an item. A source
    /// outage surfaces as [EpubError::Fetch].
    pub fn resolve_image(
        &mut self,
        address: &str,
        fetcher: &mut dyn Fetch,
    ) -> Result<Arc<ImageItem>, EpubError> {
        self.ensure_open()?;
        let (image, fresh) = self.images.resolve(address, fetcher)?;
        if fresh {
            self.items.append(image.clone());
        }
        Ok(image)
    }

    /// NCX `<navPoint>`s for every spine item with a label, numbered from 1.
    fn nav_points(&self) -> String {
        let mut seen = HashSet::new();
        let mut play_order = 0u32;
        let mut points = Vec::new();
        for item in self.items.iter_filtered(in_spine) {
            if !seen.insert(item.name()) {
                continue;
            }
            if let Some(entry) = item.nav_entry(play_order + 1) {
                play_order += 1;
                points.push(entry);
            }
        }
        points.join("\n")
    }

    /// Manifest `<item>` lines for every item with an id, one per id.
    fn manifest_entries(&self) -> String {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .filter(|item| seen.insert(item.id_ref().to_string()))
            .filter_map(|item| item.manifest_entry())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn spine_entries(&self) -> String {
        let mut seen = HashSet::new();
        self.items
            .iter_filtered(in_spine)
            .filter(|item| seen.insert(item.id_ref().to_string()))
            .filter_map(|item| item.spine_entry())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Generate the navigation and package documents, write every payload and seal the archive.
    ///
    /// Returns the underlying sink. The writer is finalized even if this fails part way; the
    /// caller is responsible for discarding the output in that case.
    pub fn complete(&mut self, metadata: &BookMetadata) -> Result<W, EpubError> {
        self.ensure_open()?;
        self.state = WriterState::Finalized;

        let ncx = NavigationDocument::render(&self.templates, metadata, &self.nav_points())?;
        self.items.append(Arc::new(ncx));
        let opf = PackageDocument::render(
            &self.templates,
            metadata,
            &self.manifest_entries(),
            &self.spine_entries(),
            &modified_timestamp(),
        )?;
        self.items.append(Arc::new(opf));

        let mut zip = self.zip.take().ok_or(EpubError::Finalized)?;
        let mut written = HashSet::new();
        for item in self.items.iter() {
            let name = item.name();
            if !written.insert(name.clone()) {
                continue;
            }
            zip.start_file(format!("{}{}", OEBPS_PREFIX, name), self.deflated)?;
            zip.write_all(item.data())?;
        }
        let sink = zip.finish()?;
        info!("sealed epub with {} items", written.len());
        Ok(sink)
    }
}

impl<W: Write + Seek> std::fmt::Debug for ContainerWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerWriter")
            .field("state", &self.state)
            .field("items", &self.items.len())
            .field("images", &self.images.len())
            .field("path", &self.path)
            .finish()
    }
}
