//! Book build pipeline: scrape the index page, assemble every chapter, add the front matter and
//! seal the container.
//!
//! The container writer leaves a half-written archive behind on failure; this module removes it
//! before the error is returned.

use crate::epub::{
    AuthorPage, ChapterAssembler, ContainerWriter, CoverPage, EpubError, ImageCache, SlugRegistry,
    StyleSheet, TableOfContents, TemplateError, Templates,
};
use crate::epub::item::ResourceItem;
use crate::model::{ChapterRef, ScrapedBook};
use crate::scraper::{BookSource, Fetch, ScraperError};
use log::{info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Scraper(#[from] ScraperError),

    #[error(transparent)]
    Epub(EpubError),

    #[error("Failed to download chapter \"{title}\": {source}")]
    ChapterFetch {
        title: String,
        #[source]
        source: ScraperError,
    },
}

/// A fetch failure raised while writing (an image hitting a source outage) is a source error,
/// not an output error.
impl From<EpubError> for BuildError {
    fn from(e: EpubError) -> Self {
        match e {
            EpubError::Fetch(e) => BuildError::Scraper(ScraperError::Fetch(e)),
            other => BuildError::Epub(other),
        }
    }
}

impl From<TemplateError> for BuildError {
    fn from(e: TemplateError) -> Self {
        BuildError::Epub(EpubError::Template(e))
    }
}

/// Options for one build run.
#[derive(Default)]
pub struct BuildOptions<'a> {
    /// Inclusive 1-based chapter range; `None` builds every chapter.
    pub chapter_range: Option<(u32, u32)>,
    /// Called with (chapters done, chapters total) before each chapter download.
    pub progress: Option<&'a dyn Fn(u32, u32)>,
}

/// Chapters whose TOC index falls inside `range`, in TOC order.
pub fn select_chapters(refs: &[ChapterRef], range: Option<(u32, u32)>) -> Vec<&ChapterRef> {
    refs.iter()
        .filter(|r| match range {
            Some((from, to)) => r.index >= from && r.index <= to,
            None => true,
        })
        .collect()
}

/// Download the book at `url` from `source` and write it to `out_dir`. Returns the path of the
/// finished `.epub`.
pub fn build_book(
    source: &dyn BookSource,
    fetcher: &mut dyn Fetch,
    url: &str,
    out_dir: &Path,
    templates: Templates,
    options: &BuildOptions<'_>,
) -> Result<PathBuf, BuildError> {
    let book = source.scrape_book(fetcher, url)?;
    let chapters = select_chapters(&book.chapter_refs, options.chapter_range);
    if chapters.is_empty() {
        return Err(ScraperError::NoChapters.into());
    }
    match options.chapter_range {
        Some((from, to)) => info!(
            "Downloading chapters {}-{} ({} total) of {} from Royal Road",
            from,
            to,
            chapters.len(),
            book.metadata.title
        ),
        None => info!(
            "Downloading {} chapters of {} from Royal Road",
            chapters.len(),
            book.metadata.title
        ),
    }

    let images = ImageCache::new(source.base_origin());
    let mut writer =
        ContainerWriter::create(out_dir, &book.metadata.title, templates.clone(), images)?;
    let path = writer.path().map(Path::to_path_buf).unwrap_or_default();

    let outcome = populate(
        &mut writer,
        source,
        fetcher,
        &book,
        &chapters,
        &templates,
        options,
    )
    .and_then(|()| {
        writer
            .complete(&book.metadata)
            .map(drop)
            .map_err(BuildError::from)
    });
    drop(writer);
    if let Err(e) = outcome {
        match std::fs::remove_file(&path) {
            Ok(()) => info!("Removed incomplete {}", path.display()),
            Err(rm) => warn!("Could not remove incomplete {}: {}", path.display(), rm),
        }
        return Err(e);
    }
    info!("Finished {}", path.display());
    Ok(path)
}

/// Push every chapter and the front matter. The cover image is resolved first so it gets the
/// first image slot.
fn populate(
    writer: &mut ContainerWriter<File>,
    source: &dyn BookSource,
    fetcher: &mut dyn Fetch,
    book: &ScrapedBook,
    chapters: &[&ChapterRef],
    templates: &Templates,
    options: &BuildOptions<'_>,
) -> Result<(), BuildError> {
    let title = &book.metadata.title;
    let cover_image = match &book.cover_address {
        Some(address) => Some(writer.resolve_image(address, &mut *fetcher)?.name()),
        None => {
            warn!("No cover image found for {}", title);
            None
        }
    };

    let assembler = ChapterAssembler::new(templates);
    let mut slugs = SlugRegistry::new();
    let mut toc_entries = Vec::with_capacity(chapters.len());
    let mut author_info: Option<(Option<String>, Option<String>)> = None;
    let total = chapters.len() as u32;

    for (done, chapter_ref) in chapters.iter().enumerate() {
        if let Some(progress) = options.progress {
            progress(done as u32, total);
        }
        let chapter = slugs.register(&chapter_ref.title);
        let scraped = source
            .scrape_chapter(&mut *fetcher, chapter_ref)
            .map_err(|source| BuildError::ChapterFetch {
                title: chapter.name.clone(),
                source,
            })?;
        if author_info.is_none() {
            author_info = Some((scraped.author_bio.clone(), scraped.author_avatar.clone()));
        }
        let page = assembler.assemble(&chapter, &scraped, |src| -> Result<String, BuildError> {
            Ok(writer.resolve_image(src, &mut *fetcher)?.name())
        })?;
        toc_entries.push((chapter.name.clone(), page.name()));
        writer.push_item(Arc::new(page))?;
    }
    if let Some(progress) = options.progress {
        progress(total, total);
    }

    let (bio, avatar_address) = author_info.unwrap_or_default();
    let avatar = match avatar_address {
        Some(address) => Some(writer.resolve_image(&address, &mut *fetcher)?.name()),
        None => None,
    };
    if book.metadata.author.is_none() {
        warn!("Author unknown; the author page will have no byline");
    }

    writer.push_item(Arc::new(CoverPage::render(
        templates,
        title,
        cover_image.as_deref(),
    )?))?;
    writer.push_item(Arc::new(AuthorPage::render(
        templates,
        title,
        book.metadata.author.as_deref(),
        bio.as_deref(),
        avatar.as_deref(),
    )?))?;
    writer.push_item(Arc::new(TableOfContents::render(templates, &toc_entries)?))?;
    writer.push_item(Arc::new(StyleSheet::new(templates.stylesheet())))?;
    Ok(())
}
