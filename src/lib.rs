//! rrtool: download a Royal Road fiction and bind it into an EPUB container.

pub mod build;
pub mod cli;
pub mod config;
pub mod epub;
pub mod model;
pub mod scraper;

// Re-exports for CLI and consumers.
pub use build::{build_book, BuildError, BuildOptions};
pub use epub::{ContainerWriter, EpubError, ImageCache, ResourceItem, Templates};
pub use model::{BookMetadata, ChapterRef, NoteFragment, NotePlacement, ScrapedBook, ScrapedChapter};
pub use scraper::{
    resolve_fiction_url, BookSource, Fetch, FetchError, PoliteClient, PoliteClientBuilder,
    RoyalRoad, ScraperError,
};
