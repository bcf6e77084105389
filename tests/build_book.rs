//! End-to-end build against an in-memory source: scraped book in, finished `.epub` out.

use rrtool::{
    build_book, BookMetadata, BookSource, BuildError, BuildOptions, ChapterRef, Fetch, FetchError,
    NoteFragment, NotePlacement, ScrapedBook, ScrapedChapter, ScraperError, Templates,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::error::Error;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

const COVER: &str = "https://www.royalroad.com/covers/test-book.jpg";
const JPEG: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0xff, 0xd9];

struct FakeSite {
    chapters: Vec<ChapterRef>,
    pages: HashMap<String, ScrapedChapter>,
}

impl FakeSite {
    fn two_chapters() -> Self {
        let chapters = vec![chapter_ref(1, "Chapter One"), chapter_ref(2, "Chapter Two")];
        let mut pages = HashMap::new();
        pages.insert(
            chapters[0].url.clone(),
            ScrapedChapter {
                main_content: Some(format!(
                    "<div class=\"chapter-inner chapter-content\"><p>Hello</p><img src=\"{}\"></div>",
                    COVER
                )),
                notes: vec![NoteFragment {
                    html: "<div class=\"author-note\">Thanks for reading</div>".to_string(),
                    placement: NotePlacement::BeforeContent,
                }],
                author_bio: Some("Writes things.".to_string()),
                author_avatar: None,
            },
        );
        pages.insert(
            chapters[1].url.clone(),
            ScrapedChapter {
                main_content: Some("<div class=\"chapter-inner chapter-content\"><p>Goodbye</p></div>".to_string()),
                ..Default::default()
            },
        );
        Self { chapters, pages }
    }
}

fn chapter_ref(index: u32, title: &str) -> ChapterRef {
    ChapterRef {
        title: title.to_string(),
        url: format!("https://www.royalroad.com/fiction/1/test-book/chapter/{}", index),
        index,
    }
}

impl BookSource for FakeSite {
    fn base_origin(&self) -> &str {
        "https://www.royalroad.com"
    }

    fn scrape_book(&self, _fetcher: &mut dyn Fetch, _url: &str) -> Result<ScrapedBook, ScraperError> {
        let mut metadata = BookMetadata::new("Test Book", "1");
        metadata.author = Some("Jane Doe".to_string());
        metadata.last_updated = "2023-03-05".to_string();
        Ok(ScrapedBook {
            metadata,
            chapter_refs: self.chapters.clone(),
            cover_address: Some(COVER.to_string()),
        })
    }

    fn scrape_chapter(
        &self,
        _fetcher: &mut dyn Fetch,
        chapter: &ChapterRef,
    ) -> Result<ScrapedChapter, ScraperError> {
        self.pages
            .get(&chapter.url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound { url: chapter.url.clone() }.into())
    }
}

#[derive(Default)]
struct FakeFetch {
    bodies: HashMap<String, Vec<u8>>,
    down: bool,
    requests: Vec<String>,
}

impl Fetch for FakeFetch {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.requests.push(url.to_string());
        if self.down {
            return Err(FetchError::ServiceUnavailable { url: url.to_string() });
        }
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound { url: url.to_string() })
    }
}

fn fetcher_with_cover() -> FakeFetch {
    let mut fetcher = FakeFetch::default();
    fetcher.bodies.insert(COVER.to_string(), JPEG.to_vec());
    fetcher
}

fn entry(archive: &mut ZipArchive<File>, name: &str) -> Result<String, Box<dyn Error>> {
    let mut s = String::new();
    archive.by_name(name)?.read_to_string(&mut s)?;
    Ok(s)
}

fn epubs_in(dir: &Path) -> Result<Vec<String>, std::io::Error> {
    let mut names = Vec::new();
    for e in std::fs::read_dir(dir)? {
        let name = e?.file_name().to_string_lossy().into_owned();
        if name.ends_with(".epub") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn positions(haystack: &str, needles: &[&str]) -> Vec<Option<usize>> {
    needles.iter().map(|n| haystack.find(n)).collect()
}

#[test]
fn builds_complete_container() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let site = FakeSite::two_chapters();
    let mut fetcher = fetcher_with_cover();

    let path = build_book(
        &site,
        &mut fetcher,
        "https://www.royalroad.com/fiction/1",
        dir.path(),
        Templates::embedded(),
        &BuildOptions::default(),
    )?;
    assert_eq!(path.file_name().map(|n| n.to_string_lossy().into_owned()), Some("Test Book.epub".to_string()));
    // The cover doubles as an inline chapter image but is only downloaded once.
    assert_eq!(fetcher.requests, vec![COVER.to_string()]);

    let mut archive = ZipArchive::new(File::open(&path)?)?;
    {
        let first = archive.by_index(0)?;
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), zip::CompressionMethod::Stored);
    }
    let mut names: Vec<String> = archive.file_names().map(String::from).collect();
    names.sort();
    let mut expected = vec![
        "mimetype",
        "META-INF/container.xml",
        "OEBPS/content.opf",
        "OEBPS/toc.ncx",
        "OEBPS/toc.xhtml",
        "OEBPS/cover.xhtml",
        "OEBPS/author.xhtml",
        "OEBPS/Styles/RRStyle.css",
        "OEBPS/Images/0.jpg",
        "OEBPS/Chapter_One.xhtml",
        "OEBPS/Chapter_Two.xhtml",
    ];
    expected.sort();
    assert_eq!(names, expected);

    let opf = entry(&mut archive, "OEBPS/content.opf")?;
    let spine = positions(
        &opf,
        &[
            "idref=\"cover\"",
            "idref=\"author\"",
            "idref=\"toc\"",
            "idref=\"CHAPTERChapter_One\"",
            "idref=\"CHAPTERChapter_Two\"",
        ],
    );
    assert!(spine.iter().all(Option::is_some), "spine incomplete: {}", opf);
    assert!(spine.windows(2).all(|w| w[0] < w[1]), "spine out of order: {}", opf);
    assert!(opf.contains("Test Book"));
    assert!(opf.contains("Jane Doe"));

    let ncx = entry(&mut archive, "OEBPS/toc.ncx")?;
    assert!(ncx.contains(
        "<navPoint id=\"navPoint-1\" playOrder=\"1\"><navLabel><text>Test Book</text></navLabel><content src=\"cover.xhtml\"/></navPoint>"
    ));
    assert!(ncx.contains(
        "<navPoint id=\"navPoint-2\" playOrder=\"2\"><navLabel><text>Author</text></navLabel><content src=\"author.xhtml\"/></navPoint>"
    ));
    assert!(ncx.contains(
        "<navPoint id=\"navPoint-4\" playOrder=\"4\"><navLabel><text>Chapter Two</text></navLabel><content src=\"Chapter_Two.xhtml\"/></navPoint>"
    ));
    assert!(!ncx.contains("playOrder=\"5\""));
    assert!(!ncx.contains("toc.xhtml"));

    let first = entry(&mut archive, "OEBPS/Chapter_One.xhtml")?;
    let note = first.find("Thanks for reading");
    let body = first.find("Hello");
    assert!(note.is_some() && body.is_some() && note < body);
    assert!(first.contains("Images/0.jpg"));
    assert!(!first.contains(COVER));

    let toc = entry(&mut archive, "OEBPS/toc.xhtml")?;
    let links = positions(&toc, &["Chapter_One.xhtml", "Chapter_Two.xhtml"]);
    assert!(links[0].is_some() && links[0] < links[1]);

    let author = entry(&mut archive, "OEBPS/author.xhtml")?;
    assert!(author.contains("Jane Doe"));
    assert!(author.contains("Writes things."));

    let mut image = Vec::new();
    archive.by_name("OEBPS/Images/0.jpg")?.read_to_end(&mut image)?;
    assert_eq!(image, JPEG);
    Ok(())
}

#[test]
fn second_build_gets_a_fresh_name() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let site = FakeSite::two_chapters();
    for _ in 0..2 {
        build_book(
            &site,
            &mut fetcher_with_cover(),
            "https://www.royalroad.com/fiction/1",
            dir.path(),
            Templates::embedded(),
            &BuildOptions::default(),
        )?;
    }
    assert_eq!(epubs_in(dir.path())?, vec!["Test Book.epub", "Test Book1.epub"]);
    Ok(())
}

#[test]
fn chapter_failure_removes_partial_file() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let mut site = FakeSite::two_chapters();
    site.pages.remove(&site.chapters[1].url);

    let result = build_book(
        &site,
        &mut fetcher_with_cover(),
        "https://www.royalroad.com/fiction/1",
        dir.path(),
        Templates::embedded(),
        &BuildOptions::default(),
    );
    match result {
        Err(BuildError::ChapterFetch { title, source }) => {
            assert_eq!(title, "Chapter Two");
            assert!(source.is_not_found());
        }
        other => panic!("expected ChapterFetch, got {:?}", other),
    }
    assert!(epubs_in(dir.path())?.is_empty());
    Ok(())
}

#[test]
fn empty_chapter_list_writes_nothing() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let mut site = FakeSite::two_chapters();
    site.chapters.clear();

    let result = build_book(
        &site,
        &mut fetcher_with_cover(),
        "https://www.royalroad.com/fiction/1",
        dir.path(),
        Templates::embedded(),
        &BuildOptions::default(),
    );
    assert!(matches!(result, Err(BuildError::Scraper(ScraperError::NoChapters))));
    assert!(epubs_in(dir.path())?.is_empty());
    Ok(())
}

#[test]
fn chapter_range_limits_content_and_reports_progress() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let site = FakeSite::two_chapters();
    let seen = RefCell::new(Vec::new());
    let record = |done: u32, total: u32| seen.borrow_mut().push((done, total));
    let options = BuildOptions {
        chapter_range: Some((2, 2)),
        progress: Some(&record),
    };

    let path = build_book(
        &site,
        &mut fetcher_with_cover(),
        "https://www.royalroad.com/fiction/1",
        dir.path(),
        Templates::embedded(),
        &options,
    )?;
    let archive = ZipArchive::new(File::open(&path)?)?;
    let names: Vec<&str> = archive.file_names().collect();
    assert!(names.contains(&"OEBPS/Chapter_Two.xhtml"));
    assert!(!names.contains(&"OEBPS/Chapter_One.xhtml"));
    assert_eq!(seen.into_inner(), vec![(0, 1), (1, 1)]);
    Ok(())
}

#[test]
fn missing_cover_falls_back_to_placeholder() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let site = FakeSite::two_chapters();
    let path = build_book(
        &site,
        &mut FakeFetch::default(),
        "https://www.royalroad.com/fiction/1",
        dir.path(),
        Templates::embedded(),
        &BuildOptions::default(),
    )?;
    let mut archive = ZipArchive::new(File::open(&path)?)?;
    let mut image = Vec::new();
    archive.by_name("OEBPS/Images/0.jpg")?.read_to_end(&mut image)?;
    assert!(image.starts_with(&[0xff, 0xd8]));
    assert_ne!(image, JPEG);
    Ok(())
}

#[test]
fn image_outage_aborts_and_removes_partial_file() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let site = FakeSite::two_chapters();
    let mut fetcher = FakeFetch {
        down: true,
        ..Default::default()
    };

    let result = build_book(
        &site,
        &mut fetcher,
        "https://www.royalroad.com/fiction/1",
        dir.path(),
        Templates::embedded(),
        &BuildOptions::default(),
    );
    match result {
        Err(BuildError::Scraper(e)) => {
            assert!(e.is_source_outage());
            assert!(e.to_string().contains("Royal Road appears to be down (HTTP 522)"));
        }
        other => panic!("expected a source outage, got {:?}", other),
    }
    assert_eq!(fetcher.requests, vec![COVER.to_string()]);
    assert!(epubs_in(dir.path())?.is_empty());
    Ok(())
}
