//! CLI parsing and orchestration. Parses args, builds the EPUB for one fiction, and maps errors
//! to exit codes.

use crate::build::{build_book, BuildError, BuildOptions};
use crate::config::{self, Config};
use crate::epub::{EpubError, Templates};
use crate::scraper::{resolve_fiction_url, PoliteClient, RoyalRoad, ScraperError};
use clap::Parser;
use log::{info, warn};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DELAY_SECS: u64 = 1;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_COUNT: u32 = 4;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Epub(#[from] EpubError),

    #[error("{0}")]
    Validation(String),
}

impl CliRunError {
    /// 1 invalid input, 2 source errors, 3 output errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Scraper(_) | CliRunError::Epub(EpubError::Fetch(_)) => 2,
            CliRunError::Epub(_) | CliRunError::Validation(_) => 3,
        }
    }
}

impl From<BuildError> for CliRunError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::Scraper(e) => CliRunError::Scraper(e),
            BuildError::ChapterFetch { source, .. } => CliRunError::Scraper(source),
            BuildError::Epub(e) => CliRunError::Epub(e),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "rrtool")]
#[command(about = "Download a Royal Road fiction as an EPUB")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, request_delay_secs, timeout_secs, retry_count, retry_backoff_secs, template_dir) are read from ./rrtool.toml or <config dir>/rrtool/config.toml. CLI flags override config. RUST_LOG overrides the log level."
)]
pub struct Args {
    /// Fiction id (e.g. 21220) or fiction URL (https://www.royalroad.com/fiction/21220/...).
    #[arg(required_unless_present = "list")]
    pub fiction: Option<String>,

    /// Directory the EPUB is written to. Default: config output_dir, else the current directory.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Download only chapters in this range (1-based inclusive), e.g. 1-10, or 3-3 for one chapter.
    #[arg(long, value_parser = parse_chapter_range)]
    pub chapters: Option<(u32, u32)>,

    /// List the EPUB files in the output directory and exit.
    #[arg(long, conflicts_with = "fiction")]
    pub list: bool,

    /// Open the finished EPUB with the system's default reader.
    #[arg(long)]
    pub open: bool,

    /// After writing, run epubcheck to validate the EPUB (epubcheck must be on PATH).
    #[arg(long)]
    pub validate: bool,

    /// Directory of replacement document templates (overrides config template_dir).
    #[arg(long)]
    pub templates: Option<PathBuf>,

    /// Suppress progress output (warnings and errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(long)]
    pub verbose: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Delay between requests in seconds (overrides config; default 1).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,
}

fn parse_chapter_range(s: &str) -> Result<(u32, u32), String> {
    let s = s.trim();
    let (from_str, to_str) = s.split_once('-').ok_or_else(|| {
        format!(
            "Invalid --chapters: expected 'from-to' (e.g. 1-10), got '{}'",
            s
        )
    })?;
    let from_str = from_str.trim();
    let to_str = to_str.trim();
    let from: u32 = from_str.parse().map_err(|_| {
        format!(
            "Invalid --chapters: '{}' is not a valid start chapter number",
            from_str
        )
    })?;
    let to: u32 = to_str.parse().map_err(|_| {
        format!(
            "Invalid --chapters: '{}' is not a valid end chapter number",
            to_str
        )
    })?;
    if from == 0 {
        return Err("Invalid --chapters: chapters are numbered from 1".to_string());
    }
    if from > to {
        return Err(format!(
            "Invalid --chapters: start ({}) must be <= end ({})",
            from, to
        ));
    }
    Ok((from, to))
}

/// Log filter for the flags: `warn` when quiet, `debug` when verbose, else `info`.
pub fn log_level(args: &Args) -> &'static str {
    if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    }
}

/// Install the logger. `RUST_LOG` takes precedence over the flags.
pub fn init_logging(args: &Args) {
    let env = env_logger::Env::default().default_filter_or(log_level(args));
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}

/// Run epubcheck on the given EPUB path. Requires epubcheck on PATH.
fn validate_epub(path: &Path) -> Result<(), CliRunError> {
    let output = std::process::Command::new("epubcheck")
        .arg(path)
        .output()
        .map_err(|e| {
            CliRunError::Validation(format!(
                "Could not run epubcheck: {}. Is epubcheck installed and on PATH?",
                e
            ))
        })?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let msg = if stderr.is_empty() { stdout } else { stderr };
        Err(CliRunError::Validation(format!(
            "epubcheck reported errors:\n{}",
            msg.trim()
        )))
    }
}

/// Hand the finished book to the platform opener. Failure only warns; the book is already written.
fn open_book(path: &Path) {
    let mut command = if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else {
        std::process::Command::new("xdg-open")
    };
    if let Err(e) = command.arg(path).spawn() {
        warn!("Could not open {}: {}", path.display(), e);
    }
}

/// Output directory must exist and be a directory.
fn validate_output_dir(dir: &Path) -> Result<(), CliRunError> {
    if !dir.is_dir() {
        return Err(CliRunError::InvalidInput(format!(
            "Cannot write output: {}: directory does not exist.",
            dir.display()
        )));
    }
    Ok(())
}

/// `.epub` files directly inside `dir`, sorted by name.
pub fn list_books(dir: &Path) -> Result<Vec<PathBuf>, CliRunError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        CliRunError::InvalidInput(format!("Cannot list {}: {}", dir.display(), e))
    })?;
    let mut books: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"))
        })
        .collect();
    books.sort();
    Ok(books)
}

fn build_client(args: &Args, config: &Config) -> Result<PoliteClient, CliRunError> {
    let delay_secs = args
        .delay
        .or(config.request_delay_secs)
        .unwrap_or(DEFAULT_DELAY_SECS);
    let timeout_secs = args
        .timeout
        .or(config.timeout_secs)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let retry_count = config.retry_count.unwrap_or(DEFAULT_RETRY_COUNT).max(1);
    let retry_backoff_secs = config
        .retry_backoff_secs
        .clone()
        .unwrap_or_else(|| vec![1, 2, 4]);
    let user_agent = args.user_agent.clone().or_else(|| config.user_agent.clone());

    let mut builder = PoliteClient::builder()
        .delay_secs(delay_secs)
        .timeout_secs(timeout_secs)
        .retry_count(retry_count)
        .retry_backoff_secs(retry_backoff_secs);
    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua);
    }
    builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

fn load_templates(dir: Option<&Path>) -> Result<Templates, CliRunError> {
    match dir {
        Some(dir) => {
            info!("Using templates from {}", dir.display());
            Templates::from_dir(dir).map_err(|e| CliRunError::InvalidInput(e.to_string()))
        }
        None => Ok(Templates::embedded()),
    }
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config()
        .map_err(CliRunError::InvalidInput)?
        .unwrap_or_default();

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    validate_output_dir(&output_dir)?;

    if args.list {
        let books = list_books(&output_dir)?;
        if books.is_empty() {
            eprintln!("No EPUB files in {}", output_dir.display());
        }
        for book in books {
            if let Some(name) = book.file_name() {
                println!("{}", name.to_string_lossy());
            }
        }
        return Ok(());
    }

    let fiction = args.fiction.as_deref().ok_or_else(|| {
        CliRunError::InvalidInput("A fiction id or URL is required.".to_string())
    })?;
    let url = resolve_fiction_url(fiction).map_err(|e| {
        CliRunError::InvalidInput(format!(
            "Expected a fiction id or URL. Example: 21220 or https://www.royalroad.com/fiction/21220/mother-of-learning. {}",
            e
        ))
    })?;
    let templates = load_templates(args.templates.as_deref().or(config.template_dir.as_deref()))?;
    let mut client = build_client(args, &config)?;

    let progress_state: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
    let progress_cb = |n: u32, total: u32| {
        if total == 0 {
            return;
        }
        let mut state = progress_state.borrow_mut();
        let pb = state.get_or_insert_with(|| {
            let bar = indicatif::ProgressBar::new(total as u64);
            if let Ok(style) = indicatif::ProgressStyle::default_bar()
                .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
            {
                bar.set_style(
                    style
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                        .progress_chars("█▉▊▋▌▍▎▏ "),
                );
            }
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        pb.set_position(n as u64);
        pb.set_message(format!("Fetching chapter {}/{}", (n + 1).min(total), total));
    };
    let progress: Option<&dyn Fn(u32, u32)> = if args.quiet { None } else { Some(&progress_cb) };

    let options = BuildOptions {
        chapter_range: args.chapters,
        progress,
    };
    let built = build_book(
        &RoyalRoad::new(),
        &mut client,
        &url,
        &output_dir,
        templates,
        &options,
    );

    if let Some(pb) = progress_state.borrow_mut().take() {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    let path = built?;

    if args.validate {
        validate_epub(&path)?;
        info!("epubcheck passed");
    }
    if !args.quiet {
        eprintln!("Wrote {}", path.display());
    }
    if args.open {
        open_book(&path);
    }
    Ok(())
}
