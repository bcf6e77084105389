//! Optional config file loading. Search order: ./rrtool.toml, then
//! $XDG_CONFIG_HOME/rrtool/config.toml (or ~/.config/rrtool/config.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};

const LOCAL_CONFIG: &str = "rrtool.toml";

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct Config {
    /// Default output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Delay in seconds between requests.
    pub request_delay_secs: Option<u64>,
    /// Request timeout in seconds (default 30).
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures.
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]).
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Directory whose files replace the embedded document templates. Every template must be
    /// present.
    pub template_dir: Option<PathBuf>,
}

/// Search order: (1) ./rrtool.toml, (2) <config dir>/rrtool/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join(LOCAL_CONFIG)];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("rrtool").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            return load_config_file(path).map(Some);
        }
    }
    Ok(None)
}

/// Read and parse one config file.
pub fn load_config_file(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    log::debug!("using config {}", path.display());
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}
