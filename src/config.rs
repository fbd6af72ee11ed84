//! Runtime configuration
//!
//! Settings are read from a JSON file (`~/.config/citecache/config.json` on
//! Linux). Every field has a default, so a missing file or a partial file is
//! fine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cache::FileBackend;
use crate::freshness::DEFAULT_INTERVAL_MINUTES;
use crate::remote::{DEFAULT_API_VERSION, DEFAULT_FALLBACK_API_VERSION};

const CONFIG_FILE_NAME: &str = "config.json";

/// Errors raised while loading configuration or account files
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `Zotero-API-Version` sent on normal requests
    pub api_version: u8,
    /// `Zotero-API-Version` sent on the relaxed-transport retry
    pub fallback_api_version: u8,
    /// Minutes after which a cached response is re-checked upstream
    pub freshness_minutes: u32,
    pub request_timeout_secs: u64,
    /// Overrides the XDG cache directory
    pub cache_dir: Option<PathBuf>,
    /// JSON file listing known library accounts
    pub accounts_file: Option<PathBuf>,
    /// Serve a stale cached copy instead of failing when a refresh fails
    pub serve_stale_on_error: bool,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION,
            fallback_api_version: DEFAULT_FALLBACK_API_VERSION,
            freshness_minutes: DEFAULT_INTERVAL_MINUTES,
            request_timeout_secs: 30,
            cache_dir: None,
            accounts_file: None,
            serve_stale_on_error: false,
            user_agent: concat!("citecache/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Default location of the configuration file, if a home directory exists
    pub fn default_path() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "citecache")?;
        Some(project_dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from `path`, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File backend rooted at `cache_dir`, or at the XDG cache directory
    pub fn cache_backend(&self) -> Option<FileBackend> {
        match &self.cache_dir {
            Some(dir) => Some(FileBackend::with_dir(dir.clone())),
            None => FileBackend::new(),
        }
    }
}
