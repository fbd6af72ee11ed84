//! Command-line interface parsing for citecache
//!
//! Parses the library address plus the flags that pick the request mode, the
//! resource kind and where configuration, accounts and cache rows live.

use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

use crate::request::{RequestMode, ResourceKind};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The specified mode name is not recognized
    #[error("Invalid mode: '{0}'. Valid modes: auto, update, snapshot")]
    InvalidMode(String),

    /// The specified resource kind is not recognized
    #[error("Invalid kind: '{0}'. Valid kinds: item, ris, attachment")]
    InvalidKind(String),
}

/// citecache - Fetch and cache records from a citation-library API
#[derive(Parser, Debug)]
#[command(name = "citecache")]
#[command(about = "Fetch citation-library records, serving them from a local cache while fresh")]
#[command(version)]
pub struct Cli {
    /// Library API address, e.g. https://api.zotero.org/users/12345/items?key=ABC
    pub address: String,

    /// How to use the cache
    ///
    /// Examples:
    ///   citecache <ADDRESS>                   # Serve fresh cache, otherwise fetch
    ///   citecache <ADDRESS> --mode update     # Always contact the API
    ///   citecache <ADDRESS> --mode snapshot   # Never contact the API
    #[arg(long, value_name = "MODE", default_value = "auto")]
    pub mode: String,

    /// Resource kind returned by the address: item, ris or attachment
    #[arg(long, value_name = "KIND", default_value = "item")]
    pub kind: String,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Accounts file listing stored API keys
    #[arg(long, value_name = "FILE")]
    pub accounts: Option<PathBuf>,

    /// Directory for cached responses
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parses a mode string argument into a RequestMode
pub fn parse_mode_arg(s: &str) -> Result<RequestMode, CliError> {
    RequestMode::from_name(s).ok_or_else(|| CliError::InvalidMode(s.to_string()))
}

/// Parses a kind string argument into a ResourceKind
pub fn parse_kind_arg(s: &str) -> Result<ResourceKind, CliError> {
    ResourceKind::from_name(s).ok_or_else(|| CliError::InvalidKind(s.to_string()))
}

/// Validated settings derived from CLI arguments
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub address: String,
    pub mode: RequestMode,
    pub kind: ResourceKind,
    pub config_path: Option<PathBuf>,
    pub accounts_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    /// Default log filter for the subscriber
    pub log_filter: &'static str,
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with validated mode and kind
    /// * `Err(CliError)` if an invalid mode or kind was specified
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let log_filter = match cli.verbose {
            0 => "citecache=warn",
            1 => "citecache=info",
            2 => "citecache=debug",
            _ => "citecache=trace",
        };

        Ok(StartupConfig {
            address: cli.address.clone(),
            mode: parse_mode_arg(&cli.mode)?,
            kind: parse_kind_arg(&cli.kind)?,
            config_path: cli.config.clone(),
            accounts_path: cli.accounts.clone(),
            cache_dir: cli.cache_dir.clone(),
            log_filter,
        })
    }
}
