//! citecache - fetch citation-library records through a local cache
//!
//! Serves one library request and prints the result as JSON. Attachment bodies
//! are written to stdout unchanged.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use citecache::accounts::AccountRegistry;
use citecache::cli::{Cli, StartupConfig};
use citecache::config::Config;
use citecache::remote::ReqwestTransport;
use citecache::request::{LibraryClient, Payload};

/// Installs the stderr log subscriber; `RUST_LOG` overrides the CLI verbosity
fn setup_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(startup: StartupConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match startup.config_path.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    if let Some(dir) = startup.cache_dir {
        config.cache_dir = Some(dir);
    }
    if let Some(path) = startup.accounts_path {
        config.accounts_file = Some(path);
    }

    let accounts = match &config.accounts_file {
        Some(path) => AccountRegistry::load(path)?,
        None => AccountRegistry::default(),
    };
    let backend = config
        .cache_backend()
        .ok_or("could not determine a cache directory; pass --cache-dir")?;
    let transport = ReqwestTransport::new(&config)?;

    let client = LibraryClient::with_config(transport, backend, accounts, &config);
    let output = client
        .request(&startup.address, startup.mode, startup.kind)
        .await?;

    let mut stdout = io::stdout().lock();
    match &output.payload {
        Payload::Binary(bytes) => stdout.write_all(bytes)?,
        _ => {
            serde_json::to_writer_pretty(&mut stdout, &output.to_json())?;
            writeln!(stdout)?;
        }
    }
    stdout.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let startup = match StartupConfig::from_cli(&cli) {
        Ok(startup) => startup,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    setup_logging(startup.log_filter);

    match run(startup).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
