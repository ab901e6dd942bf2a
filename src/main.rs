//! album-backup command line entry point

use album_backup::config::read_album_list;
use album_backup::{BackupJob, Config, run_with_shutdown};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Back up every photo of the albums listed in a file
#[derive(Parser, Debug)]
#[command(name = "album-backup")]
#[command(about = "Resumable bulk backup of remote photo albums", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON configuration file; built-in defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// File with one album URI per line
    #[arg(long)]
    albums: Option<PathBuf>,

    /// Output root; album folders and the progress ledger live here
    #[arg(long)]
    output: Option<PathBuf>,

    /// Retries per item before the job aborts
    #[arg(long)]
    max_retries: Option<u32>,

    /// Skip albums whose listing fails instead of aborting
    #[arg(long)]
    skip_unavailable: bool,
}

impl Cli {
    /// Load the config file (if any) and apply command line overrides
    fn into_config(self) -> album_backup::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(albums) = self.albums {
            config.albums_file = albums;
        }
        if let Some(output) = self.output {
            config.output_dir = output;
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if self.skip_unavailable {
            config.skip_unavailable_albums = true;
        }
        Ok(config)
    }
}

fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("album_backup=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(cli: Cli) -> album_backup::Result<()> {
    let config = cli.into_config()?;
    let albums = read_album_list(&config.albums_file)?;

    let job = BackupJob::new(config)?;
    let summary = run_with_shutdown(&job, &albums).await?;

    info!(
        albums = summary.albums,
        fetched = summary.items_fetched,
        skipped = summary.items_skipped,
        "Backup complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(code = e.error_code(), "Backup failed: {}", e);
        std::process::exit(1);
    }
}
