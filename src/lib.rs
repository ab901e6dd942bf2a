//! # album-backup
//!
//! Resumable bulk backup of remote photo albums.
//!
//! ## Design Philosophy
//!
//! album-backup is designed to be:
//! - **Resumable** - Completed items are checkpointed, an aborted run picks up where it stopped
//! - **Polite** - One request in flight, with pauses between pages and items
//! - **Fail-fast** - An item that keeps failing stops the job instead of leaving gaps
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use album_backup::{BackupJob, Config, config::read_album_list};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let albums = read_album_list(&config.albums_file)?;
//!
//!     let job = BackupJob::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = job.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = job.run(&albums).await?;
//!     println!("fetched {} items", summary.items_fetched);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Streaming item downloads
pub mod fetcher;
/// Shared HTTP client construction
pub mod http;
/// Backup job orchestration
pub mod job;
/// Durable record of completed items
pub mod ledger;
/// Album listing and pagination
pub mod lister;
/// Progress counters and ETA
pub mod progress;
/// Item reference to direct locator resolution
pub mod resolver;
/// Per-item retry with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, HttpConfig, PolitenessConfig, RetryConfig};
pub use error::{Error, FetchError, ListingError, ResolveError, Result};
pub use fetcher::{Fetcher, HttpFetcher};
pub use job::{BackupJob, JobSummary};
pub use ledger::{LedgerState, ProgressLedger};
pub use lister::{AlbumLister, AlbumSource, ListingPage, WebAlbumSource};
pub use resolver::{ItemResolver, WebItemResolver};
pub use types::{Album, DirectLocator, Event, ItemReference};

/// Helper function to run a job with graceful signal handling.
///
/// Runs the job while waiting for a termination signal; a signal cancels the job,
/// which persists its ledger and returns [`Error::ShuttingDown`].
///
/// SIGINT (Ctrl+C) is handled everywhere, SIGTERM on Unix.
///
/// # Example
///
/// ```no_run
/// use album_backup::{BackupJob, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let job = BackupJob::new(Config::default())?;
///     let albums = vec![album_backup::Album::parse("https://vk.com/album1_2")?];
///
///     run_with_shutdown(&job, &albums).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(job: &BackupJob, albums: &[Album]) -> Result<JobSummary> {
    let signal_job = job.clone();
    let watcher = tokio::spawn(async move {
        wait_for_signal().await;
        signal_job.shutdown();
    });

    let result = job.run(albums).await;
    watcher.abort();
    result
}

/// Resolves on SIGINT, or on SIGTERM where the platform has it
async fn wait_for_signal() {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for Ctrl+C only");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => tracing::info!("Received SIGINT signal (Ctrl+C)"),
        _ = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
