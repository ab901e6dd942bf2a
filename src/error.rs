//! Error types for album-backup
//!
//! This module provides the error hierarchy for the backup pipeline:
//! - Stage-specific error types (listing, resolving, fetching)
//! - A wrapper for exhausted per-item retries
//! - Ledger, configuration and ambient I/O failures

use std::path::PathBuf;
use thiserror::Error;

use crate::types::ItemReference;

/// Result type alias for album-backup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for album-backup
///
/// Every fatal condition of a backup job ends up as one of these variants. Each variant
/// includes enough context (album URI, item reference, path) to diagnose the failure
/// from a single log line.
#[derive(Debug, Error)]
pub enum Error {
    /// Album listing failed (page unreachable or unparsable)
    #[error("listing error: {0}")]
    Listing(#[from] ListingError),

    /// Item could not be resolved to a direct locator
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Streaming an item to disk failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// An item kept failing after every allowed attempt
    #[error("too many errors for {reference} after {attempts} attempts: {source}")]
    RetryExhausted {
        /// The item reference that could not be fetched
        reference: ItemReference,
        /// Total number of attempts made (initial + retries)
        attempts: u32,
        /// The last underlying error
        #[source]
        source: Box<Error>,
    },

    /// Progress ledger could not be read or written
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "output_dir")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job was cancelled (signal received) before it could finish
    #[error("shutdown in progress: job cancelled")]
    ShuttingDown,
}

/// Album listing errors
#[derive(Debug, Error)]
pub enum ListingError {
    /// Listing page answered with a non-success status
    #[error("unable to load album {album}: HTTP {status}")]
    Status {
        /// Album URI
        album: String,
        /// HTTP status code returned by the remote
        status: u16,
    },

    /// Listing page could not be parsed
    #[error("unable to parse album {album}: {reason}")]
    Parse {
        /// Album URI
        album: String,
        /// What was missing or malformed
        reason: String,
    },

    /// A follow-up page did not contribute any new item
    #[error("album {album} stalled at offset {offset} of {declared} declared items")]
    Stalled {
        /// Album URI
        album: String,
        /// Offset of the page that returned nothing new
        offset: usize,
        /// Declared total item count
        declared: usize,
    },

    /// Pagination hit the hard page limit
    #[error("album {album} exceeded {max_pages} listing pages")]
    TooManyPages {
        /// Album URI
        album: String,
        /// Page limit that was reached
        max_pages: usize,
    },
}

/// Item resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Detail page answered with a non-success status
    #[error("unable to load item {reference}: HTTP {status}")]
    Status {
        /// Item reference
        reference: ItemReference,
        /// HTTP status code returned by the remote
        status: u16,
    },

    /// Detail page has no embedded metadata block
    #[error("item {reference} has no embedded metadata")]
    MissingMetadata {
        /// Item reference
        reference: ItemReference,
    },

    /// Embedded metadata block is not valid JSON of the expected shape
    #[error("item {reference} has invalid metadata: {reason}")]
    InvalidMetadata {
        /// Item reference
        reference: ItemReference,
        /// Why the block was rejected
        reason: String,
    },

    /// Metadata block does not describe the requested item
    #[error("item {reference} (id {id}) not present in metadata")]
    ItemNotFound {
        /// Item reference
        reference: ItemReference,
        /// Item id announced by the page
        id: String,
    },

    /// None of the known locator fields is present
    #[error("item {reference} has no known locator field")]
    NoLocator {
        /// Item reference
        reference: ItemReference,
    },

    /// Reference has no path segment usable as a local file name
    #[error("item {reference} has no usable file name")]
    UnsafeReference {
        /// Item reference
        reference: ItemReference,
    },
}

/// Errors while streaming item bytes to disk
#[derive(Debug, Error)]
pub enum FetchError {
    /// Direct locator answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    Status {
        /// Direct locator
        url: String,
        /// HTTP status code returned by the remote
        status: u16,
    },

    /// Direct locator is not a usable URL
    #[error("invalid locator {locator}: {reason}")]
    InvalidLocator {
        /// The offending locator
        locator: String,
        /// Parse failure
        reason: String,
    },

    /// Writing the local file failed
    #[error("failed to write {path}: {reason}")]
    Write {
        /// Target path
        path: PathBuf,
        /// Underlying I/O failure
        reason: String,
    },

    /// Connection dropped while streaming the body
    #[error("stream interrupted for {url}: {reason}")]
    Interrupted {
        /// Direct locator
        url: String,
        /// Underlying transport failure
        reason: String,
    },
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Machine-readable error code, used in structured log fields and events
    pub fn error_code(&self) -> &str {
        match self {
            Error::Listing(e) => match e {
                ListingError::Status { .. } => "listing_status",
                ListingError::Parse { .. } => "listing_parse",
                ListingError::Stalled { .. } => "listing_stalled",
                ListingError::TooManyPages { .. } => "listing_too_many_pages",
            },
            Error::Resolve(e) => match e {
                ResolveError::Status { .. } => "resolve_status",
                ResolveError::MissingMetadata { .. } => "missing_metadata",
                ResolveError::InvalidMetadata { .. } => "invalid_metadata",
                ResolveError::ItemNotFound { .. } => "item_not_found",
                ResolveError::NoLocator { .. } => "no_locator",
                ResolveError::UnsafeReference { .. } => "unsafe_reference",
            },
            Error::Fetch(e) => match e {
                FetchError::Status { .. } => "fetch_status",
                FetchError::InvalidLocator { .. } => "invalid_locator",
                FetchError::Write { .. } => "write_failed",
                FetchError::Interrupted { .. } => "stream_interrupted",
            },
            Error::RetryExhausted { .. } => "retry_exhausted",
            Error::Ledger(_) => "ledger_error",
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ShuttingDown => "shutting_down",
        }
    }
}
