//! Core types for album-backup

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{Error, ResolveError, Result};

/// Relative locator of one item inside an album's remote namespace (e.g. `/photo-1`)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemReference(String);

impl ItemReference {
    /// Create a new item reference
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Get the raw reference string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last normal path segment of the reference, used as the local file stem
    ///
    /// Empty, `.` and `..` segments are never returned, so the stem cannot leave the
    /// album folder. `None` when the reference has no normal segment at all.
    pub fn file_stem(&self) -> Option<&str> {
        let path = self.0.split(['?', '#']).next().unwrap_or("");
        path.rsplit(['/', '\\'])
            .find(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
    }
}

impl fmt::Display for ItemReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemReference {
    fn from(reference: &str) -> Self {
        Self::new(reference)
    }
}

/// Resolved, directly fetchable URI for an item's bytes
///
/// Locators are not stable across requests, so they are never cached or persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectLocator(String);

impl DirectLocator {
    /// Create a new locator
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    /// Get the raw locator string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File extension of the locator's path including the dot (e.g. `.jpg`)
    ///
    /// Query string and fragment are ignored. Returns `None` when the last path
    /// segment has no alphanumeric extension.
    pub fn extension(&self) -> Option<&str> {
        let path = self.0.split(['?', '#']).next().unwrap_or("");
        let last_segment = path.rsplit('/').next().unwrap_or(path);
        let dot = last_segment.rfind('.')?;
        let ext = &last_segment[dot..];
        if ext.len() > 1 && ext[1..].chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            Some(ext)
        } else {
            None
        }
    }
}

impl fmt::Display for DirectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local file name for a fetched item: reference stem plus the locator's extension
pub fn local_file_name(
    reference: &ItemReference,
    locator: &DirectLocator,
) -> std::result::Result<String, ResolveError> {
    let stem = reference
        .file_stem()
        .ok_or_else(|| ResolveError::UnsafeReference {
            reference: reference.clone(),
        })?;
    Ok(match locator.extension() {
        Some(ext) => format!("{stem}{ext}"),
        None => stem.to_string(),
    })
}

/// A remote album to back up
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Album {
    uri: Url,
    name: String,
}

impl Album {
    /// Parse an album from its source URI
    ///
    /// The local folder name is the last non-empty segment of the URI path.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = Url::parse(uri.trim())
            .map_err(|e| Error::config(format!("invalid album URI '{uri}': {e}"), "albums"))?;

        let name = uri
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::config(format!("album URI '{uri}' has no path segment"), "albums")
            })?;

        Ok(Self { uri, name })
    }

    /// Source URI of the album
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Local folder name derived from the URI
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute URI of an item's detail page
    pub fn item_url(&self, reference: &ItemReference) -> Result<Url> {
        self.uri.join(reference.as_str()).map_err(|e| {
            Error::config(
                format!("item reference '{reference}' is not a valid path: {e}"),
                "albums",
            )
        })
    }
}

impl fmt::Display for Album {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri.as_str())
    }
}

/// Event emitted during a backup job
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Album listing finished
    AlbumListed {
        /// Album URI
        album: String,
        /// Number of items discovered
        items: usize,
    },

    /// Item skipped because the ledger already has it
    ItemSkipped {
        /// Item reference
        reference: ItemReference,
    },

    /// Item attempt failed and will be retried
    ItemRetrying {
        /// Item reference
        reference: ItemReference,
        /// Number of failures so far
        attempt: u32,
        /// Error message of the failed attempt
        error: String,
    },

    /// Item stored on disk and recorded in the ledger
    ItemFetched {
        /// Item reference
        reference: ItemReference,
        /// Local file name inside the album folder
        file_name: String,
        /// Items fetched in this run so far
        fetched: u64,
        /// Items this run has to fetch
        total: u64,
        /// Estimated minutes until the job finishes
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_minutes: Option<u64>,
    },

    /// All albums processed, ledger cleared
    JobFinished {
        /// Items fetched in this run
        fetched: u64,
        /// Completion time
        finished_at: DateTime<Utc>,
    },

    /// Job aborted, ledger persisted for resume
    JobAborted {
        /// Machine-readable error code
        code: String,
        /// Error message
        error: String,
    },
}
