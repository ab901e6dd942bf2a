//! Durable record of completed item references
//!
//! The ledger file doubles as a crash marker: it is only written when a job aborts
//! and deleted when a job completes, so its presence means "previous run incomplete".
//! On disk it is a flat, pretty-printed JSON array of reference strings.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::ItemReference;

/// Lifecycle of the ledger's durable form
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerState {
    /// No durable record (fresh start, or cleared after a completed job)
    Absent,
    /// Job running; the durable file may or may not exist
    Active,
    /// Durable file written after an abort
    Persisted,
}

/// In-memory set of completed references plus its durable location
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    order: Vec<ItemReference>,
    done: HashSet<ItemReference>,
    state: LedgerState,
    resumed: bool,
}

impl ProgressLedger {
    /// Load the ledger at `path`
    ///
    /// A missing file yields an empty ledger. A file that cannot be parsed is an
    /// error: silently starting over would re-fetch everything.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut ledger = Self {
            path,
            order: Vec::new(),
            done: HashSet::new(),
            state: LedgerState::Active,
            resumed: false,
        };

        let content = match std::fs::read_to_string(&ledger.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %ledger.path.display(), "No ledger found, starting fresh");
                return Ok(ledger);
            }
            Err(e) => {
                return Err(Error::Ledger(format!(
                    "failed to read {}: {}",
                    ledger.path.display(),
                    e
                )));
            }
        };

        let references: Vec<ItemReference> = serde_json::from_str(&content).map_err(|e| {
            warn!(path = %ledger.path.display(), error = %e, "Ledger file is corrupt");
            Error::Ledger(format!("failed to parse {}: {}", ledger.path.display(), e))
        })?;

        for reference in references {
            ledger.record(reference);
        }
        ledger.resumed = true;

        info!(
            path = %ledger.path.display(),
            completed = ledger.len(),
            "Resuming from ledger"
        );
        Ok(ledger)
    }

    /// Whether `reference` has already been fetched
    pub fn has(&self, reference: &ItemReference) -> bool {
        self.done.contains(reference)
    }

    /// Record a completed reference; returns false if it was already present
    pub fn record(&mut self, reference: ItemReference) -> bool {
        if self.done.contains(&reference) {
            return false;
        }
        self.done.insert(reference.clone());
        self.order.push(reference);
        self.state = LedgerState::Active;
        true
    }

    /// Write the full set to the ledger file atomically
    pub fn persist(&mut self) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| self.io_error("create directory for", e))?;

        let json = serde_json::to_string_pretty(&self.order)?;

        let mut temp_file =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| self.io_error("create temp file for", e))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| self.io_error("write", e))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| self.io_error("sync", e))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| self.io_error("replace", e.error))?;

        self.state = LedgerState::Persisted;
        info!(
            path = %self.path.display(),
            completed = self.order.len(),
            "Ledger persisted"
        );
        Ok(())
    }

    /// Remove the ledger file and forget all recorded references
    pub fn clear(&mut self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Ledger removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.io_error("remove", e)),
        }
        self.order.clear();
        self.done.clear();
        self.state = LedgerState::Absent;
        Ok(())
    }

    /// Number of completed references
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no reference has been completed
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Completed references in completion order
    pub fn references(&self) -> &[ItemReference] {
        &self.order
    }

    /// Current lifecycle state
    pub fn state(&self) -> LedgerState {
        self.state
    }

    /// True when the ledger was loaded from a previous, incomplete run
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Ledger file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, action: &str, e: std::io::Error) -> Error {
        Error::Ledger(format!("failed to {} {}: {}", action, self.path.display(), e))
    }
}
