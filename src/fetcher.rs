//! Streaming item bytes to local storage
//!
//! Bytes are streamed into `<target>.part` and renamed onto the target only once the
//! body is complete. The part file is removed when an attempt fails or is cancelled,
//! so a failed attempt never leaves a truncated file behind.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::REFERER;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::error::{Error, FetchError, Result};
use crate::types::DirectLocator;

/// Suffix of in-progress files
const PART_SUFFIX: &str = ".part";

/// Downloads one resolved item to a local path
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Stream `locator` to `local_path`, sending `referer` as the Referer header
    ///
    /// On success exactly one file exists at `local_path`. On failure nothing is
    /// left at `local_path` or its part file.
    async fn fetch(&self, locator: &DirectLocator, local_path: &Path, referer: &Url) -> Result<()>;
}

/// [`Fetcher`] backed by a reqwest client
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher sharing the given client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &DirectLocator, local_path: &Path, referer: &Url) -> Result<()> {
        let url = Url::parse(locator.as_str()).map_err(|e| FetchError::InvalidLocator {
            locator: locator.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(url.clone())
            .header(REFERER, referer.as_str())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            }
            .into());
        }

        let part_path = part_path(local_path);
        let guard = PartFileGuard::new(part_path.clone());

        let mut file = tokio::fs::File::create(&part_path)
            .await
            .map_err(|e| write_error(&part_path, e))?;

        let mut bytes_written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Interrupted {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| write_error(&part_path, e))?;
            bytes_written += chunk.len() as u64;
        }

        file.flush().await.map_err(|e| write_error(&part_path, e))?;
        file.sync_all().await.map_err(|e| write_error(&part_path, e))?;
        drop(file);

        tokio::fs::rename(&part_path, local_path)
            .await
            .map_err(|e| write_error(local_path, e))?;
        guard.disarm();

        tracing::debug!(
            url = %url,
            path = %local_path.display(),
            bytes = bytes_written,
            "Item stored"
        );
        Ok(())
    }
}

/// Path of the in-progress file for `local_path`
pub fn part_path(local_path: &Path) -> PathBuf {
    let mut name = local_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PART_SUFFIX);
    local_path.with_file_name(name)
}

fn write_error(path: &Path, e: std::io::Error) -> Error {
    FetchError::Write {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
    .into()
}

/// Removes the part file on drop unless disarmed
///
/// Covers both error returns and the fetch future being dropped on cancellation.
struct PartFileGuard {
    path: PathBuf,
    armed: bool,
}

impl PartFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed incomplete part file")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove part file")
            }
        }
    }
}
