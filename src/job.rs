//! Backup job orchestration
//!
//! The job lists every configured album, then walks the albums and their items in
//! order, one item in flight at a time:
//! - items already in the [`ProgressLedger`] are skipped
//! - every other item is resolved and fetched under [`retry_item`]
//! - each success is recorded into the ledger
//!
//! Any unrecoverable error persists the ledger before it is returned, so every abort
//! leaves a resumable checkpoint. A fully successful run deletes the ledger.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::http::build_client;
use crate::ledger::ProgressLedger;
use crate::lister::{AlbumLister, AlbumSource, WebAlbumSource};
use crate::progress::ProgressState;
use crate::resolver::{ItemResolver, WebItemResolver};
use crate::retry::retry_item;
use crate::types::{Album, Event, ItemReference, local_file_name};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Outcome of a completed job
#[derive(Clone, Debug)]
pub struct JobSummary {
    /// Albums that were listed and processed
    pub albums: usize,
    /// Items discovered across all processed albums
    pub items_total: usize,
    /// Items fetched in this run
    pub items_fetched: u64,
    /// Items skipped because a previous run had fetched them
    pub items_skipped: usize,
    /// Completion time
    pub finished_at: DateTime<Utc>,
}

/// Album backup job (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct BackupJob {
    config: Arc<Config>,
    lister: Arc<AlbumLister>,
    resolver: Arc<dyn ItemResolver>,
    fetcher: Arc<dyn Fetcher>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl BackupJob {
    /// Create a job that talks to the remote over HTTP
    pub fn new(config: Config) -> Result<Self> {
        let client = build_client(&config.http)?;
        Ok(Self::with_components(
            config,
            Arc::new(WebAlbumSource::new(client.clone())),
            Arc::new(WebItemResolver::new(client.clone())),
            Arc::new(HttpFetcher::new(client)),
        ))
    }

    /// Create a job from explicit pipeline stages
    pub fn with_components(
        config: Config,
        source: Arc<dyn AlbumSource>,
        resolver: Arc<dyn ItemResolver>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let lister = AlbumLister::new(source, config.politeness.page_delay);
        Self {
            config: Arc::new(config),
            lister: Arc::new(lister),
            resolver,
            fetcher,
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to job events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Job configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Request cancellation; the running job persists its ledger and stops
    pub fn shutdown(&self) {
        info!("Backup job cancellation requested");
        self.cancel.cancel();
    }

    /// Token cancelled by [`BackupJob::shutdown`]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Back up `albums`, resuming from the ledger of a previous incomplete run
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error after the ledger has been persisted:
    /// a listing failure, [`Error::RetryExhausted`] for an item, a file system error,
    /// or [`Error::ShuttingDown`] when cancelled.
    pub async fn run(&self, albums: &[Album]) -> Result<JobSummary> {
        let mut ledger = ProgressLedger::load(self.config.ledger_path())?;

        match self.run_with_ledger(albums, &mut ledger).await {
            Ok(summary) => {
                ledger.clear()?;
                info!(
                    fetched = summary.items_fetched,
                    skipped = summary.items_skipped,
                    finished_at = %summary.finished_at,
                    "Job finished"
                );
                self.emit_event(Event::JobFinished {
                    fetched: summary.items_fetched,
                    finished_at: summary.finished_at,
                });
                Ok(summary)
            }
            Err(e) => {
                if let Err(persist_err) = ledger.persist() {
                    error!(error = %persist_err, "Failed to persist ledger after abort");
                }
                error!(
                    error = %e,
                    code = e.error_code(),
                    completed = ledger.len(),
                    "Job aborted, progress saved for resume"
                );
                self.emit_event(Event::JobAborted {
                    code: e.error_code().to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_with_ledger(
        &self,
        albums: &[Album],
        ledger: &mut ProgressLedger,
    ) -> Result<JobSummary> {
        info!(albums = albums.len(), "Found albums in queue");
        let listed = self.discover(albums).await?;

        let items_total: usize = listed.iter().map(|(_, items)| items.len()).sum();
        let already_done = listed
            .iter()
            .flat_map(|(_, items)| items.iter())
            .filter(|reference| ledger.has(reference))
            .count();
        let mut progress = ProgressState::new((items_total - already_done) as u64);
        info!(
            total = items_total,
            to_load = progress.total(),
            "Album discovery complete"
        );

        let mut items_skipped = 0;
        for (album, items) in &listed {
            let album_dir = self.config.album_dir(album);
            tokio::fs::create_dir_all(&album_dir).await?;

            for (index, reference) in items.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return Err(Error::ShuttingDown);
                }
                if ledger.has(reference) {
                    items_skipped += 1;
                    self.emit_event(Event::ItemSkipped {
                        reference: reference.clone(),
                    });
                    continue;
                }

                info!(
                    album = album.name(),
                    item = %reference,
                    position = index + 1,
                    album_items = items.len(),
                    "Loading item"
                );

                let file_name = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(Error::ShuttingDown),
                    result = self.process_item(album, &album_dir, reference) => result?,
                };

                ledger.record(reference.clone());
                progress.record_fetched();
                info!(file = %file_name, progress = %progress.summary_line(), "Item fetched");
                self.emit_event(Event::ItemFetched {
                    reference: reference.clone(),
                    file_name,
                    fetched: progress.fetched(),
                    total: progress.total(),
                    eta_minutes: progress.eta_minutes(),
                });

                self.item_pause().await;
            }
        }

        Ok(JobSummary {
            albums: listed.len(),
            items_total,
            items_fetched: progress.fetched(),
            items_skipped,
            finished_at: Utc::now(),
        })
    }

    /// List every album, pausing between albums
    async fn discover(&self, albums: &[Album]) -> Result<Vec<(Album, Vec<ItemReference>)>> {
        let mut listed = Vec::with_capacity(albums.len());

        for (index, album) in albums.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.politeness.page_delay).await;
            }
            if self.cancel.is_cancelled() {
                return Err(Error::ShuttingDown);
            }

            info!(album = %album, "Loading album info");
            match self.lister.list(album).await {
                Ok(items) => {
                    info!(album = %album, items = items.len(), "Album listed");
                    self.emit_event(Event::AlbumListed {
                        album: album.to_string(),
                        items: items.len(),
                    });
                    listed.push((album.clone(), items));
                }
                Err(e) if self.config.skip_unavailable_albums => {
                    warn!(album = %album, error = %e, "Album unavailable, skipping for this run");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(listed)
    }

    /// Resolve and fetch one item, retrying the whole sequence
    ///
    /// The locator is resolved again on every attempt because locators expire.
    async fn process_item(
        &self,
        album: &Album,
        album_dir: &Path,
        reference: &ItemReference,
    ) -> Result<String> {
        let referer = album.item_url(reference)?;
        let resolver = &self.resolver;
        let fetcher = &self.fetcher;
        let referer = &referer;

        retry_item(
            &self.config.retry,
            reference,
            |attempt, e| {
                self.emit_event(Event::ItemRetrying {
                    reference: reference.clone(),
                    attempt,
                    error: e.to_string(),
                });
            },
            move || async move {
                let locator = resolver.resolve(reference, album).await?;
                let file_name = local_file_name(reference, &locator)?;
                fetcher
                    .fetch(&locator, &album_dir.join(&file_name), referer)
                    .await?;
                Ok::<_, Error>(file_name)
            },
        )
        .await
    }

    /// Politeness pause after a fetched item; returns early on cancellation
    async fn item_pause(&self) {
        let pause = item_delay(
            self.config.politeness.item_delay,
            self.config.politeness.item_jitter,
        );
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(pause) => {}
        }
    }

    fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}

/// Base delay plus a uniform random extra of up to `jitter`
fn item_delay(base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
    base + Duration::from_millis(extra)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PolitenessConfig, RetryConfig};
    use crate::error::{FetchError, ListingError};
    use crate::ledger::LedgerState;
    use crate::lister::ListingPage;
    use crate::types::DirectLocator;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Albums served from memory; `missing` albums fail to list
    #[derive(Default)]
    struct MemorySource {
        albums: HashMap<String, Vec<ItemReference>>,
        missing: HashSet<String>,
    }

    impl MemorySource {
        fn with_album(mut self, name: &str, count: usize) -> Self {
            let items = (1..=count)
                .map(|i| ItemReference::new(format!("/{name}-photo-{i}")))
                .collect();
            self.albums.insert(name.to_string(), items);
            self
        }

        fn with_items(mut self, name: &str, items: &[&str]) -> Self {
            self.albums
                .insert(name.to_string(), items.iter().map(|s| ItemReference::new(*s)).collect());
            self
        }

        fn with_missing(mut self, name: &str) -> Self {
            self.missing.insert(name.to_string());
            self
        }
    }

    #[async_trait]
    impl AlbumSource for MemorySource {
        async fn first_page(&self, album: &Album) -> Result<ListingPage> {
            if self.missing.contains(album.name()) {
                return Err(ListingError::Status {
                    album: album.to_string(),
                    status: 404,
                }
                .into());
            }
            let items = self.albums.get(album.name()).cloned().unwrap_or_default();
            Ok(ListingPage {
                declared_total: items.len(),
                items,
            })
        }

        async fn page_at(&self, _album: &Album, _offset: usize) -> Result<Vec<ItemReference>> {
            Ok(Vec::new())
        }
    }

    /// Resolves `/x` to `http://cdn.test/x.jpg` and counts calls per item
    #[derive(Default)]
    struct CountingResolver {
        calls: Mutex<HashMap<String, u32>>,
    }

    impl CountingResolver {
        fn calls_for(&self, reference: &str) -> u32 {
            self.calls.lock().unwrap().get(reference).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ItemResolver for CountingResolver {
        async fn resolve(&self, reference: &ItemReference, _album: &Album) -> Result<DirectLocator> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(reference.to_string())
                .or_default() += 1;
            Ok(DirectLocator::new(format!(
                "http://cdn.test/{}.jpg",
                reference.file_stem().unwrap_or("item")
            )))
        }
    }

    /// Writes the locator into the target; fails for references in `failing`
    #[derive(Default)]
    struct MemoryFetcher {
        failing: HashSet<String>,
        fetched: Mutex<Vec<String>>,
    }

    impl MemoryFetcher {
        fn failing_on(reference: &str) -> Self {
            Self {
                failing: HashSet::from([reference.to_string()]),
                ..Default::default()
            }
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for MemoryFetcher {
        async fn fetch(&self, locator: &DirectLocator, local_path: &Path, referer: &url::Url) -> Result<()> {
            if self.failing.contains(referer.path()) {
                return Err(FetchError::Status {
                    url: locator.to_string(),
                    status: 503,
                }
                .into());
            }
            std::fs::write(local_path, locator.as_str())?;
            self.fetched.lock().unwrap().push(referer.path().to_string());
            Ok(())
        }
    }

    fn test_config(output_dir: &Path) -> Config {
        Config {
            output_dir: output_dir.to_path_buf(),
            politeness: PolitenessConfig::none(),
            retry: RetryConfig {
                max_retries: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..Default::default()
        }
    }

    fn albums(names: &[&str]) -> Vec<Album> {
        names
            .iter()
            .map(|name| Album::parse(&format!("http://vk.test/{name}")).unwrap())
            .collect()
    }

    fn write_ledger(output_dir: &Path, references: &[&str]) {
        std::fs::create_dir_all(output_dir).unwrap();
        std::fs::write(
            output_dir.join("progress.json"),
            serde_json::to_string(references).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn full_run_fetches_everything_and_clears_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let source = MemorySource::default().with_album("a", 3).with_album("b", 2);
        let fetcher = Arc::new(MemoryFetcher::default());
        let job = BackupJob::with_components(
            test_config(temp_dir.path()),
            Arc::new(source),
            Arc::new(CountingResolver::default()),
            fetcher.clone(),
        );

        let summary = job.run(&albums(&["a", "b"])).await.unwrap();

        assert_eq!(summary.albums, 2);
        assert_eq!(summary.items_total, 5);
        assert_eq!(summary.items_fetched, 5);
        assert_eq!(summary.items_skipped, 0);
        assert_eq!(fetcher.fetched().len(), 5);
        assert!(temp_dir.path().join("a").join("a-photo-1.jpg").exists());
        assert!(temp_dir.path().join("b").join("b-photo-2.jpg").exists());
        assert!(!temp_dir.path().join("progress.json").exists());
    }

    #[tokio::test]
    async fn resumed_run_fetches_only_the_complement() {
        let temp_dir = TempDir::new().unwrap();
        write_ledger(temp_dir.path(), &["/photo-1", "/photo-2"]);

        let source = MemorySource::default().with_items(
            "album",
            &["/photo-1", "/photo-2", "/photo-3", "/photo-4", "/photo-5"],
        );
        let resolver = Arc::new(CountingResolver::default());
        let fetcher = Arc::new(MemoryFetcher::default());
        let job = BackupJob::with_components(
            test_config(temp_dir.path()),
            Arc::new(source),
            resolver.clone(),
            fetcher.clone(),
        );

        let summary = job.run(&albums(&["album"])).await.unwrap();

        assert_eq!(fetcher.fetched(), vec!["/photo-3", "/photo-4", "/photo-5"]);
        assert_eq!(resolver.calls_for("/photo-1"), 0);
        assert_eq!(resolver.calls_for("/photo-2"), 0);
        assert_eq!(summary.items_skipped, 2);
        assert_eq!(summary.items_fetched, 3);
        assert!(!temp_dir.path().join("progress.json").exists());
    }

    #[tokio::test]
    async fn exhausted_item_aborts_job_and_persists_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let source = MemorySource::default().with_album("album", 4);
        let resolver = Arc::new(CountingResolver::default());
        let fetcher = Arc::new(MemoryFetcher::failing_on("/album-photo-3"));
        let job = BackupJob::with_components(
            test_config(temp_dir.path()),
            Arc::new(source),
            resolver.clone(),
            fetcher.clone(),
        );

        let err = job.run(&albums(&["album"])).await.unwrap_err();

        assert!(matches!(err, Error::RetryExhausted { attempts: 4, .. }));
        // locator re-resolved on every attempt
        assert_eq!(resolver.calls_for("/album-photo-3"), 4);
        // fail-fast: item 4 never attempted
        assert_eq!(resolver.calls_for("/album-photo-4"), 0);

        let ledger = ProgressLedger::load(temp_dir.path().join("progress.json")).unwrap();
        assert!(ledger.resumed());
        assert_eq!(
            ledger.references(),
            &[
                ItemReference::new("/album-photo-1"),
                ItemReference::new("/album-photo-2")
            ]
        );
    }

    #[tokio::test]
    async fn listing_failure_is_fatal_by_default() {
        let temp_dir = TempDir::new().unwrap();
        let source = MemorySource::default()
            .with_album("a", 2)
            .with_missing("gone");
        let fetcher = Arc::new(MemoryFetcher::default());
        let job = BackupJob::with_components(
            test_config(temp_dir.path()),
            Arc::new(source),
            Arc::new(CountingResolver::default()),
            fetcher.clone(),
        );

        let err = job.run(&albums(&["a", "gone"])).await.unwrap_err();

        assert!(matches!(err, Error::Listing(ListingError::Status { status: 404, .. })));
        assert!(fetcher.fetched().is_empty(), "listing happens before any fetch");
        assert!(temp_dir.path().join("progress.json").exists());
    }

    #[tokio::test]
    async fn unavailable_album_is_skipped_when_configured() {
        let temp_dir = TempDir::new().unwrap();
        let source = MemorySource::default()
            .with_album("a", 2)
            .with_missing("gone");
        let mut config = test_config(temp_dir.path());
        config.skip_unavailable_albums = true;
        let job = BackupJob::with_components(
            config,
            Arc::new(source),
            Arc::new(CountingResolver::default()),
            Arc::new(MemoryFetcher::default()),
        );

        let summary = job.run(&albums(&["gone", "a"])).await.unwrap();

        assert_eq!(summary.albums, 1);
        assert_eq!(summary.items_fetched, 2);
        assert!(!temp_dir.path().join("gone").exists());
    }

    #[tokio::test]
    async fn cancelled_job_persists_ledger_and_reports_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let source = MemorySource::default().with_album("album", 3);
        let job = BackupJob::with_components(
            test_config(temp_dir.path()),
            Arc::new(source),
            Arc::new(CountingResolver::default()),
            Arc::new(MemoryFetcher::default()),
        );
        job.shutdown();

        let err = job.run(&albums(&["album"])).await.unwrap_err();

        assert!(matches!(err, Error::ShuttingDown));
        let ledger = ProgressLedger::load(temp_dir.path().join("progress.json")).unwrap();
        assert!(ledger.resumed());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn events_report_progress_and_retries() {
        let temp_dir = TempDir::new().unwrap();
        let source = MemorySource::default().with_items("album", &["/ok", "/bad"]);
        let job = BackupJob::with_components(
            test_config(temp_dir.path()),
            Arc::new(source),
            Arc::new(CountingResolver::default()),
            Arc::new(MemoryFetcher::failing_on("/bad")),
        );
        let mut events = job.subscribe();

        let _ = job.run(&albums(&["album"])).await;

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event {
                Event::AlbumListed { items, .. } => format!("listed:{items}"),
                Event::ItemFetched { fetched, total, .. } => format!("fetched:{fetched}/{total}"),
                Event::ItemRetrying { attempt, .. } => format!("retry:{attempt}"),
                Event::JobAborted { code, .. } => format!("aborted:{code}"),
                other => format!("{other:?}"),
            });
        }
        assert_eq!(
            kinds,
            vec![
                "listed:2",
                "fetched:1/2",
                "retry:1",
                "retry:2",
                "retry:3",
                "aborted:retry_exhausted"
            ]
        );
    }

    #[tokio::test]
    async fn ledger_state_returns_to_absent_after_success() {
        let temp_dir = TempDir::new().unwrap();
        write_ledger(temp_dir.path(), &[]);
        let job = BackupJob::with_components(
            test_config(temp_dir.path()),
            Arc::new(MemorySource::default().with_album("album", 1)),
            Arc::new(CountingResolver::default()),
            Arc::new(MemoryFetcher::default()),
        );

        job.run(&albums(&["album"])).await.unwrap();

        let ledger = ProgressLedger::load(temp_dir.path().join("progress.json")).unwrap();
        assert!(!ledger.resumed());
        assert_ne!(ledger.state(), LedgerState::Persisted);
    }

    #[tokio::test]
    async fn traversal_reference_stays_inside_album_folder() {
        let temp_dir = TempDir::new().unwrap();
        let output_dir = temp_dir.path().join("out");
        let source = MemorySource::default().with_items("album", &["/../../escaped"]);
        let job = BackupJob::with_components(
            test_config(&output_dir),
            Arc::new(source),
            Arc::new(CountingResolver::default()),
            Arc::new(MemoryFetcher::default()),
        );

        job.run(&albums(&["album"])).await.unwrap();

        assert!(!temp_dir.path().join("escaped.jpg").exists());
        assert!(output_dir.join("album").join("escaped.jpg").exists());
    }

    #[tokio::test]
    async fn reference_without_file_name_aborts_without_retry() {
        let temp_dir = TempDir::new().unwrap();
        let source = MemorySource::default().with_items("album", &["/.."]);
        let resolver = Arc::new(CountingResolver::default());
        let fetcher = Arc::new(MemoryFetcher::default());
        let job = BackupJob::with_components(
            test_config(temp_dir.path()),
            Arc::new(source),
            resolver.clone(),
            fetcher.clone(),
        );

        let err = job.run(&albums(&["album"])).await.unwrap_err();

        assert_eq!(err.error_code(), "unsafe_reference");
        assert_eq!(resolver.calls_for("/.."), 1);
        assert!(fetcher.fetched().is_empty());
        assert!(temp_dir.path().join("progress.json").exists());
    }

    #[test]
    fn item_delay_stays_within_jitter_bounds() {
        let base = Duration::from_millis(500);
        let jitter = Duration::from_millis(500);
        for _ in 0..100 {
            let delay = item_delay(base, jitter);
            assert!(delay >= base && delay <= base + jitter, "{delay:?}");
        }
        assert_eq!(item_delay(base, Duration::ZERO), base);
    }
}
