//! Configuration types for album-backup

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::Album;

/// Name of the ledger file inside the output directory
pub const LEDGER_FILE_NAME: &str = "progress.json";

/// Main configuration for a backup job
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// File with one album URI per line (default: "./albums.txt")
    #[serde(default = "default_albums_file")]
    pub albums_file: PathBuf,

    /// Output root; one folder per album plus the ledger (default: "./out")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// When true, an album whose listing fails is skipped instead of aborting the job
    #[serde(default)]
    pub skip_unavailable_albums: bool,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Politeness delays between remote requests
    #[serde(default)]
    pub politeness: PolitenessConfig,

    /// Per-item retry behaviour
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            albums_file: default_albums_file(),
            output_dir: default_output_dir(),
            skip_unavailable_albums: false,
            http: HttpConfig::default(),
            politeness: PolitenessConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                format!("failed to read config file '{}': {}", path.display(), e),
                "config",
            )
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::config(
                format!("failed to parse config file '{}': {}", path.display(), e),
                "config",
            )
        })
    }

    /// Path of the durable progress ledger
    pub fn ledger_path(&self) -> PathBuf {
        self.output_dir.join(LEDGER_FILE_NAME)
    }

    /// Folder that receives an album's files
    pub fn album_dir(&self, album: &Album) -> PathBuf {
        self.output_dir.join(album.name())
    }
}

/// HTTP client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Fixed pauses between remote requests to avoid rate limiting
///
/// These have no correctness role; tests set them to zero.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolitenessConfig {
    /// Pause between listing requests and between albums (default: 500ms)
    #[serde(default = "default_page_delay", with = "millis_serde")]
    pub page_delay: Duration,

    /// Base pause after each fetched item (default: 500ms)
    #[serde(default = "default_item_delay", with = "millis_serde")]
    pub item_delay: Duration,

    /// Upper bound of the random extra pause added to `item_delay` (default: 500ms)
    #[serde(default = "default_item_jitter", with = "millis_serde")]
    pub item_jitter: Duration,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            page_delay: default_page_delay(),
            item_delay: default_item_delay(),
            item_jitter: default_item_jitter(),
        }
    }
}

impl PolitenessConfig {
    /// No delays at all
    pub fn none() -> Self {
        Self {
            page_delay: Duration::ZERO,
            item_delay: Duration::ZERO,
            item_jitter: Duration::ZERO,
        }
    }
}

/// Retry configuration for one item's resolve+fetch sequence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay before first retry (default: 500ms)
    #[serde(default = "default_initial_delay", with = "millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Parse a newline-delimited album list
///
/// Lines are trimmed and blank lines are ignored. Every remaining line must be an
/// absolute album URI.
pub fn parse_album_list(content: &str) -> Result<Vec<Album>> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Album::parse)
        .collect()
}

/// Read and parse the album list file
pub fn read_album_list(path: &Path) -> Result<Vec<Album>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(
            format!("failed to read album list '{}': {}", path.display(), e),
            "albums_file",
        )
    })?;
    parse_album_list(&content)
}

fn default_albums_file() -> PathBuf {
    PathBuf::from("./albums.txt")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./out")
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; YandexImages/3.0; +http://yandex.com/bots)".to_string()
}

fn default_page_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_item_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_item_jitter() -> Duration {
    Duration::from_millis(500)
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
