//! Shared HTTP client for all pipeline stages

use reqwest::header::{CONNECTION, HeaderMap, HeaderValue};

use crate::config::HttpConfig;
use crate::error::{Error, Result};

/// Build the HTTP client used for listing, resolving and fetching
///
/// The client keeps a cookie jar across requests (the remote hands out session
/// cookies on the album page), accepts gzip bodies, closes connections after every
/// request and applies the configured per-request timeout.
pub fn build_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONNECTION, HeaderValue::from_static("close"));

    reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .cookie_store(true)
        .gzip(true)
        .build()
        .map_err(|e| Error::config(format!("failed to create HTTP client: {e}"), "http"))
}
