//! Album listing with offset-based pagination
//!
//! [`AlbumLister`] owns the pagination algorithm and talks to the remote through an
//! [`AlbumSource`]. The first page announces the album's declared item count; follow-up
//! pages are requested at `offset = items so far` until that count is reached.

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::REFERER;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::error::{ListingError, Result};
use crate::types::{Album, ItemReference};

/// Maximum number of follow-up pages per album
pub const MAX_PAGES: usize = 10_000;

/// Index of the HTML fragment inside a `<!>`-delimited follow-up payload
const PAYLOAD_FRAGMENT_INDEX: usize = 6;

/// Separator of follow-up payload segments
const PAYLOAD_SEPARATOR: &str = "<!>";

/// Item links inside a listing page or fragment
const ROW_LINK_SELECTOR: &str = "div.photo_row a";

/// Element holding the declared item count
const SUMMARY_SELECTOR: &str = "div.summary";

/// First listing page of an album
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Item count the album claims to have
    pub declared_total: usize,
    /// Item references visible on the first page
    pub items: Vec<ItemReference>,
}

/// Remote listing endpoint of an album
#[async_trait]
pub trait AlbumSource: Send + Sync {
    /// Fetch the first listing page
    async fn first_page(&self, album: &Album) -> Result<ListingPage>;

    /// Fetch the follow-up page starting at `offset`
    async fn page_at(&self, album: &Album, offset: usize) -> Result<Vec<ItemReference>>;
}

/// Produces the complete, ordered list of an album's item references
pub struct AlbumLister {
    source: Arc<dyn AlbumSource>,
    page_delay: Duration,
}

impl AlbumLister {
    /// Create a lister over `source`, pausing `page_delay` before each follow-up request
    pub fn new(source: Arc<dyn AlbumSource>, page_delay: Duration) -> Self {
        Self { source, page_delay }
    }

    /// List every item of `album` in discovery order
    ///
    /// Duplicate references are dropped. Fails if any page fails: there is no partial
    /// listing of an album.
    pub async fn list(&self, album: &Album) -> Result<Vec<ItemReference>> {
        let first = self.source.first_page(album).await?;
        let declared = first.declared_total;

        // declared total is remote input; grow with what is actually delivered
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        add_distinct(&mut items, &mut seen, first.items);

        tracing::debug!(
            album = %album,
            declared,
            first_page = items.len(),
            "Album first page loaded"
        );

        let mut pages = 0;
        while items.len() < declared {
            if pages >= MAX_PAGES {
                return Err(ListingError::TooManyPages {
                    album: album.to_string(),
                    max_pages: MAX_PAGES,
                }
                .into());
            }

            tokio::time::sleep(self.page_delay).await;

            let offset = items.len();
            let page = self.source.page_at(album, offset).await?;
            pages += 1;

            let added = add_distinct(&mut items, &mut seen, page);
            tracing::debug!(album = %album, offset, added, total = items.len(), "Album page loaded");

            if added == 0 {
                return Err(ListingError::Stalled {
                    album: album.to_string(),
                    offset,
                    declared,
                }
                .into());
            }
        }

        if items.len() > declared {
            tracing::debug!(
                album = %album,
                declared,
                delivered = items.len(),
                "Album delivered more items than declared, truncating"
            );
            items.truncate(declared);
        }

        Ok(items)
    }
}

fn add_distinct(
    items: &mut Vec<ItemReference>,
    seen: &mut HashSet<ItemReference>,
    page: Vec<ItemReference>,
) -> usize {
    let before = items.len();
    for reference in page {
        if seen.insert(reference.clone()) {
            items.push(reference);
        }
    }
    items.len() - before
}

/// [`AlbumSource`] reading the album's HTML listing over HTTP
#[derive(Clone)]
pub struct WebAlbumSource {
    client: reqwest::Client,
}

impl WebAlbumSource {
    /// Create a source sharing the given client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn checked_text(&self, album: &Album, request: reqwest::RequestBuilder) -> Result<String> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ListingError::Status {
                album: album.to_string(),
                status: response.status().as_u16(),
            }
            .into());
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl AlbumSource for WebAlbumSource {
    async fn first_page(&self, album: &Album) -> Result<ListingPage> {
        let body = self
            .checked_text(album, self.client.get(album.uri().clone()))
            .await?;
        Ok(parse_first_page(album, &body)?)
    }

    async fn page_at(&self, album: &Album, offset: usize) -> Result<Vec<ItemReference>> {
        let offset_value = offset.to_string();
        let form = [("al", "1"), ("part", "1"), ("offset", offset_value.as_str())];
        let request = self
            .client
            .post(album.uri().clone())
            .header(REFERER, album.uri().as_str())
            .form(&form);

        let body = self.checked_text(album, request).await?;
        Ok(parse_follow_up_page(album, &body)?)
    }
}

/// Parse the album's first listing page
///
/// The declared count is the digits of the summary's own text (child elements are
/// ignored). When the album is larger than the visible rows, a `var preload = [..];`
/// script line carries the next rows as an HTML string at index 1.
pub fn parse_first_page(
    album: &Album,
    body: &str,
) -> std::result::Result<ListingPage, ListingError> {
    let document = Html::parse_document(body);

    let declared_total = document
        .select(&selector(SUMMARY_SELECTOR))
        .next()
        .and_then(|summary| parse_count(&own_text(summary)))
        .ok_or_else(|| ListingError::Parse {
            album: album.to_string(),
            reason: "missing item count".to_string(),
        })?;

    let mut items = row_links(&document);

    if declared_total > items.len()
        && let Some(fragment) = preload_fragment(body)
    {
        items.extend(row_links(&Html::parse_fragment(&fragment)));
    }

    Ok(ListingPage {
        declared_total,
        items,
    })
}

/// Parse a `<!>`-delimited follow-up page payload
pub fn parse_follow_up_page(
    album: &Album,
    body: &str,
) -> std::result::Result<Vec<ItemReference>, ListingError> {
    let fragment = body
        .split(PAYLOAD_SEPARATOR)
        .nth(PAYLOAD_FRAGMENT_INDEX)
        .ok_or_else(|| ListingError::Parse {
            album: album.to_string(),
            reason: format!("follow-up payload has no segment {PAYLOAD_FRAGMENT_INDEX}"),
        })?;
    Ok(row_links(&Html::parse_fragment(fragment)))
}

fn row_links(html: &Html) -> Vec<ItemReference> {
    html.select(&selector(ROW_LINK_SELECTOR))
        .filter_map(|a| a.value().attr("href"))
        .map(ItemReference::new)
        .collect()
}

fn own_text(element: ElementRef<'_>) -> String {
    element
        .children()
        .filter_map(|node| node.value().as_text())
        .map(|text| &**text)
        .collect()
}

fn parse_count(text: &str) -> Option<usize> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn preload_fragment(body: &str) -> Option<String> {
    let captures = preload_regex().captures(body)?;
    let preload: serde_json::Value = serde_json::from_str(&captures[1]).ok()?;
    preload.get(1)?.as_str().map(str::to_string)
}

// selectors are constants; failing to parse one is a programming error
#[allow(clippy::expect_used)]
fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("valid CSS selector")
}

// pattern is a constant; failing to compile it is a programming error
#[allow(clippy::expect_used)]
fn preload_regex() -> &'static Regex {
    static PRELOAD: OnceLock<Regex> = OnceLock::new();
    PRELOAD.get_or_init(|| Regex::new(r"(?m)^var preload = (.*);\s*$").expect("valid preload regex"))
}
