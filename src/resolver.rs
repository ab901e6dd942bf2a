//! Resolving item references to direct locators
//!
//! An item's detail page embeds its album metadata in a script line of the form
//!
//! ```text
//! ajax.preload('al_photos.php', {"photo":"1_3",...}, [.., .., .., [{"id":"1_3","x_src":...}]]);
//! ```
//!
//! The second argument names the item, the fourth element of the third argument lists
//! self-describing item records. The direct locator is taken from the record's best
//! available size field.

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::REFERER;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::error::{ResolveError, Result};
use crate::types::{Album, DirectLocator, ItemReference};

/// Locator fields in descending quality order
pub const LOCATOR_PREFERENCE: [&str; 6] = ["y_src", "x_src", "r_src", "q_src", "p_src", "o_src"];

/// Index of the item record list inside the album metadata array
const RECORDS_INDEX: usize = 3;

/// Resolves an item reference to a fresh direct locator
#[async_trait]
pub trait ItemResolver: Send + Sync {
    /// Resolve `reference`, a member of `album`
    async fn resolve(&self, reference: &ItemReference, album: &Album) -> Result<DirectLocator>;
}

/// [`ItemResolver`] that reads the item's detail page over HTTP
#[derive(Clone)]
pub struct WebItemResolver {
    client: reqwest::Client,
}

impl WebItemResolver {
    /// Create a resolver sharing the given client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ItemResolver for WebItemResolver {
    async fn resolve(&self, reference: &ItemReference, album: &Album) -> Result<DirectLocator> {
        let page_url = album.item_url(reference)?;

        let response = self
            .client
            .get(page_url.clone())
            .header(REFERER, album.uri().as_str())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ResolveError::Status {
                reference: reference.clone(),
                status: response.status().as_u16(),
            }
            .into());
        }

        let body = response.text().await?;
        let locator = parse_detail_page(reference, &body)?;

        // Relative locators are relative to the detail page
        let absolute = page_url
            .join(locator.as_str())
            .map(|u| DirectLocator::new(u.to_string()))
            .unwrap_or(locator);

        tracing::debug!(reference = %reference, locator = %absolute, "Item resolved");
        Ok(absolute)
    }
}

/// Extract the direct locator for `reference` from a detail page body
pub fn parse_detail_page(
    reference: &ItemReference,
    body: &str,
) -> std::result::Result<DirectLocator, ResolveError> {
    let captures = preload_regex()
        .captures(body)
        .ok_or_else(|| ResolveError::MissingMetadata {
            reference: reference.clone(),
        })?;

    let invalid = |reason: String| ResolveError::InvalidMetadata {
        reference: reference.clone(),
        reason,
    };

    let action: Value = serde_json::from_str(&captures[1])
        .map_err(|e| invalid(format!("action block: {e}")))?;
    let album: Value = serde_json::from_str(&captures[2])
        .map_err(|e| invalid(format!("album block: {e}")))?;

    let item_id = action
        .get("photo")
        .and_then(id_string)
        .ok_or_else(|| invalid("action block has no item id".to_string()))?;

    let records = album
        .get(RECORDS_INDEX)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("album block has no item records".to_string()))?;

    let record = records
        .iter()
        .filter_map(Value::as_object)
        .find(|record| record.get("id").and_then(id_string).as_deref() == Some(item_id.as_str()))
        .ok_or_else(|| ResolveError::ItemNotFound {
            reference: reference.clone(),
            id: item_id.clone(),
        })?;

    select_locator(record)
        .map(DirectLocator::new)
        .ok_or_else(|| ResolveError::NoLocator {
            reference: reference.clone(),
        })
}

/// Pick the highest-quality locator present in an item record
///
/// Fields are tried in [`LOCATOR_PREFERENCE`] order, so the result does not depend
/// on the order of fields in the record. Empty or non-string values count as absent.
pub fn select_locator(record: &Map<String, Value>) -> Option<&str> {
    LOCATOR_PREFERENCE.iter().find_map(|field| {
        record
            .get(*field)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    })
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// pattern is a constant; failing to compile it is a programming error
#[allow(clippy::expect_used)]
fn preload_regex() -> &'static Regex {
    static PRELOAD: OnceLock<Regex> = OnceLock::new();
    PRELOAD.get_or_init(|| {
        Regex::new(r"(?m)^ajax\.preload\('al_photos\.php', (\{[^}]*\}), (\[.*\])\);\s*$")
            .expect("valid preload regex")
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::error::Error;
    use crate::http::build_client;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn detail_page(action: &str, album: &str) -> String {
        format!(
            "<html><script>\nvar cur = {{}};\najax.preload('al_photos.php', {action}, {album});\n</script></html>"
        )
    }

    #[test]
    fn preference_picks_r_src_over_p_src() {
        let rec = record(json!({"id": "1_1", "p_src": "b.jpg", "r_src": "a.jpg"}));
        assert_eq!(select_locator(&rec), Some("a.jpg"));
    }

    #[test]
    fn preference_is_independent_of_field_order() {
        let fields = [
            ("o_src", "o.jpg"),
            ("q_src", "q.jpg"),
            ("x_src", "x.jpg"),
            ("p_src", "p.jpg"),
        ];

        let mut forward = Map::new();
        for (k, v) in fields {
            forward.insert(k.to_string(), json!(v));
        }
        let mut backward = Map::new();
        for (k, v) in fields.iter().rev() {
            backward.insert(k.to_string(), json!(v));
        }

        assert_eq!(select_locator(&forward), Some("x.jpg"));
        assert_eq!(select_locator(&backward), Some("x.jpg"));
    }

    #[test]
    fn preference_falls_through_to_lowest_quality() {
        let rec = record(json!({"id": "1", "o_src": "small.jpg", "w_src": "unknown.jpg"}));
        assert_eq!(select_locator(&rec), Some("small.jpg"));
    }

    #[test]
    fn empty_and_non_string_fields_are_skipped() {
        let rec = record(json!({"y_src": "", "x_src": null, "r_src": 5, "q_src": "q.jpg"}));
        assert_eq!(select_locator(&rec), Some("q.jpg"));

        let rec = record(json!({"id": "1", "src": "plain.jpg"}));
        assert_eq!(select_locator(&rec), None);
    }

    #[test]
    fn detail_page_finds_matching_record() {
        let body = detail_page(
            r#"{"photo":"1_3","list":"album1_2"}"#,
            r#"["album1_2", 3, 0, [{"id":"1_2","y_src":"other.jpg"},{"id":"1_3","p_src":"b.jpg","r_src":"a.jpg"}]]"#,
        );
        let reference = ItemReference::new("/photo1_3");

        let locator = parse_detail_page(&reference, &body).unwrap();
        assert_eq!(locator.as_str(), "a.jpg");
    }

    #[test]
    fn numeric_ids_match_string_ids() {
        let body = detail_page(r#"{"photo":42}"#, r#"[0, 0, 0, [{"id":"42","o_src":"o.png"}]]"#);
        let locator = parse_detail_page(&ItemReference::new("/photo42"), &body).unwrap();
        assert_eq!(locator.as_str(), "o.png");
    }

    #[test]
    fn page_without_metadata_is_missing_metadata() {
        let err = parse_detail_page(&ItemReference::new("/photo1"), "<html></html>").unwrap_err();
        assert!(matches!(err, ResolveError::MissingMetadata { .. }));
    }

    #[test]
    fn unknown_item_id_is_item_not_found() {
        let body = detail_page(r#"{"photo":"9_9"}"#, r#"[0, 0, 0, [{"id":"1_1","x_src":"x.jpg"}]]"#);
        let err = parse_detail_page(&ItemReference::new("/photo9_9"), &body).unwrap_err();
        match err {
            ResolveError::ItemNotFound { id, .. } => assert_eq!(id, "9_9"),
            other => panic!("expected ItemNotFound, got {other:?}"),
        }
    }

    #[test]
    fn record_without_locator_fields_is_no_locator() {
        let body = detail_page(r#"{"photo":"1_1"}"#, r#"[0, 0, 0, [{"id":"1_1"}]]"#);
        let err = parse_detail_page(&ItemReference::new("/photo1_1"), &body).unwrap_err();
        assert!(matches!(err, ResolveError::NoLocator { .. }));
    }

    #[test]
    fn album_block_without_records_is_invalid() {
        let body = detail_page(r#"{"photo":"1_1"}"#, r#"[0, 0]"#);
        let err = parse_detail_page(&ItemReference::new("/photo1_1"), &body).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidMetadata { .. }));
    }

    #[tokio::test]
    async fn web_resolver_fetches_detail_page_with_album_referer() {
        let mock_server = MockServer::start().await;
        let album = Album::parse(&format!("{}/album1_2", mock_server.uri())).unwrap();

        Mock::given(method("GET"))
            .and(path("/photo1_3"))
            .and(header("referer", album.uri().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(
                r#"{"photo":"1_3"}"#,
                r#"[0, 0, 0, [{"id":"1_3","x_src":"/img/x.jpg"}]]"#,
            )))
            .expect(1)
            .mount(&mock_server)
            .await;

        let resolver = WebItemResolver::new(build_client(&HttpConfig::default()).unwrap());
        let locator = resolver
            .resolve(&ItemReference::new("/photo1_3"), &album)
            .await
            .unwrap();

        assert_eq!(locator.as_str(), format!("{}/img/x.jpg", mock_server.uri()));
    }

    #[tokio::test]
    async fn web_resolver_maps_http_error_to_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let album = Album::parse(&format!("{}/album1_2", mock_server.uri())).unwrap();
        let resolver = WebItemResolver::new(build_client(&HttpConfig::default()).unwrap());
        let err = resolver
            .resolve(&ItemReference::new("/photo1_3"), &album)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Resolve(ResolveError::Status { status: 404, .. })));
    }
}
