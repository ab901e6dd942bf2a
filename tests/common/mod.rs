//! Common test utilities for album-backup end-to-end tests
//!
//! A fake album site is mounted on a wiremock server:
//! - `GET /<album>` serves the first listing page
//! - `POST /<album>` serves `<!>`-delimited follow-up pages
//! - `GET /photo<id>` serves a detail page whose metadata points at `/img/<id>.jpg`
//! - `GET /img/<id>.jpg` serves the item bytes

#![allow(dead_code)]

use album_backup::{Config, PolitenessConfig, RetryConfig};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Items shown on the first listing page
pub const FIRST_PAGE_SIZE: usize = 2;

/// Config writing into `output_dir` without politeness pauses and with fast retries
pub fn test_config(output_dir: &Path) -> Config {
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

/// Item ids of an album, e.g. `1_1`, `1_2`, ..
pub fn item_ids(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("1_{i}")).collect()
}

/// Bytes served for an item
pub fn item_bytes(id: &str) -> Vec<u8> {
    format!("jpeg:{id}").into_bytes()
}

fn row_links(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!(r#"<div class="photo_row"><a href="/photo{id}"></a></div>"#))
        .collect()
}

/// First listing page declaring `ids.len()` items and showing the first few
pub fn first_page(ids: &[String]) -> String {
    let visible = &ids[..ids.len().min(FIRST_PAGE_SIZE)];
    format!(
        "<html><body><div class=\"summary\">{} photos <span>in album</span></div>{}</body></html>",
        ids.len(),
        row_links(visible)
    )
}

/// Follow-up payload carrying `ids` in segment 6
pub fn follow_up_page(ids: &[String]) -> String {
    format!("0<!>1<!>2<!>3<!>4<!>5<!>{}<!>7", row_links(ids))
}

/// Detail page for `id` pointing at `/img/<id>.jpg`
pub fn detail_page(id: &str) -> String {
    format!(
        "<html><script>\najax.preload('al_photos.php', {{\"photo\":\"{id}\"}}, [\"album\", 1, 0, [{{\"id\":\"{id}\",\"p_src\":\"/img/small.jpg\",\"x_src\":\"/img/{id}.jpg\"}}]]);\n</script></html>"
    )
}

/// Mount the listing of `album` with the given item ids
///
/// Items past the first page are served as one follow-up page at that offset.
pub async fn mount_album(server: &MockServer, album: &str, ids: &[String]) {
    Mock::given(method("GET"))
        .and(path(format!("/{album}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(first_page(ids)))
        .mount(server)
        .await;

    if ids.len() > FIRST_PAGE_SIZE {
        Mock::given(method("POST"))
            .and(path(format!("/{album}")))
            .and(body_string_contains(format!("offset={FIRST_PAGE_SIZE}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(follow_up_page(&ids[FIRST_PAGE_SIZE..])),
            )
            .mount(server)
            .await;
    }
}

/// Mount the detail page and image for one item, expecting `expected_fetches` image requests
pub async fn mount_item(server: &MockServer, id: &str, expected_fetches: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/photo{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(id)))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/img/{id}.jpg")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(item_bytes(id)))
        .expect(expected_fetches)
        .mount(server)
        .await;
}

/// Mount an item whose image always answers with `status`
pub async fn mount_broken_item(server: &MockServer, id: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/photo{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(id)))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/img/{id}.jpg")))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
