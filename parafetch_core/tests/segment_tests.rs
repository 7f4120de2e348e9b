use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parafetch_core::segment::download_segment;
use parafetch_core::types::{DownloadError, HeaderData, Segment, SegmentState};

fn header_data(url: &str) -> Arc<HeaderData> {
    Arc::new(HeaderData {
        url: url.to_string(),
        headers: Default::default(),
    })
}

#[tokio::test]
async fn downloads_full_body_when_ranges_unsupported() {
    let server = MockServer::start().await;
    let body = vec![0xABu8; 1024];

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let client = Client::new();
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("part1");
    let segment = Segment::new(1, 0, 1023, path.clone());

    let progress = Arc::new(AtomicU64::new(0));
    let progress_clone = progress.clone();

    let result = download_segment(
        segment,
        &client,
        &header_data(&server.uri()),
        false,
        CancellationToken::new(),
        Arc::new(AtomicU64::new(0)),
        move |n| {
            progress_clone.fetch_add(n, Ordering::Relaxed);
        },
    )
    .await
    .unwrap();

    assert_eq!(result.state, SegmentState::Finished);
    assert_eq!(result.downloaded, 1024);
    assert_eq!(progress.load(Ordering::Relaxed), 1024);
    assert_eq!(std::fs::read(&path).unwrap(), body);
}

#[tokio::test]
async fn sends_range_header_and_caps_to_segment_size() {
    let server = MockServer::start().await;
    let body = vec![0xCDu8; 512];

    Mock::given(method("GET"))
        .and(header("Range", "bytes=1024-1535"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let client = Client::new();
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("part2");
    let segment = Segment::new(2, 1024, 1535, path.clone());

    let result = download_segment(
        segment,
        &client,
        &header_data(&server.uri()),
        true,
        CancellationToken::new(),
        Arc::new(AtomicU64::new(0)),
        |_| {},
    )
    .await
    .unwrap();

    assert_eq!(result.state, SegmentState::Finished);
    assert_eq!(result.downloaded, 512);
    assert_eq!(std::fs::read(&path).unwrap(), body);
}

#[tokio::test]
async fn cancellation_before_send_returns_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 1024])
                .set_delay(std::time::Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let client = Client::new();
    let temp_dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(1, 0, 1023, temp_dir.path().join("part1"));
    let cancel_token = CancellationToken::new();
    cancel_token.cancel();

    let result = download_segment(
        segment,
        &client,
        &header_data(&server.uri()),
        false,
        cancel_token,
        Arc::new(AtomicU64::new(0)),
        |_| {},
    )
    .await;

    assert!(matches!(result, Err(DownloadError::Cancelled)));
}

#[tokio::test]
async fn unreachable_origin_retries_then_fails() {
    let client = Client::new();
    let temp_dir = tempfile::tempdir().unwrap();
    let segment = Segment::new(1, 0, 1023, temp_dir.path().join("part1"));

    let result = download_segment(
        segment,
        &client,
        &header_data("http://127.0.0.1:1"),
        false,
        CancellationToken::new(),
        Arc::new(AtomicU64::new(0)),
        |_| {},
    )
    .await;

    assert!(matches!(result, Err(DownloadError::MaxRetryExceeded)));
}

#[tokio::test]
async fn resume_appends_instead_of_truncating() {
    let server = MockServer::start().await;
    let body = vec![0xEFu8; 512];

    Mock::given(method("GET"))
        .and(header("Range", "bytes=512-1023"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let client = Client::new();
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("part1");
    std::fs::write(&path, vec![0x11u8; 512]).unwrap();

    let mut segment = Segment::new(1, 0, 1023, path.clone());
    segment.downloaded = 512;

    let result = download_segment(
        segment,
        &client,
        &header_data(&server.uri()),
        true,
        CancellationToken::new(),
        Arc::new(AtomicU64::new(0)),
        |_| {},
    )
    .await
    .unwrap();

    assert_eq!(result.downloaded, 1024);
    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(on_disk.len(), 1024);
    assert_eq!(&on_disk[512..], &body[..]);
}
