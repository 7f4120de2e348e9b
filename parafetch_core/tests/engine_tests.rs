use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parafetch_core::{Engine, EngineObserver, EngineOptions};

#[derive(Default)]
struct RecordingObserver {
    id: Mutex<Option<String>>,
    status: Mutex<Vec<String>>,
    finished: Mutex<Option<(bool, String)>>,
    paused: Mutex<bool>,
}

#[async_trait::async_trait]
impl EngineObserver for RecordingObserver {
    async fn on_id_assigned(&self, id: &str) {
        *self.id.lock().await = Some(id.to_string());
    }

    async fn on_status_changed(&self, text: &str) {
        self.status.lock().await.push(text.to_string());
    }

    async fn on_paused(&self) {
        *self.paused.lock().await = true;
    }

    async fn on_finished(&self, success: bool, message: &str) {
        *self.finished.lock().await = Some((success, message.to_string()));
    }
}

#[tokio::test]
async fn happy_path_single_segment() {
    let server = MockServer::start().await;
    let body = b"HELLO WORLD";

    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", body.len().to_string())
                .insert_header("accept-ranges", "bytes")
                .insert_header("content-disposition", "attachment; filename=\"x\""),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(header("Range", format!("bytes=0-{}", body.len() - 1)))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body.to_vec()))
        .mount(&server)
        .await;

    let out_dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let engine = Engine::start(
        format!("{}/x", server.uri()),
        out_dir.path().to_path_buf(),
        observer.clone(),
        EngineOptions::default(),
    )
    .await;
    engine.join().await;

    let finished = observer.finished.lock().await.clone().unwrap();
    assert_eq!(finished, (true, "Completed".to_string()));
    assert_eq!(tokio::fs::read(out_dir.path().join("x")).await.unwrap(), body);
}

#[tokio::test]
async fn range_unsupported_sends_no_range_header() {
    let server = MockServer::start().await;
    let body = b"no ranges here";

    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", body.len().to_string())
                .insert_header("accept-ranges", "none")
                .insert_header("content-disposition", "attachment; filename=\"y\""),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(&server)
        .await;

    let out_dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let engine = Engine::start(
        format!("{}/y", server.uri()),
        out_dir.path().to_path_buf(),
        observer.clone(),
        EngineOptions::default(),
    )
    .await;
    engine.join().await;

    let finished = observer.finished.lock().await.clone().unwrap();
    assert_eq!(finished, (true, "Completed".to_string()));
    assert_eq!(tokio::fs::read(out_dir.path().join("y")).await.unwrap(), body);
}

#[tokio::test]
async fn zero_length_probe_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-length", "0"))
        .mount(&server)
        .await;

    let out_dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let engine = Engine::start(
        format!("{}/z", server.uri()),
        out_dir.path().to_path_buf(),
        observer.clone(),
        EngineOptions::default(),
    )
    .await;
    engine.join().await;

    let finished = observer.finished.lock().await.clone().unwrap();
    assert!(!finished.0);
    assert_eq!(finished.1, "Could not connect to server.");
}

#[tokio::test]
async fn cancel_mid_pump_leaves_no_residue() {
    let server = MockServer::start().await;
    let body = vec![0u8; 64 * 1024];

    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", body.len().to_string())
                .insert_header("accept-ranges", "bytes")
                .insert_header("content-disposition", "attachment; filename=\"c\""),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(body.clone())
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let out_dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let engine = Engine::start(
        format!("{}/c", server.uri()),
        out_dir.path().to_path_buf(),
        observer.clone(),
        EngineOptions::default(),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.cancel().await;
    engine.join().await;

    let finished = observer.finished.lock().await.clone().unwrap();
    assert_eq!(finished, (false, "Cancelled".to_string()));
    assert!(!out_dir.path().join("c").exists());
}

#[tokio::test]
async fn pause_announces_status_then_can_be_cancelled_by_id() {
    let server = MockServer::start().await;
    let body = vec![0u8; 64 * 1024];

    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", body.len().to_string())
                .insert_header("accept-ranges", "bytes")
                .insert_header("content-disposition", "attachment; filename=\"p\""),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(body.clone())
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let out_dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let engine = Engine::start(
        format!("{}/p", server.uri()),
        out_dir.path().to_path_buf(),
        observer.clone(),
        EngineOptions::default(),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    let id = engine.id().to_string();
    engine.pause().await;
    engine.join().await;

    assert!(*observer.paused.lock().await);
    assert!(observer.status.lock().await.iter().any(|s| s == "Paused"));

    // Suspended, with no live Engine attached: cancel it directly by id.
    Engine::cancel_suspended(&id).await.unwrap();
}
