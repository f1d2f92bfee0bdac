// ============================================================================
// DICOM Handler Tests
// ============================================================================

use std::{sync::Arc, time::Duration};

use axum::{http::StatusCode, response::IntoResponse};
use dicom_stream::{
    synth::DicomBuilder,
    tag::{self, Tag},
    Vr,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::StoredResponse;
use crate::{
    api,
    handler::AppState,
    media::types::{PipeConfig, PipelineError, PipelineOutcome},
    proxy::TrustedProxies,
    storage::Storage,
};

const PATIENT_NAME: Tag = Tag::new(0x0010, 0x0010);

struct TestServer {
    base: String,
    client: reqwest::Client,
    cancel: CancellationToken,
    _dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let state = AppState {
            storage: Storage::open_root(dir.path()).unwrap(),
            pipe: PipeConfig::default(),
            image_timeout: Duration::from_secs(10),
            trusted_proxies: Arc::new(TrustedProxies::loopback()),
            cancel: cancel.clone(),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(api::serve(listener, state));

        Self {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            cancel,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn put(&self, id: &str, bytes: Vec<u8>) -> reqwest::Response {
        self.client
            .put(self.url(&format!("/{}", id)))
            .body(bytes)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn study() -> Vec<u8> {
    DicomBuilder::explicit_le()
        .string(PATIENT_NAME, Vr::PN, "Doe^Jane")
        .sequence(
            Tag::new(0x0008, 0x1140),
            &[vec![(Tag::new(0x0008, 0x1155), Vr::UI, "1.2.3.4.5")]],
        )
        .grayscale_frames(4, 4, &[vec![10u8; 16], vec![20u8; 16], vec![30u8; 16]])
        .build()
}

// ------------------------------------------------------------------------
// Storage routes
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_put_then_get() {
    let server = TestServer::start().await;
    let bytes = study();

    let response = server.put("study-1", bytes.clone()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let stored: StoredResponse = response.json().await.unwrap();
    assert_eq!(stored.id, "study-1");
    assert_eq!(stored.size, bytes.len() as u64);

    let response = server.get("/study-1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), bytes.as_slice());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_missing() {
    let server = TestServer::start().await;
    let response = server.get("/nothing-here").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("nothing-here"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_id() {
    let server = TestServer::start().await;
    let response = server.get("/..%2Fsecret").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ------------------------------------------------------------------------
// Tag lookup
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_tag_by_keyword() {
    let server = TestServer::start().await;
    server.put("study", study()).await;

    let response = server.get("/study/tag?name=PatientName").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["tag"], "(0010,0010)");
    assert_eq!(body["vr"], "PN");
    assert_eq!(body["value"][0], "Doe^Jane");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tag_nested_by_hex() {
    let server = TestServer::start().await;
    server.put("study", study()).await;

    let response = server.get("/study/tag?name=00081155").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["value"][0], "1.2.3.4.5");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tag_pixel_data_is_summarized() {
    let server = TestServer::start().await;
    server.put("study", study()).await;

    let response = server.get("/study/tag?name=PixelData").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["tag"], tag::PIXEL_DATA.to_string());
    assert_eq!(body["value"]["frames"], 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tag_errors() {
    let server = TestServer::start().await;
    server.put("study", study()).await;

    let unknown = server.get("/study/tag?name=NoSuchThing").await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let absent = server.get("/study/tag?name=StudyDate").await;
    assert_eq!(absent.status(), StatusCode::NOT_FOUND);

    let missing = server.get("/other/tag?name=PatientName").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

// ------------------------------------------------------------------------
// First image
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_image_png() {
    let server = TestServer::start().await;
    server.put("study", study()).await;

    let response = server.get("/study/image").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    let length: usize = response.headers()["content-length"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let bytes = response.bytes().await.unwrap();
    assert_eq!(bytes.len(), length);
    let decoded = image::load_from_memory(&bytes).unwrap().to_luma8();
    assert_eq!(decoded.dimensions(), (4, 4));
    assert!(decoded.pixels().all(|p| p.0[0] == 10));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_image_jpeg() {
    let server = TestServer::start().await;
    server.put("study", study()).await;

    let response = server.get("/study/image?format=jpeg").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/jpeg");

    let response = server.get("/study/image?format=gif").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_image_no_frames() {
    let server = TestServer::start().await;
    let bytes = DicomBuilder::explicit_le()
        .string(PATIENT_NAME, Vr::PN, "Doe^Jane")
        .build();
    server.put("empty", bytes).await;

    let response = server.get("/empty/image").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_image_malformed() {
    let server = TestServer::start().await;
    let mut bytes = study();
    bytes.truncate(140);
    server.put("broken", bytes).await;

    let response = server.get("/broken/image").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_image_missing() {
    let server = TestServer::start().await;
    let response = server.get("/missing/image").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ------------------------------------------------------------------------
// Outcome responses
// ------------------------------------------------------------------------

#[test]
fn test_outcome_status() {
    let cancelled = PipelineOutcome::failure(PipelineError::Cancelled).into_response();
    assert_eq!(cancelled.status(), StatusCode::SERVICE_UNAVAILABLE);

    let panicked = PipelineOutcome::failure(PipelineError::Panicked("consumer")).into_response();
    assert_eq!(panicked.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let empty = PipelineOutcome::NoContent.into_response();
    assert_eq!(empty.status(), StatusCode::NO_CONTENT);

    let image = PipelineOutcome::Image {
        bytes: bytes::Bytes::from_static(b"\x89PNG"),
        content_type: "image/png",
        length: 4,
    }
    .into_response();
    assert_eq!(image.status(), StatusCode::OK);
    assert_eq!(image.headers()["content-length"], "4");
    assert_eq!(image.headers()["content-type"], "image/png");
}
