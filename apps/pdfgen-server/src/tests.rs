//! End-to-end tests for the pdfgen server
//!
//! The routers are driven in-process through axum-test. The fake backend
//! stands in for the browser: it fetches the page (and optionally its assets)
//! through the content router exactly as Chromium would over the loopback
//! listener.
//!
//! Test categories:
//! - Bundle rendering and workdir release
//! - Deadline handling and dropped requests
//! - Request validation
//! - Content serving
//! - URL mode

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use axum_test::multipart::{MultipartForm, Part};
use axum_test::{TestResponse, TestServer, TestServerConfig, Transport};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::Notify;
use tower::ServiceExt;
use url::Url;

use pdfgen_core::{
    BackendError, LayoutNormalizer, LayoutSpec, RenderBackend, Scheduler, WorkdirManager,
};

use crate::api::{content_router, public_router};
use crate::AppState;

/// Pretends to be the browser
struct FakeBrowser {
    /// Content router to fetch pages through; `None` renders without fetching
    content: Option<Router>,
    /// Sibling files fetched after the main page
    assets: Vec<&'static str>,
    delay: Duration,
    /// Signalled once rendering starts; the render then never finishes
    hang: Option<Arc<Notify>>,
    renders: Mutex<Vec<(Url, LayoutSpec)>>,
}

impl FakeBrowser {
    fn new(content: Option<Router>) -> Self {
        Self {
            content,
            assets: Vec::new(),
            delay: Duration::ZERO,
            hang: None,
            renders: Mutex::new(Vec::new()),
        }
    }

    async fn fetch(&self, content: &Router, url: &Url) -> Result<Vec<u8>, BackendError> {
        let failed = |message: String| BackendError::Navigation {
            url: url.to_string(),
            message,
        };

        let request = Request::get(url.path())
            .body(Body::empty())
            .map_err(|e| failed(e.to_string()))?;
        let response = content
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(failed(format!("status {}", response.status())));
        }

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| failed(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RenderBackend for FakeBrowser {
    async fn render(&self, url: &Url, layout: &LayoutSpec) -> Result<Vec<u8>, BackendError> {
        self.renders.lock().unwrap().push((url.clone(), *layout));
        if let Some(started) = &self.hang {
            started.notify_one();
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.delay).await;

        let mut pdf = b"%PDF-".to_vec();
        if let Some(content) = &self.content {
            pdf.extend(self.fetch(content, url).await?);
            for asset in &self.assets {
                let asset_url = url.join(asset).map_err(|e| BackendError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
                pdf.extend(self.fetch(content, &asset_url).await?);
            }
        }
        Ok(pdf)
    }
}

struct Harness {
    server: TestServer,
    workdirs: WorkdirManager,
    browser: Arc<FakeBrowser>,
    staging_root: PathBuf,
    _root: TempDir,
}

impl Harness {
    fn new(configure: impl FnOnce(&mut FakeBrowser), render_timeout: Duration) -> Self {
        Self::with_body_limit(configure, render_timeout, 1024 * 1024)
    }

    fn with_body_limit(
        configure: impl FnOnce(&mut FakeBrowser),
        render_timeout: Duration,
        max_body_bytes: usize,
    ) -> Self {
        let root = tempfile::tempdir().unwrap();
        let staging_root = root.path().join("staging");
        let workdirs = WorkdirManager::new(&staging_root);

        let mut browser = FakeBrowser::new(Some(content_router(workdirs.clone())));
        configure(&mut browser);
        let browser = Arc::new(browser);

        let state = AppState {
            scheduler: Arc::new(Scheduler::new(browser.clone(), 2)),
            workdirs: workdirs.clone(),
            normalizer: LayoutNormalizer::default(),
            render_timeout,
            content_base: Url::parse("http://127.0.0.1:5001/").unwrap(),
        };

        // In-process transport: dropping a request drops the handler future with it
        let config = TestServerConfig {
            transport: Some(Transport::MockHttp),
            ..TestServerConfig::default()
        };

        Self {
            server: TestServer::new_with_config(public_router(state, max_body_bytes), config)
                .unwrap(),
            workdirs,
            browser,
            staging_root,
            _root: root,
        }
    }

    async fn process(&self, form: MultipartForm) -> TestResponse {
        self.server.post("/process").multipart(form).await
    }

    /// Entries left under the staging root
    fn staged_dirs(&self) -> usize {
        match std::fs::read_dir(&self.staging_root) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

/// A `/process` upload: the generation schema plus one file part per entry
fn upload(generation: &str, files: &[(&str, &[u8])]) -> MultipartForm {
    files.iter().fold(
        MultipartForm::new().add_text("generation", generation.to_string()),
        |form, (name, bytes)| {
            form.add_part(
                name.to_string(),
                Part::bytes(bytes.to_vec()).file_name(name.to_string()),
            )
        },
    )
}

fn error_code(response: &TestResponse) -> String {
    let json = response.json::<serde_json::Value>();
    assert_eq!(json["success"], false);
    json["code"].as_str().unwrap().to_string()
}

const INDEX_HTML: &[u8] = b"<html><body><img src=\"logo.png\"></body></html>";
const LOGO_PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

#[tokio::test]
async fn test_bundle_renders_and_workdir_is_released() {
    let harness = Harness::new(|b| b.assets = vec!["logo.png"], Duration::from_secs(5));
    let generation = r#"{
        "html": "index.html",
        "assets": ["logo.png"],
        "layout": {
            "orientation": "landscape",
            "size": "Letter",
            "margin": { "left": 10, "top": 10, "right": 10, "bottom": 10 }
        }
    }"#;

    let response = harness
        .process(upload(
            generation,
            &[("index.html", INDEX_HTML), ("logo.png", LOGO_PNG)],
        ))
        .await;

    response.assert_status_ok();
    assert_eq!(response.header(header::CONTENT_TYPE), "application/pdf");
    assert_eq!(
        response.header(header::CONTENT_DISPOSITION),
        "inline; filename=\"processed.pdf\""
    );

    let mut expected = b"%PDF-".to_vec();
    expected.extend_from_slice(INDEX_HTML);
    expected.extend_from_slice(LOGO_PNG);
    assert_eq!(response.as_bytes().to_vec(), expected);

    let renders = harness.browser.renders.lock().unwrap().clone();
    assert_eq!(renders.len(), 1);
    let (url, layout) = &renders[0];
    assert_eq!(url.host_str(), Some("127.0.0.1"));
    assert!(url.path().ends_with("/index.html"), "{url}");
    assert_eq!(layout.size.width_mm, 279.4);
    assert_eq!(layout.size.height_mm, 215.9);
    assert_eq!(layout.margins.left, 10.0);
    assert_eq!(layout.margins.bottom, 10.0);

    assert_eq!(harness.workdirs.active(), 0);
    assert_eq!(harness.staged_dirs(), 0);
}

#[tokio::test]
async fn test_asset_referenced_with_directory_uses_bare_upload() {
    let harness = Harness::new(|b| b.assets = vec!["logo.png"], Duration::from_secs(5));

    let response = harness
        .process(upload(
            r#"{"html": "index.html", "assets": ["img/logo.png"]}"#,
            &[("index.html", INDEX_HTML), ("logo.png", LOGO_PNG)],
        ))
        .await;

    response.assert_status_ok();
    assert!(response.as_bytes().ends_with(LOGO_PNG));
}

#[tokio::test]
async fn test_released_key_is_no_longer_served() {
    let harness = Harness::new(|_| {}, Duration::from_secs(5));

    harness
        .process(upload(
            r#"{"html": "index.html"}"#,
            &[("index.html", INDEX_HTML)],
        ))
        .await
        .assert_status_ok();

    let (url, _) = harness.browser.renders.lock().unwrap()[0].clone();
    let content = TestServer::new(content_router(harness.workdirs.clone())).unwrap();
    content
        .get(url.path())
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_slow_render_hits_deadline_and_releases_workdir() {
    let harness = Harness::new(
        |b| b.delay = Duration::from_millis(500),
        Duration::from_millis(50),
    );

    let response = harness
        .process(upload(
            r#"{"html": "index.html"}"#,
            &[("index.html", INDEX_HTML)],
        ))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_code(&response), "DEADLINE_EXCEEDED");
    assert_eq!(harness.workdirs.active(), 0);
    assert_eq!(harness.staged_dirs(), 0);
}

#[tokio::test]
async fn test_dropped_request_releases_workdir() {
    let started = Arc::new(Notify::new());
    let gate = Arc::clone(&started);
    let harness = Harness::new(move |b| b.hang = Some(gate), Duration::from_secs(30));

    let request = harness.server.post("/process").multipart(upload(
        r#"{"html": "index.html"}"#,
        &[("index.html", INDEX_HTML)],
    ));

    // Client goes away once the render is underway
    tokio::select! {
        _ = async { request.await } => panic!("render should still be running"),
        _ = started.notified() => {}
    }

    assert_eq!(harness.workdirs.active(), 0, "key unpublished on drop");
    for _ in 0..100 {
        if harness.staged_dirs() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.staged_dirs(), 0);
}

#[tokio::test]
async fn test_backend_failure_is_internal_error() {
    // Fetching an asset that was never uploaded fails the render
    let harness = Harness::new(|b| b.assets = vec!["missing.css"], Duration::from_secs(5));

    let response = harness
        .process(upload(
            r#"{"html": "index.html"}"#,
            &[("index.html", INDEX_HTML)],
        ))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&response), "RENDER_FAILED");
    assert_eq!(harness.staged_dirs(), 0);
}

#[tokio::test]
async fn test_duplicate_assets_rejected_without_staging() {
    let harness = Harness::new(|_| {}, Duration::from_secs(5));

    let response = harness
        .process(upload(
            r#"{"html": "index.html", "assets": ["logo.png", "../logo.png"]}"#,
            &[
                ("index.html", INDEX_HTML),
                ("logo.png", LOGO_PNG),
                ("../logo.png", LOGO_PNG),
            ],
        ))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&response), "INVALID_BUNDLE");
    assert_eq!(harness.staged_dirs(), 0);
    assert!(harness.browser.renders.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_file_rejected() {
    let harness = Harness::new(|_| {}, Duration::from_secs(5));

    let response = harness
        .process(upload(
            r#"{"html": "index.html", "assets": ["logo.png"]}"#,
            &[("index.html", INDEX_HTML)],
        ))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&response), "INVALID_BUNDLE");
}

#[tokio::test]
async fn test_invalid_schema_rejected() {
    let harness = Harness::new(|_| {}, Duration::from_secs(5));

    let cases = [
        (r#"{"html": "index.html", "colour": "red"}"#, "INVALID_REQUEST"),
        ("not json", "INVALID_REQUEST"),
        (
            r#"{"html": "index.html", "layout": {"size": "B5"}}"#,
            "INVALID_LAYOUT",
        ),
        (
            r#"{"html": "index.html", "layout": {"orientation": "sideways"}}"#,
            "INVALID_LAYOUT",
        ),
    ];

    for (generation, code) in cases {
        let response = harness
            .process(upload(generation, &[("index.html", INDEX_HTML)]))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&response), code);
    }
    assert_eq!(harness.staged_dirs(), 0);
}

#[tokio::test]
async fn test_missing_generation_rejected() {
    let harness = Harness::new(|_| {}, Duration::from_secs(5));

    let form = MultipartForm::new().add_part(
        "index.html",
        Part::bytes(INDEX_HTML.to_vec()).file_name("index.html"),
    );
    let response = harness.process(form).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&response), "INVALID_REQUEST");
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let harness = Harness::with_body_limit(|_| {}, Duration::from_secs(5), 256);
    let big = vec![b'x'; 4096];

    let response = harness
        .process(upload(r#"{"html": "index.html"}"#, &[("index.html", &big)]))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(harness.staged_dirs(), 0);
}

#[tokio::test]
async fn test_url_mode_names_pdf_after_host() {
    let harness = Harness::new(|b| b.content = None, Duration::from_secs(5));

    let form = MultipartForm::new()
        .add_text("generation", r#"{"layout": {"size": "A5"}}"#)
        .add_text("url", "https://example.com/report?id=7");
    let response = harness.process(form).await;

    response.assert_status_ok();
    assert_eq!(
        response.header(header::CONTENT_DISPOSITION),
        "inline; filename=\"example.com.pdf\""
    );

    let renders = harness.browser.renders.lock().unwrap().clone();
    assert_eq!(renders[0].0.as_str(), "https://example.com/report?id=7");
    assert_eq!(renders[0].1.size.width_mm, 148.5);
    assert_eq!(harness.staged_dirs(), 0);
}

#[tokio::test]
async fn test_empty_url_field_renders_upload() {
    let harness = Harness::new(|_| {}, Duration::from_secs(5));

    for blank in ["", "   "] {
        let form = upload(r#"{"html": "index.html"}"#, &[("index.html", INDEX_HTML)])
            .add_text("url", blank);
        let response = harness.process(form).await;

        response.assert_status_ok();
        assert_eq!(
            response.header(header::CONTENT_DISPOSITION),
            "inline; filename=\"processed.pdf\""
        );
    }
    assert_eq!(harness.staged_dirs(), 0);
}

#[tokio::test]
async fn test_url_mode_rejects_non_http_schemes() {
    let harness = Harness::new(|b| b.content = None, Duration::from_secs(5));

    let form = MultipartForm::new()
        .add_text("generation", "{}")
        .add_text("url", "file:///etc/passwd");
    let response = harness.process(form).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(harness.browser.renders.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_content_unknown_key_is_bad_request() {
    let root = tempfile::tempdir().unwrap();
    let server = TestServer::new(content_router(WorkdirManager::new(root.path()))).unwrap();

    for path in [
        "/0123456789abcdef/index.html",
        "/0123456789abcdef/",
        "/0123456789abcdef",
    ] {
        let response = server.get(path).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST, "{path}");
    }
}

#[tokio::test]
async fn test_content_serves_staged_files() {
    let root = tempfile::tempdir().unwrap();
    let workdirs = WorkdirManager::new(root.path());
    let files = std::collections::HashMap::from([
        ("index.html".to_string(), INDEX_HTML.to_vec()),
        ("logo.png".to_string(), LOGO_PNG.to_vec()),
    ]);
    let staged = workdirs
        .stage("index.html", &["logo.png".to_string()], &files)
        .await
        .unwrap();
    let key = staged.key.clone();

    let server = TestServer::new(content_router(workdirs.clone())).unwrap();

    let logo = server.get(&format!("/{}/logo.png", key)).await;
    logo.assert_status_ok();
    assert_eq!(logo.as_bytes().to_vec(), LOGO_PNG);

    // The bare key resolves to the directory index
    let index = server.get(&format!("/{}/", key)).await;
    index.assert_status_ok();
    assert_eq!(index.as_bytes().to_vec(), INDEX_HTML);

    server
        .get(&format!("/{}/nope.css", key))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let escape = server.get(&format!("/{}/../../etc/passwd", key)).await;
    assert_ne!(escape.status_code(), StatusCode::OK);

    staged.release().await;
    server
        .get(&format!("/{}/logo.png", key))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::new(|_| {}, Duration::from_secs(5));

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let json = response.json::<serde_json::Value>();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["active_workdirs"], 0);
}

#[tokio::test]
async fn test_content_url_escapes_segments() {
    let root = tempfile::tempdir().unwrap();

    let state = AppState {
        scheduler: Arc::new(Scheduler::new(Arc::new(FakeBrowser::new(None)), 1)),
        workdirs: WorkdirManager::new(root.path()),
        normalizer: LayoutNormalizer::default(),
        render_timeout: Duration::from_secs(1),
        content_base: Url::parse("http://127.0.0.1:5001/").unwrap(),
    };
    let handle = pdfgen_core::WorkdirHandle {
        key: "abc123".to_string(),
        path: root.path().to_path_buf(),
        main_file: "my report.html".to_string(),
    };

    let url = state.content_url(&handle).unwrap();
    assert_eq!(url.as_str(), "http://127.0.0.1:5001/abc123/my%20report.html");
}
