//! HTTP handlers for the pdfgen server
//!
//! Two routers are built here:
//! - the public one, accepting generation requests on `POST /process`
//! - the content one, serving staged workdirs to the browser on
//!   `GET /{key}/{path...}`; it must only ever be bound to loopback

use std::any::Any;
use std::collections::HashMap;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Multipart, Path, Request, State},
    http::{header, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceExt;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, info};
use url::Url;

use pdfgen_core::{GenerationSchema, RenderJob, WorkdirManager};

use crate::error::ServerError;
use crate::AppState;

/// Multipart field carrying the JSON generation schema
const GENERATION_FIELD: &str = "generation";
/// Multipart field carrying a remote page to print instead of uploaded files
const URL_FIELD: &str = "url";
/// Download name of PDFs rendered from uploaded bundles
const UPLOAD_PDF_NAME: &str = "processed";

/// Router for the public listener
pub fn public_router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/health", get(handle_health))
        .route("/process", post(handle_process))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Router for the internal content listener
pub fn content_router(workdirs: WorkdirManager) -> Router {
    Router::new()
        .route("/:key", get(handle_content))
        .route("/:key/", get(handle_content))
        .route("/:key/*path", get(handle_content))
        .layer(TraceLayer::new_for_http())
        .with_state(workdirs)
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub active_workdirs: usize,
}

/// Handler: GET /health
pub async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "pdfgen-server",
        version: env!("CARGO_PKG_VERSION"),
        active_workdirs: state.workdirs.active(),
    })
}

/// Parts of a `/process` multipart body
#[derive(Debug, Default)]
struct ProcessForm {
    generation: Option<Bytes>,
    url: Option<String>,
    /// Every other field, keyed by field name; the first occurrence wins
    files: HashMap<String, Vec<u8>>,
}

impl ProcessForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ServerError> {
        let mut form = ProcessForm::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };

            match name.as_str() {
                GENERATION_FIELD => form.generation = Some(field.bytes().await?),
                URL_FIELD => form.url = Some(field.text().await?),
                _ => {
                    let bytes = field.bytes().await?;
                    form.files.entry(name).or_insert_with(|| bytes.to_vec());
                }
            }
        }

        Ok(form)
    }
}

/// Handler: POST /process
///
/// Renders either the uploaded bundle (main HTML plus assets) or, when a
/// non-empty `url` field is present, the remote page. The staged workdir is
/// released before the response is sent, whatever the outcome of the render.
pub async fn handle_process(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ServerError> {
    let form = ProcessForm::read(multipart).await?;

    let raw = form
        .generation
        .ok_or_else(|| ServerError::InvalidRequest("missing 'generation' field".to_string()))?;
    let schema = GenerationSchema::from_json(&raw)
        .map_err(|e| ServerError::InvalidRequest(format!("invalid generation schema: {}", e)))?;
    let data = schema.normalize(&state.normalizer)?;

    if let Some(raw_url) = form.url.filter(|u| !u.trim().is_empty()) {
        let url = parse_source_url(&raw_url)?;
        let name = url.host_str().unwrap_or(UPLOAD_PDF_NAME).to_string();

        info!(url = %url, "rendering remote page");
        let job = RenderJob::new(url, data.layout, state.render_timeout);
        let pdf = state.scheduler.submit(job).await?;
        return pdf_response(pdf, &name);
    }

    let staged = state
        .workdirs
        .stage(&data.html, &data.assets, &form.files)
        .await?;
    let url = state.content_url(&staged)?;

    info!(key = %staged.key, files = data.assets.len() + 1, "rendering uploaded bundle");
    let job = RenderJob::new(url, data.layout, state.render_timeout);
    let result = state.scheduler.submit(job).await;
    staged.release().await;

    pdf_response(result?, UPLOAD_PDF_NAME)
}

/// Handler: GET /:key/*path on the content listener
pub async fn handle_content(
    State(workdirs): State<WorkdirManager>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
) -> Result<Response, ServerError> {
    let key = params.get("key").cloned().unwrap_or_default();
    let dir = workdirs
        .lookup(&key)
        .ok_or_else(|| ServerError::InvalidRequest(format!("unknown workdir '{}'", key)))?;

    // Strip the key so ServeDir resolves the remainder inside the workdir
    let remainder = request
        .uri()
        .path()
        .trim_start_matches('/')
        .split_once('/')
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    let uri: Uri = format!("/{}", remainder)
        .parse()
        .map_err(|_| ServerError::InvalidRequest("invalid content path".to_string()))?;
    *request.uri_mut() = uri;

    debug!(key = %key, path = %request.uri().path(), "serving workdir content");
    match ServeDir::new(dir).oneshot(request).await {
        Ok(response) => Ok(response.map(Body::new)),
        Err(never) => match never {},
    }
}

fn parse_source_url(raw: &str) -> Result<Url, ServerError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ServerError::InvalidRequest(format!("invalid url '{}': {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(ServerError::InvalidRequest(format!(
            "url must be an http or https address, got '{}'",
            raw
        ))),
    }
}

fn pdf_response(pdf: Vec<u8>, name: &str) -> Result<Response, ServerError> {
    let disposition = HeaderValue::from_str(&format!("inline; filename=\"{}.pdf\"", name))
        .map_err(|e| ServerError::Internal(format!("invalid file name: {}", e)))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        pdf,
    )
        .into_response())
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    ServerError::Internal(format!("handler panicked: {}", message)).into_response()
}
