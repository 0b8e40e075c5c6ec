//! HTTP surface over the enhancement pipeline.

use std::sync::Arc;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::debug;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use visionboost::{EnhanceError, EnhanceRequest, EnhancementJob, Orchestrator, Upload};
use crate::error::ApiError;

/// Multipart overhead allowed on top of the upload ceiling
const MULTIPART_SLACK_BYTES: usize = 1024 * 1024;

/// Container MIME types accepted for the `video` field
const ACCEPTED_VIDEO_MIME_TYPES: &[&str] = &[
    "video/mp4",
    "video/quicktime",
    "video/x-msvideo",
    "video/avi",
    "video/x-matroska",
    "video/x-flv",
    "video/webm",
    "video/x-ms-wmv",
    "video/3gpp",
];

/// Extensions accepted when the client sends a generic content type
const ACCEPTED_VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "flv", "webm", "wmv", "3gp"];

/// Shared handler state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn build_router(state: Arc<AppState>, max_upload_bytes: u64) -> Router {
    let body_limit = usize::try_from(max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_SLACK_BYTES);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/enhance", post(enhance))
        .route("/api/download/{filename}", get(download))
        .route("/api/history", get(history).delete(clear_history))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    in_flight: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: visionboost::SERVICE_NAME,
        version: visionboost::VERSION,
        in_flight: state.orchestrator.in_flight(),
    })
}

#[derive(Debug, Serialize)]
struct EnhanceResponse {
    success: bool,
    enhancement: EnhancementJob,
}

fn is_accepted_video(content_type: Option<&str>, file_name: &str) -> bool {
    let extension_ok = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ACCEPTED_VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);

    match content_type.map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase()) {
        Some(ct) if ACCEPTED_VIDEO_MIME_TYPES.contains(&ct.as_str()) => true,
        Some(ct) if ct == "application/octet-stream" => extension_ok,
        Some(_) => false,
        None => extension_ok,
    }
}

/// Multipart fields: `video` (file), `quality`, `enhancements` (JSON array).
///
/// Admission is taken before any field is read, so a full queue rejects
/// the request without buffering the upload.
async fn enhance(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<EnhanceResponse>, ApiError> {
    let admission = state.orchestrator.admit()?;
    let mut request = EnhanceRequest::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("video") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                if !is_accepted_video(content_type.as_deref(), &file_name) {
                    return Err(ApiError::unsupported_media(format!(
                        "unsupported video type {:?} for {:?}",
                        content_type.unwrap_or_default(),
                        file_name
                    )));
                }
                let data = field.bytes().await?;
                request.upload = Some(Upload { file_name, data });
            }
            Some("quality") => request.quality = Some(field.text().await?),
            Some("enhancements") => request.enhancements = Some(field.text().await?),
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let job = state.orchestrator.enhance_admitted(admission, request).await?;
    Ok(Json(EnhanceResponse {
        success: true,
        enhancement: job,
    }))
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.orchestrator.download(&filename).await?;
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::from(EnhanceError::NotFound(filename.clone()))
        } else {
            ApiError::from(EnhanceError::storage(format!("opening {}", path.display()), e))
        }
    })?;
    let length = file.metadata().await.map(|m| m.len()).ok();

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        );
    if let Some(length) = length {
        response = response.header(header::CONTENT_LENGTH, length);
    }

    response
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string()))
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    history: Vec<EnhancementJob>,
}

async fn history(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        history: state.orchestrator.list_jobs().await,
    })
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    cleared: usize,
}

async fn clear_history(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let cleared = state.orchestrator.clear_all().await?;
    Ok(Json(ClearResponse { cleared }))
}
