use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde::Serialize;
use visionboost::EnhanceError;

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Error returned by HTTP handlers
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unsupported_media(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA_TYPE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<EnhanceError> for ApiError {
    fn from(err: EnhanceError) -> Self {
        let message = err.to_string();
        match err {
            EnhanceError::MissingUpload => Self::new(StatusCode::BAD_REQUEST, "MISSING_UPLOAD", message),
            EnhanceError::UnsupportedQuality(_) => {
                Self::new(StatusCode::BAD_REQUEST, "UNSUPPORTED_QUALITY", message)
            }
            EnhanceError::UploadTooLarge { .. } => {
                Self::new(StatusCode::PAYLOAD_TOO_LARGE, "UPLOAD_TOO_LARGE", message)
            }
            EnhanceError::InvalidReference(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_REFERENCE", message)
            }
            EnhanceError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Not found"),
            EnhanceError::Overloaded { .. } => Self::new(StatusCode::SERVICE_UNAVAILABLE, "OVERLOADED", message),
            EnhanceError::Storage { .. } => {
                error!("Storage failure: {}", message);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_FAILURE", "Storage failure")
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), "BAD_MULTIPART", err.body_text())
    }
}
