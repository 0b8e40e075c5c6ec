use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the enhancement pipeline to its callers
#[derive(Debug, Error)]
pub enum EnhanceError {
    /// The request carried no video upload
    #[error("no video file was uploaded")]
    MissingUpload,

    /// The requested quality tier is not one of 1080p, 4K or 8K
    #[error("unsupported quality tier: {0:?} (expected 1080p, 4K or 8K)")]
    UnsupportedQuality(String),

    /// The upload exceeds the configured size ceiling
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    UploadTooLarge { size: u64, limit: u64 },

    /// An artifact name contained a path separator or parent-directory token
    #[error("invalid artifact reference: {0:?}")]
    InvalidReference(String),

    /// The artifact does not exist in the output store
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// Admission ceiling reached; the caller should retry later
    #[error("enhancement queue is full ({limit} requests admitted)")]
    Overloaded { limit: usize },

    /// Filesystem failure that prevents the request from producing an artifact
    #[error("storage failure while {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl EnhanceError {
    /// Wrap an I/O error with a short description of what was being attempted
    pub fn storage(context: impl Into<String>, source: io::Error) -> Self {
        EnhanceError::Storage {
            context: context.into(),
            source,
        }
    }

    /// True for rejections caused by the request itself rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EnhanceError::MissingUpload
                | EnhanceError::UnsupportedQuality(_)
                | EnhanceError::UploadTooLarge { .. }
                | EnhanceError::InvalidReference(_)
                | EnhanceError::NotFound(_)
        )
    }
}

/// Failure of a single external transcoder run.
///
/// These never reach the caller: the executor answers every one of them
/// with a fallback copy.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to spawn transcoder {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: io::Error,
    },

    #[error("transcoder timed out after {}s and was killed", .0.as_secs())]
    TimedOut(Duration),

    #[error("transcoder exited with code {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("failed to wait for transcoder: {0}")]
    Wait(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(EnhanceError::MissingUpload.is_client_error());
        assert!(EnhanceError::UnsupportedQuality("2K".into()).is_client_error());
        assert!(EnhanceError::InvalidReference("../x".into()).is_client_error());
        assert!(!EnhanceError::Overloaded { limit: 4 }.is_client_error());
        assert!(!EnhanceError::storage("staging", io::Error::other("disk gone")).is_client_error());
    }

    #[test]
    fn test_timeout_message_reports_seconds() {
        let err = TranscodeError::TimedOut(Duration::from_secs(90));
        assert_eq!(err.to_string(), "transcoder timed out after 90s and was killed");
    }
}
