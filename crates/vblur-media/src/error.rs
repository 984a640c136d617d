//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use vblur_models::AllowListError;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during frame and video processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Invalid input: {0}")]
    InputValidation(String),

    #[error("Could not decode media: {0}")]
    Decode(String),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Failed to encode output: {0}")]
    Encode(String),

    #[error("FFmpeg processing failed: {message}")]
    Transcode {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Failed to create final video: {0}")]
    MissingArtifact(PathBuf),

    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an input validation error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InputValidation(message.into())
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a detection failure error.
    pub fn detection(message: impl Into<String>) -> Self {
        Self::Detection(message.into())
    }

    /// Create an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode(message.into())
    }

    /// Create a transcode failure error.
    pub fn transcode(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::Transcode {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a model not found error.
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Captured diagnostic output of an external process, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            MediaError::Transcode { stderr, .. } => stderr.as_deref().filter(|s| !s.is_empty()),
            _ => None,
        }
    }

    /// Whether the error is caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, MediaError::InputValidation(_))
    }
}

impl From<AllowListError> for MediaError {
    fn from(err: AllowListError) -> Self {
        MediaError::InputValidation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_error_is_input_validation() {
        let err: MediaError = AllowListError::Empty.into();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("No classes to exclude"));
    }

    #[test]
    fn test_transcode_diagnostic() {
        let err = MediaError::transcode("exit 1", Some("Unknown encoder 'libx264'".into()), Some(1));
        assert_eq!(err.diagnostic(), Some("Unknown encoder 'libx264'"));
        assert!(!err.is_client_error());

        let empty = MediaError::transcode("exit 1", Some(String::new()), Some(1));
        assert_eq!(empty.diagnostic(), None);
    }
}
