//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use vblur_media::MediaError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Upload exceeds the maximum size of {0} bytes")]
    PayloadTooLarge(usize),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Media(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Media(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Internal details are hidden in production, but
    /// transcode diagnostics are always forwarded.
    fn detail(&self, production: bool) -> String {
        match self {
            ApiError::Media(e) if e.is_client_error() => match e {
                MediaError::InputValidation(msg) => msg.clone(),
                other => other.to_string(),
            },
            ApiError::Media(e) => {
                let base = if production && !is_reportable(e) {
                    "An internal error occurred".to_string()
                } else {
                    e.to_string()
                };
                match e.diagnostic() {
                    Some(stderr) => format!("{}: {}", base, stderr.trim()),
                    None => base,
                }
            }
            ApiError::Internal(_) if production => "An internal error occurred".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Failures whose message tells the client what went wrong with their video.
fn is_reportable(err: &MediaError) -> bool {
    matches!(
        err,
        MediaError::Decode(_)
            | MediaError::Detection(_)
            | MediaError::Transcode { .. }
            | MediaError::MissingArtifact(_)
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Body to send instead when internal details must not leave the server.
///
/// Attached as a response extension; `hide_internal_errors` swaps it in
/// when the server runs in production.
#[derive(Debug, Clone)]
pub struct ProductionBody(pub ErrorResponse);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let code = match &self {
            ApiError::PayloadTooLarge(_) => Some("payload_too_large".to_string()),
            _ => None,
        };

        let detail = self.detail(false);
        let production_detail = self.detail(true);

        let mut response = (
            status,
            Json(ErrorResponse {
                detail: detail.clone(),
                code: code.clone(),
            }),
        )
            .into_response();
        if production_detail != detail {
            response.extensions_mut().insert(ProductionBody(ErrorResponse {
                detail: production_detail,
                code,
            }));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vblur_models::AllowListError;

    #[test]
    fn test_allow_list_error_is_bad_request() {
        let err = ApiError::from(MediaError::from(AllowListError::Empty));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.detail(true), "No classes to exclude from blurring provided");
    }

    #[test]
    fn test_transcode_stderr_survives_production() {
        let err = ApiError::from(MediaError::transcode(
            "FFmpeg exited with code 1",
            Some("Unknown encoder 'libx264'\n".to_string()),
            Some(1),
        ));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let detail = err.detail(true);
        assert!(detail.starts_with("FFmpeg processing failed"));
        assert!(detail.ends_with("Unknown encoder 'libx264'"));
    }

    #[test]
    fn test_internal_details_hidden_in_production() {
        let err = ApiError::from(MediaError::internal("mutex poisoned"));
        assert_eq!(err.detail(true), "An internal error occurred");
        assert!(err.detail(false).contains("mutex poisoned"));

        let err = ApiError::internal("boom");
        assert_eq!(err.detail(true), "An internal error occurred");
    }

    #[test]
    fn test_detection_failure_is_reported() {
        let err = ApiError::from(MediaError::detection("model call 5 failed"));
        assert_eq!(err.detail(true), "Detection failed: model call 5 failed");
    }

    #[test]
    fn test_production_body_attached_only_when_detail_differs() {
        let response = ApiError::internal("boom").into_response();
        let body = response.extensions().get::<ProductionBody>().unwrap();
        assert_eq!(body.0.detail, "An internal error occurred");

        let response = ApiError::bad_request("No video file provided").into_response();
        assert!(response.extensions().get::<ProductionBody>().is_none());
    }

    #[test]
    fn test_payload_too_large() {
        let err = ApiError::PayloadTooLarge(1024);
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
