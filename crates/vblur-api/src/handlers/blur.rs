//! Batch video redaction endpoint.

use std::time::Instant;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, info};

use vblur_models::ProcessingReport;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Name of the multipart part holding the video.
const VIDEO_FIELD: &str = "video";
/// Name of the multipart parts holding allow-listed class names.
const CLASSES_FIELD: &str = "classes_no_blur";
/// Filename offered to the browser for the redacted video.
const DOWNLOAD_DISPOSITION: &str = "attachment; filename=blurred_video.mp4";

/// Fields of a batch upload.
#[derive(Debug, Default)]
struct BlurUpload {
    video: Option<Vec<u8>>,
    classes_no_blur: Vec<String>,
}

/// Redact every class not in `classes_no_blur` and stream back an MP4.
pub async fn blur_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let upload = read_upload(multipart, state.config.max_upload_size).await?;

    let video = match upload.video {
        Some(video) if !video.is_empty() => video,
        _ => return Err(ApiError::bad_request("No video file provided")),
    };

    info!(
        bytes = video.len(),
        classes = upload.classes_no_blur.len(),
        "Blur request accepted"
    );

    let started = Instant::now();
    let processed = match state.batch.run(&video, &upload.classes_no_blur).await {
        Ok(processed) => processed,
        Err(e) => {
            let outcome = if e.is_client_error() { "rejected" } else { "failed" };
            metrics::record_batch(
                outcome,
                0,
                &ProcessingReport::default(),
                started.elapsed().as_secs_f64(),
            );
            return Err(e.into());
        }
    };
    drop(video);

    metrics::record_batch(
        "completed",
        processed.frames,
        &processed.report,
        started.elapsed().as_secs_f64(),
    );

    let size = processed.size;
    let mut response = Body::from_stream(processed.into_stream()).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static(DOWNLOAD_DISPOSITION),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));

    Ok(response)
}

async fn read_upload(mut multipart: Multipart, max_size: usize) -> ApiResult<BlurUpload> {
    let mut upload = BlurUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_size))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(VIDEO_FIELD) => {
                upload.video = Some(read_video_field(field, max_size).await?);
            }
            Some(CLASSES_FIELD) => {
                let text = field.text().await.map_err(|e| multipart_error(e, max_size))?;
                upload.classes_no_blur.extend(parse_classes(&text));
            }
            other => {
                debug!(field = ?other, "Ignoring unknown multipart field");
            }
        }
    }

    Ok(upload)
}

async fn read_video_field(mut field: Field<'_>, max_size: usize) -> ApiResult<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, max_size))?
    {
        if data.len() + chunk.len() > max_size {
            return Err(ApiError::PayloadTooLarge(max_size));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

fn multipart_error(err: MultipartError, max_size: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(max_size)
    } else {
        ApiError::bad_request(format!("Invalid multipart body: {}", err.body_text()))
    }
}

/// Split one `classes_no_blur` part into class names.
///
/// A part may hold a single name, a JSON array of names, or a
/// comma-separated list.
pub fn parse_classes(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.starts_with('[') {
        if let Ok(names) = serde_json::from_str::<Vec<String>>(text) {
            return names;
        }
    }

    text.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
