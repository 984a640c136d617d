//! Router-level tests for the API server.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::routing::get;
use axum::{middleware, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tempfile::TempDir;
use tower::ServiceExt;

use vblur_api::live::LiveSession;
use vblur_api::middleware::hide_internal_errors;
use vblur_api::{create_router, ApiConfig, ApiError, AppState};
use vblur_media::{encode_jpeg, StaticDetector};
use vblur_models::ServerMessage;

const BOUNDARY: &str = "vblur-test-boundary";

fn test_state(temp: &TempDir, detector: StaticDetector) -> AppState {
    let config = ApiConfig {
        temp_dir: temp.path().join("work"),
        max_upload_size: 1024 * 1024,
        ..Default::default()
    };
    tokio_test::assert_ok!(AppState::with_detector(config, Arc::new(detector)))
}

fn test_app(temp: &TempDir) -> Router {
    create_router(test_state(temp, StaticDetector::empty()), None)
}

enum Part<'a> {
    File(&'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File(name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"clip.mp4\"\r\nContent-Type: video/mp4\r\n\r\n",
                        name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn blur_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/blur_bottles/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn leftover_files(temp: &TempDir) -> usize {
    std::fs::read_dir(temp.path().join("work"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_health_endpoint() {
    let temp = TempDir::new().unwrap();
    let response = test_app(&temp)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_ready_reports_detector_and_tool_checks() {
    let temp = TempDir::new().unwrap();
    let response = test_app(&temp)
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    assert!(status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE);

    let body = json_body(response).await;
    assert_eq!(body["detector"], "static");
    assert!(body["checks"]["ffmpeg"]["status"].is_string());
    assert!(body["checks"].get("detector").is_none());
    if status == StatusCode::OK {
        assert_eq!(body["status"], "ready");
    } else {
        assert_eq!(body["status"], "degraded");
    }
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let temp = TempDir::new().unwrap();
    let response = test_app(&temp)
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("X-Request-ID", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers().get("x-request-id").unwrap(), "abc-123");
}

#[tokio::test]
async fn test_metrics_route_absent_when_disabled() {
    let temp = TempDir::new().unwrap();
    let response = test_app(&temp)
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_blur_without_video_is_rejected() {
    let temp = TempDir::new().unwrap();
    let response = test_app(&temp)
        .oneshot(blur_request(&[Part::Text("classes_no_blur", "eau_vive")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["detail"], "No video file provided");
}

#[tokio::test]
async fn test_blur_without_classes_is_rejected_before_any_file() {
    let temp = TempDir::new().unwrap();
    let response = test_app(&temp)
        .oneshot(blur_request(&[Part::File("video", b"not really a video")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["detail"], "No classes to exclude from blurring provided");
    assert_eq!(leftover_files(&temp), 0);
}

#[tokio::test]
async fn test_blur_with_blank_classes_is_rejected() {
    let temp = TempDir::new().unwrap();
    let response = test_app(&temp)
        .oneshot(blur_request(&[
            Part::File("video", b"not really a video"),
            Part::Text("classes_no_blur", " , "),
            Part::Text("classes_no_blur", "[]"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_blur_rejects_oversized_upload() {
    let temp = TempDir::new().unwrap();
    let video = vec![0u8; 1024 * 1024 + 1];
    let response = test_app(&temp)
        .oneshot(blur_request(&[
            Part::File("video", &video),
            Part::Text("classes_no_blur", "eau_vive"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(leftover_files(&temp), 0);
}

#[tokio::test]
async fn test_blur_unreadable_video_fails_and_cleans_up() {
    let temp = TempDir::new().unwrap();
    let response = test_app(&temp)
        .oneshot(blur_request(&[
            Part::File("video", b"definitely not an mp4 container"),
            Part::Text("classes_no_blur", r#"["eau_vive"]"#),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["detail"].as_str().is_some());
    assert_eq!(leftover_files(&temp), 0);
}

#[tokio::test]
async fn test_live_route_requires_upgrade() {
    let temp = TempDir::new().unwrap();
    let response = test_app(&temp)
        .oneshot(
            Request::builder()
                .uri("/ws/blur_bottles_live")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_live_session_recovers_after_detection_failure() {
    let temp = TempDir::new().unwrap();
    let state = test_state(&temp, StaticDetector::empty().failing_on(1));
    let mut session = LiveSession::from_state(&state);

    let frame = image::RgbImage::from_pixel(32, 24, image::Rgb([10, 200, 90]));
    let message = serde_json::json!({
        "frame": STANDARD.encode(encode_jpeg(&frame, 90).unwrap()),
        "classes_no_blur": ["eau_vive"],
    })
    .to_string();

    match session.handle_text(&message).await {
        Some(ServerMessage::Error { error }) => assert!(error.starts_with("Detection failed")),
        other => panic!("expected error, got {:?}", other),
    }
    assert!(session.handle_text(r#"{"type":"pong"}"#).await.is_none());
    assert!(matches!(
        session.handle_text(&message).await,
        Some(ServerMessage::Frame { .. })
    ));
}

fn failing_route(environment: &str, temp: &TempDir) -> Router {
    let config = ApiConfig {
        environment: environment.to_string(),
        temp_dir: temp.path().join("work"),
        ..Default::default()
    };
    let state = tokio_test::assert_ok!(AppState::with_detector(
        config,
        Arc::new(StaticDetector::empty())
    ));

    Router::new()
        .route(
            "/fail",
            get(|| async { Err::<(), _>(ApiError::internal("mutex poisoned")) }),
        )
        .layer(middleware::from_fn_with_state(state, hide_internal_errors))
}

#[tokio::test]
async fn test_internal_details_follow_configured_environment() {
    let temp = TempDir::new().unwrap();
    let request = || Request::builder().uri("/fail").body(Body::empty()).unwrap();

    let response = failing_route("Production", &temp).oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["detail"], "An internal error occurred");

    let response = failing_route("development", &temp).oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["detail"], "Internal error: mutex poisoned");
}
