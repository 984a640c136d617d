//! Live redaction session: one serialized receive/process/respond loop per
//! connection, with a keepalive probe running alongside.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use vblur_media::{DetectOptions, FrameProcessor, MediaError};
use vblur_models::{AllowList, AllowListError, ClientMessage, ClientMessageError, ServerMessage};

use crate::metrics;
use crate::state::AppState;

/// Endpoint label for metrics.
pub const LIVE_ENDPOINT: &str = "blur_bottles_live";

/// Errors raised while handling one live message, plus transport failure.
///
/// All variants except `Connection` are answered with an `{"error": ...}`
/// message and leave the session open.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    Message(#[from] ClientMessageError),

    #[error(transparent)]
    AllowList(#[from] AllowListError),

    #[error("Invalid base64 frame data")]
    Base64(#[source] base64::DecodeError),

    #[error("Invalid frame data")]
    Image(String),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Failed to encode frame: {0}")]
    Encode(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<MediaError> for LiveError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Decode(msg) | MediaError::InputValidation(msg) => LiveError::Image(msg),
            MediaError::Encode(msg) => LiveError::Encode(msg),
            MediaError::Detection(msg) => LiveError::Detection(msg),
            MediaError::Timeout(secs) => {
                LiveError::Detection(format!("timed out after {} seconds", secs))
            }
            other => LiveError::Detection(other.to_string()),
        }
    }
}

/// Counters for one session, logged at close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub messages: u64,
    pub frames: u64,
    pub errors: u64,
}

/// Per-connection live session.
pub struct LiveSession {
    processor: Arc<FrameProcessor>,
    options: DetectOptions,
    jpeg_quality: u8,
    detect_timeout: Duration,
    keepalive_interval: Duration,
    stats: SessionStats,
}

impl LiveSession {
    pub fn new(
        processor: Arc<FrameProcessor>,
        options: DetectOptions,
        jpeg_quality: u8,
        detect_timeout: Duration,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            processor,
            options,
            jpeg_quality,
            detect_timeout,
            keepalive_interval,
            stats: SessionStats::default(),
        }
    }

    /// Session configured from the application state.
    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            Arc::clone(&state.processor),
            state.config.live_detect_options(),
            state.config.jpeg_quality,
            state.config.detect_timeout,
            state.config.keepalive_interval,
        )
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Handle one text message and return the reply, if any.
    ///
    /// Keepalive acknowledgments produce no reply. Every other message
    /// produces exactly one: a processed frame or an error.
    pub async fn handle_text(&mut self, text: &str) -> Option<ServerMessage> {
        self.stats.messages += 1;

        match self.process_text(text).await {
            Ok(reply) => reply,
            Err(e) => {
                self.stats.errors += 1;
                debug!(error = %e, "Live message rejected");
                Some(ServerMessage::error(e.to_string()))
            }
        }
    }

    async fn process_text(&mut self, text: &str) -> Result<Option<ServerMessage>, LiveError> {
        let request = match ClientMessage::parse(text)? {
            ClientMessage::Pong => {
                debug!("Keepalive acknowledged");
                return Ok(None);
            }
            ClientMessage::Frame(request) => request,
        };

        let allow_list = AllowList::parse(&request.classes_no_blur)?;
        let bytes = decode_frame_payload(&request.frame)?;

        let (jpeg, report) = self
            .processor
            .process_jpeg_blocking(
                bytes,
                allow_list,
                self.options,
                self.jpeg_quality,
                self.detect_timeout,
            )
            .await?;

        metrics::record_frame("live", &report);
        self.stats.frames += 1;

        Ok(Some(ServerMessage::frame(STANDARD.encode(jpeg))))
    }

    /// Drive the session until the client closes, the stream ends, or the
    /// transport fails.
    ///
    /// Replies and keepalive probes are queued on `outbound`; a writer task
    /// owns the socket sink. The keepalive task is stopped before this
    /// returns, and `outbound` is dropped with it.
    pub async fn run<S, E>(
        mut self,
        mut inbound: S,
        outbound: mpsc::Sender<Message>,
    ) -> Result<SessionStats, LiveError>
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let keepalive = tokio::spawn(keepalive_loop(
            outbound.clone(),
            self.keepalive_interval,
            stop_rx,
        ));

        let result = loop {
            let message = match inbound.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => break Err(LiveError::Connection(e.to_string())),
                None => break Ok(()),
            };

            let reply = match message {
                Message::Text(text) => {
                    metrics::record_ws_message_received(LIVE_ENDPOINT);
                    self.handle_text(&text).await
                }
                Message::Binary(_) => {
                    self.stats.messages += 1;
                    self.stats.errors += 1;
                    Some(ServerMessage::error("Unsupported binary message"))
                }
                Message::Ping(_) | Message::Pong(_) => None,
                Message::Close(_) => break Ok(()),
            };

            if let Some(reply) = reply {
                if !send_message(&outbound, reply).await {
                    break Err(LiveError::Connection("outbound channel closed".to_string()));
                }
            }
        };

        let _ = stop_tx.send(true);
        if let Err(e) = keepalive.await {
            warn!("Keepalive task ended abnormally: {}", e);
        }

        result.map(|()| self.stats)
    }
}

/// Queue one message for the writer. Returns false once the writer is gone.
async fn send_message(tx: &mpsc::Sender<Message>, msg: ServerMessage) -> bool {
    let kind = msg.kind();
    let ok = tx.send(Message::Text(msg.to_json())).await.is_ok();
    if ok {
        metrics::record_ws_message_sent(LIVE_ENDPOINT, kind);
    }
    ok
}

/// Push a ping every `period` until stopped or the writer goes away.
async fn keepalive_loop(
    tx: mpsc::Sender<Message>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !send_message(&tx, ServerMessage::ping()).await {
                    debug!("Keepalive stopped: outbound channel closed");
                    break;
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

/// Decode a base64 frame, accepting an optional `data:` URL prefix.
pub fn decode_frame_payload(payload: &str) -> Result<Vec<u8>, LiveError> {
    let payload = payload.trim();
    let payload = match payload.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => payload,
    };

    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(LiveError::Base64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use image::{Rgb, RgbImage};
    use vblur_media::{encode_jpeg, RedactionPolicy, StaticDetector};
    use vblur_models::{BoundingBox, Detection};

    fn session_with(detector: StaticDetector) -> LiveSession {
        let processor = Arc::new(FrameProcessor::new(
            Arc::new(detector),
            RedactionPolicy::default(),
        ));
        LiveSession::new(
            processor,
            DetectOptions::with_inference_size(320),
            80,
            Duration::from_secs(5),
            Duration::from_secs(10),
        )
    }

    fn frame_message(classes: &[&str]) -> String {
        let frame = RgbImage::from_pixel(64, 48, Rgb([120, 60, 30]));
        let jpeg = encode_jpeg(&frame, 90).unwrap();
        serde_json::json!({
            "frame": STANDARD.encode(jpeg),
            "classes_no_blur": classes,
        })
        .to_string()
    }

    fn error_text(reply: Option<ServerMessage>) -> String {
        match reply {
            Some(ServerMessage::Error { error }) => error,
            other => panic!("expected error reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pong_produces_no_reply() {
        let mut session = session_with(StaticDetector::empty());
        assert!(session.handle_text(r#"{"type":"pong"}"#).await.is_none());
        assert_eq!(session.stats().errors, 0);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let mut session = session_with(StaticDetector::empty());

        assert_eq!(error_text(session.handle_text("{oops").await), "Invalid JSON data");
        assert_eq!(
            error_text(session.handle_text(r#"{"frame":"AAAA"}"#).await),
            "Missing frame or classes_no_blur"
        );
        assert_eq!(
            error_text(
                session
                    .handle_text(r#"{"frame":"@@@","classes_no_blur":["eau_vive"]}"#)
                    .await
            ),
            "Invalid base64 frame data"
        );
        assert_eq!(
            error_text(
                session
                    .handle_text(r#"{"frame":"aGVsbG8=","classes_no_blur":["eau_vive"]}"#)
                    .await
            ),
            "Invalid frame data"
        );
        assert_eq!(
            error_text(
                session
                    .handle_text(r#"{"frame":"aGVsbG8=","classes_no_blur":["  "]}"#)
                    .await
            ),
            "No classes to exclude from blurring provided"
        );
        assert_eq!(session.stats().errors, 5);
    }

    #[tokio::test]
    async fn test_detection_failure_then_success() {
        let detector = StaticDetector::new(vec![Detection::new(
            BoundingBox::new(10, 10, 40, 40),
            1,
            "cristalline",
            0.9,
        )])
        .failing_on(1);
        let mut session = session_with(detector);

        let message = frame_message(&["eau_vive"]);
        let first = error_text(session.handle_text(&message).await);
        assert!(first.starts_with("Detection failed:"), "{}", first);

        match session.handle_text(&message).await {
            Some(ServerMessage::Frame { frame }) => {
                let jpeg = STANDARD.decode(frame).unwrap();
                let decoded = vblur_media::decode_image(&jpeg).unwrap();
                assert_eq!(decoded.dimensions(), (64, 48));
            }
            other => panic!("expected frame, got {:?}", other),
        }
        assert_eq!(session.stats().frames, 1);
    }

    #[test]
    fn test_decode_frame_payload_accepts_data_url() {
        let plain = decode_frame_payload("aGVs\nbG8=").unwrap();
        assert_eq!(plain, b"hello");
        let url = decode_frame_payload("data:image/jpeg;base64,aGVsbG8=").unwrap();
        assert_eq!(url, b"hello");
    }

    #[tokio::test]
    async fn test_run_answers_each_message_in_order() {
        let session = session_with(StaticDetector::empty());
        let inbound = stream::iter(vec![
            Ok::<_, std::io::Error>(Message::Text("not json".to_string())),
            Ok(Message::Text(r#"{"type":"pong"}"#.to_string())),
            Ok(Message::Binary(vec![1, 2, 3])),
            Ok(Message::Text(frame_message(&["eau_vive"]))),
            Ok(Message::Close(None)),
            Ok(Message::Text("never read".to_string())),
        ]);
        let (tx, mut rx) = mpsc::channel(8);

        let stats = session.run(inbound, tx).await.unwrap();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.errors, 2);

        let mut replies = Vec::new();
        while let Some(Message::Text(text)) = rx.recv().await {
            replies.push(text);
        }
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], r#"{"error":"Invalid JSON data"}"#);
        assert_eq!(replies[1], r#"{"error":"Unsupported binary message"}"#);
        assert!(replies[2].starts_with(r#"{"frame":""#));
    }

    #[tokio::test]
    async fn test_run_reports_transport_error() {
        let session = session_with(StaticDetector::empty());
        let inbound = stream::iter(vec![Err::<Message, _>("connection reset")]);
        let (tx, _rx) = mpsc::channel(8);

        let result = session.run(inbound, tx).await;
        assert!(matches!(result, Err(LiveError::Connection(_))));
    }

    #[tokio::test]
    async fn test_keepalive_pings_until_stopped() {
        let (tx, mut rx) = mpsc::channel(32);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(keepalive_loop(tx, Duration::from_millis(20), stop_rx));

        tokio::time::sleep(Duration::from_millis(110)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        let mut pings = 0;
        while let Ok(Message::Text(text)) = rx.try_recv() {
            assert_eq!(text, r#"{"type":"ping"}"#);
            pings += 1;
        }
        assert!(pings >= 1, "expected at least one ping");
        assert!(rx.recv().await.is_none(), "keepalive must release the channel");
    }
}
