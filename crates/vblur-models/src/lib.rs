//! Shared data models for the VBlur redaction service.
//!
//! This crate provides Serde-serializable types for:
//! - Detections and bounding boxes produced by the detector
//! - Allow-lists of class names exempted from redaction
//! - Per-frame processing reports
//! - Live WebSocket message schemas

pub mod allow_list;
pub mod detection;
pub mod live;
pub mod report;

// Re-export common types
pub use allow_list::{AllowList, AllowListError};
pub use detection::{BoundingBox, Detection};
pub use live::{ClientMessage, ClientMessageError, FrameRequest, KeepaliveKind, ServerMessage};
pub use report::{ProcessingReport, RedactionDecision};
