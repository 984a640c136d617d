//! Detector adapter.
//!
//! A `Detector` turns one RGB frame into a list of `Detection`s in frame
//! pixel coordinates. The production implementation is `YoloDetector`
//! (ONNX Runtime); `StaticDetector` returns a fixed answer and is used for
//! dry runs and tests.

pub mod labels;
pub mod yolo;

use image::RgbImage;
use vblur_models::Detection;

use crate::error::{MediaError, MediaResult};

pub use labels::{LabelTable, COCO_CLASSES};
pub use yolo::{YoloDetector, YoloDetectorConfig};

/// Per-call detection options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectOptions {
    /// Square inference size; `None` uses the detector's configured default
    pub inference_size: Option<u32>,
}

impl DetectOptions {
    /// Options with an explicit inference size.
    pub fn with_inference_size(size: u32) -> Self {
        Self {
            inference_size: Some(size),
        }
    }
}

/// Object detector over a single frame.
///
/// Implementations must not mutate the frame and must be safe to share
/// between sessions. Any failure is reported as `MediaError::Detection`.
pub trait Detector: Send + Sync {
    /// Run detection on one frame.
    fn detect(&self, frame: &RgbImage, options: &DetectOptions) -> MediaResult<Vec<Detection>>;

    /// Short name for logs.
    fn name(&self) -> &'static str {
        "detector"
    }
}

/// Detector that returns the same detections for every frame.
///
/// Optionally fails on the n-th call (1-based), which lets callers exercise
/// per-frame failure handling.
#[derive(Debug, Default)]
pub struct StaticDetector {
    detections: Vec<Detection>,
    fail_on_call: Option<usize>,
    calls: std::sync::atomic::AtomicUsize,
}

impl StaticDetector {
    /// Detector returning `detections` for every frame.
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            fail_on_call: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Detector that never finds anything.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Fail on the given call number (1-based).
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Detector for StaticDetector {
    fn detect(&self, _frame: &RgbImage, _options: &DetectOptions) -> MediaResult<Vec<Detection>> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        if self.fail_on_call == Some(call) {
            return Err(MediaError::detection(format!("model call {} failed", call)));
        }
        Ok(self.detections.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
