//! Per-frame detection and redaction shared by the batch and live drivers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::debug;
use vblur_models::{AllowList, ProcessingReport};

use crate::codec::{decode_image, encode_jpeg};
use crate::detection::{DetectOptions, Detector};
use crate::error::{MediaError, MediaResult};
use crate::redaction::RedactionPolicy;

/// Runs one detector call per frame and applies the redaction policy to
/// every detection.
pub struct FrameProcessor {
    detector: Arc<dyn Detector>,
    policy: RedactionPolicy,
}

impl FrameProcessor {
    pub fn new(detector: Arc<dyn Detector>, policy: RedactionPolicy) -> Self {
        Self { detector, policy }
    }

    /// Name of the underlying detector.
    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Detect and redact one frame.
    ///
    /// The returned frame has the same dimensions as the input. A detector
    /// failure aborts this frame only and is reported as `MediaError::Detection`.
    pub fn process(
        &self,
        mut frame: RgbImage,
        allow_list: &AllowList,
        options: &DetectOptions,
    ) -> MediaResult<(RgbImage, ProcessingReport)> {
        let started = Instant::now();

        let detections = self.detector.detect(&frame, options).map_err(|e| match e {
            MediaError::Detection(_) => e,
            other => MediaError::detection(other.to_string()),
        })?;
        let detect_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut report = ProcessingReport {
            detections: detections.len(),
            detect_ms,
            ..Default::default()
        };

        for detection in &detections {
            match self.policy.apply(&mut frame, detection, allow_list) {
                Some(decision) => report.record(decision),
                None => report.skipped += 1,
            }
        }

        report.total_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(
            detections = report.detections,
            redacted = report.redacted,
            annotated = report.annotated,
            skipped = report.skipped,
            total_ms = format!("{:.1}", report.total_ms),
            "Frame processed"
        );

        Ok((frame, report))
    }

    /// Decode an encoded image, process it, and re-encode it as JPEG.
    pub fn process_jpeg(
        &self,
        bytes: &[u8],
        allow_list: &AllowList,
        options: &DetectOptions,
        quality: u8,
    ) -> MediaResult<(Vec<u8>, ProcessingReport)> {
        let frame = decode_image(bytes)?;
        let (frame, report) = self.process(frame, allow_list, options)?;
        let encoded = encode_jpeg(&frame, quality)?;
        Ok((encoded, report))
    }

    /// Run `process` on the blocking pool, bounded by `timeout`.
    pub async fn process_blocking(
        self: &Arc<Self>,
        frame: RgbImage,
        allow_list: AllowList,
        options: DetectOptions,
        timeout: Duration,
    ) -> MediaResult<(RgbImage, ProcessingReport)> {
        let processor = Arc::clone(self);
        run_blocking(timeout, move || processor.process(frame, &allow_list, &options)).await
    }

    /// Run `process_jpeg` on the blocking pool, bounded by `timeout`.
    pub async fn process_jpeg_blocking(
        self: &Arc<Self>,
        bytes: Vec<u8>,
        allow_list: AllowList,
        options: DetectOptions,
        quality: u8,
        timeout: Duration,
    ) -> MediaResult<(Vec<u8>, ProcessingReport)> {
        let processor = Arc::clone(self);
        run_blocking(timeout, move || {
            processor.process_jpeg(&bytes, &allow_list, &options, quality)
        })
        .await
    }
}

async fn run_blocking<T, F>(timeout: Duration, work: F) -> MediaResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> MediaResult<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(MediaError::internal(format!(
            "Frame processing task failed: {}",
            join_err
        ))),
        Err(_) => Err(MediaError::Timeout(timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DEFAULT_JPEG_QUALITY;
    use crate::detection::StaticDetector;
    use image::Rgb;
    use vblur_models::{BoundingBox, Detection};

    struct BrokenDetector;

    impl Detector for BrokenDetector {
        fn detect(&self, _frame: &RgbImage, _options: &DetectOptions) -> MediaResult<Vec<Detection>> {
            Err(MediaError::internal("session lost"))
        }
    }

    struct SlowDetector;

    impl Detector for SlowDetector {
        fn detect(&self, _frame: &RgbImage, _options: &DetectOptions) -> MediaResult<Vec<Detection>> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Vec::new())
        }
    }

    fn processor(detections: Vec<Detection>) -> FrameProcessor {
        FrameProcessor::new(
            Arc::new(StaticDetector::new(detections)),
            RedactionPolicy::default(),
        )
    }

    fn allow() -> AllowList {
        AllowList::parse(["eau_vive"]).unwrap()
    }

    #[test]
    fn test_process_counts_decisions() {
        let processor = processor(vec![
            Detection::new(BoundingBox::new(5, 30, 25, 55), 0, "eau_vive", 0.9),
            Detection::new(BoundingBox::new(40, 30, 70, 55), 1, "cristalline", 0.8),
            Detection::new(BoundingBox::new(200, 200, 300, 300), 1, "cristalline", 0.7),
        ]);

        let frame = RgbImage::from_pixel(80, 60, Rgb([10, 20, 30]));
        let (out, report) = processor
            .process(frame, &allow(), &DetectOptions::default())
            .unwrap();

        assert_eq!(out.dimensions(), (80, 60));
        assert_eq!(report.detections, 3);
        assert_eq!(report.annotated, 1);
        assert_eq!(report.redacted, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.total_ms >= report.detect_ms);
    }

    #[test]
    fn test_detector_failure_is_detection_error() {
        let processor = FrameProcessor::new(Arc::new(BrokenDetector), RedactionPolicy::default());
        let result = processor.process(RgbImage::new(8, 8), &allow(), &DetectOptions::default());

        match result {
            Err(MediaError::Detection(message)) => assert!(message.contains("session lost")),
            other => panic!("expected detection error, got {:?}", other.map(|(_, r)| r)),
        }
    }

    #[test]
    fn test_process_jpeg_without_detections() {
        let processor = processor(Vec::new());
        let frame = RgbImage::from_pixel(32, 24, Rgb([200, 100, 50]));
        let input = encode_jpeg(&frame, 95).unwrap();

        let (output, report) = processor
            .process_jpeg(&input, &allow(), &DetectOptions::default(), DEFAULT_JPEG_QUALITY)
            .unwrap();

        assert_eq!(report.detections, 0);
        let decoded = decode_image(&output).unwrap();
        assert_eq!(decoded.dimensions(), (32, 24));
        let px = decoded.get_pixel(16, 12);
        for (got, want) in px.0.iter().zip([200u8, 100, 50]) {
            assert!((*got as i32 - want as i32).abs() <= 10);
        }
    }

    #[test]
    fn test_process_jpeg_rejects_garbage() {
        let processor = processor(Vec::new());
        let result = processor.process_jpeg(b"garbage", &allow(), &DetectOptions::default(), 80);
        assert!(matches!(result, Err(MediaError::Decode(_))));
    }

    #[tokio::test]
    async fn test_process_blocking_times_out() {
        let processor = Arc::new(FrameProcessor::new(Arc::new(SlowDetector), RedactionPolicy::default()));
        let result = processor
            .process_blocking(
                RgbImage::new(8, 8),
                allow(),
                DetectOptions::default(),
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(MediaError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_process_blocking_returns_frame() {
        let processor = Arc::new(processor(Vec::new()));
        let (frame, _) = processor
            .process_blocking(
                RgbImage::new(16, 9),
                allow(),
                DetectOptions::with_inference_size(320),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(frame.dimensions(), (16, 9));
    }
}
