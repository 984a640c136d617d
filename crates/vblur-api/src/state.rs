//! Application state.

use std::sync::Arc;

use tracing::{info, warn};
use vblur_media::{
    BatchPipeline, BlurSettings, Detector, FrameProcessor, LabelStyle, MediaResult,
    RedactionPolicy, YoloDetector,
};

use crate::config::ApiConfig;

/// Shared application state.
///
/// The only state shared between requests and live sessions is the
/// read-only frame processor.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub processor: Arc<FrameProcessor>,
    pub batch: Arc<BatchPipeline>,
}

impl AppState {
    /// Create new application state, loading the detection model.
    pub fn new(config: ApiConfig) -> MediaResult<Self> {
        let detector = YoloDetector::new(config.detector_config())?;
        info!(
            model = %config.model_path,
            classes = detector.labels().len(),
            "Detector loaded"
        );
        Self::with_detector(config, Arc::new(detector))
    }

    /// Create state around an existing detector.
    pub fn with_detector(config: ApiConfig, detector: Arc<dyn Detector>) -> MediaResult<Self> {
        let label = match &config.label_font_path {
            Some(path) => LabelStyle::with_font_file(path)?,
            None => LabelStyle::default(),
        };
        if label.font.is_none() {
            warn!("No usable label font, labels are drawn without text");
        }

        let policy = RedactionPolicy::new(BlurSettings::default(), label);
        let processor = Arc::new(FrameProcessor::new(detector, policy));
        let batch = Arc::new(BatchPipeline::new(
            Arc::clone(&processor),
            config.batch_config(),
        ));

        Ok(Self {
            config,
            processor,
            batch,
        })
    }
}
