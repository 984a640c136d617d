//! API configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vblur_media::{BatchConfig, DetectOptions, YoloDetectorConfig, DEFAULT_JPEG_QUALITY};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max upload size in bytes
    pub max_upload_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// ONNX model path
    pub model_path: String,
    /// Optional class names file, one name per line
    pub class_names_path: Option<String>,
    /// TrueType font overriding the bundled label font
    pub label_font_path: Option<String>,
    /// Detection confidence threshold
    pub confidence_threshold: f32,
    /// NMS IoU threshold
    pub nms_threshold: f32,
    /// Inference size for uploaded videos
    pub batch_inference_size: u32,
    /// Inference size for live frames
    pub live_inference_size: u32,
    /// Interval between live keepalive pings
    pub keepalive_interval: Duration,
    /// Bound on one frame's detection and redaction
    pub detect_timeout: Duration,
    /// Bound on the final transcode (seconds)
    pub transcode_timeout_secs: Option<u64>,
    /// JPEG quality for live responses
    pub jpeg_quality: u8,
    /// Directory for temporary files
    pub temp_dir: PathBuf,
    /// Whether `/metrics` is served
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: default_cors_origins(),
            max_upload_size: 500 * 1024 * 1024, // 500MB
            environment: "development".to_string(),
            model_path: "models/best.onnx".to_string(),
            class_names_path: None,
            label_font_path: None,
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            batch_inference_size: 640,
            live_inference_size: 320,
            keepalive_interval: Duration::from_secs(10),
            detect_timeout: Duration::from_secs(30),
            transcode_timeout_secs: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            temp_dir: std::env::temp_dir().join("vblur"),
            metrics_enabled: true,
        }
    }
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:3000".to_string(),
    ]
}

/// Parse an environment variable, falling back to `default` when unset or invalid.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_or("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            max_upload_size: env_or("MAX_UPLOAD_SIZE", defaults.max_upload_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            model_path: env_opt("MODEL_PATH").unwrap_or(defaults.model_path),
            class_names_path: env_opt("CLASS_NAMES_PATH"),
            label_font_path: env_opt("LABEL_FONT_PATH"),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            nms_threshold: env_or("NMS_THRESHOLD", defaults.nms_threshold),
            batch_inference_size: env_or("BATCH_INFERENCE_SIZE", defaults.batch_inference_size),
            live_inference_size: env_or("LIVE_INFERENCE_SIZE", defaults.live_inference_size),
            keepalive_interval: Duration::from_secs(
                env_or("KEEPALIVE_INTERVAL_SECS", 10u64).max(1),
            ),
            detect_timeout: Duration::from_secs(env_or("DETECT_TIMEOUT_SECS", 30u64).max(1)),
            transcode_timeout_secs: env_opt("TRANSCODE_TIMEOUT_SECS").and_then(|s| s.parse().ok()),
            jpeg_quality: env_or("JPEG_QUALITY", defaults.jpeg_quality).clamp(1, 100),
            temp_dir: env_opt("TEMP_DIR").map(PathBuf::from).unwrap_or(defaults.temp_dir),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    /// Detector settings.
    pub fn detector_config(&self) -> YoloDetectorConfig {
        YoloDetectorConfig {
            model_path: self.model_path.clone(),
            class_names_path: self.class_names_path.clone(),
            confidence_threshold: self.confidence_threshold,
            nms_threshold: self.nms_threshold,
            inference_size: self.batch_inference_size,
        }
    }

    /// Batch pipeline settings.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            temp_dir: self.temp_dir.clone(),
            detect_options: DetectOptions::with_inference_size(self.batch_inference_size),
            detect_timeout: self.detect_timeout,
            transcode_timeout_secs: self.transcode_timeout_secs,
        }
    }

    /// Detection options for live frames.
    pub fn live_detect_options(&self) -> DetectOptions {
        DetectOptions::with_inference_size(self.live_inference_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.cors_origins.len(), 2);
        assert_eq!(config.keepalive_interval, Duration::from_secs(10));
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.live_detect_options().inference_size, Some(320));
        assert_eq!(config.batch_config().detect_options.inference_size, Some(640));
        assert!(!config.is_production());

        let production = ApiConfig {
            environment: "PRODUCTION".to_string(),
            ..Default::default()
        };
        assert!(production.is_production());
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("VBLUR_TEST_PORT", "not-a-port");
        assert_eq!(env_or("VBLUR_TEST_PORT", 8000u16), 8000);
        std::env::set_var("VBLUR_TEST_PORT", " 9000 ");
        assert_eq!(env_or("VBLUR_TEST_PORT", 8000u16), 9000);
        std::env::remove_var("VBLUR_TEST_PORT");
    }
}
