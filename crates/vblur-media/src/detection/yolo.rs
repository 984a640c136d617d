//! YOLO object detection over ONNX Runtime.
//!
//! Expects a YOLOv8-style export: one `images` input of shape `[1, 3, S, S]`
//! and one `output0` tensor of shape `[1, 4 + nc, N]` where the first four
//! rows are `cx, cy, w, h` in input pixels and the rest are class scores.
//! Export with dynamic axes to allow the reduced live inference size.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info, warn};
use vblur_models::{BoundingBox, Detection};

use super::labels::LabelTable;
use super::{DetectOptions, Detector};
use crate::error::{MediaError, MediaResult};

/// Configuration for the YOLO detector.
#[derive(Debug, Clone)]
pub struct YoloDetectorConfig {
    /// Path to ONNX model file
    pub model_path: String,
    /// Optional text file of class names; falls back to model metadata, then COCO
    pub class_names_path: Option<String>,
    /// Confidence threshold for detections
    pub confidence_threshold: f32,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Default square inference size
    pub inference_size: u32,
}

impl Default for YoloDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/best.onnx".to_string(),
            class_names_path: None,
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            inference_size: 640,
        }
    }
}

/// Object detector backed by a YOLO ONNX model.
///
/// The session is loaded once and shared; inference is serialized by a mutex.
pub struct YoloDetector {
    session: Mutex<Session>,
    labels: LabelTable,
    config: YoloDetectorConfig,
}

impl YoloDetector {
    /// Load the model and its label table.
    ///
    /// Returns error if the model file doesn't exist or cannot be loaded.
    pub fn new(config: YoloDetectorConfig) -> MediaResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(MediaError::model_not_found(&config.model_path));
        }

        let session = create_session(model_path)?;

        let labels = match &config.class_names_path {
            Some(path) => LabelTable::from_file(path)?,
            None => match embedded_class_names(&session) {
                Some(raw) => LabelTable::from_model_metadata(&raw).unwrap_or_else(|e| {
                    warn!("Ignoring model class names: {}", e);
                    LabelTable::coco()
                }),
                None => LabelTable::coco(),
            },
        };

        info!(
            model_path = %config.model_path,
            inference_size = config.inference_size,
            classes = labels.len(),
            "YOLO detector initialized"
        );

        Ok(Self {
            session: Mutex::new(session),
            labels,
            config,
        })
    }

    /// The label table in use.
    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Get the configuration.
    pub fn config(&self) -> &YoloDetectorConfig {
        &self.config
    }

    /// Resize to the inference size and build an NCHW tensor normalized to [0, 1].
    fn preprocess(&self, frame: &RgbImage, size: u32) -> MediaResult<Value> {
        let resized = image::imageops::resize(frame, size, size, FilterType::Triangle);
        let (w, h) = (size as usize, size as usize);

        let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for pixel in resized.pixels() {
                chw_data.push(pixel[c] as f32 / 255.0);
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::detection(format!("Failed to create tensor: {}", e)))
    }

    /// Run inference, returning the output shape and data.
    fn run_inference(&self, input: Value) -> MediaResult<(Vec<i64>, Vec<f32>)> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::detection("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::detection(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::detection("Missing output0 tensor"))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::detection(format!("Failed to extract tensor: {}", e)))?;

        Ok((shape.iter().copied().collect(), data.to_vec()))
    }
}

impl Detector for YoloDetector {
    fn detect(&self, frame: &RgbImage, options: &DetectOptions) -> MediaResult<Vec<Detection>> {
        let size = inference_size(options.inference_size.unwrap_or(self.config.inference_size));

        let input = self.preprocess(frame, size)?;
        let (shape, data) = self.run_inference(input)?;

        let detections = decode_output(
            &shape,
            &data,
            &OutputGeometry {
                frame_width: frame.width(),
                frame_height: frame.height(),
                inference_size: size,
            },
            &self.config,
            &self.labels,
        )?;

        debug!(count = detections.len(), size, "Object detection completed");
        Ok(detections)
    }

    fn name(&self) -> &'static str {
        "yolo"
    }
}

/// Round an inference size up to the model stride.
fn inference_size(requested: u32) -> u32 {
    const STRIDE: u32 = 32;
    requested.max(STRIDE).div_ceil(STRIDE) * STRIDE
}

struct OutputGeometry {
    frame_width: u32,
    frame_height: u32,
    inference_size: u32,
}

#[derive(Debug, Clone)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class_id: usize,
    confidence: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = inter_w * inter_h;
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Parse a `[1, 4 + nc, N]` output into detections in frame pixels.
fn decode_output(
    shape: &[i64],
    data: &[f32],
    geometry: &OutputGeometry,
    config: &YoloDetectorConfig,
    labels: &LabelTable,
) -> MediaResult<Vec<Detection>> {
    let (num_features, num_boxes) = match shape {
        [1, features, boxes] if *features > 4 && *boxes >= 0 => (*features as usize, *boxes as usize),
        _ => {
            return Err(MediaError::detection(format!(
                "Unexpected output shape: {:?}",
                shape
            )))
        }
    };
    let num_classes = num_features - 4;

    let output = Array::from_shape_vec((num_features, num_boxes), data.to_vec())
        .map_err(|e| MediaError::detection(format!("Failed to reshape output: {}", e)))?;
    let rows = output.t();

    let size = geometry.inference_size as f32;
    let scale_w = geometry.frame_width as f32 / size;
    let scale_h = geometry.frame_height as f32 / size;

    let mut candidates = Vec::new();
    for i in 0..num_boxes {
        let (best_class, best_score) = (0..num_classes)
            .map(|c| (c, rows[[i, 4 + c]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if best_score.is_nan() || best_score < config.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (rows[[i, 0]], rows[[i, 1]], rows[[i, 2]], rows[[i, 3]]);
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
            return Err(MediaError::detection(format!(
                "Non-finite box coordinates for candidate {}",
                i
            )));
        }

        candidates.push(Candidate {
            x1: (cx - w / 2.0) * scale_w,
            y1: (cy - h / 2.0) * scale_h,
            x2: (cx + w / 2.0) * scale_w,
            y2: (cy + h / 2.0) * scale_h,
            class_id: best_class,
            confidence: best_score,
        });
    }

    non_maximum_suppression(candidates, config.nms_threshold)
        .into_iter()
        .map(|c| {
            let name = labels.get(c.class_id).ok_or_else(|| {
                MediaError::detection(format!(
                    "Class id {} outside label table of {} classes",
                    c.class_id,
                    labels.len()
                ))
            })?;
            let bbox = BoundingBox::new(
                c.x1.round() as i32,
                c.y1.round() as i32,
                c.x2.round() as i32,
                c.y2.round() as i32,
            );
            Ok(Detection::new(bbox, c.class_id as u32, name, c.confidence))
        })
        .collect()
}

/// Class-aware Non-Maximum Suppression.
fn non_maximum_suppression(mut candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > threshold);
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

/// Class names embedded by the exporter, if any.
fn embedded_class_names(session: &Session) -> Option<String> {
    session
        .metadata()
        .ok()
        .and_then(|meta| meta.custom("names").ok().flatten())
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for object detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> YoloDetectorConfig {
        YoloDetectorConfig::default()
    }

    fn brands() -> LabelTable {
        LabelTable::from_names(["eau_vive", "cristalline"]).unwrap()
    }

    /// Build a `[1, 6, N]` tensor from rows of `[cx, cy, w, h, s0, s1]`.
    fn tensor(rows: &[[f32; 6]]) -> (Vec<i64>, Vec<f32>) {
        let n = rows.len();
        let mut data = vec![0.0; 6 * n];
        for (i, row) in rows.iter().enumerate() {
            for (f, v) in row.iter().enumerate() {
                data[f * n + i] = *v;
            }
        }
        (vec![1, 6, n as i64], data)
    }

    fn geometry(w: u32, h: u32) -> OutputGeometry {
        OutputGeometry {
            frame_width: w,
            frame_height: h,
            inference_size: 320,
        }
    }

    #[test]
    fn test_inference_size_rounds_to_stride() {
        assert_eq!(inference_size(640), 640);
        assert_eq!(inference_size(320), 320);
        assert_eq!(inference_size(300), 320);
        assert_eq!(inference_size(0), 32);
    }

    #[test]
    fn test_decode_scales_to_frame() {
        let (shape, data) = tensor(&[[160.0, 160.0, 64.0, 32.0, 0.9, 0.1]]);
        let dets = decode_output(&shape, &data, &geometry(640, 480), &config(), &brands()).unwrap();

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_name, "eau_vive");
        assert_eq!(dets[0].bbox, BoundingBox::new(256, 216, 384, 264));
    }

    #[test]
    fn test_decode_applies_threshold_and_nms() {
        let (shape, data) = tensor(&[
            [100.0, 100.0, 40.0, 40.0, 0.9, 0.0],
            [102.0, 101.0, 40.0, 40.0, 0.8, 0.0],
            [102.0, 101.0, 40.0, 40.0, 0.0, 0.7],
            [200.0, 200.0, 40.0, 40.0, 0.1, 0.1],
        ]);
        let dets = decode_output(&shape, &data, &geometry(320, 320), &config(), &brands()).unwrap();

        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_name, "eau_vive");
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(dets[1].class_name, "cristalline");
    }

    #[test]
    fn test_decode_rejects_unknown_class() {
        let (shape, data) = tensor(&[[100.0, 100.0, 40.0, 40.0, 0.0, 0.9]]);
        let one_class = LabelTable::from_names(["eau_vive"]).unwrap();
        let result = decode_output(&shape, &data, &geometry(320, 320), &config(), &one_class);
        assert!(matches!(result, Err(MediaError::Detection(_))));
    }

    #[test]
    fn test_decode_rejects_bad_shape_and_coordinates() {
        let result = decode_output(&[1, 84], &[], &geometry(320, 320), &config(), &brands());
        assert!(matches!(result, Err(MediaError::Detection(_))));

        let (shape, data) = tensor(&[[f32::NAN, 100.0, 40.0, 40.0, 0.9, 0.0]]);
        let result = decode_output(&shape, &data, &geometry(320, 320), &config(), &brands());
        assert!(matches!(result, Err(MediaError::Detection(_))));
    }

    #[test]
    fn test_missing_model() {
        let result = YoloDetector::new(YoloDetectorConfig {
            model_path: "/nonexistent/model.onnx".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(MediaError::ModelNotFound(_))));
    }
}
