#![deny(unreachable_patterns)]
//! Frame redaction pipeline for video.
//!
//! This crate provides:
//! - A pluggable detector adapter with a YOLO ONNX implementation
//! - The redaction policy (classification, geometry clipping, blur, labels)
//! - The frame processor shared by batch and live drivers
//! - Type-safe FFmpeg command building, probing and raw video pipes
//! - The batch pipeline with scoped temporary artifacts

pub mod artifact;
pub mod batch;
pub mod codec;
pub mod command;
pub mod detection;
pub mod error;
pub mod probe;
pub mod processor;
pub mod progress;
pub mod redaction;
pub mod video;

pub use artifact::TempArtifact;
pub use batch::{BatchConfig, BatchPipeline, BatchStage, ProcessedVideo};
pub use codec::{decode_image, encode_jpeg, DEFAULT_JPEG_QUALITY};
pub use command::{check_ffmpeg, check_ffprobe, transcode_for_web, FfmpegCommand, FfmpegRunner};
pub use detection::{
    DetectOptions, Detector, LabelTable, StaticDetector, YoloDetector, YoloDetectorConfig,
};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use processor::FrameProcessor;
pub use progress::FfmpegProgress;
pub use redaction::{
    classify, clip_to_frame, draw_label, redact_region, BlurSettings, ClippedBox, GaussianKernel,
    LabelStyle, RedactionPolicy,
};
pub use video::{RawVideoDecoder, RawVideoEncoder};
