//! Batch redaction of an uploaded video.
//!
//! Pipeline: persist upload -> probe -> decode raw frames -> process each
//! frame -> encode intermediate MP4 -> transcode for web -> stream.
//!
//! Every file on disk is a `TempArtifact`, so the input, intermediate and
//! final files are removed on success, on failure, and when the client
//! disconnects mid-download.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, Stream};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use vblur_models::{AllowList, ProcessingReport};

use crate::artifact::TempArtifact;
use crate::command::transcode_for_web;
use crate::detection::DetectOptions;
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};
use crate::processor::FrameProcessor;
use crate::video::{RawVideoDecoder, RawVideoEncoder};

/// Chunk size used when streaming the final video.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Batch pipeline configuration.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Directory for temporary artifacts
    pub temp_dir: PathBuf,
    /// Detection options for every frame
    pub detect_options: DetectOptions,
    /// Bound on one frame's detection and redaction
    pub detect_timeout: Duration,
    /// Bound on the final transcode
    pub transcode_timeout_secs: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("vblur"),
            detect_options: DetectOptions::default(),
            detect_timeout: Duration::from_secs(30),
            transcode_timeout_secs: None,
        }
    }
}

/// Stage of a batch request, logged on each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStage {
    Received,
    Decoding,
    Processing,
    Encoding,
    Transcoding,
    Streaming,
    Cleanup,
    Completed,
    Failed,
}

impl BatchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStage::Received => "received",
            BatchStage::Decoding => "decoding",
            BatchStage::Processing => "processing",
            BatchStage::Encoding => "encoding",
            BatchStage::Transcoding => "transcoding",
            BatchStage::Streaming => "streaming",
            BatchStage::Cleanup => "cleanup",
            BatchStage::Completed => "completed",
            BatchStage::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finished video ready to be streamed to the client.
#[derive(Debug)]
pub struct ProcessedVideo {
    artifact: TempArtifact,
    /// Frames processed
    pub frames: u64,
    /// Detection totals over all frames
    pub report: ProcessingReport,
    /// Size of the final file in bytes
    pub size: u64,
}

enum StreamState {
    Unopened(TempArtifact),
    Reading(tokio::fs::File, TempArtifact),
    Done,
}

impl ProcessedVideo {
    /// Path of the final file.
    pub fn path(&self) -> &Path {
        self.artifact.path()
    }

    /// Stream the file in chunks.
    ///
    /// The stream owns the artifact: the file is removed once the stream is
    /// exhausted or dropped.
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
        stream::unfold(StreamState::Unopened(self.artifact), |state| async move {
            match state {
                StreamState::Unopened(artifact) => match tokio::fs::File::open(artifact.path()).await {
                    Ok(file) => read_chunk(file, artifact).await,
                    Err(e) => Some((Err(e), StreamState::Done)),
                },
                StreamState::Reading(file, artifact) => read_chunk(file, artifact).await,
                StreamState::Done => None,
            }
        })
    }
}

async fn read_chunk(
    mut file: tokio::fs::File,
    artifact: TempArtifact,
) -> Option<(std::io::Result<Vec<u8>>, StreamState)> {
    let mut buffer = vec![0u8; STREAM_CHUNK_SIZE];
    match file.read(&mut buffer).await {
        Ok(0) => {
            drop(file);
            debug!(stage = %BatchStage::Cleanup, "Final video streamed");
            drop(artifact);
            None
        }
        Ok(n) => {
            buffer.truncate(n);
            Some((Ok(buffer), StreamState::Reading(file, artifact)))
        }
        Err(e) => Some((Err(e), StreamState::Done)),
    }
}

/// Redacts whole videos with a shared frame processor.
pub struct BatchPipeline {
    processor: Arc<FrameProcessor>,
    config: BatchConfig,
}

impl BatchPipeline {
    pub fn new(processor: Arc<FrameProcessor>, config: BatchConfig) -> Self {
        Self { processor, config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Redact every frame of `video`, leaving classes in `classes_no_blur` intact.
    ///
    /// The allow-list is validated before any file is written. Any failure
    /// removes every temporary file before returning.
    pub async fn run<S: AsRef<str>>(
        &self,
        video: &[u8],
        classes_no_blur: &[S],
    ) -> MediaResult<ProcessedVideo> {
        let started = Instant::now();
        let result = self.run_stages(video, classes_no_blur).await;

        match &result {
            Ok(output) => info!(
                stage = %BatchStage::Completed,
                frames = output.frames,
                redacted = output.report.redacted,
                annotated = output.report.annotated,
                skipped = output.report.skipped,
                size = output.size,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Batch redaction finished"
            ),
            Err(e) => warn!(
                stage = %BatchStage::Failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Batch redaction failed: {}",
                e
            ),
        }

        result
    }

    async fn run_stages<S: AsRef<str>>(
        &self,
        video: &[u8],
        classes_no_blur: &[S],
    ) -> MediaResult<ProcessedVideo> {
        let allow_list = AllowList::parse(classes_no_blur.iter().map(|s| s.as_ref()))?;
        if video.is_empty() {
            return Err(MediaError::invalid_input("Uploaded video is empty"));
        }

        info!(
            stage = %BatchStage::Received,
            bytes = video.len(),
            classes_no_blur = %allow_list,
            "Batch request received"
        );
        let input = TempArtifact::create_with(&self.config.temp_dir, "input", ".mp4", video).await?;

        debug!(stage = %BatchStage::Decoding, "Probing upload");
        let info = probe_video(input.path()).await?;
        info!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            codec = %info.codec,
            "Video opened"
        );

        let intermediate = TempArtifact::create(&self.config.temp_dir, "intermediate", ".mp4")?;
        let (frames, report) = self
            .redact_frames(input.path(), intermediate.path(), &info, &allow_list)
            .await?;
        drop(input);

        info!(stage = %BatchStage::Transcoding, frames, "Transcoding for web playback");
        let output = TempArtifact::create(&self.config.temp_dir, "final", ".mp4")?;
        let transcode_started = Instant::now();
        transcode_for_web(
            intermediate.path(),
            output.path(),
            self.config.transcode_timeout_secs,
            info.duration_ms(),
        )
        .await?;
        debug!(
            elapsed_ms = transcode_started.elapsed().as_millis() as u64,
            "Transcode finished"
        );
        drop(intermediate);

        let size = match output.size().await {
            Some(size) if size > 0 => size,
            _ => return Err(MediaError::MissingArtifact(output.path().to_path_buf())),
        };

        info!(stage = %BatchStage::Streaming, size, "Final video ready");
        Ok(ProcessedVideo {
            artifact: output,
            frames,
            report,
            size,
        })
    }

    /// Decode, process and re-encode every frame.
    ///
    /// On any failure both child processes are killed and reaped before the
    /// error is returned.
    async fn redact_frames(
        &self,
        input: &Path,
        intermediate: &Path,
        info: &VideoInfo,
        allow_list: &AllowList,
    ) -> MediaResult<(u64, ProcessingReport)> {
        let mut decoder = RawVideoDecoder::spawn(input, info)?;
        let mut encoder = match RawVideoEncoder::spawn(intermediate, info.width, info.height, info.fps) {
            Ok(encoder) => encoder,
            Err(e) => {
                decoder.abort().await;
                return Err(e);
            }
        };

        debug!(stage = %BatchStage::Processing, "Processing frames");
        let mut total = ProcessingReport::default();
        let looped = self
            .process_frames(&mut decoder, &mut encoder, allow_list, &mut total)
            .await;

        if let Err(e) = looped {
            decoder.abort().await;
            encoder.abort().await;
            return Err(e);
        }

        let decoded = decoder.finish().await;
        debug!(stage = %BatchStage::Encoding, "Finalizing intermediate video");
        let frames = encoder.finish().await?;

        match decoded {
            Ok(_) if frames == 0 => Err(MediaError::decode(
                "Could not open video file: no frames decoded",
            )),
            Ok(_) => Ok((frames, total)),
            Err(e) if frames == 0 => Err(e),
            Err(e) => {
                warn!(frames, "Decoder exited with an error after the last frame: {}", e);
                Ok((frames, total))
            }
        }
    }

    async fn process_frames(
        &self,
        decoder: &mut RawVideoDecoder,
        encoder: &mut RawVideoEncoder,
        allow_list: &AllowList,
        total: &mut ProcessingReport,
    ) -> MediaResult<()> {
        while let Some(frame) = decoder.next_frame().await? {
            let index = decoder.frames_read();
            let (frame, report) = self
                .processor
                .process_blocking(
                    frame,
                    allow_list.clone(),
                    self.config.detect_options,
                    self.config.detect_timeout,
                )
                .await
                .map_err(|e| match e {
                    MediaError::Timeout(secs) => {
                        MediaError::detection(format!("frame {} timed out after {}s", index, secs))
                    }
                    other => other,
                })?;

            encoder.write_frame(&frame).await?;
            total.accumulate(&report);

            if index % 100 == 0 {
                debug!(frame = index, redacted = total.redacted, "Batch progress");
            }
        }
        Ok(())
    }
}
