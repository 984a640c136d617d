//! Raw RGB24 frame pipes to and from FFmpeg.
//!
//! The decoder reads `width * height * 3` bytes per frame from FFmpeg's
//! stdout; the encoder writes frames of the same layout to FFmpeg's stdin.
//! Both children are killed if the pipe is dropped before `finish`.

use std::path::Path;
use std::process::Stdio;

use image::RgbImage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::{check_ffmpeg, collect_stderr, FfmpegCommand};
use crate::error::{MediaError, MediaResult};
use crate::probe::VideoInfo;

/// Streams decoded frames out of a video file.
pub struct RawVideoDecoder {
    child: Child,
    stdout: ChildStdout,
    stderr: JoinHandle<String>,
    width: u32,
    height: u32,
    frames_read: u64,
}

impl RawVideoDecoder {
    /// Start decoding `input`, whose geometry was probed into `info`.
    pub fn spawn(input: &Path, info: &VideoInfo) -> MediaResult<Self> {
        check_ffmpeg()?;

        // Frames come out rotated for display, matching the probed size.
        let cmd = FfmpegCommand::new(input, "-")
            .output_args(["-map", "0:v:0"])
            .raw_rgb_output()
            .without_progress();
        debug!("Spawning decoder: ffmpeg {}", cmd.build_args().join(" "));

        let mut child = cmd
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("Decoder stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("Decoder stderr not captured"))?;

        Ok(Self {
            child,
            stdout,
            stderr: collect_stderr(stderr, |_| {}),
            width: info.width,
            height: info.height,
            frames_read: 0,
        })
    }

    /// Read the next frame, or `None` at end of stream.
    pub async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        let frame_len = self.width as usize * self.height as usize * 3;
        let mut buffer = vec![0u8; frame_len];
        let mut filled = 0;

        while filled < frame_len {
            let n = self.stdout.read(&mut buffer[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < frame_len {
            warn!(
                frame = self.frames_read,
                bytes = filled,
                expected = frame_len,
                "Discarding truncated trailing frame"
            );
            return Ok(None);
        }

        self.frames_read += 1;
        RgbImage::from_raw(self.width, self.height, buffer)
            .map(Some)
            .ok_or_else(|| MediaError::internal("Frame buffer size mismatch"))
    }

    /// Frames read so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Kill the decoder and reap it.
    pub async fn abort(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }

    /// Wait for the decoder to exit after end of stream.
    pub async fn finish(mut self) -> MediaResult<u64> {
        let status = self.child.wait().await?;
        let diagnostic = self.stderr.await.unwrap_or_default();

        if !status.success() {
            return Err(MediaError::decode(format!(
                "Could not open video file: {}",
                diagnostic.trim()
            )));
        }
        Ok(self.frames_read)
    }
}

/// Encodes raw frames into an intermediate MP4.
pub struct RawVideoEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: JoinHandle<String>,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl RawVideoEncoder {
    /// Start an encoder writing `output` at the given geometry and rate.
    pub fn spawn(output: &Path, width: u32, height: u32, fps: f64) -> MediaResult<Self> {
        check_ffmpeg()?;

        let cmd = FfmpegCommand::new("-", output)
            .raw_rgb_input(width, height, fps)
            .video_filter("pad=ceil(iw/2)*2:ceil(ih/2)*2")
            .video_codec("mpeg4")
            .output_args(["-q:v", "2"])
            .without_progress();
        debug!("Spawning encoder: ffmpeg {}", cmd.build_args().join(" "));

        let mut child = cmd
            .to_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("Encoder stdin not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("Encoder stderr not captured"))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr: collect_stderr(stderr, |_| {}),
            width,
            height,
            frames_written: 0,
        })
    }

    /// Write one frame. Frames must match the encoder geometry.
    pub async fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(MediaError::encode(format!(
                "Frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("Encoder input already closed"))?;
        stdin
            .write_all(frame.as_raw())
            .await
            .map_err(|e| MediaError::encode(format!("Encoder pipe closed: {}", e)))?;

        self.frames_written += 1;
        Ok(())
    }

    /// Kill the encoder without finishing the file, and reap it.
    pub async fn abort(mut self) {
        drop(self.stdin.take());
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }

    /// Close the input and wait for the encoder to flush the file.
    pub async fn finish(mut self) -> MediaResult<u64> {
        if let Some(mut stdin) = self.stdin.take() {
            // A failed flush shows up as a non-zero exit below.
            let _ = stdin.shutdown().await;
        }

        let status = self.child.wait().await?;
        let diagnostic = self.stderr.await.unwrap_or_default();

        if !status.success() {
            return Err(MediaError::encode(format!(
                "FFmpeg exited with {:?}: {}",
                status.code(),
                diagnostic.trim()
            )));
        }

        debug!(frames = self.frames_written, "Intermediate encode finished");
        Ok(self.frames_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::probe_video;
    use image::Rgb;

    fn ffmpeg_available() -> bool {
        check_ffmpeg().is_ok() && crate::command::check_ffprobe().is_ok()
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg and ffprobe on PATH"]
    async fn test_encode_then_decode_keeps_frames() {
        assert!(ffmpeg_available(), "ffmpeg and ffprobe must be on PATH");

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pipe.mp4");

        let mut encoder = RawVideoEncoder::spawn(&path, 64, 48, 10.0).unwrap();
        for i in 0..5u8 {
            let frame = RgbImage::from_pixel(64, 48, Rgb([i * 40, 100, 200]));
            encoder.write_frame(&frame).await.unwrap();
        }
        assert_eq!(encoder.finish().await.unwrap(), 5);

        let info = probe_video(&path).await.unwrap();
        assert_eq!((info.width, info.height), (64, 48));

        let mut decoder = RawVideoDecoder::spawn(&path, &info).unwrap();
        let mut count = 0;
        while let Some(frame) = decoder.next_frame().await.unwrap() {
            assert_eq!(frame.dimensions(), (64, 48));
            count += 1;
        }
        assert_eq!(count, 5);
        assert_eq!(decoder.finish().await.unwrap(), 5);
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg and ffprobe on PATH"]
    async fn test_encoder_rejects_wrong_geometry() {
        assert!(ffmpeg_available(), "ffmpeg and ffprobe must be on PATH");

        let dir = tempfile::TempDir::new().unwrap();
        let mut encoder = RawVideoEncoder::spawn(&dir.path().join("bad.mp4"), 64, 48, 10.0).unwrap();
        let result = encoder.write_frame(&RgbImage::new(32, 32)).await;
        assert!(matches!(result, Err(MediaError::Encode(_))));
    }
}
