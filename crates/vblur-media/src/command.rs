//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path (`-` for stdin)
    input: PathBuf,
    /// Output file path (`-` for stdout)
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Whether to emit `-progress pipe:2`
    progress: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            progress: true,
        }
    }

    /// Add input arguments (before -i).
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Declare a raw RGB24 input stream of the given geometry.
    pub fn raw_rgb_input(self, width: u32, height: u32, fps: f64) -> Self {
        self.input_args([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            format!("{:.3}", fps),
        ])
    }

    /// Emit raw RGB24 frames, dropping audio.
    pub fn raw_rgb_output(self) -> Self {
        self.output_args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24"])
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set output pixel format.
    pub fn pixel_format(self, pix_fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(pix_fmt)
    }

    /// Move the moov atom to the front so playback can start before download completes.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Disable `-progress` reporting (used for pipe commands).
    pub fn without_progress(mut self) -> Self {
        self.progress = false;
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-v".to_string());
        args.push("error".to_string());

        if self.progress {
            args.push("-progress".to_string());
            args.push("pipe:2".to_string());
        }

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Build a tokio command for this invocation; the child is killed when dropped.
    pub(crate) fn to_command(&self) -> Command {
        let mut command = Command::new("ffmpeg");
        command.args(self.build_args()).kill_on_drop(true);
        command
    }
}

/// Runner for FFmpeg commands with progress tracking and timeout.
#[derive(Debug, Default)]
pub struct FfmpegRunner {
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { timeout_secs: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command with progress callback.
    ///
    /// On a non-zero exit the error carries every stderr line that was not
    /// part of the progress stream.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = cmd
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        let collector = collect_stderr(stderr, progress_callback);

        let status = self.wait_for_completion(&mut child).await;
        let diagnostic = collector.await.unwrap_or_default();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(MediaError::transcode(
                "FFmpeg exited with non-zero status",
                Some(diagnostic),
                status.code(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Wait for child process with optional timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<std::process::ExitStatus> {
        let Some(timeout_secs) = self.timeout_secs else {
            return Ok(child.wait().await?);
        };

        match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!("FFmpeg timed out after {} seconds, killing process", timeout_secs);
                let _ = child.kill().await;
                Err(MediaError::Timeout(timeout_secs))
            }
        }
    }
}

/// Drain a child's stderr, forwarding progress blocks and keeping everything else.
pub(crate) fn collect_stderr<F>(stderr: ChildStderr, progress_callback: F) -> JoinHandle<String>
where
    F: Fn(FfmpegProgress) + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        let mut current = FfmpegProgress::default();
        let mut diagnostic = Vec::new();

        while let Ok(Some(line)) = reader.next_line().await {
            if FfmpegProgress::is_progress_line(&line) {
                if current.apply_line(&line) {
                    progress_callback(current.clone());
                }
            } else if !line.trim().is_empty() {
                diagnostic.push(line);
            }
        }

        diagnostic.join("\n")
    })
}

/// Re-encode a video to H.264/AAC MP4 with a fast-start layout.
pub async fn transcode_for_web(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    timeout_secs: Option<u64>,
    duration_ms: i64,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(input, output)
        .video_codec("libx264")
        .pixel_format("yuv420p")
        .audio_codec("aac")
        .faststart();

    let mut runner = FfmpegRunner::new();
    if let Some(secs) = timeout_secs {
        runner = runner.with_timeout(secs);
    }

    runner
        .run_with_progress(&cmd, move |progress| {
            debug!(
                frame = progress.frame,
                percent = format!("{:.1}", progress.percentage(duration_ms)),
                speed = progress.speed,
                "Transcode progress"
            );
        })
        .await?;

    info!("FFmpeg transcode completed");
    Ok(())
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcode_args() {
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4")
            .video_codec("libx264")
            .pixel_format("yuv420p")
            .audio_codec("aac")
            .faststart();

        let args = cmd.build_args();
        assert_eq!(args.first().map(String::as_str), Some("-y"));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-movflags", "+faststart"]));
        assert!(args.windows(2).any(|w| w == ["-progress", "pipe:2"]));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_raw_pipe_args() {
        let decode = FfmpegCommand::new("in.mp4", "-")
            .output_args(["-map", "0:v:0"])
            .raw_rgb_output()
            .without_progress();
        let args = decode.build_args();
        assert!(!args.contains(&"-progress".to_string()));
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        let map_pos = args.iter().position(|a| a == "-map").unwrap();
        assert!(input_pos < map_pos);
        assert_eq!(args[map_pos + 1], "0:v:0");
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
        assert_eq!(args.last().map(String::as_str), Some("-"));

        let encode = FfmpegCommand::new("-", "out.mp4").raw_rgb_input(64, 48, 25.0);
        let args = encode.build_args();
        let size_pos = args.iter().position(|a| a == "64x48").unwrap();
        assert!(size_pos < args.iter().position(|a| a == "-i").unwrap());
        assert!(args.windows(2).any(|w| w == ["-r", "25.000"]));
    }
}
