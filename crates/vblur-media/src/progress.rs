//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg's `-progress` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Calculate progress percentage given total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }

    /// Apply one `key=value` line. Returns true when a progress block ends.
    pub(crate) fn apply_line(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.trim().split_once('=') else {
            return false;
        };

        match key {
            "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    self.fps = fps;
                }
            }
            "speed" => {
                // "1.5x" or "N/A"
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.speed = speed;
                }
            }
            "progress" => {
                self.is_complete = value == "end";
                return true;
            }
            _ => {}
        }

        false
    }

    /// Whether a stderr line belongs to the `-progress` key/value stream.
    pub(crate) fn is_progress_line(line: &str) -> bool {
        const KEYS: &[&str] = &[
            "frame", "fps", "stream_", "bitrate", "total_size", "out_time", "dup_frames",
            "drop_frames", "speed", "progress",
        ];
        match line.trim().split_once('=') {
            Some((key, _)) => KEYS.iter().any(|k| key.starts_with(k)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };

        assert!((progress.percentage(10000) - 50.0).abs() < 0.01);
        assert!((progress.percentage(5000) - 100.0).abs() < 0.01);
        assert_eq!(progress.percentage(0), 0.0);
    }

    #[test]
    fn test_apply_lines() {
        let mut progress = FfmpegProgress::default();

        assert!(!progress.apply_line("out_time_us=5000000"));
        assert_eq!(progress.out_time_ms, 5000);

        assert!(!progress.apply_line("speed=1.5x"));
        assert!((progress.speed - 1.5).abs() < 0.01);

        assert!(!progress.apply_line("speed=N/A"));
        assert!((progress.speed - 1.5).abs() < 0.01);

        assert!(progress.apply_line("progress=end"));
        assert!(progress.is_complete);
    }

    #[test]
    fn test_is_progress_line() {
        assert!(FfmpegProgress::is_progress_line("out_time_ms=1000"));
        assert!(FfmpegProgress::is_progress_line("stream_0_0_q=28.0"));
        assert!(!FfmpegProgress::is_progress_line("Unknown encoder 'libx264'"));
        assert!(!FfmpegProgress::is_progress_line("[mp4 @ 0x55] error=bad"));
    }
}
