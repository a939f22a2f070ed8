//! ffmpeg HLS encoder driver.
//!
//! Renditions are produced sequentially from the same source file to avoid
//! read contention on the blob. A per-rendition failure is logged and
//! skipped; the caller only fails hard when nothing encoded at all.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::probe::{probe_source, SourceInfo};
use super::Rendition;
use crate::config::TranscodeConfig;
use crate::error::{Error, Result};

/// Closed GOP length in frames (2 x nominal fps).
const GOP_SIZE: u32 = 48;

const AUDIO_BITRATE: &str = "128k";

/// Ceiling for the thumbnail extraction, which should take seconds.
const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encoder exited with {status}: {stderr}")]
    Failed {
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("encoder timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to run encoder: {0}")]
    Io(#[from] std::io::Error),
}

/// Drives ffmpeg/ffprobe. Tool paths come from config overrides or PATH
/// discovery.
pub struct HlsEncoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    segment_seconds: u32,
    preset: String,
    rendition_timeout: Duration,
}

impl HlsEncoder {
    pub fn from_config(config: &TranscodeConfig) -> anyhow::Result<Self> {
        let ffmpeg = match &config.ffmpeg_path {
            Some(path) => path.clone(),
            None => which::which("ffmpeg")?,
        };
        let ffprobe = match &config.ffprobe_path {
            Some(path) => path.clone(),
            None => which::which("ffprobe")?,
        };

        Ok(Self {
            ffmpeg,
            ffprobe,
            segment_seconds: config.segment_seconds,
            preset: config.preset.clone(),
            rendition_timeout: Duration::from_secs(config.rendition_timeout_secs),
        })
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe_path(&self) -> &Path {
        &self.ffprobe
    }

    pub async fn probe(&self, input: &Path) -> Result<SourceInfo> {
        probe_source(&self.ffprobe, input).await
    }

    /// Encode every rung sequentially, returning those that succeeded in
    /// ladder order. Raises `AllRenditionsFailed` when the result would be
    /// empty.
    pub async fn encode_ladder(
        &self,
        input: &Path,
        out_dir: &Path,
        ladder: &[Rendition],
    ) -> Result<Vec<Rendition>> {
        let mut succeeded = Vec::new();
        for rendition in ladder {
            match self.encode_rendition(input, out_dir, rendition).await {
                Ok(()) => {
                    info!(rendition = %rendition.name, "rendition encoded");
                    succeeded.push(rendition.clone());
                }
                Err(e) => {
                    warn!(rendition = %rendition.name, error = %e, "rendition failed, skipping");
                }
            }
        }

        if succeeded.is_empty() {
            return Err(Error::AllRenditionsFailed);
        }
        Ok(succeeded)
    }

    /// Produce `<out>/<name>.m3u8` plus `<out>/<name>_NNN.ts`.
    async fn encode_rendition(
        &self,
        input: &Path,
        out_dir: &Path,
        rendition: &Rendition,
    ) -> std::result::Result<(), EncodeError> {
        let playlist = out_dir.join(rendition.playlist_name());
        let segment_pattern = out_dir.join(format!("{}_%03d.ts", rendition.name));

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner")
            .args(["-loglevel", "error"])
            .arg("-y")
            .arg("-i")
            .arg(input)
            // Scale to the target height preserving aspect ratio; -2 keeps
            // the computed width even.
            .args(["-vf", &format!("scale=-2:{}", rendition.height)])
            .args(["-c:v", "libx264"])
            .args(["-preset", &self.preset])
            .args(["-b:v", &rendition.bitrate_arg()])
            .args(["-maxrate", &rendition.bitrate_arg()])
            .args(["-bufsize", &format!("{}k", rendition.bitrate_kbps * 2)])
            // Closed, fixed-size GOPs so segments decode independently.
            .args(["-g", &GOP_SIZE.to_string()])
            .args(["-keyint_min", &GOP_SIZE.to_string()])
            .args(["-sc_threshold", "0"])
            .args(["-c:a", "aac"])
            .args(["-b:a", AUDIO_BITRATE])
            .args(["-ac", "2"])
            // The container format is named explicitly; filename inference
            // is not trusted.
            .args(["-f", "hls"])
            .args(["-hls_time", &self.segment_seconds.to_string()])
            .args(["-hls_playlist_type", "vod"])
            .args(["-hls_flags", "independent_segments"])
            .arg("-hls_segment_filename")
            .arg(&segment_pattern)
            .arg(&playlist);

        debug!(rendition = %rendition.name, ?cmd, "running ffmpeg");
        self.run_bounded(cmd, self.rendition_timeout).await
    }

    /// Single JPEG at 10% of the duration. Callers treat failure as
    /// non-fatal.
    pub async fn generate_thumbnail(
        &self,
        input: &Path,
        out_dir: &Path,
        duration_secs: f64,
    ) -> std::result::Result<PathBuf, EncodeError> {
        let out = out_dir.join("thumbnail.jpg");
        let seek = (duration_secs * 0.1).max(0.0);

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner")
            .args(["-loglevel", "error"])
            .arg("-y")
            .args(["-ss", &format!("{seek:.3}")])
            .arg("-i")
            .arg(input)
            .args(["-frames:v", "1"])
            .args(["-q:v", "4"])
            .arg(&out);

        self.run_bounded(cmd, THUMBNAIL_TIMEOUT).await?;
        Ok(out)
    }

    /// Run a command with a wall-clock ceiling. On timeout the child is
    /// killed (kill_on_drop) and the error reported as such.
    async fn run_bounded(
        &self,
        mut cmd: Command,
        ceiling: Duration,
    ) -> std::result::Result<(), EncodeError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        let output = tokio::time::timeout(ceiling, child.wait_with_output())
            .await
            .map_err(|_| EncodeError::Timeout(ceiling))??;

        if !output.status.success() {
            return Err(EncodeError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::derive_ladder;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn encoder_with(ffmpeg: PathBuf) -> HlsEncoder {
        HlsEncoder {
            ffprobe: ffmpeg.clone(),
            ffmpeg,
            segment_seconds: 4,
            preset: "veryfast".to_string(),
            rendition_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn failing_renditions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // Fails for the 1080p invocation only, succeeds otherwise.
        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            "#!/bin/sh\ncase \"$*\" in *1080p*) exit 1 ;; esac\nexit 0\n",
        );
        let enc = encoder_with(ffmpeg);

        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"x").unwrap();
        let out = dir.path().join("hls");
        std::fs::create_dir(&out).unwrap();

        let ladder = derive_ladder(1080);
        let ok = enc.encode_ladder(&input, &out, &ladder).await.unwrap();
        let names: Vec<_> = ok.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["720p", "480p", "360p"]);
    }

    #[tokio::test]
    async fn empty_result_is_all_renditions_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", "#!/bin/sh\nexit 1\n");
        let enc = encoder_with(ffmpeg);

        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"x").unwrap();

        let ladder = derive_ladder(720);
        let err = enc
            .encode_ladder(&input, dir.path(), &ladder)
            .await
            .unwrap_err();
        assert_matches::assert_matches!(err, Error::AllRenditionsFailed);
    }

    #[tokio::test]
    async fn hung_encoder_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", "#!/bin/sh\nsleep 30\n");
        let mut enc = encoder_with(ffmpeg);
        enc.rendition_timeout = Duration::from_millis(200);

        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"x").unwrap();

        let ladder = derive_ladder(240);
        let err = enc
            .encode_ladder(&input, dir.path(), &ladder)
            .await
            .unwrap_err();
        // The only rendition timed out, so nothing encoded.
        assert_matches::assert_matches!(err, Error::AllRenditionsFailed);
    }

    #[tokio::test]
    async fn thumbnail_failure_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = write_script(dir.path(), "ffmpeg", "#!/bin/sh\nexit 1\n");
        let enc = encoder_with(ffmpeg);

        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"x").unwrap();

        let result = enc.generate_thumbnail(&input, dir.path(), 30.0).await;
        assert!(result.is_err());
    }
}
