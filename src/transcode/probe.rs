//! Source probing via ffprobe.

use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Metadata extracted from a source file before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub fps: Option<f64>,
    pub bitrate: Option<u64>,
    pub container: String,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    format_name: Option<String>,
}

/// Parse an ffprobe rational like `30000/1001`. `0/0` (no frames seen)
/// maps to `None`.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 || num == 0.0 {
        return None;
    }
    Some(num / den)
}

/// Run ffprobe against the source and extract the fields the pipeline
/// needs. Fails with `Error::Probe` when the file has no video stream.
pub async fn probe_source(ffprobe: &Path, input: &Path) -> Result<SourceInfo> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(input)
        .output()
        .await
        .map_err(|e| Error::Probe(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Probe(format!(
            "ffprobe exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::Probe(format!("unparseable ffprobe output: {e}")))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| {
            s.codec_type.as_deref() == Some("video") && s.width.is_some() && s.height.is_some()
        })
        .ok_or_else(|| Error::Probe("no video stream in source".to_string()))?;

    let format = parsed.format.as_ref();
    let duration_secs = format
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(SourceInfo {
        duration_secs,
        // Checked present in the find() above.
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        codec: video.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        fps: video.avg_frame_rate.as_deref().and_then(parse_frame_rate),
        bitrate: format
            .and_then(|f| f.bit_rate.as_deref())
            .and_then(|b| b.parse::<u64>().ok()),
        container: format
            .and_then(|f| f.format_name.clone())
            .unwrap_or_else(|| "unknown".to_string()),
    })
}
