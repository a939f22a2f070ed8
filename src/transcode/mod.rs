//! Transcoding: source probing, quality-ladder derivation and the ffmpeg
//! HLS encoder driver.

pub mod encoder;
pub mod probe;

pub use encoder::{EncodeError, HlsEncoder};
pub use probe::SourceInfo;

use serde::{Deserialize, Serialize};

/// The fixed rendition table, highest first. A source never gets a
/// rendition taller than itself.
pub const RENDITIONS: [(&str, u32, u32); 4] = [
    ("1080p", 1080, 5000),
    ("720p", 720, 2800),
    ("480p", 480, 1400),
    ("360p", 360, 800),
];

/// Bitrate used for the single-rung ladder of sub-360p sources, in kbit/s.
const MIN_LADDER_BITRATE_KBPS: u32 = 800;

/// One rung of the encode ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    /// Basename for the variant playlist and its segments (`720p` gives
    /// `720p.m3u8` and `720p_000.ts`).
    pub name: String,
    pub height: u32,
    pub bitrate_kbps: u32,
}

impl Rendition {
    /// BANDWIDTH attribute value in bits per second.
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.bitrate_kbps) * 1000
    }

    /// ffmpeg bitrate argument, e.g. `2800k`.
    pub fn bitrate_arg(&self) -> String {
        format!("{}k", self.bitrate_kbps)
    }

    /// Display width for the RESOLUTION attribute. This is a 16:9 hint
    /// only; the encode itself preserves the source aspect ratio.
    pub fn display_width(&self) -> u32 {
        ((f64::from(self.height) * 16.0 / 9.0).round()) as u32
    }

    pub fn playlist_name(&self) -> String {
        format!("{}.m3u8", self.name)
    }
}

/// Derive the encode ladder for a source height. Deterministic, never
/// upscales; a source shorter than the smallest rung gets a single rung
/// at its own height.
pub fn derive_ladder(source_height: u32) -> Vec<Rendition> {
    let valid: Vec<Rendition> = RENDITIONS
        .iter()
        .filter(|(_, height, _)| *height <= source_height)
        .map(|(name, height, bitrate)| Rendition {
            name: (*name).to_string(),
            height: *height,
            bitrate_kbps: *bitrate,
        })
        .collect();

    if valid.is_empty() {
        return vec![Rendition {
            name: format!("{source_height}p"),
            height: source_height,
            bitrate_kbps: MIN_LADDER_BITRATE_KBPS,
        }];
    }
    valid
}

/// Render the master playlist for the renditions that actually encoded,
/// in ladder order.
pub fn master_playlist(renditions: &[Rendition]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n\n");
    for r in renditions {
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}\n",
            r.bandwidth(),
            r.display_width(),
            r.height,
            r.playlist_name(),
        ));
    }
    out
}
