//! Typed models matching the database schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a video, from upload acceptance to playable.
///
/// `Ready` and `Failed` are terminal; a record never regresses out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Uploading,
    Processing,
    Ready,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(Self::Uploading),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access policy on a video. `Unlisted` and `Public` behave identically in
/// the access gate; they only differ in listing surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "unlisted" => Some(Self::Unlisted),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video record. Mutated only by the pipeline (status, probe metadata,
/// master playlist path) and by owner-initiated edits/delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Video {
    pub id: String,
    pub owner_user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub passphrase_hash: Option<String>,
    pub original_filename: String,
    pub mime_type: Option<String>,
    pub file_size: i64,
    /// Storage key of the untouched source blob.
    pub storage_path: String,
    /// Storage prefix holding the HLS tree.
    pub hls_path: String,
    /// Set by the pipeline on success; absent otherwise.
    pub master_playlist_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub duration_secs: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub status: VideoStatus,
    /// Populated iff `status == Failed`.
    pub processing_error: Option<String>,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Video {
    pub fn requires_passphrase(&self) -> bool {
        self.passphrase_hash.is_some()
    }
}
