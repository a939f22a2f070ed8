//! Playback access gate.
//!
//! Converts a one-shot authorization check (visibility + optional
//! passphrase) into a time-limited capability: the master-playlist token.
//! Per-segment requests are then authorized by the signed URLs alone, so
//! the passphrase is never re-verified on the hot path.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::db::{get_conn, models::VideoStatus, models::Visibility, videos, DbPool};
use crate::error::{Error, Result};
use crate::signer::UrlSigner;

pub const MASTER_PLAYLIST: &str = "master.m3u8";

/// Metadata safe to disclose alongside a granted stream URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackGrant {
    pub stream_url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub views: i64,
}

/// Hash a passphrase for storage. Cost comes from configuration.
pub fn hash_passphrase(passphrase: &str, cost: u32) -> Result<String> {
    bcrypt::hash(passphrase, cost)
        .map_err(|e| Error::Internal(format!("passphrase hashing failed: {e}")))
}

pub struct AccessGate {
    db: DbPool,
    signer: Arc<UrlSigner>,
}

impl AccessGate {
    pub fn new(db: DbPool, signer: Arc<UrlSigner>) -> Self {
        Self { db, signer }
    }

    /// Decide whether the requester may play the video and, if so, mint
    /// the entry token. Checks run in a fixed order so error codes are
    /// stable: existence, readiness, visibility, passphrase.
    pub fn request_access(
        &self,
        video_id: &str,
        requesting_user_id: Option<&str>,
        passphrase: Option<&str>,
    ) -> Result<PlaybackGrant> {
        let conn = get_conn(&self.db)?;
        let video = videos::get_video(&conn, video_id)?;

        if video.status != VideoStatus::Ready {
            return Err(Error::NotReady {
                status: video.status,
            });
        }

        if video.visibility == Visibility::Private
            && requesting_user_id != Some(video.owner_user_id.as_str())
        {
            return Err(Error::AccessDenied);
        }

        if let Some(ref hash) = video.passphrase_hash {
            let Some(passphrase) = passphrase else {
                return Err(Error::PassphraseRequired);
            };
            // bcrypt compares in constant time and is deliberately slow.
            let ok = bcrypt::verify(passphrase, hash)
                .map_err(|e| Error::Internal(format!("passphrase verification failed: {e}")))?;
            if !ok {
                // Never log the attempted passphrase.
                info!(video_id = %video.id, "passphrase rejected");
                return Err(Error::InvalidPassphrase);
            }
        }

        let token = self
            .signer
            .mint(&video.id, MASTER_PLAYLIST, requesting_user_id, None);

        videos::increment_views(&conn, &video.id)?;

        Ok(PlaybackGrant {
            stream_url: format!("/api/stream/{}/{MASTER_PLAYLIST}?token={token}", video.id),
            title: video.title,
            description: video.description,
            duration_secs: video.duration_secs,
            width: video.width,
            height: video.height,
            thumbnail_path: video.thumbnail_path,
            created_at: video.created_at,
            views: video.views + 1,
        })
    }
}
