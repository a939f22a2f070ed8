//! Upload-to-ready processing pipeline.
//!
//! Each accepted upload is driven through
//! `uploading -> processing -> ready|failed` by a detached task that owns
//! its own context, so a client disconnect never cancels an encode. Every
//! exit path writes a terminal outcome; a record is either `ready` with a
//! valid master playlist or it is not served at all.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::db::{self, get_conn, models::Video, videos, DbPool};
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::transcode::{derive_ladder, master_playlist, HlsEncoder};

/// Storage key of the untouched source blob.
pub fn source_key(owner_user_id: &str, video_id: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("videos/{owner_user_id}/{video_id}/original.{ext}"),
        None => format!("videos/{owner_user_id}/{video_id}/original"),
    }
}

/// Storage prefix of the HLS tree.
pub fn hls_prefix(owner_user_id: &str, video_id: &str) -> String {
    format!("videos/{owner_user_id}/{video_id}/hls")
}

/// Owned scratch file for an in-flight upload. The file is removed on
/// every exit path (drop runs on success, error and unwind alike); after
/// the pipeline moves it into storage the removal is a no-op.
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct Pipeline {
    db: DbPool,
    storage: Arc<dyn Storage>,
    encoder: HlsEncoder,
    scratch_dir: PathBuf,
    jobs: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(
        db: DbPool,
        storage: Arc<dyn Storage>,
        encoder: HlsEncoder,
        scratch_dir: PathBuf,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            db,
            storage,
            encoder,
            scratch_dir,
            jobs: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Fire the pipeline for an accepted upload. Detached: the caller's
    /// request finishes independently of the encode.
    pub fn spawn(self: Arc<Self>, video: Video, scratch: ScratchFile) {
        tokio::spawn(async move {
            self.process(video, scratch).await;
        });
    }

    /// Run one video through the state machine, bounded by the worker
    /// pool. Any error lands the record in `failed` with the message
    /// persisted.
    pub async fn process(&self, video: Video, scratch: ScratchFile) {
        let _permit = match Arc::clone(&self.jobs).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        info!(video_id = %video.id, "processing started");
        match self.run(&video, &scratch).await {
            Ok(()) => info!(video_id = %video.id, "video ready"),
            Err(e) => {
                error!(video_id = %video.id, error = %e, "processing failed");
                match get_conn(&self.db).and_then(|conn| videos::mark_failed(&conn, &video.id, &e.to_string())) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(video_id = %video.id, "record already terminal, not overwriting")
                    }
                    Err(db_err) => {
                        error!(video_id = %video.id, error = %db_err, "failed to persist failure")
                    }
                }
            }
        }
    }

    async fn run(&self, video: &Video, scratch: &ScratchFile) -> Result<()> {
        // Move the source blob into its final location. Streamed by the
        // backend; the whole file is never held in memory.
        self.storage
            .upload_file(scratch.path(), &video.storage_path)
            .await?;

        {
            let conn = get_conn(&self.db)?;
            if !videos::begin_processing(&conn, &video.id)? {
                return Err(Error::Internal(format!(
                    "video {} was not in uploading state",
                    video.id
                )));
            }
        }

        let input = self.storage.resolve(&video.storage_path).await?;
        let source = self.encoder.probe(&input).await?;
        info!(
            video_id = %video.id,
            duration = source.duration_secs,
            resolution = format!("{}x{}", source.width, source.height),
            "probed source"
        );

        {
            let conn = get_conn(&self.db)?;
            videos::update_probe_metadata(
                &conn,
                &video.id,
                source.duration_secs,
                i64::from(source.width),
                i64::from(source.height),
            )?;
        }

        let ladder = derive_ladder(source.height);
        let workdir = tempfile::tempdir_in(&self.scratch_dir)
            .map_err(|e| Error::Internal(format!("failed to create work dir: {e}")))?;

        let succeeded = self
            .encoder
            .encode_ladder(&input, workdir.path(), &ladder)
            .await?;

        let master = master_playlist(&succeeded);
        tokio::fs::write(workdir.path().join("master.m3u8"), &master)
            .await
            .map_err(|e| Error::Internal(format!("failed to write master playlist: {e}")))?;

        let thumbnail = match self
            .encoder
            .generate_thumbnail(&input, workdir.path(), source.duration_secs)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(video_id = %video.id, error = %e, "thumbnail generation failed");
                false
            }
        };

        self.upload_tree(workdir.path(), &video.hls_path).await?;

        let master_key = format!("{}/master.m3u8", video.hls_path);
        let thumbnail_key = thumbnail.then(|| format!("{}/thumbnail.jpg", video.hls_path));

        let conn = get_conn(&self.db)?;
        if !videos::mark_ready(&conn, &video.id, &master_key, thumbnail_key.as_deref())? {
            return Err(Error::Internal(format!(
                "video {} left processing state mid-pipeline",
                video.id
            )));
        }
        Ok(())
    }

    /// Move every file the encoder produced under the HLS prefix.
    async fn upload_tree(&self, workdir: &Path, hls_prefix: &str) -> Result<()> {
        let mut entries = tokio::fs::read_dir(workdir)
            .await
            .map_err(|e| Error::Internal(format!("failed to list work dir: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Internal(format!("failed to list work dir: {e}")))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let key = format!("{hls_prefix}/{name}");
            self.storage.upload_file(&entry.path(), &key).await?;
        }
        Ok(())
    }

    /// Remove the source blob and the HLS tree. Storage errors are logged
    /// but never block the record delete.
    pub async fn delete_assets(&self, video: &Video) {
        if let Err(e) = self.storage.delete(&video.storage_path).await {
            warn!(video_id = %video.id, error = %e, "failed to delete source blob");
        }
        if let Err(e) = self.storage.delete_directory(&video.hls_path).await {
            warn!(video_id = %video.id, error = %e, "failed to delete HLS tree");
        }
    }

    /// Startup sweep: anything still non-terminal lost its task in a
    /// crash/restart and is marked failed so readers get a definite answer.
    pub fn recover_stalled(db: &DbPool) -> Result<usize> {
        let conn = db::get_conn(db)?;
        let stalled = videos::non_terminal_videos(&conn)?;
        for video in &stalled {
            warn!(video_id = %video.id, status = %video.status, "marking interrupted video failed");
            videos::mark_failed(&conn, &video.id, "interrupted by server restart")?;
        }
        Ok(stalled.len())
    }
}
