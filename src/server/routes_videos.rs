//! Video API: upload, metadata, access grants, delete.

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use super::auth::{CurrentUser, MaybeUser};
use super::error::ApiError;
use super::AppContext;
use crate::access::hash_passphrase;
use crate::db::models::{Video, Visibility};
use crate::db::{get_conn, videos};
use crate::error::Error;
use crate::pipeline::{hls_prefix, source_key, ScratchFile};

pub fn router(max_body_bytes: usize) -> Router<AppContext> {
    Router::new()
        .route(
            "/upload",
            post(upload_video).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .route("/:id", get(get_video_meta).delete(delete_video))
        .route("/:id/access", post(request_access))
}

struct UploadedFile {
    scratch: ScratchFile,
    original_filename: String,
    extension: String,
    mime_type: Option<String>,
    size: u64,
}

/// Accept a multipart upload, stream the file field to scratch disk and
/// fire the processing pipeline. The response is returned as soon as the
/// record exists; encoding happens behind it.
async fn upload_video(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    let mut visibility = Visibility::Unlisted;
    let mut passphrase: Option<String> = None;
    let mut upload: Option<UploadedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("title") => {
                title = Some(read_text(field).await?);
            }
            Some("description") => {
                description = Some(read_text(field).await?).filter(|d| !d.is_empty());
            }
            Some("visibility") => {
                let raw = read_text(field).await?;
                visibility = Visibility::parse(&raw)
                    .ok_or_else(|| Error::Validation(format!("unknown visibility: {raw}")))?;
            }
            Some("passphrase") => {
                passphrase = Some(read_text(field).await?).filter(|p| !p.is_empty());
            }
            Some("file") => {
                upload = Some(receive_file(&ctx, field).await?);
            }
            _ => {}
        }
    }

    let title = title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::Validation("title is required".to_string()))?;
    let upload = upload.ok_or_else(|| Error::Validation("file is required".to_string()))?;

    let passphrase_hash = match passphrase {
        Some(ref p) => Some(hash_passphrase(p, ctx.config.upload.passphrase_cost)?),
        None => None,
    };

    let video_id = Uuid::new_v4().to_string();
    let video = {
        let conn = get_conn(&ctx.db).map_err(ApiError::from)?;
        videos::create_video(
            &conn,
            videos::NewVideo {
                id: video_id.clone(),
                owner_user_id: user.clone(),
                title,
                description,
                visibility,
                passphrase_hash,
                original_filename: upload.original_filename.clone(),
                mime_type: upload.mime_type.clone(),
                file_size: upload.size as i64,
                storage_path: source_key(&user, &video_id, Some(&upload.extension)),
                hls_path: hls_prefix(&user, &video_id),
            },
        )
        .map_err(ApiError::from)?
    };

    info!(video_id = %video.id, owner = %user, size = upload.size, "upload accepted");
    Arc::clone(&ctx.pipeline).spawn(video, upload.scratch);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "videoId": video_id, "status": "uploading" })),
    ))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    let text = field
        .text()
        .await
        .map_err(|e| Error::Validation(format!("unreadable form field: {e}")))?;
    Ok(text)
}

/// Stream the file field to a guarded scratch file, enforcing the size cap
/// and extension allow-list. The upload is never held in memory.
async fn receive_file(
    ctx: &AppContext,
    mut field: axum::extract::multipart::Field<'_>,
) -> Result<UploadedFile, ApiError> {
    let original_filename = field
        .file_name()
        .map(str::to_string)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::Validation("file field has no filename".to_string()))?;

    let extension = std::path::Path::new(&original_filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| Error::Validation("filename has no extension".to_string()))?;

    if !ctx.config.upload.extension_allowed(&extension) {
        return Err(Error::Validation(format!(
            "unsupported source container: .{extension}"
        ))
        .into());
    }

    let mime_type = field.content_type().map(str::to_string);

    let scratch_dir = ctx.config.upload.scratch_dir();
    tokio::fs::create_dir_all(&scratch_dir)
        .await
        .map_err(|e| Error::Internal(format!("failed to create scratch dir: {e}")))?;
    let scratch = ScratchFile::new(scratch_dir.join(format!("vs_upload_{}", Uuid::new_v4())));

    let mut file = tokio::fs::File::create(scratch.path())
        .await
        .map_err(|e| Error::Internal(format!("failed to create scratch file: {e}")))?;

    let max_bytes = ctx.config.upload.max_size_bytes();
    let mut size: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| Error::Validation(format!("upload interrupted: {e}")))?
    {
        size += chunk.len() as u64;
        if size > max_bytes {
            // Scratch guard removes the partial file on return.
            return Err(Error::Validation(format!(
                "file exceeds maximum upload size of {} MiB",
                ctx.config.upload.max_size_mib
            ))
            .into());
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::Internal(format!("failed to write scratch file: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| Error::Internal(format!("failed to flush scratch file: {e}")))?;

    if size == 0 {
        return Err(Error::Validation("uploaded file is empty".to_string()).into());
    }

    Ok(UploadedFile {
        scratch,
        original_filename,
        extension,
        mime_type,
        size,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoMetaResponse {
    video_id: String,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    visibility: Visibility,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    processing_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail_path: Option<String>,
    original_filename: String,
    file_size: i64,
    views: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Video> for VideoMetaResponse {
    fn from(v: Video) -> Self {
        Self {
            video_id: v.id,
            title: v.title,
            description: v.description,
            visibility: v.visibility,
            status: v.status.to_string(),
            processing_error: v.processing_error,
            duration_secs: v.duration_secs,
            width: v.width,
            height: v.height,
            thumbnail_path: v.thumbnail_path,
            original_filename: v.original_filename,
            file_size: v.file_size,
            views: v.views,
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}

/// Metadata only; the stream URL is handed out by the access endpoint.
async fn get_video_meta(
    State(ctx): State<AppContext>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
) -> Result<Json<VideoMetaResponse>, ApiError> {
    let conn = get_conn(&ctx.db).map_err(ApiError::from)?;
    let video = videos::get_video(&conn, &id).map_err(ApiError::from)?;

    if video.visibility == Visibility::Private
        && user.as_deref() != Some(video.owner_user_id.as_str())
    {
        return Err(Error::AccessDenied.into());
    }

    Ok(Json(video.into()))
}

#[derive(Debug, Default, Deserialize)]
struct AccessRequest {
    passphrase: Option<String>,
}

/// Enforce visibility and passphrase, and mint the playback entry token.
async fn request_access(
    State(ctx): State<AppContext>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
    body: Option<Json<AccessRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let grant = ctx
        .gate
        .request_access(&id, user.as_deref(), request.passphrase.as_deref())
        .map_err(ApiError::from)?;
    Ok(Json(grant))
}

/// Owner-only delete: storage assets first (best effort), then the record.
async fn delete_video(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let video = {
        let conn = get_conn(&ctx.db).map_err(ApiError::from)?;
        videos::get_video(&conn, &id).map_err(ApiError::from)?
    };

    if video.owner_user_id != user {
        return Err(Error::AccessDenied.into());
    }

    ctx.pipeline.delete_assets(&video).await;

    let conn = get_conn(&ctx.db).map_err(ApiError::from)?;
    videos::delete_video(&conn, &id).map_err(ApiError::from)?;

    info!(video_id = %id, owner = %user, "video deleted");
    Ok(Json(json!({ "deleted": true })))
}
