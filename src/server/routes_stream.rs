//! HLS streaming endpoints.
//!
//! Every request carries a signed token bound to the exact file it names.
//! Playlists are rewritten on the fly so each child URL carries a fresh
//! token: the master names variants, each variant names segments, and a
//! segment request is then verified by resource equality without any
//! session state. Segments stream straight from storage; playlists are
//! small and buffered for the rewrite.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::warn;

use super::error::ApiError;
use super::AppContext;
use crate::access::MASTER_PLAYLIST;
use crate::db::models::VideoStatus;
use crate::db::{get_conn, videos};
use crate::error::Error;
use crate::signer::{TokenError, UrlSigner};

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/MP2T";
/// Segments are content-addressed by path, so they cache forever.
const SEGMENT_CACHE_CONTROL: &str = "public, max-age=31536000";

pub fn router() -> Router<AppContext> {
    // Variant playlists and segments share one path template; dispatch is
    // by trailing extension.
    Router::new().route("/:video_id/:file", get(serve_file))
}

fn file_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+\.(m3u8|ts)$").expect("valid pattern"))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    token: Option<String>,
}

async fn serve_file(
    State(ctx): State<AppContext>,
    Path((video_id, file)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .ok_or(Error::Token(TokenError::Malformed))?;
    let claims = ctx.signer.verify(&token).map_err(Error::from)?;

    // The token authorizes exactly one file; reuse across resources is
    // rejected before anything touches storage.
    if claims.resource != file {
        return Err(Error::ResourceMismatch.into());
    }

    if !file_name_re().is_match(&file) {
        let err = if file.ends_with(".m3u8") {
            Error::InvalidPlaylist(file)
        } else if file.ends_with(".ts") {
            Error::InvalidSegment(file)
        } else {
            Error::not_found("file", file)
        };
        return Err(err.into());
    }

    if claims.video_id != video_id {
        return Err(Error::ResourceMismatch.into());
    }

    let video = {
        let conn = get_conn(&ctx.db).map_err(ApiError::from)?;
        videos::get_video(&conn, &video_id).map_err(ApiError::from)?
    };
    if video.status != VideoStatus::Ready {
        return Err(Error::not_found("video", video_id).into());
    }

    let key = format!("{}/{}", video.hls_path, file);
    let user_id = claims.user_id.as_deref();

    if file == MASTER_PLAYLIST {
        // Master playlist: child variant URLs get fresh tokens.
        let content = ctx.storage.download(&key).await.map_err(Error::from)?;
        let content = String::from_utf8_lossy(&content);
        let rewritten = rewrite_playlist(&content, &ctx.signer, &video_id, user_id, ".m3u8");
        Ok(playlist_response(rewritten))
    } else if file.ends_with(".m3u8") {
        // Variant playlist: segment URLs get fresh tokens.
        let content = ctx.storage.download(&key).await.map_err(Error::from)?;
        let content = String::from_utf8_lossy(&content);
        let rewritten = rewrite_playlist(&content, &ctx.signer, &video_id, user_id, ".ts");
        Ok(playlist_response(rewritten))
    } else {
        serve_segment(&ctx, &key).await
    }
}

/// Append `?token=...` to every non-comment line ending in `suffix`,
/// preserving everything else verbatim.
fn rewrite_playlist(
    content: &str,
    signer: &UrlSigner,
    video_id: &str,
    user_id: Option<&str>,
    suffix: &str,
) -> String {
    let mut out = String::with_capacity(content.len() * 2);
    for line in content.lines() {
        let trimmed = line.trim_end();
        if !trimmed.is_empty() && !trimmed.starts_with('#') && trimmed.ends_with(suffix) {
            let token = signer.mint(video_id, trimmed, user_id, None);
            out.push_str(trimmed);
            out.push_str("?token=");
            out.push_str(&token);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

fn playlist_response(content: String) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(content))
        .unwrap()
}

/// Pipe segment bytes from storage without buffering. A storage error
/// after headers are sent aborts the connection; there is no JSON body to
/// rewrite at that point, only a log line.
async fn serve_segment(ctx: &AppContext, key: &str) -> Result<Response, ApiError> {
    let stream = ctx.storage.download_stream(key).await.map_err(Error::from)?;

    let logged_key = key.to_string();
    let stream = stream.map(move |chunk| {
        if let Err(ref e) = chunk {
            warn!(key = %logged_key, error = %e, "segment stream aborted");
        }
        chunk
    });

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, SEGMENT_CACHE_CONTROL)
        .body(Body::from_stream(stream))
        .unwrap())
}
