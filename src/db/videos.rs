//! Queries for the `videos` table.
//!
//! Status transitions are optimistic: each `UPDATE` names the expected
//! current status in its `WHERE` clause and reports whether it won, so a
//! record can never regress out of `ready` or `failed` even with
//! concurrent writers.

use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, Row};

use super::models::{Video, VideoStatus, Visibility};
use crate::error::{Error, Result};

/// Fields supplied by the upload handler when a record is created.
pub struct NewVideo {
    pub id: String,
    pub owner_user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub passphrase_hash: Option<String>,
    pub original_filename: String,
    pub mime_type: Option<String>,
    pub file_size: i64,
    pub storage_path: String,
    pub hls_path: String,
}

const COLUMNS: &str = "id, owner_user_id, title, description, visibility, passphrase_hash, \
                       original_filename, mime_type, file_size, storage_path, hls_path, \
                       master_playlist_path, thumbnail_path, duration_secs, width, height, \
                       status, processing_error, views, created_at, updated_at";

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_video(row: &Row<'_>) -> rusqlite::Result<Video> {
    let visibility: String = row.get(4)?;
    let status: String = row.get(16)?;
    Ok(Video {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        visibility: Visibility::parse(&visibility).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown visibility: {visibility}").into(),
            )
        })?,
        passphrase_hash: row.get(5)?,
        original_filename: row.get(6)?,
        mime_type: row.get(7)?,
        file_size: row.get(8)?,
        storage_path: row.get(9)?,
        hls_path: row.get(10)?,
        master_playlist_path: row.get(11)?,
        thumbnail_path: row.get(12)?,
        duration_secs: row.get(13)?,
        width: row.get(14)?,
        height: row.get(15)?,
        status: VideoStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                16,
                Type::Text,
                format!("unknown status: {status}").into(),
            )
        })?,
        processing_error: row.get(17)?,
        views: row.get(18)?,
        created_at: parse_timestamp(row, 19)?,
        updated_at: parse_timestamp(row, 20)?,
    })
}

/// Insert a new record in `uploading` state.
pub fn create_video(conn: &Connection, new: NewVideo) -> Result<Video> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO videos (id, owner_user_id, title, description, visibility, passphrase_hash, \
         original_filename, mime_type, file_size, storage_path, hls_path, status, views, \
         created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'uploading', 0, ?12, ?12)",
        params![
            new.id,
            new.owner_user_id,
            new.title,
            new.description,
            new.visibility.as_str(),
            new.passphrase_hash,
            new.original_filename,
            new.mime_type,
            new.file_size,
            new.storage_path,
            new.hls_path,
            now,
        ],
    )?;
    get_video(conn, &new.id)
}

pub fn get_video(conn: &Connection, id: &str) -> Result<Video> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM videos WHERE id = ?1"),
        params![id],
        map_video,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found("video", id),
        other => other.into(),
    })
}

/// Transition `uploading -> processing`. Returns false if the record was
/// not in `uploading`.
pub fn begin_processing(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE videos SET status = 'processing', updated_at = ?2 \
         WHERE id = ?1 AND status = 'uploading'",
        params![id, Utc::now().to_rfc3339()],
    )?;
    Ok(changed == 1)
}

/// Persist probe results.
pub fn update_probe_metadata(
    conn: &Connection,
    id: &str,
    duration_secs: f64,
    width: i64,
    height: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE videos SET duration_secs = ?2, width = ?3, height = ?4, updated_at = ?5 \
         WHERE id = ?1",
        params![id, duration_secs, width, height, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Transition `processing -> ready`, recording the master playlist (and
/// thumbnail, when produced). Returns false if the record was not in
/// `processing`.
pub fn mark_ready(
    conn: &Connection,
    id: &str,
    master_playlist_path: &str,
    thumbnail_path: Option<&str>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE videos SET status = 'ready', master_playlist_path = ?2, thumbnail_path = ?3, \
         processing_error = NULL, updated_at = ?4 \
         WHERE id = ?1 AND status = 'processing'",
        params![id, master_playlist_path, thumbnail_path, Utc::now().to_rfc3339()],
    )?;
    Ok(changed == 1)
}

/// Transition any non-terminal state to `failed`. Returns false if the
/// record was already terminal.
pub fn mark_failed(conn: &Connection, id: &str, error: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE videos SET status = 'failed', processing_error = ?2, updated_at = ?3 \
         WHERE id = ?1 AND status IN ('uploading', 'processing')",
        params![id, error, Utc::now().to_rfc3339()],
    )?;
    Ok(changed == 1)
}

pub fn increment_views(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE videos SET views = views + 1, updated_at = ?2 WHERE id = ?1",
        params![id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Delete the record. Returns false when it did not exist.
pub fn delete_video(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM videos WHERE id = ?1", params![id])?;
    Ok(changed == 1)
}

/// Videos left in a non-terminal state, e.g. by a crashed process.
pub fn non_terminal_videos(conn: &Connection) -> Result<Vec<Video>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM videos WHERE status IN ('uploading', 'processing')"
    ))?;
    let rows = stmt.query_map([], map_video)?;
    let mut videos = Vec::new();
    for row in rows {
        videos.push(row?);
    }
    Ok(videos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_pool;

    fn test_pool() -> (tempfile::TempDir, crate::db::DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_pool(&dir.path().join("test.db")).unwrap();
        (dir, pool)
    }

    fn sample(id: &str) -> NewVideo {
        NewVideo {
            id: id.to_string(),
            owner_user_id: "user-1".to_string(),
            title: "Big Buck Bunny".to_string(),
            description: None,
            visibility: Visibility::Unlisted,
            passphrase_hash: None,
            original_filename: "bunny.mp4".to_string(),
            mime_type: Some("video/mp4".to_string()),
            file_size: 1024,
            storage_path: format!("videos/user-1/{id}/original.mp4"),
            hls_path: format!("videos/user-1/{id}/hls"),
        }
    }

    #[test]
    fn create_and_get() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();

        let video = create_video(&conn, sample("v1")).unwrap();
        assert_eq!(video.status, VideoStatus::Uploading);
        assert_eq!(video.views, 0);
        assert!(video.master_playlist_path.is_none());

        let fetched = get_video(&conn, "v1").unwrap();
        assert_eq!(fetched, video);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        assert_matches::assert_matches!(
            get_video(&conn, "nope"),
            Err(Error::NotFound { .. })
        );
    }

    #[test]
    fn happy_path_transitions() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        create_video(&conn, sample("v1")).unwrap();

        assert!(begin_processing(&conn, "v1").unwrap());
        update_probe_metadata(&conn, "v1", 30.0, 1920, 1080).unwrap();
        assert!(mark_ready(&conn, "v1", "videos/user-1/v1/hls/master.m3u8", None).unwrap());

        let video = get_video(&conn, "v1").unwrap();
        assert_eq!(video.status, VideoStatus::Ready);
        assert_eq!(video.duration_secs, Some(30.0));
        assert_eq!(
            video.master_playlist_path.as_deref(),
            Some("videos/user-1/v1/hls/master.m3u8")
        );
    }

    #[test]
    fn ready_is_terminal() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        create_video(&conn, sample("v1")).unwrap();
        begin_processing(&conn, "v1").unwrap();
        mark_ready(&conn, "v1", "m", None).unwrap();

        // Neither a second processing attempt nor a failure may regress it.
        assert!(!begin_processing(&conn, "v1").unwrap());
        assert!(!mark_failed(&conn, "v1", "boom").unwrap());
        assert_eq!(get_video(&conn, "v1").unwrap().status, VideoStatus::Ready);
    }

    #[test]
    fn failed_is_terminal() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        create_video(&conn, sample("v1")).unwrap();
        assert!(mark_failed(&conn, "v1", "encoder exploded").unwrap());

        assert!(!begin_processing(&conn, "v1").unwrap());
        assert!(!mark_ready(&conn, "v1", "m", None).unwrap());

        let video = get_video(&conn, "v1").unwrap();
        assert_eq!(video.status, VideoStatus::Failed);
        assert_eq!(video.processing_error.as_deref(), Some("encoder exploded"));
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        create_video(&conn, sample("v1")).unwrap();

        assert!(delete_video(&conn, "v1").unwrap());
        assert!(!delete_video(&conn, "v1").unwrap());
    }

    #[test]
    fn views_increment() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        create_video(&conn, sample("v1")).unwrap();
        increment_views(&conn, "v1").unwrap();
        increment_views(&conn, "v1").unwrap();
        assert_eq!(get_video(&conn, "v1").unwrap().views, 2);
    }

    #[test]
    fn non_terminal_sweep_finds_stuck_records() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        create_video(&conn, sample("v1")).unwrap();
        create_video(&conn, sample("v2")).unwrap();
        begin_processing(&conn, "v2").unwrap();
        create_video(&conn, sample("v3")).unwrap();
        begin_processing(&conn, "v3").unwrap();
        mark_ready(&conn, "v3", "m", None).unwrap();

        let stuck = non_terminal_videos(&conn).unwrap();
        let ids: Vec<_> = stuck.iter().map(|v| v.id.as_str()).collect();
        assert!(ids.contains(&"v1"));
        assert!(ids.contains(&"v2"));
        assert!(!ids.contains(&"v3"));
    }
}
