//! Database connection pool and schema management.
//!
//! SQLite via rusqlite behind an r2d2 pool. The schema is created when the
//! pool is initialized; the document-store surface the core needs is a
//! single `videos` table.

pub mod models;
pub mod videos;

use crate::error::{Error, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS videos (
    id                   TEXT PRIMARY KEY,
    owner_user_id        TEXT NOT NULL,
    title                TEXT NOT NULL,
    description          TEXT,
    visibility           TEXT NOT NULL DEFAULT 'unlisted',
    passphrase_hash      TEXT,
    original_filename    TEXT NOT NULL,
    mime_type            TEXT,
    file_size            INTEGER NOT NULL DEFAULT 0,
    storage_path         TEXT NOT NULL,
    hls_path             TEXT NOT NULL,
    master_playlist_path TEXT,
    thumbnail_path       TEXT,
    duration_secs        REAL,
    width                INTEGER,
    height               INTEGER,
    status               TEXT NOT NULL DEFAULT 'uploading',
    processing_error     TEXT,
    views                INTEGER NOT NULL DEFAULT 0,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_videos_owner ON videos(owner_user_id);
CREATE INDEX IF NOT EXISTS idx_videos_status ON videos(status);
";

/// Initialize a pool against the given SQLite file, creating the schema.
pub fn init_pool(db_path: &Path) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
    });

    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::Database(format!("failed to create connection pool: {e}")))?;

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    Ok(pool)
}

/// Get a connection from the pool, mapping the r2d2 error.
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::Database(format!("failed to get connection from pool: {e}")))
}
