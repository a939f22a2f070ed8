use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub signer: SignerConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,
}

impl Config {
    /// Minimum accepted length for the signing secret, in bytes.
    pub const MIN_SECRET_LEN: usize = 32;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by the CORS layer. Empty means allow any.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Rate limit ceiling per window, consumed by the fronting middleware.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_rate_limit() -> u32 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("vaultstream.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// Root directory for the local backend; staging area for remote ones.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub s3: S3Config,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Local
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("media")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            root: default_storage_root(),
            s3: S3Config::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct S3Config {
    #[serde(default)]
    pub bucket: String,

    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...).
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignerConfig {
    /// Shared secret for URL signing, minimum 32 bytes. When absent the
    /// server refuses to start unless `dev_mode` is set, in which case an
    /// ephemeral secret is generated.
    #[serde(default)]
    pub secret: Option<String>,

    /// Signed-URL lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub ttl_secs: u64,

    /// Allow starting without a configured secret (tokens die on restart).
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_token_ttl() -> u64 {
    3600
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            secret: None,
            ttl_secs: default_token_ttl(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_size_mib")]
    pub max_size_mib: u64,

    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Scratch directory for in-flight uploads and encoder work dirs.
    /// Defaults to the system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Bcrypt cost for passphrase hashing.
    #[serde(default = "default_passphrase_cost")]
    pub passphrase_cost: u32,
}

fn default_max_size_mib() -> u64 {
    2048
}

fn default_allowed_extensions() -> Vec<String> {
    ["mp4", "mov", "avi", "mkv", "webm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_passphrase_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_mib: default_max_size_mib(),
            allowed_extensions: default_allowed_extensions(),
            scratch_dir: None,
            passphrase_cost: default_passphrase_cost(),
        }
    }
}

impl UploadConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mib * 1024 * 1024
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn extension_allowed(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.allowed_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// HLS segment target duration in seconds.
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,

    /// Wall-clock ceiling per rendition encode.
    #[serde(default = "default_rendition_timeout")]
    pub rendition_timeout_secs: u64,

    /// Maximum simultaneous transcoding pipelines.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// x264 preset for rendition encodes.
    #[serde(default = "default_preset")]
    pub preset: String,
}

fn default_segment_seconds() -> u32 {
    4
}

fn default_rendition_timeout() -> u64 {
    3600
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_preset() -> String {
    "veryfast".to_string()
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            segment_seconds: default_segment_seconds(),
            rendition_timeout_secs: default_rendition_timeout(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            preset: default_preset(),
        }
    }
}
