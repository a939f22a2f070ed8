mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./config.toml", "./vaultstream.toml", "/etc/vaultstream/config.toml"];

    for path_str in default_paths {
        let path = Path::new(path_str);
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if let Some(ref secret) = config.signer.secret {
        if secret.len() < Config::MIN_SECRET_LEN {
            anyhow::bail!(
                "signer.secret must be at least {} bytes (got {})",
                Config::MIN_SECRET_LEN,
                secret.len()
            );
        }
    }

    if config.upload.max_size_mib == 0 {
        anyhow::bail!("upload.max_size_mib cannot be 0");
    }

    if config.upload.allowed_extensions.is_empty() {
        anyhow::bail!("upload.allowed_extensions cannot be empty");
    }

    if config.transcode.segment_seconds == 0 {
        anyhow::bail!("transcode.segment_seconds cannot be 0");
    }

    if config.storage.backend == StorageBackend::S3 && config.storage.s3.bucket.is_empty() {
        anyhow::bail!("storage.s3.bucket is required when storage.backend = \"s3\"");
    }

    Ok(())
}
