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

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./castbridge.toml",
        "~/.config/castbridge/config.toml",
        "/etc/castbridge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let stream = &config.stream;
    if stream.read_block_bytes == 0 {
        anyhow::bail!("stream.read_block_bytes cannot be 0");
    }
    if stream.replay_buffer_bytes < stream.read_block_bytes {
        anyhow::bail!(
            "stream.replay_buffer_bytes ({}) must hold at least one read block ({})",
            stream.replay_buffer_bytes,
            stream.read_block_bytes
        );
    }
    if stream.producer_channel_chunks == 0 {
        anyhow::bail!("stream.producer_channel_chunks cannot be 0");
    }
    // A new consumer queue is seeded with the replay prefix before it is
    // handed out, so it needs room for that seed plus the end marker.
    if stream.consumer_queue_chunks < 2 {
        anyhow::bail!("stream.consumer_queue_chunks must be at least 2");
    }
    if stream.max_sessions == 0 {
        anyhow::bail!("stream.max_sessions cannot be 0");
    }

    if let Some(path) = &config.tools.ffmpeg_path {
        if !path.exists() {
            tracing::warn!("Configured ffmpeg path does not exist: {:?}", path);
        }
    }

    Ok(())
}
