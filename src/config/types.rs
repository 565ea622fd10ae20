use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Seconds a session stays addressable after creation (default: 3600)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Ceiling on the per-session replay buffer in bytes (default: 2 MiB)
    #[serde(default = "default_replay_buffer_bytes")]
    pub replay_buffer_bytes: usize,

    /// Size of each read from the producer's stdout (default: 64 KiB)
    #[serde(default = "default_read_block_bytes")]
    pub read_block_bytes: usize,

    /// Capacity of the producer-to-broadcaster channel in chunks (default: 128)
    #[serde(default = "default_channel_chunks")]
    pub producer_channel_chunks: usize,

    /// Capacity of each consumer queue in chunks (default: 128)
    #[serde(default = "default_channel_chunks")]
    pub consumer_queue_chunks: usize,

    /// Seconds a delivery loop waits for the next chunk before giving up
    /// (default: 60)
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,

    /// Bytes that must be buffered before a prewarm wait reports ready
    /// (default: 64 KiB)
    #[serde(default = "default_prewarm_min_bytes")]
    pub prewarm_min_bytes: usize,

    /// Seconds a prewarm wait may block before reporting not-ready
    /// (default: 15)
    #[serde(default = "default_prewarm_timeout")]
    pub prewarm_timeout_secs: u64,

    /// Maximum live sessions admitted at once; each costs one ffmpeg
    /// process (default: 16)
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// What happens to the producer when the last consumer disconnects
    /// (default: continue)
    #[serde(default)]
    pub idle_policy: IdlePolicy,
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_replay_buffer_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_read_block_bytes() -> usize {
    64 * 1024
}

fn default_channel_chunks() -> usize {
    128
}

fn default_delivery_timeout() -> u64 {
    60
}

fn default_prewarm_min_bytes() -> usize {
    64 * 1024
}

fn default_prewarm_timeout() -> u64 {
    15
}

fn default_max_sessions() -> usize {
    16
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            replay_buffer_bytes: default_replay_buffer_bytes(),
            read_block_bytes: default_read_block_bytes(),
            producer_channel_chunks: default_channel_chunks(),
            consumer_queue_chunks: default_channel_chunks(),
            delivery_timeout_secs: default_delivery_timeout(),
            prewarm_min_bytes: default_prewarm_min_bytes(),
            prewarm_timeout_secs: default_prewarm_timeout(),
            max_sessions: default_max_sessions(),
            idle_policy: IdlePolicy::default(),
        }
    }
}

/// Producer behavior once every consumer of a session has disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdlePolicy {
    /// Let ffmpeg run to completion; the finished stream stays replayable
    /// until the session expires.
    Continue,
    /// Kill ffmpeg as soon as the last consumer leaves.
    Abort,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        IdlePolicy::Continue
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
}
