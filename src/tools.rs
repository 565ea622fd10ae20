//! External tool detection.
//!
//! Every producer shells out to ffmpeg. The path is resolved once at
//! startup: a configured override wins when it exists, otherwise `PATH` is
//! searched.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ToolsConfig;
use crate::error::{Error, Result};

/// Resolve the ffmpeg executable.
pub fn resolve_ffmpeg(config: &ToolsConfig) -> Result<PathBuf> {
    if let Some(path) = config.ffmpeg_path.as_deref() {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        // Configured path does not exist; fall back to PATH.
        tracing::warn!(
            path = %path.display(),
            "Configured ffmpeg path does not exist, searching PATH"
        );
    }

    which::which("ffmpeg")
        .map_err(|_| Error::tool("ffmpeg", "not found; is it installed and in PATH?"))
}

/// Availability information shown by `castbridge check-tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of `-version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Check ffmpeg availability and version.
pub fn check_ffmpeg(config: &ToolsConfig) -> ToolInfo {
    match resolve_ffmpeg(config) {
        Ok(path) => {
            let version = detect_version(&path);
            ToolInfo {
                name: "ffmpeg".to_string(),
                available: true,
                version,
                path: Some(path),
            }
        }
        Err(_) => ToolInfo {
            name: "ffmpeg".to_string(),
            available: false,
            version: None,
            path: None,
        },
    }
}

/// Run `ffmpeg -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
