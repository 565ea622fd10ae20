//! Unified error type for the castbridge application.
//!
//! All modules funnel their failures into [`Error`], which carries enough
//! context for API handlers to derive an HTTP status code via
//! [`Error::http_status`].

use std::fmt;

/// Unified error type covering all failure modes in castbridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested session does not exist or has expired.
    #[error("session not found: {id}")]
    SessionNotFound {
        /// The identifier that was looked up.
        id: String,
    },

    /// The session table is full; no new sessions are admitted.
    #[error("session limit reached ({max} active)")]
    SessionLimit {
        /// The configured ceiling that was hit.
        max: usize,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An external tool (ffmpeg) could not be located or spawned.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::SessionNotFound { .. } => 404,
            Error::SessionLimit { .. } => 503,
            Error::Validation(_) => 400,
            Error::Tool { .. } => 502,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::SessionNotFound`].
    pub fn session_not_found(id: impl fmt::Display) -> Self {
        Error::SessionNotFound { id: id.to_string() }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_display() {
        let err = Error::session_not_found("abc-123");
        assert_eq!(err.to_string(), "session not found: abc-123");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn session_limit_display() {
        let err = Error::SessionLimit { max: 16 };
        assert_eq!(err.to_string(), "session limit reached (16 active)");
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn validation_display() {
        let err = Error::Validation("video_url is required".into());
        assert_eq!(err.to_string(), "Validation error: video_url is required");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "executable not found");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: executable not found");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn internal_display() {
        let err = Error::Internal("broadcaster exited early".into());
        assert_eq!(err.to_string(), "Internal error: broadcaster exited early");
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn result_alias() {
        fn ok_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(ok_fn().unwrap(), 42);

        fn err_fn() -> Result<i32> {
            Err(Error::Internal("boom".into()))
        }
        assert!(err_fn().is_err());
    }
}
