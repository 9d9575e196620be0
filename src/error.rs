use camino::Utf8PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the launcher core.
///
/// The first four variants form the failure taxonomy the foreground reacts to:
/// - [`Network`](Self::Network): fetch or download failed, operation aborted, no retry
/// - [`Format`](Self::Format): not an archive or required structure missing
/// - [`ConcurrencyGuard`](Self::ConcurrencyGuard): operation already in flight, logged and ignored
/// - [`Filesystem`](Self::Filesystem): an expected file or directory is missing or left behind
///
/// The remaining variants wrap lower-level failures from the crates we sit on.
#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Download failed for {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Format error: {0}")]
    Format(String),

    #[error("{0} is already running")]
    ConcurrencyGuard(String),

    #[error("Filesystem error at {path}: {reason}")]
    Filesystem { path: Utf8PathBuf, reason: String },

    #[error("IO error at {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("No release is available for {0}")]
    UnknownRelease(String),

    #[error("Unknown launcher option {0}")]
    UnknownOption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Task panicked: {0}")]
    Panicked(String),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

impl LauncherError {
    /// Build an [`Io`](Self::Io) error bound to the path that failed.
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        LauncherError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure belongs to the network class.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            LauncherError::Network(_) | LauncherError::HttpStatus { .. } | LauncherError::Http(_)
        )
    }

    /// Whether the failure only means "someone else is already doing this".
    ///
    /// These are never surfaced to the user as errors.
    pub fn is_concurrency_guard(&self) -> bool {
        matches!(self, LauncherError::ConcurrencyGuard(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        let err = LauncherError::HttpStatus {
            url: "https://example.com/a.zip".to_string(),
            status: 404,
        };
        assert!(err.is_network());
        assert!(LauncherError::Network("reset".to_string()).is_network());
        assert!(!LauncherError::Format("bad".to_string()).is_network());
    }

    #[test]
    fn test_concurrency_guard_classification() {
        let err = LauncherError::ConcurrencyGuard("refresh".to_string());
        assert!(err.is_concurrency_guard());
        assert_eq!(err.to_string(), "refresh is already running");
    }

    #[test]
    fn test_io_error_carries_path() {
        let err = LauncherError::io(
            "/tmp/missing",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/missing"));
    }
}
