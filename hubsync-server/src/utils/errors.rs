//! Error types shared by the scanner, the GitHub gateway and the sync pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error at {path}: {source}")]
    LocalIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Size limit exceeded: {0}")]
    SizeLimit(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("GitHub API error {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unexpected response from GitHub: {0}")]
    Decode(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Wrap an I/O error with the path it happened on.
    pub fn local_io(path: impl Into<String>, source: std::io::Error) -> Self {
        SyncError::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// True for errors raised while talking to GitHub (HTTP status, transport, timeout).
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            SyncError::Upstream { .. }
                | SyncError::Network(_)
                | SyncError::Timeout(_)
                | SyncError::Decode(_)
        )
    }

    /// True for errors caused by the caller's input rather than the environment.
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }

    /// HTTP status carried by an upstream error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Upstream { status, .. } => Some(*status),
            SyncError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<globset::Error> for SyncError {
    fn from(err: globset::Error) -> Self {
        SyncError::Validation(format!("invalid exclude pattern: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_classification() {
        let err = SyncError::Upstream {
            status: 422,
            message: "Reference update failed".to_string(),
        };
        assert!(err.is_upstream());
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.to_string(), "GitHub API error 422: Reference update failed");

        assert!(SyncError::Timeout("blob".into()).is_upstream());
        assert!(!SyncError::Validation("owner is required".into()).is_upstream());
    }

    #[test]
    fn test_local_io_message_includes_path() {
        let err = SyncError::local_io(
            "/data/a.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/data/a.txt"));
        assert_eq!(err.status(), None);
    }
}
