//! CouchMesh Error Types

use thiserror::Error;

/// Result type alias for CouchMesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// CouchMesh error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid endpoint '{0}': expected host:port")]
    InvalidEndpoint(String),

    // Peer directory errors
    #[error("Directory error: {0}")]
    Directory(#[from] rusqlite::Error),

    #[error("Peer directory unavailable: {0}")]
    DirectoryUnavailable(String),

    // Replication errors
    #[error("Replication command failed for {peer}: {reason}")]
    ReplicationCommand { peer: String, reason: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // Process supervision errors
    #[error("Failed to launch {name}: {reason}")]
    ProcessLaunch { name: String, reason: String },

    #[error("Failed to terminate {name}: {reason}")]
    ProcessTerminate { name: String, reason: String },

    #[error("Supervised process {name} exited ({status})")]
    ChildProcessExited { name: String, status: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is absorbed by retrying on the next tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Directory(_)
                | Error::DirectoryUnavailable(_)
                | Error::ReplicationCommand { .. }
                | Error::Network(_)
                | Error::Http(_)
                | Error::ConnectionTimeout(_)
        )
    }

    /// Check if this error requires the whole node to be recycled
    pub fn requires_recycle(&self) -> bool {
        matches!(self, Error::ChildProcessExited { .. }) || !self.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_errors_are_retryable() {
        let err = Error::DirectoryUnavailable("table store timed out".into());
        assert!(err.is_retryable());
        assert!(!err.requires_recycle());
    }

    #[test]
    fn test_child_exit_requires_recycle() {
        let err = Error::ChildProcessExited {
            name: "couchdb".into(),
            status: "exit status: 1".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.requires_recycle());
    }

    #[test]
    fn test_terminate_failure_is_a_process_error() {
        let err = Error::ProcessTerminate {
            name: "web".into(),
            reason: "did not exit within 2s".into(),
        };
        assert_eq!(err.to_string(), "Failed to terminate web: did not exit within 2s");
        assert!(!err.is_retryable());
    }
}
