//! Error types for the synchronization engine

use std::path::PathBuf;

use crate::run::RunId;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Comprehensive error type for engine operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Path-related errors
    #[error("Path error at '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// Malformed or unreadable mapping configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// File copying errors
    #[error("File copy error: {message}")]
    FileCopy { message: String },

    /// Operation on a run id that was never registered
    #[error("Unknown synchronization run: {0}")]
    UnknownRun(RunId),

    /// TOML decoding errors
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// TOML encoding errors
    #[error("Configuration write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

impl SyncError {
    /// Create a new path error
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new file copy error
    pub fn copy_error(
        source: impl AsRef<std::path::Path>,
        dest: impl AsRef<std::path::Path>,
        message: impl Into<String>,
    ) -> Self {
        let full_message = format!(
            "File copy error from '{}' to '{}': {}",
            source.as_ref().display(),
            dest.as_ref().display(),
            message.into()
        );
        Self::FileCopy {
            message: full_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_error_message_names_both_paths() {
        let err = SyncError::copy_error("/proj/out/a.class", "/remote/app/a.class", "disk full");
        let text = err.to_string();
        assert!(text.contains("/proj/out/a.class"));
        assert!(text.contains("/remote/app/a.class"));
        assert!(text.ends_with("disk full"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SyncError = io.into();
        assert!(matches!(err, SyncError::Io(_)));
    }
}
