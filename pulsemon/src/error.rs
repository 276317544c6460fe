//! Error types shared by the collectors.

use std::path::PathBuf;

/// A whole data source could not be read or understood this cycle.
///
/// Per-item failures (one process, one mount) never surface here; they are
/// dropped from the snapshot instead.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {source_name}: {message}")]
    Parse {
        source_name: &'static str,
        message: String,
    },

    #[error("background read worker failed: {0}")]
    Worker(String),
}

impl CollectError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CollectError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(source_name: &'static str, message: impl Into<String>) -> Self {
        CollectError::Parse {
            source_name,
            message: message.into(),
        }
    }
}

impl From<tokio::task::JoinError> for CollectError {
    fn from(e: tokio::task::JoinError) -> Self {
        CollectError::Worker(e.to_string())
    }
}
