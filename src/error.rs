//! Library error type used across modules.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the core orchestration engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The configured images directory is missing or not a directory.
    #[error("invalid images directory: {0}")]
    BadImagesDir(PathBuf),

    /// A requested path escaped the directory it was meant to be served from.
    #[error("path escapes served root: {0}")]
    PathEscape(PathBuf),

    /// `/command` named an action that isn't recognised.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// `duration_update` was sent a non-positive or unparsable value.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// The image transformer failed to process a source file.
    #[error("failed to process image {path}: {source}")]
    Processing {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}
