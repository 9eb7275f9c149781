//! Error types for the annotation processor

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while scanning sources and generating registration files
#[derive(Error, Debug)]
pub enum GenError {
    /// Annotation grammar violation
    #[error("{file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    /// Annotation attached to an invalid target
    #[error("{file}:{line}: {message} (target: {target})")]
    InvalidTarget {
        file: String,
        line: usize,
        target: String,
        message: String,
    },

    /// Filesystem failure while reading sources or writing outputs
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cache file could not be read or written
    #[error("cache error at {path}: {message}")]
    Cache { path: PathBuf, message: String },

    /// One or more folders failed during a scan run
    #[error("{failed} of {total} folders failed")]
    Partial { failed: usize, total: usize },
}

impl GenError {
    #[inline]
    pub fn parse(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    #[inline]
    pub fn invalid_target(
        file: impl Into<String>,
        line: usize,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidTarget {
            file: file.into(),
            line,
            target: target.into(),
            message: message.into(),
        }
    }

    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for processor operations
pub type Result<T> = std::result::Result<T, GenError>;
