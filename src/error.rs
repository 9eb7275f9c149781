//! Error types for the deployment engine

use thiserror::Error;

/// Errors that can occur while loading, wiring, and serving a deployment.
///
/// Every variant carries the *where* alongside the message: a file or config
/// path for load-time failures, a service or router name for wiring and
/// dependency failures, an HTTP status for remote-call failures.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Input could not be parsed (YAML, annotation output, selector syntax)
    #[error("parse error in {context}: {message}")]
    Parse { context: String, message: String },

    /// Configuration violates the schema or a naming rule
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A config reference could not be resolved
    #[error("cannot resolve config {path}: {message}")]
    Resolution { path: String, message: String },

    /// A definition references something that does not exist
    #[error("wiring error for {name}: {message}")]
    Wiring { name: String, message: String },

    /// A service could not be instantiated
    #[error("dependency error for {name}: {message}")]
    Dependency { name: String, message: String },

    /// Serve-time failure (listener, handler, remote call)
    #[error("runtime error: {message}")]
    Runtime {
        message: String,
        /// HTTP status of a failed remote call, when that is the cause.
        status: Option<u16>,
    },
}

impl Error {
    #[inline]
    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    #[inline]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[inline]
    pub fn resolution(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            path: path.into(),
            message: message.into(),
        }
    }

    #[inline]
    pub fn wiring(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Wiring {
            name: name.into(),
            message: message.into(),
        }
    }

    #[inline]
    pub fn dependency(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dependency {
            name: name.into(),
            message: message.into(),
        }
    }

    #[inline]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            status: None,
        }
    }

    /// A handler or routed method failed; reported against its service.
    #[inline]
    pub fn handler(service: &str, message: impl Into<String>) -> Self {
        Self::Runtime {
            message: format!("{service}: {}", message.into()),
            status: None,
        }
    }

    /// A remote call came back non-2xx.
    #[inline]
    pub fn remote(status: u16, body: impl Into<String>) -> Self {
        Self::Runtime {
            message: body.into(),
            status: Some(status),
        }
    }

    /// JSON encoding or decoding failed at a service boundary.
    #[inline]
    pub fn encode(err: serde_json::Error) -> Self {
        Self::Runtime {
            message: err.to_string(),
            status: None,
        }
    }

    /// The HTTP status of a failed remote call, if that is what this is.
    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Runtime { status, .. } => *status,
            _ => None,
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
