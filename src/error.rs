//! Error types for lms-core.

use thiserror::Error;

/// Result type alias using lms-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// One of the two storage backends behind a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Key/attribute store used for exact and filtered lookups
    Structured,
    /// Similarity store used for semantic lookups
    Vector,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Structured => write!(f, "structured"),
            Backend::Vector => write!(f, "vector"),
        }
    }
}

/// Errors that can occur during memory store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A backend could not be reached or rejected the operation
    #[error("{backend} store unavailable: {message}")]
    BackendUnavailable { backend: Backend, message: String },

    /// Invalid input (importance out of range, bad chunk sizes, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// One backend accepted a write and the other rejected it
    #[error("Partial write for key {key}: {written} succeeded, {failed} failed: {message}")]
    PartialWrite {
        key: String,
        written: Backend,
        failed: Backend,
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading a knowledge source failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a structured-store failure.
    pub fn structured(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: Backend::Structured,
            message: message.into(),
        }
    }

    /// Create a vector-store failure.
    pub fn vector(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: Backend::Vector,
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a partial write error.
    pub fn partial_write(
        key: impl Into<String>,
        written: Backend,
        failed: Backend,
        message: impl Into<String>,
    ) -> Self {
        Self::PartialWrite {
            key: key.into(),
            written,
            failed,
            message: message.into(),
        }
    }

    /// Whether the error came from an unreachable backend.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. } | Self::PartialWrite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = Error::vector("connection refused");
        assert_eq!(
            err.to_string(),
            "vector store unavailable: connection refused"
        );
        assert!(err.is_backend());
    }

    #[test]
    fn test_partial_write_display() {
        let err = Error::partial_write("lt:abc", Backend::Structured, Backend::Vector, "timeout");
        assert!(err.to_string().contains("lt:abc"));
        assert!(err.to_string().contains("structured succeeded"));
        assert!(err.is_backend());
        assert!(!Error::validation("bad").is_backend());
    }
}
