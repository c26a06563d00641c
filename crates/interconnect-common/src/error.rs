//! Error types for the interconnect control plane
//!
//! Errors are structured with fields to aid debugging in production.
//! Decoding failures name the entity kind that failed, profile errors name
//! the profile and secret involved.

use std::path::PathBuf;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for control plane operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Malformed router configuration or annotation content
    #[error("decode error: {message}")]
    Decode {
        /// Description of what failed
        message: String,
        /// The entity kind being decoded (if known)
        kind: Option<String>,
    },

    /// No free port is left in the allocation pool
    #[error("no free port available for {key}")]
    PortsExhausted {
        /// Logical key the port was requested for
        key: String,
    },

    /// Malformed or unwritable secret annotation
    #[error("annotation error on secret {secret}: {message}")]
    Annotation {
        /// Secret key (`namespace/name`)
        secret: String,
        /// Description of what failed
        message: String,
    },

    /// Writing a profile's certificate material failed
    #[error("write for sslProfile {profile} from secret {secret} failed: {message}")]
    ProfileWrite {
        /// Profile being materialized
        profile: String,
        /// Secret backing the profile
        secret: String,
        /// Description of what failed
        message: String,
    },

    /// Filesystem error
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// The underlying io error
        #[source]
        source: std::io::Error,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "tracker", "sync", "controller")
        context: String,
    },
}

impl Error {
    /// Create a decode error with the given message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a decode error for a specific entity kind
    pub fn decode_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a pool exhaustion error for the given key
    pub fn ports_exhausted(key: impl Into<String>) -> Self {
        Self::PortsExhausted { key: key.into() }
    }

    /// Create an annotation error for a secret
    pub fn annotation(secret: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Annotation {
            secret: secret.into(),
            message: msg.into(),
        }
    }

    /// Create a profile write error
    pub fn profile_write(
        profile: impl Into<String>,
        secret: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ProfileWrite {
            profile: profile.into(),
            secret: secret.into(),
            message: msg.into(),
        }
    }

    /// Create an io error bound to a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Decode errors need a content fix and exhaustion needs a bigger pool,
    /// so neither is retried. Kubernetes errors depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Decode { .. } => false,
            Error::PortsExhausted { .. } => false,
            Error::Annotation { .. } => false,
            Error::ProfileWrite { .. } => true,
            Error::Io { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the entity kind if this is a decode error for a known kind
    pub fn kind(&self) -> Option<&str> {
        match self {
            Error::Decode { kind, .. } => kind.as_deref(),
            _ => None,
        }
    }
}
