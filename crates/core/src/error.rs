//! Error types for the beamcat catalog
//!
//! This module defines all error types surfaced by the read layer.
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! Propagation policy: every variant propagates to the immediate caller;
//! nothing is swallowed internally. The only internally-recovered
//! conditions are a missing RunStop (a partial run, not an error) and the
//! external-data resolver's first resolution miss (recovered by its retry
//! loop).

use std::io;
use thiserror::Error;

/// Result type alias for catalog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the read layer
#[derive(Debug, Error)]
pub enum Error {
    /// No RunStart document matches the given identifier
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// A run has no descriptors for the requested stream name
    #[error("stream '{stream}' not found in run {run}")]
    StreamNotFound {
        /// RunStart uid
        run: String,
        /// Requested stream name
        stream: String,
    },

    /// No Resource document with the given identifier
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// No Datum document with the given identifier
    #[error("datum not found: {0}")]
    DatumNotFound(String),

    /// A row's actual shape differs from the descriptor's declared shape
    /// by more than the repair tolerance
    #[error("bad shape metadata for field '{field}': declared {declared:?}, actual {actual:?}")]
    BadShapeMetadata {
        /// Field name from the descriptor's data_keys
        field: String,
        /// Shape declared by the descriptor
        declared: Vec<u64>,
        /// Shape measured from the row value
        actual: Vec<u64>,
    },

    /// External field resolution looped without progress on a datum id
    #[error("unresolvable external reference: {0}")]
    UnresolvableReference(String),

    /// A partial-identifier lookup matched more than one run
    #[error("'{needle}' matched {} runs: {candidates:?}", candidates.len())]
    AmbiguousMatch {
        /// The partial identifier supplied by the caller
        needle: String,
        /// Uids of every matching RunStart
        candidates: Vec<String>,
    },

    /// A caller-supplied filter uses an unsupported or inconsistent shape;
    /// rejected before any I/O
    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    /// Backend document store failure
    #[error("store error: {0}")]
    Store(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(format!("serialization: {}", e))
    }
}

impl Error {
    /// True for every variant in the NotFound family
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::RunNotFound(_)
                | Error::StreamNotFound { .. }
                | Error::ResourceNotFound(_)
                | Error::DatumNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_run_not_found() {
        let err = Error::RunNotFound("abc123".to_string());
        let msg = err.to_string();
        assert!(msg.contains("run not found"));
        assert!(msg.contains("abc123"));
    }

    #[test]
    fn test_error_display_stream_not_found() {
        let err = Error::StreamNotFound {
            run: "r1".to_string(),
            stream: "primary".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("primary"));
        assert!(msg.contains("r1"));
    }

    #[test]
    fn test_error_display_bad_shape() {
        let err = Error::BadShapeMetadata {
            field: "image".to_string(),
            declared: vec![10, 10],
            actual: vec![10, 20],
        };
        let msg = err.to_string();
        assert!(msg.contains("image"));
        assert!(msg.contains("[10, 10]"));
        assert!(msg.contains("[10, 20]"));
    }

    #[test]
    fn test_error_display_ambiguous_match() {
        let err = Error::AmbiguousMatch {
            needle: "ab".to_string(),
            candidates: vec!["ab1".to_string(), "ab2".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("matched 2 runs"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::RunNotFound("x".into()).is_not_found());
        assert!(Error::DatumNotFound("x".into()).is_not_found());
        assert!(Error::ResourceNotFound("x".into()).is_not_found());
        assert!(!Error::MalformedFilter("x".into()).is_not_found());
        assert!(!Error::UnresolvableReference("x".into()).is_not_found());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Store(_)));
        assert!(err.to_string().contains("access denied"));
    }
}
