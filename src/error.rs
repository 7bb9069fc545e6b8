// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the migration engine.
//!
//! Errors are categorized by the stage that raised them (readiness, store
//! round trip, batch apply, validation) and carry enough context to tell
//! which collection, document, or operation was involved.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Config` | No | Missing collection, history disabled, target absent, bad settings |
//! | `IndexNotReady` | Yes | Secondary index still activating after the poll budget |
//! | `Store` | Yes | A source/target round trip failed or timed out |
//! | `ApplyBatch` | Yes | The target rejected an atomic mutation set |
//! | `Protocol` | No | The source reported an unrecognized change action |
//! | `ValidationMismatch` | No | Source and target disagree on a document field |
//! | `PageCountMismatch` | No | Source and target pages differ in length |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Shutdown` | No | Shutdown requested while waiting |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Nothing inside the engine retries a failed window or batch. A retryable
//! error means the caller may re-invoke the run from the last reported
//! watermark; the engine never resumes on its own.

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Errors that can occur during a migration run.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Invalid configuration or a collection that cannot be migrated.
    ///
    /// Not retryable - fix the source/target setup and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The per-collection secondary index is not active yet.
    ///
    /// Raised only once the readiness poll budget is spent.
    #[error("Index {index} is not active yet, retry later")]
    IndexNotReady { index: String },

    /// A store round trip failed (network, timeout, server error).
    #[error("Store error ({operation}): {message}")]
    Store { operation: String, message: String },

    /// The target rejected an atomic batch. Nothing from the batch was applied.
    #[error("Apply failed for {size} mutation(s) on {collection}: {message}")]
    ApplyBatch {
        collection: String,
        size: usize,
        message: String,
    },

    /// The source reported something this engine does not understand.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Validation found a differing field.
    #[error("Field '{field}' of document {doc_id}: {source_value} <> {target_value}")]
    ValidationMismatch {
        doc_id: String,
        field: String,
        source_value: String,
        target_value: String,
    },

    /// Validation found pages of different length.
    #[error("MISMATCH in count of documents on page {page}: source {source_len}, target {target_len}")]
    PageCountMismatch {
        page: u64,
        source_len: usize,
        target_len: usize,
    },

    /// Engine state machine violation (e.g. running an engine twice).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown was requested while waiting on a pacing or readiness delay.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MigrationError {
    /// Wrap a store failure with the operation that produced it.
    pub fn store(operation: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            operation: operation.into(),
            message: source.0,
        }
    }

    /// Create a store error from a plain message (timeouts, truncated pages).
    pub fn store_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::IndexNotReady { .. } => true,
            Self::Store { .. } => true,
            Self::ApplyBatch { .. } => true, // atomic, so nothing partial to undo
            Self::Config(_) => false,
            Self::Protocol(_) => false,
            Self::ValidationMismatch { .. } => false,
            Self::PageCountMismatch { .. } => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::IndexNotReady { .. } => "index_not_ready",
            Self::Store { .. } => "store",
            Self::ApplyBatch { .. } => "apply_batch",
            Self::Protocol(_) => "protocol",
            Self::ValidationMismatch { .. } => "validation_mismatch",
            Self::PageCountMismatch { .. } => "page_count_mismatch",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_store() {
        let err = MigrationError::store("scan_index", StoreError("connection reset".into()));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("scan_index"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_is_retryable_index_not_ready() {
        let err = MigrationError::IndexNotReady {
            index: "_migration_index_for_orders".into(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("retry later"));
    }

    #[test]
    fn test_is_retryable_apply_batch() {
        let err = MigrationError::ApplyBatch {
            collection: "orders".into(),
            size: 10,
            message: "transaction aborted".into(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("10 mutation(s)"));
    }

    #[test]
    fn test_not_retryable_config() {
        let err = MigrationError::Config("Please enable history for this collection".into());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_not_retryable_protocol() {
        let err = MigrationError::Protocol("unknown action 'touch'".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_mismatch_formatting() {
        let err = MigrationError::ValidationMismatch {
            doc_id: "orders/42".into(),
            field: "total".into(),
            source_value: "7".into(),
            target_value: "8".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Field 'total' of document orders/42: 7 <> 8");
    }

    #[test]
    fn test_page_count_mismatch_formatting() {
        let err = MigrationError::PageCountMismatch {
            page: 3,
            source_len: 100,
            target_len: 99,
        };
        let msg = err.to_string();
        assert!(msg.contains("MISMATCH in count of documents"));
        assert!(msg.contains("page 3"));
    }

    #[test]
    fn test_not_retryable_invalid_state() {
        let err = MigrationError::InvalidState {
            expected: "Created".into(),
            actual: "Done".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Created"));
        assert!(err.to_string().contains("Done"));
    }

    #[test]
    fn test_not_retryable_shutdown() {
        let err = MigrationError::Shutdown;
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "shutdown");
    }
}
