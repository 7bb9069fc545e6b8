// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store capability traits.
//!
//! The engine never talks to a database client directly. It needs a small
//! set of capabilities from each side, and the embedding application
//! provides them:
//!
//! - [`SourceStore`]: collection metadata, index management, index range
//!   scans, and change history (per document and per collection)
//! - [`TargetStore`]: collection existence and an atomic "apply this
//!   mutation set" primitive
//! - [`DocumentScan`]: paged scan of current documents, used by the validator
//!
//! [`crate::memory`] provides in-process implementations of all three.
//!
//! # Example
//!
//! ```rust,no_run
//! use migration_engine::store::{BoxFuture, Mutation, MutationOutcome, TargetStore};
//!
//! struct LoggingTarget;
//!
//! impl TargetStore for LoggingTarget {
//!     fn collection_exists(&self, _name: &str) -> BoxFuture<'_, bool> {
//!         Box::pin(async move { Ok(true) })
//!     }
//!
//!     fn submit_atomic(&self, mutations: Vec<Mutation>) -> BoxFuture<'_, Vec<MutationOutcome>> {
//!         Box::pin(async move {
//!             Ok(mutations.iter().map(|_| MutationOutcome::Created).collect())
//!         })
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

use crate::config::CollectionTarget;
use crate::cursor::{Cursor, Page};
use crate::event::{ChangeAction, DocumentRef, RawEvent};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Simplified error for store operations.
#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// Source collection metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    /// History retention in days. Zero or less means no history is kept.
    pub history_days: i64,
}

/// State of a secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub name: String,
    /// Collection the index covers.
    pub source: String,
    /// Whether the index has finished building and can be scanned.
    pub active: bool,
}

/// Definition of the `(ts, ref)` index the harvester scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub source: String,
    /// Value fields in order. Always `["ts", "ref"]` for migration indexes.
    pub values: Vec<String>,
}

impl IndexDefinition {
    pub fn for_target(target: &CollectionTarget) -> Self {
        Self {
            name: target.index.clone(),
            source: target.name.clone(),
            values: vec!["ts".to_string(), "ref".to_string()],
        }
    }
}

/// One index entry: a document and the timestamp of its latest change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub ts: i64,
    pub doc: DocumentRef,
}

/// Bounds for a collection history scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// Inclusive lower bound (µs).
    pub from_ts: i64,
    /// Exclusive upper bound (µs). `None` scans to the present.
    pub until_ts: Option<i64>,
    /// Only return entries of this kind.
    pub action: Option<ChangeAction>,
}

impl HistoryFilter {
    /// Removes committed in `[from_ts, until_ts)`.
    pub fn removes_between(from_ts: i64, until_ts: i64) -> Self {
        Self {
            from_ts,
            until_ts: Some(until_ts),
            action: Some(ChangeAction::Remove),
        }
    }
}

/// A live document as returned by [`DocumentScan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc: DocumentRef,
    /// Store-assigned version timestamp. Differs between source and target.
    pub ts: i64,
    pub data: Option<Value>,
}

impl Document {
    /// JSON view used for field-by-field comparison.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "id": self.doc.id,
            "ts": self.ts,
            "data": self.data.clone().unwrap_or(Value::Null),
        })
    }
}

/// A single change submitted to the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Create the document unless it already exists.
    CreateIfAbsent { doc: DocumentRef, data: Option<Value> },
    /// Replace the document's data if it exists.
    UpdateIfPresent { doc: DocumentRef, data: Option<Value> },
    /// Delete the document if it exists.
    DeleteIfPresent { doc: DocumentRef },
}

impl Mutation {
    pub fn doc(&self) -> &DocumentRef {
        match self {
            Mutation::CreateIfAbsent { doc, .. } => doc,
            Mutation::UpdateIfPresent { doc, .. } => doc,
            Mutation::DeleteIfPresent { doc } => doc,
        }
    }
}

/// What the target did with one mutation of an accepted atomic set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationOutcome {
    Created,
    /// Create of a document the target already has. No change.
    AlreadyExists,
    Updated,
    /// Update of a document the target does not have. No change.
    NoSuchDocument,
    Deleted,
    /// Delete of a document the target does not have. No change.
    AlreadyAbsent,
}

/// What the engine needs from the store being migrated away from.
pub trait SourceStore: Send + Sync + 'static {
    /// Names of every collection, for auto-discovery.
    fn list_collections(&self) -> BoxFuture<'_, Vec<String>>;

    /// Collection metadata, or `None` if it does not exist.
    fn collection_info(&self, name: &str) -> BoxFuture<'_, Option<CollectionInfo>>;

    /// Index state, or `None` if it does not exist.
    fn index_status(&self, name: &str) -> BoxFuture<'_, Option<IndexStatus>>;

    /// Create an index. It may take a while to become active.
    fn create_index(&self, definition: IndexDefinition) -> BoxFuture<'_, ()>;

    /// Range scan of a `(ts, ref)` index for entries with `ts >= from_ts`,
    /// in ascending `(ts, ref)` order.
    fn scan_index(
        &self,
        index: &str,
        from_ts: i64,
        cursor: Option<Cursor>,
        size: usize,
    ) -> BoxFuture<'_, Page<IndexEntry>>;

    /// History of one document from `from_ts` on, oldest first.
    fn document_history(
        &self,
        doc: &DocumentRef,
        from_ts: i64,
        cursor: Option<Cursor>,
        size: usize,
    ) -> BoxFuture<'_, Page<RawEvent>>;

    /// History of a whole collection within `filter`, oldest first.
    fn collection_history(
        &self,
        collection: &str,
        filter: HistoryFilter,
        cursor: Option<Cursor>,
        size: usize,
    ) -> BoxFuture<'_, Page<RawEvent>>;

    /// Whether the document's data was null as of `ts`.
    fn data_is_null_at(&self, doc: &DocumentRef, ts: i64) -> BoxFuture<'_, bool>;
}

/// What the engine needs from the store being migrated to.
pub trait TargetStore: Send + Sync + 'static {
    fn collection_exists(&self, name: &str) -> BoxFuture<'_, bool>;

    /// Apply every mutation or none of them.
    ///
    /// On success, returns one outcome per mutation, in order. An error
    /// means nothing was applied.
    fn submit_atomic(&self, mutations: Vec<Mutation>) -> BoxFuture<'_, Vec<MutationOutcome>>;
}

/// Paged scan over the current documents of a collection, ordered by id.
pub trait DocumentScan: Send + Sync + 'static {
    fn scan_documents(
        &self,
        collection: &str,
        cursor: Option<Cursor>,
        size: usize,
    ) -> BoxFuture<'_, Page<Document>>;
}
