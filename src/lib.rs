//! # Migration Engine
//!
//! Incremental migration of a document store's change history into a
//! second store, replayed window by window.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                            migration-engine                               │
//! │                                                                           │
//! │  ┌────────────────┐   ┌────────────────┐   ┌──────────┐   ┌────────────┐  │
//! │  │ ReadinessGate  │──►│ EventHarvester │──►│ BatchPlan│──►│ Replicator │  │
//! │  │ (history,index,│   │ (index scan +  │   │ (ts order│   │ (atomic    │  │
//! │  │  target)       │   │  remove scan)  │   │  ≤ width)│   │  submit)   │  │
//! │  └────────────────┘   └────────────────┘   └──────────┘   └────────────┘  │
//! │          ▲                    ▲                                  │        │
//! │          │                    │ Watermark (per collection)       ▼        │
//! │  ┌───────┴────────────────────┴─────────┐                ┌─────────────┐  │
//! │  │ MigrationEngine (iterations, pacing) │                │  Validator  │  │
//! │  └──────────────────────────────────────┘                └─────────────┘  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Windows
//!
//! Each collection has a watermark: the start of its next fixed-length
//! window. One iteration harvests every change in `[start, start + window)`,
//! applies it to the target in timestamp order, and moves the watermark on.
//! The run ends when the iteration budget is spent or the next window would
//! begin in the future.
//!
//! Applying is idempotent: creating an existing document and removing a
//! missing one are accepted as no-ops, so any window can be replayed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use migration_engine::{MigrationConfig, MigrationEngine};
//! use migration_engine::memory::{InMemorySource, InMemoryTarget};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = Arc::new(InMemorySource::new());
//!     let target = Arc::new(InMemoryTarget::new());
//!     let config = MigrationConfig::default();
//!
//!     let engine = MigrationEngine::new(config, source, target).expect("Invalid config");
//!     let summary = engine.run().await.expect("Migration failed");
//!     println!("resume next run from {:?}", summary.resume_from());
//! }
//! ```

pub mod apply;
pub mod batch;
pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod error;
pub mod event;
pub mod harvest;
pub mod memory;
pub mod metrics;
pub mod readiness;
pub mod resilience;
pub mod store;
pub mod validator;
pub mod watermark;

// Re-exports for convenience
pub use apply::{ApplyReport, Replicator};
pub use batch::{build_batches, Batch, BatchPlan};
pub use config::{CollectionTarget, MigrationConfig, MigrationSettings};
pub use coordinator::{Clock, CollectionSummary, EngineState, MigrationEngine, RunSummary, StopReason, SystemClock};
pub use cursor::{Cursor, Page};
pub use error::{MigrationError, Result};
pub use event::{ChangeAction, ChangeEvent, DocumentRef, RawEvent};
pub use harvest::{EventHarvester, HarvestedWindow};
pub use readiness::{CollectionReadiness, ReadinessGate};
pub use store::{DocumentScan, Mutation, MutationOutcome, SourceStore, StoreError, TargetStore};
pub use validator::{ValidationReport, Validator};
pub use watermark::Watermark;
