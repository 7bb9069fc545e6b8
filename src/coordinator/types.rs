//! Engine state and run summary types.
//!
//! # State Transitions
//!
//! ```text
//!               run()
//! Created ─────────────→ Initializing ──(readiness failed)──→ Failed
//!                             │                                  ↑
//!                             │ all collections ready            │ (fatal error)
//!                             ↓                                  │
//!                        Harvesting ──→ Applying ──→ Sleeping ───┤
//!                             ↑                        │         │
//!                             └────────────────────────┘         │
//!                                      │                         │
//!            (budget spent, caught up, or shutdown)              │
//!                                      ↓                         │
//!                                    Done ───────────────────────┘
//! ```
//!
//! - **Created**: after `MigrationEngine::new()`. Nothing has been read.
//! - **Initializing**: resolving collections and waiting for readiness.
//! - **Harvesting**: reading one window of one collection.
//! - **Applying**: submitting that window's batches.
//! - **Sleeping**: pacing pause after a collection's window.
//! - **Done**: the run ended normally.
//! - **Failed**: a fatal error ended the run.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::apply::ApplyReport;

/// State of the migration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but not run.
    Created,
    /// Checking collections, creating indexes, waiting for them to activate.
    Initializing,
    /// Reading a window of changes from the source.
    Harvesting,
    /// Submitting batches to the target.
    Applying,
    /// Pausing between collection cycles.
    Sleeping,
    /// Run finished. See [`StopReason`] for why.
    Done,
    /// Run aborted on an error. Check logs for details.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Initializing => write!(f, "Initializing"),
            EngineState::Harvesting => write!(f, "Harvesting"),
            EngineState::Applying => write!(f, "Applying"),
            EngineState::Sleeping => write!(f, "Sleeping"),
            EngineState::Done => write!(f, "Done"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `pacing.iterations` windows were processed.
    IterationBudget,
    /// Every collection's next window starts at or after now.
    CaughtUp,
    /// Shutdown was signalled at a pacing checkpoint.
    Shutdown,
}

/// Source of wall-clock time, in microseconds since the epoch.
pub trait Clock: Send + Sync + 'static {
    fn now_micros(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0)
    }
}

/// Progress of one collection over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub collection: String,
    /// Windows harvested and applied.
    pub windows: u32,
    pub events: usize,
    pub batches: usize,
    pub report: ApplyReport,
    /// Start of the next unprocessed window.
    pub watermark: i64,
    /// Where a follow-up run should start.
    ///
    /// The start of the last processed window whose tail was still in the
    /// future when it was harvested (later writes may have landed in it),
    /// otherwise `watermark`.
    pub resume_from: i64,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub iterations: u32,
    pub stop_reason: StopReason,
    pub collections: Vec<CollectionSummary>,
}

impl RunSummary {
    pub fn collection(&self, name: &str) -> Option<&CollectionSummary> {
        self.collections.iter().find(|c| c.collection == name)
    }

    /// Events applied across all collections.
    pub fn total_events(&self) -> usize {
        self.collections.iter().map(|c| c.events).sum()
    }

    /// Earliest `resume_from` across collections.
    pub fn resume_from(&self) -> Option<i64> {
        self.collections.iter().map(|c| c.resume_from).min()
    }
}
