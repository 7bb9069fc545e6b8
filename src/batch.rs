//! Merge, order, and batch harvested events.
//!
//! The two scans of a window are merged into one timestamp-ordered stream
//! and cut into batches for atomic submission.
//!
//! # Design
//!
//! ```text
//! create_update ──┐
//!                 ├──▶ concat ──▶ stable sort by ts ──▶ BatchPlan
//! removes ────────┘                                       │
//!                                                         ▼
//!          [e1 e2 e3 .. e10] [e11 ..]  (≤ max_batch_size, no repeated doc)
//! ```
//!
//! A batch closes early when the next event touches a document already in
//! it: the target sees each document at most once per atomic submission, so
//! a create and a later update of the same document land in consecutive
//! batches and keep their order.
//!
//! Events with equal timestamps keep their relative input order: creates
//! and updates (index order) before removes.
//!
//! Batches are planned before anything is applied. A payload-less update
//! that the replicator later skips still holds its slot, so that batch is
//! submitted one mutation short of the width instead of pulling the next
//! event forward.

use crate::event::{ChangeEvent, DocumentRef};
use std::collections::HashSet;
use std::collections::VecDeque;

/// Ordered events for one atomic submission.
///
/// No two events share a document; the length never exceeds the plan's
/// batch size.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    events: Vec<ChangeEvent>,
}

impl Batch {
    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<ChangeEvent> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Timestamp range `(first, last)` covered by the batch.
    pub fn ts_range(&self) -> Option<(i64, i64)> {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => Some((first.ts, last.ts)),
            _ => None,
        }
    }
}

/// Forward-only sequence of batches cut from a merged, ordered stream.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pending: VecDeque<ChangeEvent>,
    max_batch_size: usize,
}

impl BatchPlan {
    /// Events not yet handed out in a batch.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

impl Iterator for BatchPlan {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        let mut events = Vec::with_capacity(self.max_batch_size.min(self.pending.len()));
        let mut docs: HashSet<DocumentRef> = HashSet::new();

        while events.len() < self.max_batch_size {
            let Some(front) = self.pending.front() else {
                break;
            };
            if docs.contains(&front.doc) {
                break;
            }
            if let Some(event) = self.pending.pop_front() {
                docs.insert(event.doc.clone());
                events.push(event);
            }
        }
        Some(Batch { events })
    }
}

/// Merge both event classes into timestamp order and plan the batches.
///
/// `max_batch_size == 0` is treated as 1.
pub fn build_batches(
    create_update: Vec<ChangeEvent>,
    removes: Vec<ChangeEvent>,
    max_batch_size: usize,
) -> BatchPlan {
    let mut merged = create_update;
    merged.extend(removes);
    // sort_by_key is stable: equal timestamps keep input order.
    merged.sort_by_key(|e| e.ts);
    BatchPlan {
        pending: merged.into(),
        max_batch_size: max_batch_size.max(1),
    }
}
