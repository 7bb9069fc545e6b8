// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch application to the target.
//!
//! Each event of a batch becomes one conditional mutation:
//!
//! | Event | Mutation | Benign outcome |
//! |-------|----------|----------------|
//! | create | `CreateIfAbsent` | `AlreadyExists` (replayed create) |
//! | update | `UpdateIfPresent` | `NoSuchDocument` (logged as a warning) |
//! | remove | `DeleteIfPresent` | `AlreadyAbsent` (replayed remove) |
//!
//! The whole batch goes to the target in one atomic submission. If the
//! target rejects it, nothing from the batch is applied and the run stops
//! with [`MigrationError::ApplyBatch`].
//!
//! # Updates without payload
//!
//! The source history sometimes records an update with no data even though
//! the document had data at that instant. Such an update is checked against
//! the source as of its timestamp: if the data really was null it is
//! replayed, otherwise it is skipped.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::batch::Batch;
use crate::config::SloConfig;
use crate::error::{MigrationError, Result};
use crate::event::{ChangeAction, ChangeEvent};
use crate::metrics;
use crate::resilience::with_timeout;
use crate::store::{Mutation, MutationOutcome, SourceStore, TargetStore};

/// Tally of what applying one or more batches did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Atomic submissions accepted by the target.
    pub submissions: usize,
    pub created: usize,
    pub already_existed: usize,
    pub updated: usize,
    pub no_such_document: usize,
    pub deleted: usize,
    pub already_absent: usize,
    /// Payload-less updates skipped because the source had data at that time.
    pub skipped_updates: usize,
}

impl ApplyReport {
    fn record(&mut self, outcome: MutationOutcome) {
        match outcome {
            MutationOutcome::Created => self.created += 1,
            MutationOutcome::AlreadyExists => self.already_existed += 1,
            MutationOutcome::Updated => self.updated += 1,
            MutationOutcome::NoSuchDocument => self.no_such_document += 1,
            MutationOutcome::Deleted => self.deleted += 1,
            MutationOutcome::AlreadyAbsent => self.already_absent += 1,
        }
    }

    /// Mutations that changed the target.
    pub fn changed(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Mutations accepted without effect.
    pub fn unchanged(&self) -> usize {
        self.already_existed + self.no_such_document + self.already_absent
    }

    pub fn merge(&mut self, other: &ApplyReport) {
        self.submissions += other.submissions;
        self.created += other.created;
        self.already_existed += other.already_existed;
        self.updated += other.updated;
        self.no_such_document += other.no_such_document;
        self.deleted += other.deleted;
        self.already_absent += other.already_absent;
        self.skipped_updates += other.skipped_updates;
    }
}

/// Turns batches into atomic target submissions.
pub struct Replicator<S: SourceStore, T: TargetStore> {
    source: Arc<S>,
    target: Arc<T>,
    slo: SloConfig,
    request_timeout: Duration,
}

impl<S: SourceStore, T: TargetStore> Replicator<S, T> {
    pub fn new(source: Arc<S>, target: Arc<T>, slo: SloConfig, request_timeout: Duration) -> Self {
        Self {
            source,
            target,
            slo,
            request_timeout,
        }
    }

    /// Apply one batch atomically.
    ///
    /// A batch whose events were all skipped submits nothing.
    #[instrument(skip(self, batch), fields(size = batch.len()))]
    pub async fn apply_batch(&self, batch: &Batch) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        let Some(first) = batch.events().first() else {
            return Ok(report);
        };
        let collection = first.doc.collection.clone();

        let mut mutations = Vec::with_capacity(batch.len());
        for event in batch.events() {
            match self.translate(event).await? {
                Some(mutation) => mutations.push(mutation),
                None => report.skipped_updates += 1,
            }
        }
        if mutations.is_empty() {
            debug!(collection = %collection, skipped = report.skipped_updates, "Nothing to submit");
            return Ok(report);
        }

        let size = mutations.len();
        let docs: Vec<_> = mutations.iter().map(|m| m.doc().clone()).collect();
        let started = Instant::now();

        let outcomes = match with_timeout(
            "submit_atomic",
            self.request_timeout,
            self.target.submit_atomic(mutations),
        )
        .await
        {
            Ok(outcomes) => outcomes,
            Err(MigrationError::Store { message, .. }) => {
                metrics::record_error(&collection, "apply_batch");
                return Err(MigrationError::ApplyBatch {
                    collection,
                    size,
                    message,
                });
            }
            Err(e) => return Err(e),
        };

        if outcomes.len() != size {
            return Err(MigrationError::Protocol(format!(
                "target returned {} outcome(s) for {} mutation(s)",
                outcomes.len(),
                size
            )));
        }

        report.submissions = 1;
        for (doc, outcome) in docs.iter().zip(outcomes) {
            report.record(outcome);
            match outcome {
                MutationOutcome::AlreadyExists => {
                    debug!(doc = %doc, "Document already exists");
                    metrics::record_benign_outcome(&collection, "already_exists");
                }
                MutationOutcome::NoSuchDocument => {
                    warn!(doc = %doc, "Update skipped, no such document in target");
                    metrics::record_benign_outcome(&collection, "no_such_document");
                }
                MutationOutcome::AlreadyAbsent => {
                    debug!(doc = %doc, "Document does not exist or is already deleted");
                    metrics::record_benign_outcome(&collection, "already_absent");
                }
                _ => {}
            }
        }

        let elapsed = started.elapsed();
        metrics::record_batch_apply(&collection, size, report.changed(), report.skipped_updates, elapsed);
        if self.slo.is_batch_apply_violation(elapsed) {
            let latency_ms = elapsed.as_millis() as u64;
            metrics::record_slo_violation(&collection, "batch_apply", latency_ms);
            warn!(
                collection = %collection,
                latency_ms,
                threshold_ms = self.slo.max_batch_apply_latency_ms,
                "Batch apply exceeded SLO"
            );
        }
        debug!(collection = %collection, size, changed = report.changed(), "Batch applied");
        Ok(report)
    }

    /// Map one event to its mutation, or `None` if it should be skipped.
    async fn translate(&self, event: &ChangeEvent) -> Result<Option<Mutation>> {
        let doc = event.doc.clone();
        Ok(Some(match event.action {
            ChangeAction::Create => Mutation::CreateIfAbsent {
                doc,
                data: event.data.clone(),
            },
            ChangeAction::Update if event.data.is_none() => {
                let is_null = with_timeout(
                    "data_is_null_at",
                    self.request_timeout,
                    self.source.data_is_null_at(&event.doc, event.ts),
                )
                .await?;
                if !is_null {
                    debug!(doc = %event.doc, ts = event.ts, "Skipping no-op update");
                    return Ok(None);
                }
                Mutation::UpdateIfPresent { doc, data: None }
            }
            ChangeAction::Update => Mutation::UpdateIfPresent {
                doc,
                data: event.data.clone(),
            },
            ChangeAction::Remove => Mutation::DeleteIfPresent { doc },
        }))
    }
}
