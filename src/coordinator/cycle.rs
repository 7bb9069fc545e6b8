// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One collection's migration cycle.
//!
//! ```text
//! harvest_window ──▶ build_batches ──▶ apply_batch (one at a time) ──▶ advance
//!                                                                        │
//!                                                      pause ◀───────────┘
//! ```
//!
//! Batches apply strictly in order: a create in batch N must be visible to
//! the update of the same document in batch N+1. A failed batch aborts the
//! run with the watermark still at the window start, so a re-run repeats
//! the whole window. Creates and removes are idempotent on the target.

use tracing::{debug, error, info, instrument};

use super::types::{Clock, CollectionSummary, EngineState};
use super::MigrationEngine;
use crate::apply::{ApplyReport, Replicator};
use crate::batch::build_batches;
use crate::config::CollectionTarget;
use crate::error::Result;
use crate::harvest::EventHarvester;
use crate::metrics;
use crate::store::{SourceStore, TargetStore};
use crate::watermark::Watermark;

/// Per-collection state owned by a run.
pub(super) struct CollectionRun {
    pub(super) watermark: Watermark,
    /// Start of the last window harvested while its tail was in the future.
    open_window: Option<i64>,
    pub(super) caught_up: bool,
    summary: CollectionSummary,
}

impl CollectionRun {
    pub(super) fn new(target: &CollectionTarget, start: i64, window: i64, now: i64) -> Self {
        let watermark = Watermark::new(target, start, window);
        let caught_up = watermark.is_future(now);
        if caught_up {
            info!(
                collection = %target.name,
                start,
                now,
                "Start timestamp is not in the past, nothing to harvest"
            );
        }
        Self {
            summary: CollectionSummary {
                collection: target.name.clone(),
                watermark: start,
                ..Default::default()
            },
            watermark,
            open_window: None,
            caught_up,
        }
    }

    pub(super) fn into_summary(self) -> CollectionSummary {
        let mut summary = self.summary;
        summary.watermark = self.watermark.window_start;
        summary.resume_from = self.open_window.unwrap_or(self.watermark.window_start);
        summary
    }
}

impl<S: SourceStore, T: TargetStore, C: Clock> MigrationEngine<S, T, C> {
    /// Harvest, apply, and advance past the collection's current window.
    #[instrument(skip_all, fields(collection = %run.watermark.collection, window_start = run.watermark.window_start))]
    pub(super) async fn process_window(
        &self,
        harvester: &EventHarvester<S>,
        replicator: &Replicator<S, T>,
        run: &mut CollectionRun,
        batch_width: usize,
    ) -> Result<()> {
        self.set_state(EngineState::Harvesting);
        let window_start = run.watermark.window_start;
        let open = run.watermark.is_open_at(self.clock.now_micros());

        let window = harvester.harvest_window(&mut run.watermark).await.map_err(|e| {
            error!(error = %e, "Harvest failed, re-run from this window");
            metrics::record_error(&run.watermark.collection, e.kind());
            e
        })?;
        let events = window.total();

        self.set_state(EngineState::Applying);
        let mut report = ApplyReport::default();
        let mut batches = 0;
        for batch in build_batches(window.create_update, window.removes, batch_width) {
            let applied = replicator.apply_batch(&batch).await.map_err(|e| {
                error!(error = %e, batch = batches, "Batch failed, re-run from this window");
                e
            })?;
            report.merge(&applied);
            batches += 1;
        }

        if open {
            debug!("Window tail was in the future at harvest time");
            run.open_window = Some(window_start);
        }
        run.watermark.advance();
        metrics::record_watermark(&run.watermark.collection, run.watermark.window_start);
        self.record_progress(&run.watermark).await;

        let summary = &mut run.summary;
        summary.windows += 1;
        summary.events += events;
        summary.batches += batches;
        summary.report.merge(&report);
        summary.watermark = run.watermark.window_start;

        info!(
            events,
            batches,
            changed = report.changed(),
            unchanged = report.unchanged(),
            skipped = report.skipped_updates,
            next_window = run.watermark.window_start,
            "Window migrated"
        );

        if run.watermark.is_future(self.clock.now_micros()) {
            info!(watermark = run.watermark.window_start, "Caught up with the clock");
            run.caught_up = true;
        }
        Ok(())
    }

    /// Sleep `iteration_pause`. Returns true if shutdown was signalled.
    pub(super) async fn pace(&self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        if *shutdown_rx.borrow() {
            return true;
        }

        self.set_state(EngineState::Sleeping);
        let pause = self.config.settings.pacing.iteration_pause_duration();
        tokio::select! {
            _ = tokio::time::sleep(pause) => false,
            changed = shutdown_rx.changed() => changed.is_ok() && *shutdown_rx.borrow(),
        }
    }
}
