// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Migration engine coordinator.
//!
//! Ties together:
//! - Readiness checks via [`crate::readiness::ReadinessGate`]
//! - Window harvesting via [`crate::harvest::EventHarvester`]
//! - Batch planning via [`crate::batch::build_batches`]
//! - Atomic apply via [`crate::apply::Replicator`]
//!
//! # Architecture
//!
//! A run walks every collection forward one window at a time:
//! 1. Resolves the collections (explicit list or auto-discovery)
//! 2. Waits until each is ready (history on, index active, target present)
//! 3. Per iteration, per collection: harvest, batch, apply, advance, pause
//! 4. Stops when the iteration budget is spent, every collection has caught
//!    up with the clock, or shutdown is signalled during a pause
//!
//! Collections are handled one after another in a single task. Each keeps
//! its own [`Watermark`]; nothing is shared between them but configuration.

mod cycle;
mod types;

pub use types::{Clock, CollectionSummary, EngineState, RunSummary, StopReason, SystemClock};

use crate::config::{CollectionTarget, MigrationConfig};
use crate::error::{MigrationError, Result};
use crate::harvest::EventHarvester;
use crate::apply::Replicator;
use crate::metrics;
use crate::readiness::ReadinessGate;
use crate::resilience::with_timeout;
use crate::store::{DocumentScan, SourceStore, TargetStore};
use crate::validator::{ValidationReport, Validator};
use crate::watermark::Watermark;
use cycle::CollectionRun;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// The migration engine.
///
/// Copies the change history of a source store into a target store, window
/// by window, starting at `config.start_timestamp`.
///
/// A run is not resumable in-process. To continue after a run ends (or
/// fails), build a new engine with `start_timestamp` set to the summary's
/// `resume_from`, or to the collection's entry in [`watermarks()`](Self::watermarks).
pub struct MigrationEngine<S: SourceStore, T: TargetStore, C: Clock = SystemClock> {
    config: MigrationConfig,

    source: Arc<S>,
    target: Arc<T>,
    clock: Arc<C>,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    /// Latest watermark per collection, updated after every window.
    progress: RwLock<Vec<Watermark>>,
}

impl<S: SourceStore, T: TargetStore> MigrationEngine<S, T, SystemClock> {
    /// Create an engine driven by the system clock.
    ///
    /// Fails with [`MigrationError::Config`] if `config` does not validate.
    pub fn new(config: MigrationConfig, source: Arc<S>, target: Arc<T>) -> Result<Self> {
        Self::with_clock(config, source, target, Arc::new(SystemClock))
    }
}

impl<S: SourceStore, T: TargetStore, C: Clock> MigrationEngine<S, T, C> {
    /// Create an engine with an explicit clock.
    pub fn with_clock(config: MigrationConfig, source: Arc<S>, target: Arc<T>, clock: Arc<C>) -> Result<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            source,
            target,
            clock,
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            progress: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Latest watermark of every collection started so far.
    pub async fn watermarks(&self) -> Vec<Watermark> {
        self.progress.read().await.clone()
    }

    /// Ask a running migration to stop.
    ///
    /// Takes effect at the next pacing pause (or readiness backoff). A
    /// window being harvested or applied is finished first.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the migration to completion.
    ///
    /// Can only be called once per engine; later calls fail with
    /// [`MigrationError::InvalidState`].
    pub async fn run(&self) -> Result<RunSummary> {
        let mut actual = EngineState::Created;
        let claimed = self.state_tx.send_if_modified(|state| {
            if *state == EngineState::Created {
                *state = EngineState::Initializing;
                true
            } else {
                actual = *state;
                false
            }
        });
        if !claimed {
            return Err(MigrationError::InvalidState {
                expected: EngineState::Created.to_string(),
                actual: actual.to_string(),
            });
        }
        metrics::set_engine_state(&EngineState::Initializing.to_string());

        info!(
            collections = self.config.collections.len(),
            start_timestamp = self.config.start_timestamp,
            window = %self.config.settings.harvest.window,
            iterations = self.config.settings.pacing.iterations,
            "Starting migration"
        );

        match self.execute().await {
            Ok(summary) => {
                self.set_state(EngineState::Done);
                info!(
                    iterations = summary.iterations,
                    stop_reason = ?summary.stop_reason,
                    events = summary.total_events(),
                    "Migration finished"
                );
                Ok(summary)
            }
            Err(MigrationError::Shutdown) => {
                self.set_state(EngineState::Done);
                info!("Migration stopped before it started harvesting");
                Err(MigrationError::Shutdown)
            }
            Err(e) => {
                error!(error = %e, retryable = e.is_retryable(), "Migration failed");
                self.set_state(EngineState::Failed);
                Err(e)
            }
        }
    }

    /// A validator over the same stores, using `settings.validation`.
    pub fn validator(&self) -> Validator<S, T>
    where
        S: DocumentScan,
        T: DocumentScan,
    {
        Validator::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            self.config.settings.validation.clone(),
            self.config.settings.request_timeout_duration(),
        )
        .with_shutdown(self.shutdown_rx.clone())
    }

    /// Validate every collection a run would migrate, `settings.validation.page_size`
    /// documents per page.
    ///
    /// Collections are resolved like [`run()`](Self::run) resolves them: the
    /// configured list, or every source collection when none is configured.
    /// Stops at the first collection that fails.
    pub async fn validate_all(&self) -> Result<Vec<ValidationReport>>
    where
        S: DocumentScan,
        T: DocumentScan,
    {
        let targets = self.resolve_targets().await?;
        let page_size = self.config.settings.validation.page_size;
        let validator = self.validator();

        let mut reports = Vec::with_capacity(targets.len());
        for target in &targets {
            reports.push(validator.validate(&target.name, page_size).await?);
        }
        info!(
            collections = reports.len(),
            documents = reports.iter().map(|r| r.documents).sum::<usize>(),
            "Validation of all collections passed"
        );
        Ok(reports)
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }

    async fn execute(&self) -> Result<RunSummary> {
        let settings = &self.config.settings;
        let timeout = settings.request_timeout_duration();

        let targets = self.resolve_targets().await?;
        if targets.is_empty() {
            warn!("No collections to migrate");
        }

        let gate = ReadinessGate::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            settings.readiness.retry_config(),
            timeout,
        )
        .with_shutdown(self.shutdown_rx.clone());
        for target in &targets {
            gate.await_ready(target).await?;
        }

        let harvester = EventHarvester::new(
            Arc::clone(&self.source),
            settings.harvest.clone(),
            settings.slo.clone(),
            timeout,
        );
        let replicator = Replicator::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            settings.slo.clone(),
            timeout,
        );
        let batch_width = settings.apply.effective_batch_width();
        let window = settings.harvest.window_micros();

        let now = self.clock.now_micros();
        let mut runs: Vec<CollectionRun> = targets
            .iter()
            .map(|t| CollectionRun::new(t, self.config.start_timestamp, window, now))
            .collect();
        for run in &runs {
            self.record_progress(&run.watermark).await;
        }

        let budget = settings.pacing.iterations;
        let mut iterations = 0;
        let mut stop_reason = StopReason::IterationBudget;

        'run: while iterations < budget {
            if runs.iter().all(|r| r.caught_up) {
                break;
            }
            iterations += 1;
            metrics::set_iteration(iterations);
            debug!(iteration = iterations, budget, "Starting iteration");

            for i in 0..runs.len() {
                if runs[i].caught_up {
                    continue;
                }
                self.process_window(&harvester, &replicator, &mut runs[i], batch_width).await?;

                if runs.iter().all(|r| r.caught_up) {
                    break 'run;
                }
                if self.pace().await {
                    info!(iteration = iterations, "Shutdown observed, stopping");
                    stop_reason = StopReason::Shutdown;
                    break 'run;
                }
            }
        }

        if stop_reason == StopReason::IterationBudget && runs.iter().all(|r| r.caught_up) {
            stop_reason = StopReason::CaughtUp;
        }

        Ok(RunSummary {
            iterations,
            stop_reason,
            collections: runs.into_iter().map(CollectionRun::into_summary).collect(),
        })
    }

    /// Explicit collections, or every source collection when none are configured.
    async fn resolve_targets(&self) -> Result<Vec<CollectionTarget>> {
        let explicit = self.config.collection_targets();
        if !explicit.is_empty() {
            return Ok(explicit);
        }

        let names = with_timeout(
            "list_collections",
            self.config.settings.request_timeout_duration(),
            self.source.list_collections(),
        )
        .await?;
        info!(count = names.len(), collections = ?names, "Discovered source collections");
        Ok(names.iter().map(|n| CollectionTarget::with_default_index(n)).collect())
    }

    async fn record_progress(&self, watermark: &Watermark) {
        let mut progress = self.progress.write().await;
        match progress.iter_mut().find(|w| w.collection == watermark.collection) {
            Some(existing) => *existing = watermark.clone(),
            None => progress.push(watermark.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemorySource, InMemoryTarget, ManualClock};
    use crate::store::IndexDefinition;
    use serde_json::json;

    const HOUR: i64 = 3_600_000_000;

    async fn stores() -> (Arc<InMemorySource>, Arc<InMemoryTarget>) {
        let source = Arc::new(InMemorySource::new());
        source.add_collection("orders", 30).await;
        let target = Arc::new(InMemoryTarget::new());
        target.add_collection("orders").await;
        (source, target)
    }

    fn config(start: i64) -> MigrationConfig {
        let mut config = MigrationConfig::for_testing(&["orders"], start);
        config.settings.harvest.window = "1h".into();
        config
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let (source, target) = stores().await;
        let mut bad = config(0);
        bad.indexes = vec!["a".into(), "b".into()];
        let result = MigrationEngine::new(bad, source, target);
        assert!(matches!(result, Err(MigrationError::Config(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_shrinking_readiness_backoff() {
        let (source, target) = stores().await;
        let mut bad = config(0);
        bad.settings.readiness.backoff_factor = -2.0;
        let result = MigrationEngine::new(bad, source, target);
        assert!(matches!(result, Err(MigrationError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_copies_documents() {
        let (source, target) = stores().await;
        let start = source.now();
        source.create("orders", "a", json!({"n": 1})).await.unwrap();
        source.create("orders", "b", json!({"n": 2})).await.unwrap();
        source.update("orders", "a", Some(json!({"n": 3}))).await.unwrap();

        let engine = MigrationEngine::with_clock(config(start), Arc::clone(&source), Arc::clone(&target), Arc::clone(&source)).unwrap();
        let summary = engine.run().await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::CaughtUp);
        assert_eq!(summary.iterations, 1);
        assert_eq!(target.document("orders", "a").await, Some(Some(json!({"n": 3}))));
        assert_eq!(target.document("orders", "b").await, Some(Some(json!({"n": 2}))));
        assert_eq!(engine.state(), EngineState::Done);

        let orders = summary.collection("orders").unwrap();
        assert_eq!(orders.events, 3);
        assert_eq!(orders.report.created, 2);
        assert_eq!(orders.report.updated, 1);
    }

    #[tokio::test]
    async fn test_run_twice_is_invalid() {
        let (source, target) = stores().await;
        let engine = MigrationEngine::with_clock(config(0), source, target, Arc::new(ManualClock::new(0))).unwrap();
        engine.run().await.unwrap();
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_future_start_does_nothing() {
        let (source, target) = stores().await;
        let clock = Arc::new(ManualClock::new(10 * HOUR));
        let engine = MigrationEngine::with_clock(config(20 * HOUR), source, target, clock).unwrap();
        let summary = engine.run().await.unwrap();
        assert_eq!(summary.iterations, 0);
        assert_eq!(summary.stop_reason, StopReason::CaughtUp);
        assert_eq!(summary.collections[0].windows, 0);
        assert_eq!(summary.collections[0].resume_from, 20 * HOUR);
    }

    #[tokio::test]
    async fn test_iteration_budget_limits_windows() {
        let (source, target) = stores().await;
        let mut cfg = config(0);
        cfg.settings.pacing.iterations = 3;
        let clock = Arc::new(ManualClock::new(100 * HOUR));
        let engine = MigrationEngine::with_clock(cfg, source, target, clock).unwrap();
        let summary = engine.run().await.unwrap();

        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.stop_reason, StopReason::IterationBudget);
        assert_eq!(summary.collections[0].windows, 3);
        assert_eq!(summary.collections[0].watermark, 3 * HOUR);
        assert_eq!(summary.collections[0].resume_from, 3 * HOUR);

        let marks = engine.watermarks().await;
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].window_start, 3 * HOUR);
    }

    #[tokio::test]
    async fn test_partial_window_sets_resume_from() {
        let (source, target) = stores().await;
        // Now falls in the middle of the third window.
        let clock = Arc::new(ManualClock::new(2 * HOUR + HOUR / 2));
        let engine = MigrationEngine::with_clock(config(0), source, target, clock).unwrap();
        let summary = engine.run().await.unwrap();

        let orders = &summary.collections[0];
        assert_eq!(orders.windows, 3);
        assert_eq!(orders.watermark, 3 * HOUR);
        assert_eq!(orders.resume_from, 2 * HOUR);
        assert_eq!(summary.stop_reason, StopReason::CaughtUp);
    }

    #[tokio::test]
    async fn test_state_transitions_are_broadcast() {
        let (source, target) = stores().await;
        let engine = MigrationEngine::with_clock(config(0), source, target, Arc::new(ManualClock::new(HOUR / 2))).unwrap();
        let rx = engine.state_receiver();
        assert_eq!(*rx.borrow(), EngineState::Created);
        engine.run().await.unwrap();
        assert_eq!(*rx.borrow(), EngineState::Done);
    }

    #[tokio::test]
    async fn test_missing_target_fails_run() {
        let source = Arc::new(InMemorySource::new());
        source.add_collection("orders", 30).await;
        let target = Arc::new(InMemoryTarget::new());
        let engine = MigrationEngine::with_clock(config(0), source, target, Arc::new(ManualClock::new(HOUR))).unwrap();
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
        assert_eq!(engine.state(), EngineState::Failed);
    }

    #[tokio::test]
    async fn test_validate_all_uses_configured_page_size() {
        let (source, target) = stores().await;
        let start = source.now();
        for id in ["a", "b", "c", "d", "e"] {
            source.create("orders", id, json!({"id": id})).await.unwrap();
        }
        let mut cfg = config(start);
        cfg.settings.validation.page_size = 2;
        let engine = MigrationEngine::with_clock(cfg, Arc::clone(&source), Arc::clone(&target), Arc::clone(&source)).unwrap();
        engine.run().await.unwrap();

        let reports = engine.validate_all().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].collection, "orders");
        assert_eq!(reports[0].documents, 5);
        assert_eq!(reports[0].pages, 3);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_stops_at_first_pause() {
        let (source, target) = stores().await;
        let mut cfg = config(0);
        cfg.settings.pacing.iterations = 10;
        // An index that is already active keeps readiness from polling.
        source
            .create_index(IndexDefinition::for_target(&CollectionTarget::with_default_index("orders")))
            .await
            .unwrap();
        let engine = MigrationEngine::with_clock(cfg, source, target, Arc::new(ManualClock::new(100 * HOUR))).unwrap();
        engine.shutdown();
        let summary = engine.run().await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::Shutdown);
        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.collections[0].windows, 1);
    }
}
