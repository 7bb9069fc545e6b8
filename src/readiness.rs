// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collection readiness gate.
//!
//! Harvesting a collection needs three things in place:
//!
//! 1. The source collection exists and keeps history (`history_days > 0`),
//!    otherwise past events cannot be read at all.
//! 2. A `(ts, ref)` index over the collection exists and is active. The gate
//!    creates it on first call; building it is asynchronous, and scanning an
//!    index that is still building yields incomplete results.
//! 3. The target collection exists. Provisioning it is the caller's job.
//!
//! Only (2) is transient. Failures of (1) and (3) are configuration errors
//! and abort the run immediately.
//!
//! ```text
//!            prepare()
//!   ┌───────────────────────┐   not ready (index building)
//!   │ history? index? target?├──────────┐
//!   └──────────┬────────────┘          │ sleep delay_for_attempt(n)
//!              │ ready                 │
//!              ▼                       │
//!          harvesting ◀────────────────┘ (until max_attempts)
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::CollectionTarget;
use crate::error::{MigrationError, Result};
use crate::metrics;
use crate::resilience::{with_timeout, RetryConfig};
use crate::store::{IndexDefinition, SourceStore, TargetStore};

/// Outcome of one readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionReadiness {
    pub history_enabled: bool,
    pub index_active: bool,
    pub target_exists: bool,
}

impl CollectionReadiness {
    pub fn is_ready(&self) -> bool {
        self.history_enabled && self.index_active && self.target_exists
    }
}

/// Checks (and where possible establishes) the preconditions for harvesting.
pub struct ReadinessGate<S: SourceStore, T: TargetStore> {
    source: Arc<S>,
    target: Arc<T>,
    retry: RetryConfig,
    request_timeout: Duration,
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl<S: SourceStore, T: TargetStore> ReadinessGate<S, T> {
    pub fn new(source: Arc<S>, target: Arc<T>, retry: RetryConfig, request_timeout: Duration) -> Self {
        Self {
            source,
            target,
            retry,
            request_timeout,
            shutdown_rx: None,
        }
    }

    /// Abort polling with [`MigrationError::Shutdown`] once `shutdown_rx` turns true.
    pub fn with_shutdown(mut self, shutdown_rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Run the three checks once.
    ///
    /// Creates the index if it is missing. Returns not-ready only while the
    /// index is still activating.
    #[instrument(skip(self), fields(collection = %target.name))]
    pub async fn prepare(&self, target: &CollectionTarget) -> Result<CollectionReadiness> {
        let timeout = self.request_timeout;

        let info = with_timeout("collection_info", timeout, self.source.collection_info(&target.name))
            .await?
            .ok_or_else(|| {
                MigrationError::Config(format!(
                    "Collection '{}' does not exist in the source",
                    target.name
                ))
            })?;
        if info.history_days <= 0 {
            return Err(MigrationError::Config(format!(
                "Please enable history for collection '{}' (history_days = {})",
                target.name, info.history_days
            )));
        }

        let index_active = match with_timeout("index_status", timeout, self.source.index_status(&target.index)).await? {
            Some(status) if status.source != target.name => {
                return Err(MigrationError::Config(format!(
                    "Index '{}' covers collection '{}', not '{}'",
                    target.index, status.source, target.name
                )));
            }
            Some(status) => status.active,
            None => {
                info!(index = %target.index, "Creating migration index");
                with_timeout(
                    "create_index",
                    timeout,
                    self.source.create_index(IndexDefinition::for_target(target)),
                )
                .await?;
                metrics::record_index_created(&target.name);
                false
            }
        };

        let target_exists = with_timeout(
            "collection_exists",
            timeout,
            self.target.collection_exists(&target.name),
        )
        .await?;
        if !target_exists {
            return Err(MigrationError::Config(format!(
                "Target collection '{}' does not exist",
                target.name
            )));
        }

        let readiness = CollectionReadiness {
            history_enabled: true,
            index_active,
            target_exists,
        };
        metrics::record_readiness_poll(&target.name, readiness.is_ready());
        Ok(readiness)
    }

    /// Poll [`prepare`](Self::prepare) with backoff until ready.
    ///
    /// Configuration errors abort at once. If the index is still not active
    /// after `max_attempts` polls, returns [`MigrationError::IndexNotReady`].
    pub async fn await_ready(&self, target: &CollectionTarget) -> Result<CollectionReadiness> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut shutdown_rx = self.shutdown_rx.clone();

        for attempt in 1..=max_attempts {
            let readiness = self.prepare(target).await?;
            if readiness.is_ready() {
                info!(collection = %target.name, attempt, "Collection ready");
                return Ok(readiness);
            }
            if attempt == max_attempts {
                break;
            }

            let delay = self.retry.delay_for_attempt(attempt);
            debug!(
                collection = %target.name,
                index = %target.index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Index not active yet, waiting"
            );

            match shutdown_rx.as_mut() {
                Some(rx) => {
                    if *rx.borrow() {
                        return Err(MigrationError::Shutdown);
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = rx.changed() => {
                            if changed.is_err() {
                                // Sender gone; nobody can signal shutdown anymore.
                                tokio::time::sleep(delay).await;
                            } else if *rx.borrow() {
                                return Err(MigrationError::Shutdown);
                            }
                        }
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }

        warn!(
            collection = %target.name,
            index = %target.index,
            attempts = max_attempts,
            "Index still not active, giving up"
        );
        Err(MigrationError::IndexNotReady {
            index: target.index.clone(),
        })
    }
}
