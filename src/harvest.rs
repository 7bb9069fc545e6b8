// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Window harvesting.
//!
//! Collects every change a collection saw in `[window_start, window_end)`
//! through two independent paginated scans:
//!
//! ```text
//!  (a) create/update                         (b) remove
//!  ─────────────────                         ──────────
//!  scan_index(ts >= start)                   collection_history(
//!     │  one entry per live doc                 start <= ts < end,
//!     ▼                                          action = remove)
//!  document_history(doc, ts >= start)            │
//!     │  keep create/update in window            │
//!     ▼                                          ▼
//!  create_update: Vec<ChangeEvent>           removes: Vec<ChangeEvent>
//! ```
//!
//! The index holds each live document once, keyed by the time of its latest
//! change, so scanning it open-ended from the window start finds every
//! document touched in the window or later. Per-document history then
//! narrows that to the window. Deleted documents are gone from the index,
//! which is why removes need their own scan.
//!
//! A failed page fails the whole harvest; no partial window is returned.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{HarvestConfig, SloConfig};
use crate::cursor::drain_pages;
use crate::error::Result;
use crate::event::{fingerprint, ChangeAction, ChangeEvent, DocumentRef, RawEvent};
use crate::metrics;
use crate::resilience::with_timeout;
use crate::store::{HistoryFilter, SourceStore};
use crate::watermark::Watermark;

/// All events of one window, split by the scan that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestedWindow {
    pub collection: String,
    pub window_start: i64,
    pub window_end: i64,
    pub create_update: Vec<ChangeEvent>,
    pub removes: Vec<ChangeEvent>,
    /// Pages read across both scans.
    pub pages: u64,
    /// Documents whose history hit the fetch cap.
    pub truncated_docs: usize,
}

impl HarvestedWindow {
    pub fn total(&self) -> usize {
        self.create_update.len() + self.removes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Fingerprint of the window's events in harvest order.
    pub fn fingerprint(&self) -> String {
        let all: Vec<ChangeEvent> = self
            .create_update
            .iter()
            .chain(self.removes.iter())
            .cloned()
            .collect();
        fingerprint(&all)
    }
}

/// Reads one window of changes from the source.
pub struct EventHarvester<S: SourceStore> {
    source: Arc<S>,
    config: HarvestConfig,
    slo: SloConfig,
    request_timeout: Duration,
}

impl<S: SourceStore> EventHarvester<S> {
    pub fn new(source: Arc<S>, config: HarvestConfig, slo: SloConfig, request_timeout: Duration) -> Self {
        Self {
            source,
            config,
            slo,
            request_timeout,
        }
    }

    /// Harvest the watermark's current window.
    ///
    /// Scan cursors are tracked in `watermark.cursors` while pages are read;
    /// on success both are back to `None`. The watermark's window is not
    /// advanced here.
    #[instrument(skip(self, watermark), fields(collection = %watermark.collection, window_start = watermark.window_start))]
    pub async fn harvest_window(&self, watermark: &mut Watermark) -> Result<HarvestedWindow> {
        let started = Instant::now();
        let start = watermark.window_start;
        let end = watermark.window_end();
        let page_size = self.config.page_size.max(1);
        let timeout = self.request_timeout;
        let collection = watermark.collection.clone();
        let index = watermark.index.clone();

        // (a) Documents touched at or after the window start.
        let entries = drain_pages(&mut watermark.cursors.create_update, None, |cursor| {
            let index = index.clone();
            async move {
                with_timeout(
                    "scan_index",
                    timeout,
                    self.source.scan_index(&index, start, cursor, page_size),
                )
                .await
            }
        })
        .await?;
        let mut pages = entries.pages;

        let mut seen = HashSet::new();
        let mut create_update = Vec::new();
        let mut truncated_docs = 0;
        for entry in entries.items {
            // An update landing mid-scan can move a doc to a later page.
            if !seen.insert(entry.doc.clone()) {
                continue;
            }
            let (events, doc_pages, truncated) = self.document_window(&entry.doc, start, end).await?;
            pages += doc_pages;
            if truncated {
                truncated_docs += 1;
                metrics::record_history_truncated(&collection);
                warn!(
                    doc = %entry.doc,
                    cap = self.config.history_fetch_cap,
                    "Document history exceeds fetch cap, later changes in this window are dropped"
                );
            }
            create_update.extend(events);
        }

        // (b) Removes inside the window.
        let removed = drain_pages(&mut watermark.cursors.remove, None, |cursor| {
            let collection = collection.clone();
            async move {
                with_timeout(
                    "collection_history",
                    timeout,
                    self.source.collection_history(
                        &collection,
                        HistoryFilter::removes_between(start, end),
                        cursor,
                        page_size,
                    ),
                )
                .await
            }
        })
        .await?;
        pages += removed.pages;

        let mut removes = Vec::new();
        for raw in removed.items {
            if raw.ts < start || raw.ts >= end {
                continue;
            }
            let event = ChangeEvent::try_from(raw)?;
            if event.action == ChangeAction::Remove {
                removes.push(event);
            } else {
                trace!(doc = %event.doc, action = %event.action, "Ignoring non-remove entry from remove scan");
            }
        }

        let elapsed = started.elapsed();
        metrics::record_events_harvested(&collection, create_update.len(), removes.len());
        metrics::record_window_harvest(&collection, pages, elapsed);
        if self.slo.is_window_harvest_violation(elapsed) {
            let latency_ms = elapsed.as_millis() as u64;
            metrics::record_slo_violation(&collection, "window_harvest", latency_ms);
            warn!(latency_ms, threshold_ms = self.slo.max_window_harvest_latency_ms, "Window harvest exceeded SLO");
        }

        let window = HarvestedWindow {
            collection,
            window_start: start,
            window_end: end,
            create_update,
            removes,
            pages,
            truncated_docs,
        };

        info!(
            create_update = window.create_update.len(),
            removes = window.removes.len(),
            pages,
            "Harvested window"
        );
        debug!(fingerprint = %window.fingerprint(), "Window fingerprint");
        Ok(window)
    }

    /// Creates and updates of one document inside `[start, end)`.
    ///
    /// Returns the events, pages read, and whether the fetch cap cut the
    /// history short.
    async fn document_window(
        &self,
        doc: &DocumentRef,
        start: i64,
        end: i64,
    ) -> Result<(Vec<ChangeEvent>, u64, bool)> {
        let page_size = self.config.page_size.max(1);
        let timeout = self.request_timeout;
        let mut slot = None;

        let history = drain_pages(&mut slot, Some(self.config.history_fetch_cap.max(1)), |cursor| {
            async move {
                with_timeout(
                    "document_history",
                    timeout,
                    self.source.document_history(doc, start, cursor, page_size),
                )
                .await
            }
        })
        .await?;

        let mut events = Vec::new();
        for raw in history.items {
            if let Some(event) = in_window_change(raw, start, end)? {
                events.push(event);
            }
        }
        trace!(doc = %doc, events = events.len(), "Collected document history");
        Ok((events, history.pages, history.truncated))
    }
}

/// Keep a history entry if it is a create or update inside the window.
///
/// Removes are skipped here; they are collected by the remove scan.
fn in_window_change(raw: RawEvent, start: i64, end: i64) -> Result<Option<ChangeEvent>> {
    if raw.ts < start || raw.ts >= end {
        return Ok(None);
    }
    let event = ChangeEvent::try_from(raw)?;
    Ok(match event.action {
        ChangeAction::Create | ChangeAction::Update => Some(event),
        ChangeAction::Remove => None,
    })
}
