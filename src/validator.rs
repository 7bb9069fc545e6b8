// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Post-migration validation.
//!
//! Walks source and target collections page by page in lock-step (the
//! source cursor drives both sides) and compares documents pairwise. The
//! version field (`ts` by default) is ignored at every depth, since each
//! store assigns its own. The first difference stops validation.
//!
//! Validation assumes neither collection is written to while it runs.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::config::ValidationConfig;
use crate::error::{MigrationError, Result};
use crate::metrics;
use crate::resilience::with_timeout;
use crate::store::{Document, DocumentScan};

/// Summary of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub collection: String,
    pub pages: u64,
    pub documents: usize,
}

/// Compares a migrated collection between source and target.
pub struct Validator<S: DocumentScan, T: DocumentScan> {
    source: Arc<S>,
    target: Arc<T>,
    config: ValidationConfig,
    request_timeout: Duration,
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl<S: DocumentScan, T: DocumentScan> Validator<S, T> {
    pub fn new(source: Arc<S>, target: Arc<T>, config: ValidationConfig, request_timeout: Duration) -> Self {
        Self {
            source,
            target,
            config,
            request_timeout,
            shutdown_rx: None,
        }
    }

    /// Stop between pages with [`MigrationError::Shutdown`] once `shutdown_rx` turns true.
    pub fn with_shutdown(mut self, shutdown_rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Compare `collection` on both sides, `page_size` documents at a time.
    ///
    /// `page_size` is clamped to `1..=1000`.
    #[instrument(skip(self), fields(collection = %collection))]
    pub async fn validate(&self, collection: &str, page_size: usize) -> Result<ValidationReport> {
        let size = ValidationConfig::effective_page_size(page_size);
        let timeout = self.request_timeout;
        let mut cursor = None;
        let mut pages = 0u64;
        let mut documents = 0usize;

        info!(page_size = size, "Validating collection");

        loop {
            let (source_page, target_page) = futures::future::try_join(
                with_timeout("scan_documents", timeout, self.source.scan_documents(collection, cursor.clone(), size)),
                with_timeout("scan_documents", timeout, self.target.scan_documents(collection, cursor.clone(), size)),
            )
            .await?;
            pages += 1;

            if source_page.len() != target_page.len() {
                error!(page = pages, source_len = source_page.len(), target_len = target_page.len(), "MISMATCH in count of documents");
                metrics::record_error(collection, "page_count_mismatch");
                return Err(MigrationError::PageCountMismatch {
                    page: pages,
                    source_len: source_page.len(),
                    target_len: target_page.len(),
                });
            }

            for (s, t) in source_page.items.iter().zip(target_page.items.iter()) {
                if let Err(e) = compare_documents(s, t, &self.config.version_field) {
                    error!(doc = %s.doc, error = %e, "Document mismatch");
                    metrics::record_error(collection, "validation_mismatch");
                    return Err(e);
                }
            }
            documents += source_page.len();
            metrics::record_validation_page(collection, source_page.len());
            debug!(page = pages, documents, "Validated page");

            match source_page.after {
                Some(next) => {
                    cursor = Some(next);
                    self.pause().await?;
                }
                None => {
                    // The source is exhausted; the target must be too.
                    if let Some(extra) = target_page.after {
                        let tail = with_timeout(
                            "scan_documents",
                            timeout,
                            self.target.scan_documents(collection, Some(extra), size),
                        )
                        .await?;
                        if !tail.is_empty() {
                            return Err(MigrationError::PageCountMismatch {
                                page: pages + 1,
                                source_len: 0,
                                target_len: tail.len(),
                            });
                        }
                    }
                    break;
                }
            }
        }

        info!(pages, documents, "Validation passed");
        Ok(ValidationReport {
            collection: collection.to_string(),
            pages,
            documents,
        })
    }

    async fn pause(&self) -> Result<()> {
        let delay = self.config.page_pause_duration();
        match self.shutdown_rx.clone() {
            Some(mut rx) => {
                if *rx.borrow() {
                    return Err(MigrationError::Shutdown);
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(()),
                    changed = rx.changed() => {
                        if changed.is_ok() && *rx.borrow() {
                            Err(MigrationError::Shutdown)
                        } else {
                            Ok(())
                        }
                    }
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

/// Compare two documents, ignoring `version_field` at every depth.
pub fn compare_documents(source: &Document, target: &Document, version_field: &str) -> Result<()> {
    match first_difference("", &source.to_value(), &target.to_value(), version_field) {
        None => Ok(()),
        Some(diff) => Err(MigrationError::ValidationMismatch {
            doc_id: source.doc.to_string(),
            field: diff.field,
            source_value: diff.source,
            target_value: diff.target,
        }),
    }
}

#[derive(Debug, PartialEq)]
struct Difference {
    field: String,
    source: String,
    target: String,
}

fn render(value: Option<&Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "<missing>".to_string(),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

/// Depth-first search for the first differing field.
///
/// Object keys are visited in sorted order, from both sides, so a key
/// present on only one side counts as a difference.
fn first_difference(path: &str, a: &Value, b: &Value, ignore: &str) -> Option<Difference> {
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            let keys: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
            for key in keys {
                if key == ignore {
                    continue;
                }
                let field = join(path, key);
                match (left.get(key), right.get(key)) {
                    (Some(l), Some(r)) => {
                        if let Some(diff) = first_difference(&field, l, r, ignore) {
                            return Some(diff);
                        }
                    }
                    (l, r) => {
                        return Some(Difference {
                            field,
                            source: render(l),
                            target: render(r),
                        })
                    }
                }
            }
            None
        }
        (Value::Array(left), Value::Array(right)) => {
            for i in 0..left.len().max(right.len()) {
                let field = format!("{}[{}]", path, i);
                match (left.get(i), right.get(i)) {
                    (Some(l), Some(r)) => {
                        if let Some(diff) = first_difference(&field, l, r, ignore) {
                            return Some(diff);
                        }
                    }
                    (l, r) => {
                        return Some(Difference {
                            field,
                            source: render(l),
                            target: render(r),
                        })
                    }
                }
            }
            None
        }
        _ if a == b => None,
        _ => Some(Difference {
            field: path.to_string(),
            source: a.to_string(),
            target: b.to_string(),
        }),
    }
}
