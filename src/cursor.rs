// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cursor-paginated reads.
//!
//! Every store scan returns a [`Page`]: a batch of items plus an opaque
//! continuation [`Cursor`]. A page without a cursor is the last one.
//!
//! [`drain_pages`] follows cursors in an explicit loop until the scan is
//! exhausted (or a cap is reached). The caller owns the cursor slot, so after
//! a failed page it still holds the position of the last good page.
//!
//! ```text
//! slot=None ─▶ fetch ─▶ Page{items, after=Some(c1)} ─▶ slot=c1
//!          ─▶ fetch(c1) ─▶ Page{items, after=None} ─▶ slot=None, done
//! ```

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::trace;

use crate::error::{MigrationError, Result};

/// Opaque continuation token issued by a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of a paginated read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Where the next page starts. `None` when the scan is exhausted.
    pub after: Option<Cursor>,
}

impl<T> Page<T> {
    /// A final page.
    pub fn last(items: Vec<T>) -> Self {
        Self { items, after: None }
    }

    /// A page followed by more.
    pub fn more(items: Vec<T>, after: Cursor) -> Self {
        Self {
            items,
            after: Some(after),
        }
    }

    pub fn empty() -> Self {
        Self::last(Vec::new())
    }

    pub fn is_last(&self) -> bool {
        self.after.is_none()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Everything a drained scan produced.
#[derive(Debug)]
pub struct Drained<T> {
    pub items: Vec<T>,
    pub pages: u64,
    /// `true` when `cap` cut the scan short.
    pub truncated: bool,
}

/// Follow a paginated scan to its end.
///
/// `slot` holds the current cursor: it is read before each fetch, updated
/// after each successful page, and left at `None` once the scan is exhausted.
/// With `cap`, at most `cap` items are returned and the scan stops early.
///
/// A page that hands back the cursor it was fetched with would loop forever;
/// that is reported as a protocol error.
pub async fn drain_pages<T, F, Fut>(
    slot: &mut Option<Cursor>,
    cap: Option<usize>,
    mut fetch: F,
) -> Result<Drained<T>>
where
    F: FnMut(Option<Cursor>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut pages = 0u64;

    loop {
        let page = fetch(slot.clone()).await?;
        pages += 1;
        trace!(page = pages, items = page.items.len(), last = page.is_last(), "Fetched page");
        items.extend(page.items);

        if let Some(cap) = cap {
            if items.len() >= cap {
                let truncated = items.len() > cap || page.after.is_some();
                items.truncate(cap);
                *slot = None;
                return Ok(Drained {
                    items,
                    pages,
                    truncated,
                });
            }
        }

        match page.after {
            Some(next) => {
                if slot.as_ref() == Some(&next) {
                    return Err(MigrationError::Protocol(format!(
                        "pagination did not advance past cursor '{}'",
                        next.as_str()
                    )));
                }
                *slot = Some(next);
            }
            None => {
                *slot = None;
                return Ok(Drained {
                    items,
                    pages,
                    truncated: false,
                });
            }
        }
    }
}
