//! Per-collection replication progress.
//!
//! A [`Watermark`] marks the start of the next window to harvest for one
//! collection, plus the cursors of any scan in flight. It lives only in
//! process memory; a restarted run starts from whatever timestamp the
//! operator supplies (typically the `resume_from` of the previous run).
//!
//! ```text
//!  window_start            window_end = window_start + window
//!       │◀──────── window ────────▶│
//! ──────┼──────────────────────────┼────────▶ ts
//!       harvest [start, end)       advance() moves start here
//! ```

use serde::{Deserialize, Serialize};

use crate::config::CollectionTarget;
use crate::cursor::Cursor;

/// Cursor positions of the two independent scans of a window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCursors {
    /// Index range scan feeding creates and updates.
    pub create_update: Option<Cursor>,
    /// Collection history scan feeding removes.
    pub remove: Option<Cursor>,
}

impl WindowCursors {
    pub fn is_idle(&self) -> bool {
        self.create_update.is_none() && self.remove.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub collection: String,
    pub index: String,
    /// Inclusive start of the current window (µs).
    pub window_start: i64,
    /// Window length (µs).
    pub window: i64,
    pub cursors: WindowCursors,
}

impl Watermark {
    pub fn new(target: &CollectionTarget, start: i64, window: i64) -> Self {
        Self {
            collection: target.name.clone(),
            index: target.index.clone(),
            window_start: start,
            window: window.max(1),
            cursors: WindowCursors::default(),
        }
    }

    /// Exclusive end of the current window.
    pub fn window_end(&self) -> i64 {
        self.window_start.saturating_add(self.window)
    }

    /// Whether `ts` falls inside the current window.
    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.window_start && ts < self.window_end()
    }

    /// Move to the next window and forget any scan positions.
    pub fn advance(&mut self) {
        self.window_start = self.window_end();
        self.cursors = WindowCursors::default();
    }

    /// The whole window lies at or after `now`: nothing in it can exist yet.
    pub fn is_future(&self, now: i64) -> bool {
        self.window_start >= now
    }

    /// The window's tail extends past `now`, so writes may still land in it.
    pub fn is_open_at(&self, now: i64) -> bool {
        self.window_end() > now
    }
}
