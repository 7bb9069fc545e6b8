// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change events harvested from the source store.
//!
//! The source reports each change with a free-form action string. That
//! string is resolved to [`ChangeAction`] exactly once, when the raw entry
//! becomes a [`ChangeEvent`]; an action we do not know fails the harvest
//! with a protocol error instead of reaching the apply stage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{MigrationError, Result};

/// Kind of change recorded in the source history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Remove,
}

impl ChangeAction {
    /// Resolve a source action string. `"delete"` is an alias of `"remove"`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Some(ChangeAction::Create),
            "update" => Some(ChangeAction::Update),
            "remove" | "delete" => Some(ChangeAction::Remove),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Remove => "remove",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a document: its collection plus its id within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub collection: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A history entry exactly as the source store reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub ts: i64,
    pub doc: DocumentRef,
    pub action: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A validated change, ready to be ordered and replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Source commit timestamp (µs).
    pub ts: i64,
    pub doc: DocumentRef,
    pub action: ChangeAction,
    /// Document body after the change. Absent for removes, and for updates
    /// whose history entry carries no payload.
    #[serde(default)]
    pub data: Option<Value>,
}

impl ChangeEvent {
    pub fn new(ts: i64, doc: DocumentRef, action: ChangeAction, data: Option<Value>) -> Self {
        Self {
            ts,
            doc,
            action,
            data,
        }
    }

    /// Whether this is an update recorded without a payload.
    pub fn is_null_update(&self) -> bool {
        self.action == ChangeAction::Update && self.data.is_none()
    }
}

impl TryFrom<RawEvent> for ChangeEvent {
    type Error = MigrationError;

    fn try_from(raw: RawEvent) -> Result<Self> {
        let action = ChangeAction::parse(&raw.action).ok_or_else(|| {
            MigrationError::Protocol(format!(
                "unknown action '{}' for document {} at ts {}",
                raw.action, raw.doc, raw.ts
            ))
        })?;
        let data = match action {
            ChangeAction::Remove => None,
            _ => raw.data.filter(|d| !d.is_null()),
        };
        Ok(ChangeEvent {
            ts: raw.ts,
            doc: raw.doc,
            action,
            data,
        })
    }
}

/// SHA256 over an ordered event list, hex encoded.
///
/// Two harvests of the same window with no intervening writes yield the
/// same fingerprint.
pub fn fingerprint(events: &[ChangeEvent]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for event in events {
        hasher.update(event.ts.to_be_bytes());
        hasher.update(event.doc.collection.as_bytes());
        hasher.update([0u8]);
        hasher.update(event.doc.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(event.action.as_str().as_bytes());
        match &event.data {
            Some(data) => hasher.update(data.to_string().as_bytes()),
            None => hasher.update(b"-"),
        }
        hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
}
