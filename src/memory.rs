// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process source and target stores.
//!
//! [`InMemorySource`] keeps a full change history per collection, a logical
//! microsecond clock (one tick per write transaction), and `(ts, ref)`
//! indexes that become active only after a configurable number of status
//! polls. [`InMemoryTarget`] applies mutation sets all-or-nothing.
//!
//! Both support failure injection per operation name, so tests can make a
//! specific page fetch or submission fail:
//!
//! ```rust
//! # async fn example() {
//! use migration_engine::memory::InMemorySource;
//! use serde_json::json;
//!
//! let source = InMemorySource::new();
//! source.add_collection("orders", 30).await;
//! let ts = source.create("orders", "1", json!({"total": 1})).await.unwrap();
//!
//! // The third index page request fails, every other call succeeds.
//! source.fail_after("scan_index", 2, 1).await;
//! # let _ = ts;
//! # }
//! ```

use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use crate::coordinator::Clock;
use crate::cursor::{Cursor, Page};
use crate::event::{ChangeAction, DocumentRef, RawEvent};
use crate::store::{
    BoxFuture, CollectionInfo, Document, DocumentScan, HistoryFilter, IndexDefinition,
    IndexEntry, IndexStatus, Mutation, MutationOutcome, SourceStore, StoreError, StoreResult,
    TargetStore,
};

/// Default starting point of the logical clock (µs).
pub const DEFAULT_CLOCK_START: i64 = 1_000_000_000;

/// Default clock advance per write transaction (µs).
pub const DEFAULT_TICK: i64 = 1_000;

// ═══════════════════════════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Succeed `skip` calls, then fail `fail` calls.
#[derive(Debug, Clone, Copy, Default)]
struct FailurePlan {
    skip: u32,
    fail: u32,
}

/// Every store call passes through [`FailureInjector::check`], which also logs it.
#[derive(Debug, Default)]
struct FailureInjector {
    plans: HashMap<String, FailurePlan>,
    calls: Vec<String>,
}

impl FailureInjector {
    fn set(&mut self, operation: &str, skip: u32, fail: u32) {
        self.plans.insert(operation.to_string(), FailurePlan { skip, fail });
    }

    /// Consume one call of `operation`; `Err` if it should fail.
    fn check(&mut self, operation: &str) -> StoreResult<()> {
        self.calls.push(operation.to_string());
        let Some(plan) = self.plans.get_mut(operation) else {
            return Ok(());
        };
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        if plan.fail > 0 {
            plan.fail -= 1;
            return Err(StoreError(format!("injected failure in {}", operation)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LiveDoc {
    ts: i64,
    data: Option<Value>,
}

fn offset_of(cursor: &Option<Cursor>) -> StoreResult<usize> {
    match cursor {
        None => Ok(0),
        Some(c) => c
            .as_str()
            .parse()
            .map_err(|_| StoreError(format!("invalid cursor '{}'", c.as_str()))),
    }
}

/// Slice `items` into one page starting at `offset`.
fn page_at<T>(items: Vec<T>, offset: usize, size: usize) -> Page<T> {
    let size = size.max(1);
    let total = items.len();
    let end = offset.saturating_add(size).min(total);
    let page: Vec<T> = items.into_iter().skip(offset).take(end.saturating_sub(offset)).collect();
    if end < total {
        Page::more(page, Cursor::new(end.to_string()))
    } else {
        Page::last(page)
    }
}

/// Page over live documents ordered by id, cursor = last id returned.
fn scan_live(
    collection: &str,
    docs: &BTreeMap<String, LiveDoc>,
    cursor: &Option<Cursor>,
    size: usize,
) -> Page<Document> {
    let size = size.max(1);
    let mut iter: Box<dyn Iterator<Item = (&String, &LiveDoc)>> = match cursor {
        Some(after) => Box::new(
            docs.range::<str, _>((
                std::ops::Bound::Excluded(after.as_str()),
                std::ops::Bound::Unbounded,
            )),
        ),
        None => Box::new(docs.iter()),
    };
    let items: Vec<Document> = iter
        .by_ref()
        .take(size)
        .map(|(id, live)| Document {
            doc: DocumentRef::new(collection, id.clone()),
            ts: live.ts,
            data: live.data.clone(),
        })
        .collect();
    let has_more = iter.next().is_some();
    match items.last() {
        Some(last) if has_more => {
            let after = Cursor::new(last.doc.id.clone());
            Page::more(items, after)
        }
        _ => Page::last(items),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// InMemorySource
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct SourceCollection {
    history_days: i64,
    docs: BTreeMap<String, LiveDoc>,
    history: Vec<RawEvent>,
}

#[derive(Debug)]
struct IndexState {
    source: String,
    polls_until_active: u32,
}

#[derive(Debug, Default)]
struct SourceState {
    collections: BTreeMap<String, SourceCollection>,
    indexes: BTreeMap<String, IndexState>,
    activation_polls: u32,
    failures: FailureInjector,
}

impl SourceState {
    fn collection_mut(&mut self, name: &str) -> StoreResult<&mut SourceCollection> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| StoreError(format!("collection '{}' not found", name)))
    }
}

/// Source store with history, indexes, and a logical clock.
#[derive(Debug)]
pub struct InMemorySource {
    state: RwLock<SourceState>,
    clock: AtomicI64,
    tick: i64,
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::with_clock(DEFAULT_CLOCK_START, DEFAULT_TICK)
    }

    /// Start the logical clock at `start`, advancing `tick` per transaction.
    pub fn with_clock(start: i64, tick: i64) -> Self {
        Self {
            state: RwLock::new(SourceState::default()),
            clock: AtomicI64::new(start),
            tick: tick.max(1),
        }
    }

    /// Current logical time (µs). The next write commits after it.
    pub fn now(&self) -> i64 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Let time pass without writing anything.
    pub fn advance_clock(&self, by: i64) -> i64 {
        self.clock.fetch_add(by, Ordering::SeqCst) + by
    }

    fn next_ts(&self) -> i64 {
        self.clock.fetch_add(self.tick, Ordering::SeqCst) + self.tick
    }

    pub async fn add_collection(&self, name: &str, history_days: i64) {
        let mut state = self.state.write().await;
        state
            .collections
            .entry(name.to_string())
            .or_default()
            .history_days = history_days;
    }

    /// Number of status polls a newly created index needs before it is active.
    pub async fn set_index_activation_polls(&self, polls: u32) {
        self.state.write().await.activation_polls = polls;
    }

    /// Fail the next `times` calls of `operation`.
    pub async fn fail_next(&self, operation: &str, times: u32) {
        self.fail_after(operation, 0, times).await;
    }

    /// Let `successes` calls of `operation` through, then fail `times` calls.
    pub async fn fail_after(&self, operation: &str, successes: u32, times: u32) {
        self.state.write().await.failures.set(operation, successes, times);
    }

    /// Names of the store operations called so far, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.state.read().await.failures.calls.clone()
    }

    /// Create one document in its own transaction.
    pub async fn create(&self, collection: &str, id: &str, data: Value) -> StoreResult<i64> {
        self.create_many(collection, vec![(id.to_string(), data)]).await
    }

    /// Create several documents in one transaction (one shared timestamp).
    pub async fn create_many(&self, collection: &str, docs: Vec<(String, Value)>) -> StoreResult<i64> {
        let mut state = self.state.write().await;
        let coll = state.collection_mut(collection)?;
        let mut seen = HashSet::new();
        for (id, _) in &docs {
            if coll.docs.contains_key(id) || !seen.insert(id.as_str()) {
                return Err(StoreError(format!("document already exists: {}/{}", collection, id)));
            }
        }
        let ts = self.next_ts();
        for (id, data) in docs {
            coll.history.push(RawEvent {
                ts,
                doc: DocumentRef::new(collection, id.clone()),
                action: "create".to_string(),
                data: Some(data.clone()),
            });
            coll.docs.insert(id, LiveDoc { ts, data: Some(data) });
        }
        Ok(ts)
    }

    /// Replace one document's data. `None` clears it.
    pub async fn update(&self, collection: &str, id: &str, data: Option<Value>) -> StoreResult<i64> {
        self.update_many(collection, vec![(id.to_string(), data)]).await
    }

    pub async fn update_many(
        &self,
        collection: &str,
        docs: Vec<(String, Option<Value>)>,
    ) -> StoreResult<i64> {
        let mut state = self.state.write().await;
        let coll = state.collection_mut(collection)?;
        for (id, _) in &docs {
            if !coll.docs.contains_key(id) {
                return Err(StoreError(format!("no such document: {}/{}", collection, id)));
            }
        }
        let ts = self.next_ts();
        for (id, data) in docs {
            coll.history.push(RawEvent {
                ts,
                doc: DocumentRef::new(collection, id.clone()),
                action: "update".to_string(),
                data: data.clone(),
            });
            coll.docs.insert(id, LiveDoc { ts, data });
        }
        Ok(ts)
    }

    pub async fn remove(&self, collection: &str, id: &str) -> StoreResult<i64> {
        self.remove_many(collection, vec![id.to_string()]).await
    }

    pub async fn remove_many(&self, collection: &str, ids: Vec<String>) -> StoreResult<i64> {
        let mut state = self.state.write().await;
        let coll = state.collection_mut(collection)?;
        for id in &ids {
            if !coll.docs.contains_key(id) {
                return Err(StoreError(format!("no such document: {}/{}", collection, id)));
            }
        }
        let ts = self.next_ts();
        for id in ids {
            coll.docs.remove(&id);
            coll.history.push(RawEvent {
                ts,
                doc: DocumentRef::new(collection, id),
                action: "remove".to_string(),
                data: None,
            });
        }
        Ok(ts)
    }

    /// Append a history entry verbatim, without touching live documents.
    ///
    /// Lets tests reproduce history the source could report but the write
    /// API above never produces (unknown actions, payload-less updates).
    pub async fn record_raw(&self, event: RawEvent) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let coll = state.collection_mut(&event.doc.collection)?;
        coll.history.push(event);
        coll.history.sort_by_key(|e| e.ts);
        Ok(())
    }

    /// Current data of a live document.
    pub async fn document(&self, collection: &str, id: &str) -> Option<Value> {
        let state = self.state.read().await;
        state
            .collections
            .get(collection)
            .and_then(|c| c.docs.get(id))
            .and_then(|d| d.data.clone())
    }

    pub async fn count(&self, collection: &str) -> usize {
        let state = self.state.read().await;
        state.collections.get(collection).map_or(0, |c| c.docs.len())
    }

    pub async fn index_exists(&self, name: &str) -> bool {
        self.state.read().await.indexes.contains_key(name)
    }
}

impl Clock for InMemorySource {
    fn now_micros(&self) -> i64 {
        self.now()
    }
}

impl SourceStore for InMemorySource {
    fn list_collections(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("list_collections")?;
            Ok(state.collections.keys().cloned().collect())
        })
    }

    fn collection_info(&self, name: &str) -> BoxFuture<'_, Option<CollectionInfo>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("collection_info")?;
            Ok(state.collections.get(&name).map(|c| CollectionInfo {
                name: name.clone(),
                history_days: c.history_days,
            }))
        })
    }

    fn index_status(&self, name: &str) -> BoxFuture<'_, Option<IndexStatus>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("index_status")?;
            Ok(state.indexes.get_mut(&name).map(|index| {
                let active = index.polls_until_active == 0;
                if !active {
                    index.polls_until_active -= 1;
                }
                IndexStatus {
                    name: name.clone(),
                    source: index.source.clone(),
                    active,
                }
            }))
        })
    }

    fn create_index(&self, definition: IndexDefinition) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("create_index")?;
            if !state.collections.contains_key(&definition.source) {
                return Err(StoreError(format!(
                    "cannot index missing collection '{}'",
                    definition.source
                )));
            }
            let polls = state.activation_polls;
            state.indexes.entry(definition.name).or_insert(IndexState {
                source: definition.source,
                polls_until_active: polls,
            });
            Ok(())
        })
    }

    fn scan_index(
        &self,
        index: &str,
        from_ts: i64,
        cursor: Option<Cursor>,
        size: usize,
    ) -> BoxFuture<'_, Page<IndexEntry>> {
        let index = index.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("scan_index")?;
            let source = match state.indexes.get(&index) {
                Some(i) if i.polls_until_active == 0 => i.source.clone(),
                Some(_) => return Err(StoreError(format!("index '{}' is not active", index))),
                None => return Err(StoreError(format!("index '{}' not found", index))),
            };
            let coll = state
                .collections
                .get(&source)
                .ok_or_else(|| StoreError(format!("collection '{}' not found", source)))?;

            let mut entries: Vec<IndexEntry> = coll
                .docs
                .iter()
                .filter(|(_, live)| live.ts >= from_ts)
                .map(|(id, live)| IndexEntry {
                    ts: live.ts,
                    doc: DocumentRef::new(source.clone(), id.clone()),
                })
                .collect();
            entries.sort_by(|a, b| (a.ts, &a.doc.id).cmp(&(b.ts, &b.doc.id)));

            let offset = offset_of(&cursor)?;
            Ok(page_at(entries, offset, size))
        })
    }

    fn document_history(
        &self,
        doc: &DocumentRef,
        from_ts: i64,
        cursor: Option<Cursor>,
        size: usize,
    ) -> BoxFuture<'_, Page<RawEvent>> {
        let doc = doc.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("document_history")?;
            let coll = state.collection_mut(&doc.collection)?;
            let events: Vec<RawEvent> = coll
                .history
                .iter()
                .filter(|e| e.doc == doc && e.ts >= from_ts)
                .cloned()
                .collect();
            let offset = offset_of(&cursor)?;
            Ok(page_at(events, offset, size))
        })
    }

    fn collection_history(
        &self,
        collection: &str,
        filter: HistoryFilter,
        cursor: Option<Cursor>,
        size: usize,
    ) -> BoxFuture<'_, Page<RawEvent>> {
        let collection = collection.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("collection_history")?;
            let coll = state.collection_mut(&collection)?;
            let events: Vec<RawEvent> = coll
                .history
                .iter()
                .filter(|e| e.ts >= filter.from_ts)
                .filter(|e| filter.until_ts.map_or(true, |until| e.ts < until))
                .filter(|e| match filter.action {
                    Some(action) => ChangeAction::parse(&e.action) == Some(action),
                    None => true,
                })
                .cloned()
                .collect();
            let offset = offset_of(&cursor)?;
            Ok(page_at(events, offset, size))
        })
    }

    fn data_is_null_at(&self, doc: &DocumentRef, ts: i64) -> BoxFuture<'_, bool> {
        let doc = doc.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("data_is_null_at")?;
            let coll = state.collection_mut(&doc.collection)?;
            let latest = coll
                .history
                .iter()
                .filter(|e| e.doc == doc && e.ts <= ts)
                .last();
            Ok(match latest {
                None => true,
                Some(e) if ChangeAction::parse(&e.action) == Some(ChangeAction::Remove) => true,
                Some(e) => e.data.as_ref().map_or(true, Value::is_null),
            })
        })
    }
}

impl DocumentScan for InMemorySource {
    fn scan_documents(
        &self,
        collection: &str,
        cursor: Option<Cursor>,
        size: usize,
    ) -> BoxFuture<'_, Page<Document>> {
        let collection = collection.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("scan_documents")?;
            let coll = state.collection_mut(&collection)?;
            Ok(scan_live(&collection, &coll.docs, &cursor, size))
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// InMemoryTarget
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct TargetState {
    clock: i64,
    collections: BTreeMap<String, BTreeMap<String, LiveDoc>>,
    submissions: Vec<Vec<Mutation>>,
    failures: FailureInjector,
}

/// Target store with all-or-nothing mutation sets.
#[derive(Debug, Default)]
pub struct InMemoryTarget {
    state: RwLock<TargetState>,
}

impl InMemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_collection(&self, name: &str) {
        self.state
            .write()
            .await
            .collections
            .entry(name.to_string())
            .or_default();
    }

    /// Put a document in place directly, bypassing submissions.
    pub async fn seed(&self, collection: &str, id: &str, data: Value) {
        let mut state = self.state.write().await;
        state.clock += 1;
        let ts = state.clock;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), LiveDoc { ts, data: Some(data) });
    }

    /// Fail the next `times` calls of `operation`.
    pub async fn fail_next(&self, operation: &str, times: u32) {
        self.fail_after(operation, 0, times).await;
    }

    /// Let `successes` calls of `operation` through, then fail `times` calls.
    pub async fn fail_after(&self, operation: &str, successes: u32, times: u32) {
        self.state.write().await.failures.set(operation, successes, times);
    }

    /// `Some(data)` for a present document (data may itself be `None`).
    pub async fn document(&self, collection: &str, id: &str) -> Option<Option<Value>> {
        let state = self.state.read().await;
        state
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|d| d.data.clone())
    }

    pub async fn count(&self, collection: &str) -> usize {
        let state = self.state.read().await;
        state.collections.get(collection).map_or(0, |c| c.len())
    }

    /// Every accepted mutation set, in submission order.
    pub async fn submissions(&self) -> Vec<Vec<Mutation>> {
        self.state.read().await.submissions.clone()
    }
}

fn apply_one(
    collections: &mut BTreeMap<String, BTreeMap<String, LiveDoc>>,
    mutation: &Mutation,
    ts: i64,
) -> StoreResult<MutationOutcome> {
    let doc = mutation.doc();
    let coll = collections
        .get_mut(&doc.collection)
        .ok_or_else(|| StoreError(format!("target collection '{}' not found", doc.collection)))?;
    Ok(match mutation {
        Mutation::CreateIfAbsent { data, .. } => {
            if coll.contains_key(&doc.id) {
                MutationOutcome::AlreadyExists
            } else {
                coll.insert(doc.id.clone(), LiveDoc { ts, data: data.clone() });
                MutationOutcome::Created
            }
        }
        Mutation::UpdateIfPresent { data, .. } => match coll.get_mut(&doc.id) {
            Some(live) => {
                live.ts = ts;
                live.data = data.clone();
                MutationOutcome::Updated
            }
            None => MutationOutcome::NoSuchDocument,
        },
        Mutation::DeleteIfPresent { .. } => match coll.remove(&doc.id) {
            Some(_) => MutationOutcome::Deleted,
            None => MutationOutcome::AlreadyAbsent,
        },
    })
}

impl TargetStore for InMemoryTarget {
    fn collection_exists(&self, name: &str) -> BoxFuture<'_, bool> {
        let name = name.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("collection_exists")?;
            Ok(state.collections.contains_key(&name))
        })
    }

    fn submit_atomic(&self, mutations: Vec<Mutation>) -> BoxFuture<'_, Vec<MutationOutcome>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("submit_atomic")?;

            let mut seen = HashSet::new();
            for m in &mutations {
                if !seen.insert(m.doc()) {
                    return Err(StoreError(format!(
                        "document {} appears twice in one transaction",
                        m.doc()
                    )));
                }
            }

            // Stage on a copy so a failing mutation leaves nothing behind.
            let mut staged = state.collections.clone();
            let ts = state.clock + 1;
            let outcomes = mutations
                .iter()
                .map(|m| apply_one(&mut staged, m, ts))
                .collect::<StoreResult<Vec<_>>>()?;

            state.collections = staged;
            state.clock = ts;
            state.submissions.push(mutations);
            Ok(outcomes)
        })
    }
}

impl DocumentScan for InMemoryTarget {
    fn scan_documents(
        &self,
        collection: &str,
        cursor: Option<Cursor>,
        size: usize,
    ) -> BoxFuture<'_, Page<Document>> {
        let collection = collection.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.failures.check("scan_documents")?;
            let docs = state
                .collections
                .get(&collection)
                .ok_or_else(|| StoreError(format!("target collection '{}' not found", collection)))?;
            Ok(scan_live(&collection, docs, &cursor, size))
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ManualClock
// ═══════════════════════════════════════════════════════════════════════════════

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: i64) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn source_with_orders() -> InMemorySource {
        let source = InMemorySource::new();
        source.add_collection("orders", 30).await;
        source
    }

    #[tokio::test]
    async fn test_create_many_shares_timestamp() {
        let source = source_with_orders().await;
        let ts = source
            .create_many("orders", vec![("a".into(), json!({})), ("b".into(), json!({}))])
            .await
            .unwrap();
        assert_eq!(ts, DEFAULT_CLOCK_START + DEFAULT_TICK);
        assert_eq!(source.now(), ts);
        assert_eq!(source.count("orders").await, 2);
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected() {
        let source = source_with_orders().await;
        source.create("orders", "a", json!({})).await.unwrap();
        assert!(source.create("orders", "a", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_index_activation_after_polls() {
        let source = source_with_orders().await;
        source.set_index_activation_polls(2).await;
        let def = IndexDefinition {
            name: "idx".into(),
            source: "orders".into(),
            values: vec!["ts".into(), "ref".into()],
        };
        source.create_index(def).await.unwrap();

        let polls: Vec<bool> = vec![
            source.index_status("idx").await.unwrap().unwrap().active,
            source.index_status("idx").await.unwrap().unwrap().active,
            source.index_status("idx").await.unwrap().unwrap().active,
        ];
        assert_eq!(polls, vec![false, false, true]);
        assert!(source.index_status("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_index_pages_in_ts_order() {
        let source = source_with_orders().await;
        source
            .create_index(IndexDefinition {
                name: "idx".into(),
                source: "orders".into(),
                values: vec![],
            })
            .await
            .unwrap();
        for i in 0..5 {
            source.create("orders", &format!("d{}", i), json!({"i": i})).await.unwrap();
        }
        source.update("orders", "d0", Some(json!({"i": 100}))).await.unwrap();

        let first = source.scan_index("idx", 0, None, 3).await.unwrap();
        assert_eq!(first.items.len(), 3);
        assert_eq!(first.items[0].doc.id, "d1");
        let second = source.scan_index("idx", 0, first.after, 3).await.unwrap();
        assert!(second.is_last());
        assert_eq!(second.items.last().unwrap().doc.id, "d0");
    }

    #[tokio::test]
    async fn test_history_and_null_check() {
        let source = source_with_orders().await;
        let t1 = source.create("orders", "a", json!({"v": 1})).await.unwrap();
        let t2 = source.update("orders", "a", None).await.unwrap();
        let t3 = source.remove("orders", "a").await.unwrap();
        let doc = DocumentRef::new("orders", "a");

        let history = source.document_history(&doc, 0, None, 10).await.unwrap();
        let actions: Vec<&str> = history.items.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["create", "update", "remove"]);

        assert!(!source.data_is_null_at(&doc, t1).await.unwrap());
        assert!(source.data_is_null_at(&doc, t2).await.unwrap());
        assert!(source.data_is_null_at(&doc, t3).await.unwrap());

        let removes = source
            .collection_history("orders", HistoryFilter::removes_between(t1, t3 + 1), None, 10)
            .await
            .unwrap();
        assert_eq!(removes.items.len(), 1);
        assert_eq!(removes.items[0].ts, t3);
    }

    #[tokio::test]
    async fn test_failure_injection_after_successes() {
        let source = source_with_orders().await;
        source.fail_after("list_collections", 1, 1).await;
        assert!(source.list_collections().await.is_ok());
        assert!(source.list_collections().await.is_err());
        assert!(source.list_collections().await.is_ok());
    }

    #[tokio::test]
    async fn test_calls_logged_in_order() {
        let source = source_with_orders().await;
        source.fail_next("index_status", 1).await;
        let _ = source.index_status("idx").await;
        source.list_collections().await.unwrap();
        source.index_status("idx").await.unwrap();
        assert_eq!(source.calls().await, vec!["index_status", "list_collections", "index_status"]);
    }

    #[tokio::test]
    async fn test_target_submit_outcomes() {
        let target = InMemoryTarget::new();
        target.add_collection("orders").await;
        target.seed("orders", "existing", json!({"v": 0})).await;

        let outcomes = target
            .submit_atomic(vec![
                Mutation::CreateIfAbsent { doc: DocumentRef::new("orders", "new"), data: Some(json!({})) },
                Mutation::CreateIfAbsent { doc: DocumentRef::new("orders", "existing"), data: Some(json!({})) },
                Mutation::UpdateIfPresent { doc: DocumentRef::new("orders", "ghost"), data: None },
                Mutation::DeleteIfPresent { doc: DocumentRef::new("orders", "gone") },
            ])
            .await
            .unwrap();
        assert_eq!(
            outcomes,
            vec![
                MutationOutcome::Created,
                MutationOutcome::AlreadyExists,
                MutationOutcome::NoSuchDocument,
                MutationOutcome::AlreadyAbsent,
            ]
        );
        assert_eq!(target.document("orders", "existing").await, Some(Some(json!({"v": 0}))));
    }

    #[tokio::test]
    async fn test_target_submit_is_all_or_nothing() {
        let target = InMemoryTarget::new();
        target.add_collection("orders").await;

        let err = target
            .submit_atomic(vec![
                Mutation::CreateIfAbsent { doc: DocumentRef::new("orders", "a"), data: Some(json!({})) },
                Mutation::CreateIfAbsent { doc: DocumentRef::new("missing", "b"), data: Some(json!({})) },
            ])
            .await;
        assert!(err.is_err());
        assert_eq!(target.count("orders").await, 0);
        assert!(target.submissions().await.is_empty());
    }

    #[tokio::test]
    async fn test_target_rejects_duplicate_docs() {
        let target = InMemoryTarget::new();
        target.add_collection("orders").await;
        let doc = DocumentRef::new("orders", "a");
        let result = target
            .submit_atomic(vec![
                Mutation::CreateIfAbsent { doc: doc.clone(), data: Some(json!({})) },
                Mutation::DeleteIfPresent { doc },
            ])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_scan_documents_pages_by_id() {
        let target = InMemoryTarget::new();
        for id in ["c", "a", "b"] {
            target.seed("orders", id, json!({"id": id})).await;
        }
        let first = target.scan_documents("orders", None, 2).await.unwrap();
        assert_eq!(first.items.iter().map(|d| d.doc.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        let second = target.scan_documents("orders", first.after, 2).await.unwrap();
        assert!(second.is_last());
        assert_eq!(second.items[0].doc.id, "c");
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        clock.advance(5);
        assert_eq!(clock.now_micros(), 15);
        clock.set(3);
        assert_eq!(clock.now_micros(), 3);
    }
}
