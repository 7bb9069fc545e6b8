//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use migration_engine::config::ValidationConfig;
use migration_engine::event::{ChangeAction, ChangeEvent, DocumentRef};
use migration_engine::resilience::RetryConfig;
use migration_engine::store::Document;
use migration_engine::validator::compare_documents;
use migration_engine::{build_batches, CollectionTarget, Watermark};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

fn action() -> impl Strategy<Value = ChangeAction> {
    prop_oneof![
        Just(ChangeAction::Create),
        Just(ChangeAction::Update),
        Just(ChangeAction::Remove),
    ]
}

/// (ts, doc index, action) triples over a small doc space so repeats are common.
fn events(max: usize) -> impl Strategy<Value = Vec<ChangeEvent>> {
    prop::collection::vec((0i64..50, 0usize..8, action()), 0..max).prop_map(|raw| {
        raw.into_iter()
            .map(|(ts, doc, action)| {
                let data = match action {
                    ChangeAction::Remove => None,
                    _ => Some(json!({"ts": ts})),
                };
                ChangeEvent::new(ts, DocumentRef::new("c", format!("d{}", doc)), action, data)
            })
            .collect()
    })
}

fn split(events: Vec<ChangeEvent>) -> (Vec<ChangeEvent>, Vec<ChangeEvent>) {
    events.into_iter().partition(|e| e.action != ChangeAction::Remove)
}

// =============================================================================
// Batch Planning Properties
// =============================================================================

proptest! {
    /// No batch exceeds the width, and none is empty.
    #[test]
    fn batches_respect_width(input in events(200), width in 1usize..=10) {
        let (create_update, removes) = split(input);
        for batch in build_batches(create_update, removes, width) {
            prop_assert!(!batch.is_empty());
            prop_assert!(batch.len() <= width);
        }
    }

    /// A document appears at most once per batch.
    #[test]
    fn batches_never_repeat_a_document(input in events(200), width in 1usize..=10) {
        let (create_update, removes) = split(input);
        for batch in build_batches(create_update, removes, width) {
            let mut seen = HashSet::new();
            for event in batch.events() {
                prop_assert!(seen.insert(event.doc.clone()), "duplicate {}", event.doc);
            }
        }
    }

    /// Batches concatenate to the stable timestamp sort of the merged input.
    #[test]
    fn batches_preserve_stable_ts_order(input in events(200), width in 1usize..=10) {
        let (create_update, removes) = split(input);
        let mut expected: Vec<ChangeEvent> = create_update.iter().chain(removes.iter()).cloned().collect();
        expected.sort_by_key(|e| e.ts);

        let flattened: Vec<ChangeEvent> = build_batches(create_update, removes, width)
            .flat_map(|b| b.into_events())
            .collect();
        prop_assert_eq!(flattened, expected);
    }

    /// Per document, events keep their relative order across batches.
    #[test]
    fn batches_keep_per_document_order(input in events(100), width in 1usize..=10) {
        let (create_update, removes) = split(input);
        let batches: Vec<_> = build_batches(create_update, removes, width).collect();
        let mut last_ts = std::collections::HashMap::new();
        for batch in &batches {
            for event in batch.events() {
                if let Some(prev) = last_ts.insert(event.doc.clone(), event.ts) {
                    prop_assert!(prev <= event.ts);
                }
            }
        }
    }
}

// =============================================================================
// Action Parsing Properties
// =============================================================================

proptest! {
    /// Parsing arbitrary text never panics.
    #[test]
    fn action_parse_never_panics(s in "\\PC*") {
        let _ = ChangeAction::parse(&s);
    }

    /// Parsing is case-insensitive for the canonical names.
    #[test]
    fn action_parse_ignores_case(action in action(), upper in any::<bool>()) {
        let name = if upper { action.as_str().to_uppercase() } else { action.as_str().to_string() };
        prop_assert_eq!(ChangeAction::parse(&name), Some(action));
    }
}

// =============================================================================
// Watermark Properties
// =============================================================================

proptest! {
    /// Advancing moves exactly one window and the windows tile the timeline.
    #[test]
    fn watermark_windows_tile(start in -1_000_000i64..1_000_000, window in 1i64..100_000, steps in 1usize..20) {
        let mut wm = Watermark::new(&CollectionTarget::with_default_index("c"), start, window);
        for _ in 0..steps {
            let end = wm.window_end();
            prop_assert!(wm.contains(wm.window_start));
            prop_assert!(!wm.contains(end));
            wm.advance();
            prop_assert_eq!(wm.window_start, end);
        }
        prop_assert_eq!(wm.window_start, start + window * steps as i64);
    }

    /// A window in the future is never also fully in the past.
    #[test]
    fn watermark_future_implies_open(start in 0i64..1_000_000, window in 1i64..1_000, now in 0i64..1_000_000) {
        let wm = Watermark::new(&CollectionTarget::with_default_index("c"), start, window);
        if wm.is_future(now) {
            prop_assert!(wm.is_open_at(now));
        }
    }
}

// =============================================================================
// Clamping and Backoff Properties
// =============================================================================

proptest! {
    #[test]
    fn validation_page_size_always_in_range(requested in any::<usize>()) {
        let size = ValidationConfig::effective_page_size(requested);
        prop_assert!((1..=1000).contains(&size));
    }

    /// Backoff delays never exceed the configured ceiling.
    #[test]
    fn retry_delay_bounded(attempt in 0usize..100, initial_ms in 1u64..1000, max_ms in 1u64..60_000) {
        let config = RetryConfig {
            max_attempts: 100,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_factor: 2.0,
        };
        prop_assert!(config.delay_for_attempt(attempt) <= Duration::from_millis(max_ms));
    }
}

// =============================================================================
// Document Comparison Properties
// =============================================================================

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Set every "ts" key, at any depth, to `n`.
fn stamp(value: &mut Value, n: i64) {
    match value {
        Value::Object(map) => {
            if map.contains_key("ts") {
                map.insert("ts".into(), json!(n));
            }
            map.values_mut().for_each(|v| stamp(v, n));
        }
        Value::Array(items) => items.iter_mut().for_each(|v| stamp(v, n)),
        _ => {}
    }
}

proptest! {
    /// A document always equals itself, whatever its version stamps say.
    #[test]
    fn compare_ignores_version_field(data in json_value(), a in any::<i64>(), b in any::<i64>()) {
        let mut left = json!({"ts": 0, "body": data});
        let mut right = left.clone();
        stamp(&mut left, a);
        stamp(&mut right, b);

        let doc = |ts, data| Document { doc: DocumentRef::new("c", "x"), ts, data: Some(data) };
        prop_assert!(compare_documents(&doc(a, left), &doc(b, right), "ts").is_ok());
    }

    /// Comparison is symmetric in whether it finds a difference.
    #[test]
    fn compare_is_symmetric(x in json_value(), y in json_value()) {
        let doc = |data| Document { doc: DocumentRef::new("c", "x"), ts: 1, data: Some(data) };
        let forward = compare_documents(&doc(x.clone()), &doc(y.clone()), "ts").is_ok();
        let backward = compare_documents(&doc(y), &doc(x), "ts").is_ok();
        prop_assert_eq!(forward, backward);
    }
}
