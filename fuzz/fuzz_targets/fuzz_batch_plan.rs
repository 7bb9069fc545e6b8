//! Fuzz target for batch planning.
//!
//! Arbitrary (ts, doc, action) triples must always plan into batches that
//! respect the width, never repeat a document, and keep timestamp order.

#![no_main]

use libfuzzer_sys::fuzz_target;
use migration_engine::build_batches;
use migration_engine::event::{ChangeAction, ChangeEvent, DocumentRef};
use std::collections::HashSet;

fuzz_target!(|data: (u8, Vec<(i16, u8, u8)>)| {
    let (width, raw) = data;
    let width = width as usize;

    let mut create_update = Vec::new();
    let mut removes = Vec::new();
    for (ts, doc, action) in raw {
        let doc = DocumentRef::new("c", format!("d{}", doc % 16));
        match action % 3 {
            0 => create_update.push(ChangeEvent::new(ts as i64, doc, ChangeAction::Create, None)),
            1 => create_update.push(ChangeEvent::new(ts as i64, doc, ChangeAction::Update, None)),
            _ => removes.push(ChangeEvent::new(ts as i64, doc, ChangeAction::Remove, None)),
        }
    }
    let total = create_update.len() + removes.len();

    let mut seen_total = 0;
    let mut last_ts = i64::MIN;
    for batch in build_batches(create_update, removes, width) {
        assert!(!batch.is_empty());
        assert!(batch.len() <= width.max(1));
        let mut docs = HashSet::new();
        for event in batch.events() {
            assert!(docs.insert(event.doc.clone()));
            assert!(event.ts >= last_ts);
            last_ts = event.ts;
        }
        seen_total += batch.len();
    }
    assert_eq!(seen_total, total);
});
