//! Fuzz target for document comparison.
//!
//! Comparison must not panic on arbitrary JSON, a document must equal
//! itself, and the verdict must not depend on argument order.

#![no_main]

use libfuzzer_sys::fuzz_target;
use migration_engine::event::DocumentRef;
use migration_engine::store::Document;
use migration_engine::validator::compare_documents;
use serde_json::Value;

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;
    let (Ok(a), Ok(b)) = (serde_json::from_str::<Value>(a), serde_json::from_str::<Value>(b)) else {
        return;
    };
    let doc = |data: Value| Document {
        doc: DocumentRef::new("c", "x"),
        ts: 0,
        data: Some(data),
    };

    assert!(compare_documents(&doc(a.clone()), &doc(a.clone()), "ts").is_ok());
    let forward = compare_documents(&doc(a.clone()), &doc(b.clone()), "ts").is_ok();
    let backward = compare_documents(&doc(b), &doc(a), "ts").is_ok();
    assert_eq!(forward, backward);
});
