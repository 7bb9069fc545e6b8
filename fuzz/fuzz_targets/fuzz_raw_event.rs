//! Fuzz target for history entry decoding.
//!
//! Any JSON the source could hand back must either decode into a valid
//! change or fail with an error, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use migration_engine::event::{ChangeAction, ChangeEvent, RawEvent};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = serde_json::from_slice::<RawEvent>(data) else {
        return;
    };
    let known = ChangeAction::parse(&raw.action).is_some();

    match ChangeEvent::try_from(raw) {
        Ok(event) => {
            assert!(known);
            if event.action == ChangeAction::Remove {
                assert!(event.data.is_none());
            }
            if let Some(d) = &event.data {
                assert!(!d.is_null());
            }
        }
        Err(_) => assert!(!known),
    }
});
