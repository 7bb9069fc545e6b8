//! Store fixtures and engine builders.
//!
//! The source doubles as the engine's clock, so "now" is always the
//! timestamp of the latest write (plus any `advance_clock`).

#![allow(dead_code)] // Not every test binary uses every helper

use migration_engine::memory::{InMemorySource, InMemoryTarget};
use migration_engine::store::TargetStore;
use migration_engine::{MigrationConfig, MigrationEngine, RunSummary, Result};
use serde_json::{json, Value};
use std::sync::Arc;

pub const ORDERS: &str = "orders";

/// One hour in µs.
pub const HOUR: i64 = 3_600_000_000;

/// Source and target with `collections` present on both sides.
pub async fn stores(collections: &[&str]) -> (Arc<InMemorySource>, Arc<InMemoryTarget>) {
    let source = Arc::new(InMemorySource::new());
    let target = Arc::new(InMemoryTarget::new());
    for name in collections {
        source.add_collection(name, 30).await;
        target.add_collection(name).await;
    }
    (source, target)
}

/// Fast-paced config with one-hour windows.
pub fn test_config(collections: &[&str], start: i64) -> MigrationConfig {
    let mut config = MigrationConfig::for_testing(collections, start);
    config.settings.harvest.window = "1h".into();
    config.settings.harvest.page_size = 16;
    config
}

pub fn engine<T: TargetStore>(
    config: MigrationConfig,
    source: &Arc<InMemorySource>,
    target: &Arc<T>,
) -> MigrationEngine<InMemorySource, T, InMemorySource> {
    MigrationEngine::with_clock(config, Arc::clone(source), Arc::clone(target), Arc::clone(source))
        .expect("valid test config")
}

/// Run a fresh engine to the end.
pub async fn migrate<T: TargetStore>(
    config: MigrationConfig,
    source: &Arc<InMemorySource>,
    target: &Arc<T>,
) -> Result<RunSummary> {
    engine(config, source, target).run().await
}

pub fn order_id(j: usize) -> String {
    format!("order-{:04}", j)
}

pub fn order(j: usize) -> Value {
    json!({"total": j, "customer": {"name": format!("customer {}", j % 7), "tier": j % 3}})
}

/// Create `n` orders, one transaction each. Returns the ts before the first.
pub async fn seed_orders(source: &InMemorySource, n: usize) -> i64 {
    let start = source.now();
    for j in 0..n {
        source.create(ORDERS, &order_id(j), order(j)).await.expect("create order");
    }
    start
}
