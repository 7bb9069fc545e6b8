//! Configuration for the migration engine.
//!
//! Configuration is passed to [`MigrationEngine::new()`](crate::MigrationEngine::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use migration_engine::config::MigrationConfig;
//!
//! let config = MigrationConfig {
//!     collections: vec!["orders".into(), "customers".into()],
//!     start_timestamp: 1_700_000_000_000_000,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! MigrationConfig
//! ├── collections: Vec<String>      # Empty = every source collection
//! ├── indexes: Vec<String>          # Optional, one per collection
//! ├── start_timestamp: i64          # First window start (µs)
//! └── settings: MigrationSettings
//!     ├── harvest: HarvestConfig    # Window length, page size
//!     ├── apply: ApplyConfig        # Batch width
//!     ├── pacing: PacingConfig      # Iteration budget, pauses
//!     ├── readiness: ReadinessConfig # Index activation polling
//!     ├── validation: ValidationConfig
//!     ├── request_timeout           # Per round trip
//!     └── slo: SloConfig            # Latency thresholds
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! collections: ["orders", "customers"]
//! start_timestamp: 1700000000000000
//!
//! settings:
//!   harvest:
//!     window: "30m"
//!     page_size: 64
//!   apply:
//!     batch_width: 10
//!   pacing:
//!     iterations: 20
//!     iteration_pause: "10s"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::{MigrationError, Result};
use crate::resilience::RetryConfig;

/// Upper bound on the number of mutations in one atomic submission.
pub const MAX_BATCH_WIDTH: usize = 10;

/// Upper bound on the validator's page size.
pub const MAX_VALIDATION_PAGE_SIZE: usize = 1000;

/// Name of the `(ts, ref)` index created for a collection when none is configured.
pub fn default_index_name(collection: &str) -> String {
    format!("_migration_index_for_{}", collection)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed to MigrationEngine::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `MigrationEngine::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Collections to migrate. When empty, every source collection is
    /// discovered at start-up and migrated with its default index.
    #[serde(default)]
    pub collections: Vec<String>,

    /// Custom index names, positionally matched to `collections`.
    /// Empty means default index names.
    #[serde(default)]
    pub indexes: Vec<String>,

    /// Start of the first window, in microseconds since the epoch.
    #[serde(default)]
    pub start_timestamp: i64,

    #[serde(default)]
    pub settings: MigrationSettings,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            indexes: Vec::new(),
            start_timestamp: 0,
            settings: MigrationSettings::default(),
        }
    }
}

impl MigrationConfig {
    /// Create a config with fast pacing for tests.
    pub fn for_testing(collections: &[&str], start_timestamp: i64) -> Self {
        Self {
            collections: collections.iter().map(|c| c.to_string()).collect(),
            indexes: Vec::new(),
            start_timestamp,
            settings: MigrationSettings::for_testing(),
        }
    }

    /// Reject settings that cannot describe a run.
    pub fn validate(&self) -> Result<()> {
        if !self.indexes.is_empty() {
            if self.collections.is_empty() {
                return Err(MigrationError::Config(
                    "Custom indexes require an explicit collection list".into(),
                ));
            }
            if self.indexes.len() != self.collections.len() {
                return Err(MigrationError::Config(format!(
                    "Number of collections ({}) doesn't match number of indexes ({})",
                    self.collections.len(),
                    self.indexes.len()
                )));
            }
        }
        if self.collections.iter().any(|c| c.trim().is_empty()) {
            return Err(MigrationError::Config("Collection names must not be empty".into()));
        }

        let settings = &self.settings;
        for (field, value) in [
            ("settings.harvest.window", &settings.harvest.window),
            ("settings.pacing.iteration_pause", &settings.pacing.iteration_pause),
            ("settings.readiness.initial_delay", &settings.readiness.initial_delay),
            ("settings.readiness.max_delay", &settings.readiness.max_delay),
            ("settings.validation.page_pause", &settings.validation.page_pause),
            ("settings.request_timeout", &settings.request_timeout),
        ] {
            parse_duration_field(field, value)?;
        }
        let factor = settings.readiness.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(MigrationError::Config(format!(
                "settings.readiness.backoff_factor must be a finite number >= 1.0, got {}",
                factor
            )));
        }

        if self.settings.harvest.window_micros() <= 0 {
            return Err(MigrationError::Config(format!(
                "Harvest window must be positive, got '{}'",
                self.settings.harvest.window
            )));
        }
        if self.settings.harvest.page_size == 0 {
            return Err(MigrationError::Config("Harvest page size must be positive".into()));
        }
        Ok(())
    }

    /// Pair explicit collections with their index names.
    ///
    /// Returns an empty list when collections are to be auto-discovered.
    pub fn collection_targets(&self) -> Vec<CollectionTarget> {
        self.collections
            .iter()
            .enumerate()
            .map(|(i, name)| match self.indexes.get(i) {
                Some(index) => CollectionTarget {
                    name: name.clone(),
                    index: index.clone(),
                },
                None => CollectionTarget::with_default_index(name),
            })
            .collect()
    }
}

fn parse_duration_field(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| MigrationError::Config(format!("Invalid duration for {}: '{}' ({})", field, value, e)))
}

/// A collection and the index used to harvest its creates and updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTarget {
    pub name: String,
    pub index: String,
}

impl CollectionTarget {
    pub fn with_default_index(name: &str) -> Self {
        Self {
            name: name.to_string(),
            index: default_index_name(name),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MigrationSettings: tunables for every stage
// ═══════════════════════════════════════════════════════════════════════════════

/// General settings for the migration loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Timeout for a single store round trip (e.g. "30s").
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    #[serde(default)]
    pub slo: SloConfig,
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            harvest: HarvestConfig::default(),
            apply: ApplyConfig::default(),
            pacing: PacingConfig::default(),
            readiness: ReadinessConfig::default(),
            validation: ValidationConfig::default(),
            request_timeout: default_request_timeout(),
            slo: SloConfig::default(),
        }
    }
}

impl MigrationSettings {
    /// Millisecond pauses and a short readiness budget.
    pub fn for_testing() -> Self {
        Self {
            harvest: HarvestConfig::default(),
            apply: ApplyConfig::default(),
            pacing: PacingConfig {
                iterations: 20,
                iteration_pause: "1ms".to_string(),
            },
            readiness: ReadinessConfig {
                max_attempts: 5,
                initial_delay: "1ms".to_string(),
                max_delay: "5ms".to_string(),
                backoff_factor: 2.0,
            },
            validation: ValidationConfig {
                page_pause: "1ms".to_string(),
                ..Default::default()
            },
            request_timeout: "5s".to_string(),
            slo: SloConfig::default(),
        }
    }

    /// Parse the request timeout string to a Duration.
    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(30))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HarvestConfig: window scans
// ═══════════════════════════════════════════════════════════════════════════════

/// Event harvesting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Length of one harvest window as a duration string (e.g. "30m").
    #[serde(default = "default_window")]
    pub window: String,

    /// Entries requested per page, for both index and history scans.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Most history entries fetched for a single document per window.
    #[serde(default = "default_history_fetch_cap")]
    pub history_fetch_cap: usize,
}

fn default_window() -> String {
    "30m".to_string()
}

fn default_page_size() -> usize {
    64
}

fn default_history_fetch_cap() -> usize {
    100_000
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            page_size: default_page_size(),
            history_fetch_cap: default_history_fetch_cap(),
        }
    }
}

impl HarvestConfig {
    /// Parse the window string to a Duration.
    pub fn window_duration(&self) -> Duration {
        humantime::parse_duration(&self.window).unwrap_or(Duration::from_secs(30 * 60))
    }

    /// Window length in store timestamp units (microseconds).
    pub fn window_micros(&self) -> i64 {
        i64::try_from(self.window_duration().as_micros()).unwrap_or(i64::MAX)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ApplyConfig: atomic submission width
// ═══════════════════════════════════════════════════════════════════════════════

/// Replicator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Most events submitted in one atomic set. Clamped to 1..=10.
    #[serde(default = "default_batch_width")]
    pub batch_width: usize,
}

fn default_batch_width() -> usize {
    MAX_BATCH_WIDTH
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            batch_width: default_batch_width(),
        }
    }
}

impl ApplyConfig {
    /// The batch width actually used, clamped to `1..=MAX_BATCH_WIDTH`.
    pub fn effective_batch_width(&self) -> usize {
        let width = self.batch_width.clamp(1, MAX_BATCH_WIDTH);
        if width != self.batch_width {
            warn!(
                requested = self.batch_width,
                effective = width,
                "Batch width out of range, clamped"
            );
        }
        width
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PacingConfig: iteration budget and pauses
// ═══════════════════════════════════════════════════════════════════════════════

/// Orchestrator pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Most iterations (one window per collection each) in a run.
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Pause after each collection's window (e.g. "10s").
    #[serde(default = "default_iteration_pause")]
    pub iteration_pause: String,
}

fn default_iterations() -> u32 {
    20
}

fn default_iteration_pause() -> String {
    "10s".to_string()
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            iteration_pause: default_iteration_pause(),
        }
    }
}

impl PacingConfig {
    pub fn iteration_pause_duration(&self) -> Duration {
        humantime::parse_duration(&self.iteration_pause).unwrap_or(Duration::from_secs(10))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReadinessConfig: index activation polling
// ═══════════════════════════════════════════════════════════════════════════════

/// How long to wait for a freshly created index to become active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Polls before giving up with `IndexNotReady`.
    #[serde(default = "default_readiness_attempts")]
    pub max_attempts: usize,

    /// First delay between polls.
    #[serde(default = "default_readiness_initial_delay")]
    pub initial_delay: String,

    /// Ceiling for the delay between polls.
    #[serde(default = "default_readiness_max_delay")]
    pub max_delay: String,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_readiness_attempts() -> usize {
    30
}

fn default_readiness_initial_delay() -> String {
    "1s".to_string()
}

fn default_readiness_max_delay() -> String {
    "30s".to_string()
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_readiness_attempts(),
            initial_delay: default_readiness_initial_delay(),
            max_delay: default_readiness_max_delay(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl ReadinessConfig {
    /// Convert to the backoff schedule used by the readiness poll loop.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: humantime::parse_duration(&self.initial_delay)
                .unwrap_or(Duration::from_secs(1)),
            max_delay: humantime::parse_duration(&self.max_delay)
                .unwrap_or(Duration::from_secs(30)),
            backoff_factor: self.backoff_factor,
            max_attempts: self.max_attempts.max(1),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ValidationConfig: post-migration comparison
// ═══════════════════════════════════════════════════════════════════════════════

/// Validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Documents per page. Clamped to 1..=1000.
    #[serde(default = "default_validation_page_size")]
    pub page_size: usize,

    /// Pause between pages (e.g. "10s").
    #[serde(default = "default_page_pause")]
    pub page_pause: String,

    /// Field ignored at every depth when comparing documents.
    #[serde(default = "default_version_field")]
    pub version_field: String,
}

fn default_validation_page_size() -> usize {
    500
}

fn default_page_pause() -> String {
    "10s".to_string()
}

fn default_version_field() -> String {
    "ts".to_string()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            page_size: default_validation_page_size(),
            page_pause: default_page_pause(),
            version_field: default_version_field(),
        }
    }
}

impl ValidationConfig {
    pub fn page_pause_duration(&self) -> Duration {
        humantime::parse_duration(&self.page_pause).unwrap_or(Duration::from_secs(10))
    }

    /// Clamp a requested page size to `1..=MAX_VALIDATION_PAGE_SIZE`.
    pub fn effective_page_size(requested: usize) -> usize {
        requested.clamp(1, MAX_VALIDATION_PAGE_SIZE)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SloConfig: latency thresholds for alerting
// ═══════════════════════════════════════════════════════════════════════════════

/// SLO thresholds for detecting slow stores.
///
/// Violations are logged and counted; they never fail a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloConfig {
    /// Maximum acceptable time to harvest one window (ms).
    #[serde(default = "default_max_window_harvest_latency_ms")]
    pub max_window_harvest_latency_ms: u64,

    /// Maximum acceptable time to apply one batch (ms).
    #[serde(default = "default_max_batch_apply_latency_ms")]
    pub max_batch_apply_latency_ms: u64,
}

fn default_max_window_harvest_latency_ms() -> u64 {
    60_000 // 1 minute
}

fn default_max_batch_apply_latency_ms() -> u64 {
    2_000 // 2 seconds
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            max_window_harvest_latency_ms: default_max_window_harvest_latency_ms(),
            max_batch_apply_latency_ms: default_max_batch_apply_latency_ms(),
        }
    }
}

impl SloConfig {
    pub fn is_window_harvest_violation(&self, latency: Duration) -> bool {
        latency.as_millis() as u64 > self.max_window_harvest_latency_ms
    }

    pub fn is_batch_apply_violation(&self, latency: Duration) -> bool {
        latency.as_millis() as u64 > self.max_batch_apply_latency_ms
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
