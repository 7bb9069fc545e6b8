//! Resilience utilities: backoff schedules and per-request timeouts.
//!
//! - [`RetryConfig`]: exponential backoff for the readiness poll loop
//! - [`with_timeout`]: bound a single store round trip
//!
//! Nothing here retries a failed harvest or apply. Those errors surface to
//! the caller, which may re-run from the last reported watermark.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> migration_engine::Result<()> {
//! use std::time::Duration;
//! use migration_engine::resilience::with_timeout;
//!
//! let value = with_timeout("ping", Duration::from_secs(1), async {
//!     Ok::<_, migration_engine::store::StoreError>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use crate::error::{MigrationError, Result};
use crate::store::StoreError;

/// Backoff schedule for polling a condition that becomes true on its own.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of polls before giving up.
    pub max_attempts: usize,

    /// Initial delay before the second poll.
    pub initial_delay: Duration,

    /// Maximum delay between polls (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each poll).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Patient schedule for index activation.
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Attempt  Delay     Cumulative
    /// -------  -----     ----------
    /// 1        1s        1s
    /// 2        2s        3s
    /// 3        4s        7s
    /// 4        8s        15s
    /// 5        16s       31s
    /// 6+       30s       capped
    /// ```
    pub fn readiness() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }

    /// Fast-fail schedule for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_factor: 2.0,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        // NaN.max(0.0) is 0.0, and min() absorbs an infinite multiplier.
        let delay_secs = delay_secs.max(0.0).min(self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(delay_secs);

        std::cmp::min(delay, self.max_delay)
    }
}

/// Run one store round trip under a timeout.
///
/// Both an elapsed timeout and a store failure become
/// [`MigrationError::Store`] tagged with `operation`.
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(MigrationError::store(operation, e)),
        Err(_) => {
            crate::metrics::record_request_timeout(operation);
            Err(MigrationError::store_msg(
                operation,
                format!("timed out after {:?}", timeout),
            ))
        }
    }
}
