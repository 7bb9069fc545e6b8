//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - In-memory store fixtures and engine builders
//! - A target wrapper that delays submissions

pub mod fixtures;
pub mod slow_target;

pub use fixtures::*;
pub use slow_target::*;
