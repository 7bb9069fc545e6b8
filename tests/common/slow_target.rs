//! A target store that stalls before every submission.
//!
//! Wraps [`InMemoryTarget`] and records how many submissions were attempted,
//! for exercising request timeouts.

#![allow(dead_code)]

use migration_engine::memory::InMemoryTarget;
use migration_engine::store::{BoxFuture, Mutation, MutationOutcome, TargetStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct SlowTarget {
    pub inner: Arc<InMemoryTarget>,
    delay: Duration,
    attempts: AtomicUsize,
}

impl SlowTarget {
    pub fn new(inner: Arc<InMemoryTarget>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl TargetStore for SlowTarget {
    fn collection_exists(&self, name: &str) -> BoxFuture<'_, bool> {
        self.inner.collection_exists(name)
    }

    fn submit_atomic(&self, mutations: Vec<Mutation>) -> BoxFuture<'_, Vec<MutationOutcome>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.submit_atomic(mutations).await
        })
    }
}
