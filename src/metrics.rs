//! Minimal in-process metrics: a single atomic counter tracking bytes of
//! artifact content served. A full metrics crate would be overkill for it.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    artifacts_size_counter: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_artifact_bytes(&self, bytes: u64) {
        self.artifacts_size_counter.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn artifact_bytes_served(&self) -> u64 {
        self.artifacts_size_counter.load(Ordering::Relaxed)
    }
}

#[test]
fn test_counter_accumulates() {
    let metrics = Metrics::new();
    metrics.add_artifact_bytes(5);
    metrics.add_artifact_bytes(3);
    assert_eq!(metrics.artifact_bytes_served(), 8);
}
