//! Per-handler outcome counters

use poller_core::HandledCount;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Success and failure counts keyed by task name
///
/// Cloning shares the counters.
#[derive(Clone, Default)]
pub struct HandledStats {
    counts: Arc<Mutex<HashMap<String, HandledCount>>>,
}

impl HandledStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str, success: bool) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = counts
            .entry(name.to_string())
            .or_insert_with(|| HandledCount {
                handler: name.to_string(),
                ..HandledCount::default()
            });

        if success {
            entry.handled += 1;
        } else {
            entry.not_handled += 1;
        }
    }

    /// Current counts, sorted by name
    pub fn snapshot(&self) -> Vec<HandledCount> {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: Vec<HandledCount> = counts.values().cloned().collect();
        snapshot.sort_by(|a, b| a.handler.cmp(&b.handler));
        snapshot
    }
}
