//! Mutation drift ledger and rebuild trigger.
//!
//! Tracks how far the live generation has drifted from its last full build:
//! tombstones pile up in the graph, and updated documents leave stale nodes
//! behind. When `tombstones + updates >= max(drift_absolute,
//! drift_fraction * corpus_size)` a rebuild is due. The engine owns this
//! ledger and passes it the facts; the ledger never reaches back into the
//! engine.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Drift accounting since the last full build.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DriftLedger {
    tombstones: u64,
    updates_since_build: u64,
    /// Internal ids added since the last build. Deleting one of these undoes
    /// its update entry instead of counting a tombstone, so add-then-delete
    /// churn does not spuriously trigger rebuilds.
    added_since_build: HashSet<u32>,
}

impl DriftLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tombstones(&self) -> u64 {
        self.tombstones
    }

    pub fn updates_since_build(&self) -> u64 {
        self.updates_since_build
    }

    /// Total drift: tombstones plus updates.
    pub fn drift(&self) -> u64 {
        self.tombstones + self.updates_since_build
    }

    /// A document was inserted under a fresh internal id.
    pub fn record_add(&mut self, internal_id: u32) {
        self.updates_since_build += 1;
        self.added_since_build.insert(internal_id);
    }

    /// A document's old node was tombstoned.
    pub fn record_delete(&mut self, internal_id: u32) {
        if self.added_since_build.remove(&internal_id) {
            self.updates_since_build = self.updates_since_build.saturating_sub(1);
        } else {
            self.tombstones += 1;
        }
    }

    /// Whether accumulated drift warrants a rebuild.
    pub fn should_rebuild(&self, corpus_size: usize, absolute: u64, fraction: f64) -> bool {
        let threshold = absolute.max((fraction * corpus_size as f64) as u64).max(1);
        self.drift() >= threshold
    }

    /// Reset after a completed rebuild.
    pub fn reset(&mut self) {
        self.tombstones = 0;
        self.updates_since_build = 0;
        self.added_since_build.clear();
    }
}
