// Streaming statistics
//
// Per-log counters shared between pollers and the monitor's reporter task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Counters for one tailed log
#[derive(Debug, Clone, Default)]
pub struct LogStats {
    /// Records published to the hub from this log
    pub published: u64,
    /// Failed tree-head or entry fetches
    pub fetch_failures: u64,
    /// Next entry index to fetch
    pub cursor: u64,
    /// Last observed tree size
    pub tree_size: u64,
}

/// Thread-safe statistics tracker
pub struct StatsTracker {
    stats: Arc<Mutex<HashMap<String, LogStats>>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count records published from a log
    pub fn record_published(&self, url: &str, count: u64) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.entry(url.to_string()).or_default().published += count;
        }
    }

    /// Count a failed upstream fetch
    pub fn record_fetch_failure(&self, url: &str) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.entry(url.to_string()).or_default().fetch_failures += 1;
        }
    }

    /// Record a log's cursor position and tree size
    pub fn record_position(&self, url: &str, cursor: u64, tree_size: u64) {
        if let Ok(mut stats) = self.stats.lock() {
            let entry = stats.entry(url.to_string()).or_default();
            entry.cursor = cursor;
            entry.tree_size = tree_size;
        }
    }

    /// Snapshot of the current counters
    pub fn snapshot(&self) -> HashMap<String, LogStats> {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Emit a one-line summary of the stream state
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();

        let published: u64 = snapshot.values().map(|s| s.published).sum();
        let failures: u64 = snapshot.values().map(|s| s.fetch_failures).sum();

        info!(
            logs = snapshot.len(),
            published, failures, "stream statistics"
        );
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StatsTracker {
    fn clone(&self) -> Self {
        Self {
            stats: Arc::clone(&self.stats),
        }
    }
}
