//! Per-engine call accounting.
//!
//! Every dispatch through the registry lands here, keyed by full key. The
//! numbers back `strata status` and the registry's `stats()` export.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Counters for one registered implementation.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EngineCallStats {
    pub total_calls: u64,
    pub success_calls: u64,
    pub failed_calls: u64,
    pub total_time_ms: u64,
    pub avg_time_ms: f64,
    pub last_duration_ms: u64,
    pub last_error: Option<String>,
}

/// Call metrics across all registrations.
#[derive(Default)]
pub struct CallMetrics {
    stats: Mutex<HashMap<String, EngineCallStats>>,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, full_key: &str, elapsed: Duration) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(full_key.to_string()).or_default();
        entry.total_calls += 1;
        entry.success_calls += 1;
        Self::record_time(entry, elapsed);
    }

    pub fn record_failure(&self, full_key: &str, elapsed: Duration, error: &str) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(full_key.to_string()).or_default();
        entry.total_calls += 1;
        entry.failed_calls += 1;
        entry.last_error = Some(error.to_string());
        Self::record_time(entry, elapsed);
    }

    fn record_time(entry: &mut EngineCallStats, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        entry.total_time_ms += ms;
        entry.last_duration_ms = ms;
        entry.avg_time_ms = entry.total_time_ms as f64 / entry.total_calls as f64;
    }

    /// Snapshot of all per-key stats.
    pub fn export(&self) -> HashMap<String, EngineCallStats> {
        self.stats.lock().clone()
    }

    /// Overall success rate in percent, `None` before the first call.
    pub fn success_rate(&self) -> Option<f64> {
        let stats = self.stats.lock();
        let total: u64 = stats.values().map(|s| s.total_calls).sum();
        if total == 0 {
            return None;
        }
        let ok: u64 = stats.values().map(|s| s.success_calls).sum();
        Some(ok as f64 / total as f64 * 100.0)
    }

    pub fn reset(&self) {
        self.stats.lock().clear();
    }
}
