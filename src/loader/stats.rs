//! Load statistics for monitoring index loading behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Process-wide loading counters plus a per-role breakdown.
///
/// Counters are atomics; derived rates are computed on demand and never
/// stored.
#[derive(Debug, Default)]
pub struct LoadingStats {
    total_load_count: AtomicU64,
    success_load_count: AtomicU64,
    failed_load_count: AtomicU64,
    cache_hit_count: AtomicU64,
    total_load_time_ms: AtomicU64,
    role_records: RwLock<HashMap<String, Arc<RoleLoadRecord>>>,
    /// Millis since epoch when this collector was created; 0 until first use
    started_at_ms: AtomicU64,
}

/// Per-role counters.
#[derive(Debug, Default)]
struct RoleLoadRecord {
    load_count: AtomicU64,
    failure_count: AtomicU64,
    cache_hit_count: AtomicU64,
    total_load_time_ms: AtomicU64,
    /// Millis since epoch of the last successful load; 0 = never
    last_load_ms: AtomicU64,
}

/// Snapshot of one role's load history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleLoadReport {
    pub role_id: String,
    pub load_count: u64,
    pub failure_count: u64,
    pub cache_hit_count: u64,
    pub total_load_time_ms: u64,
    pub average_load_time_ms: f64,
    pub last_load_time: Option<DateTime<Utc>>,
}

/// Snapshot of the global counters and derived rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub start_time: Option<DateTime<Utc>>,
    pub total_load_count: u64,
    pub success_load_count: u64,
    pub failed_load_count: u64,
    pub cache_hit_count: u64,
    pub average_load_time_ms: f64,
    pub cache_hit_rate: f64,
    pub success_rate: f64,
    pub role_record_count: usize,
}

impl LoadingStats {
    pub fn new() -> Self {
        let stats = Self::default();
        stats
            .started_at_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
        stats
    }

    /// Record a successful index load.
    pub fn record_load(&self, role_id: &str, load_time_ms: u64) {
        self.total_load_count.fetch_add(1, Ordering::Relaxed);
        self.success_load_count.fetch_add(1, Ordering::Relaxed);
        self.total_load_time_ms
            .fetch_add(load_time_ms, Ordering::Relaxed);

        let record = self.role_record(role_id);
        record.load_count.fetch_add(1, Ordering::Relaxed);
        record
            .total_load_time_ms
            .fetch_add(load_time_ms, Ordering::Relaxed);
        record
            .last_load_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Relaxed);

        debug!(role_id, load_time_ms, "recorded index load");
    }

    /// Record a failed index load.
    pub fn record_load_failure(&self, role_id: &str, reason: &str) {
        self.total_load_count.fetch_add(1, Ordering::Relaxed);
        self.failed_load_count.fetch_add(1, Ordering::Relaxed);

        let record = self.role_record(role_id);
        record.failure_count.fetch_add(1, Ordering::Relaxed);

        warn!(role_id, reason, "recorded index load failure");
    }

    /// Record a cache hit for an already-loaded index.
    pub fn record_cache_hit(&self, role_id: &str) {
        self.cache_hit_count.fetch_add(1, Ordering::Relaxed);

        let record = self.role_record(role_id);
        record.cache_hit_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Average successful load time; 0 with no successes.
    pub fn average_load_time_ms(&self) -> f64 {
        let count = self.success_load_count.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            self.total_load_time_ms.load(Ordering::Relaxed) as f64 / count as f64
        }
    }

    /// Cache hits relative to load attempts; 0 with no attempts.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.total_load_count.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.cache_hit_count.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Successful loads relative to attempts; 0 with no attempts.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_load_count.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.success_load_count.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Snapshot one role's counters.
    pub fn role_report(&self, role_id: &str) -> Option<RoleLoadReport> {
        let records = self.role_records.read().unwrap();
        records
            .get(role_id)
            .map(|record| record.report(role_id.to_string()))
    }

    /// Snapshot every role's counters.
    pub fn all_role_reports(&self) -> Vec<RoleLoadReport> {
        let records = self.role_records.read().unwrap();
        records
            .iter()
            .map(|(role_id, record)| record.report(role_id.clone()))
            .collect()
    }

    /// Snapshot the global counters.
    pub fn generate_report(&self) -> StatsReport {
        let started_ms = self.started_at_ms.load(Ordering::Relaxed);
        StatsReport {
            start_time: DateTime::from_timestamp_millis(started_ms as i64),
            total_load_count: self.total_load_count.load(Ordering::Relaxed),
            success_load_count: self.success_load_count.load(Ordering::Relaxed),
            failed_load_count: self.failed_load_count.load(Ordering::Relaxed),
            cache_hit_count: self.cache_hit_count.load(Ordering::Relaxed),
            average_load_time_ms: self.average_load_time_ms(),
            cache_hit_rate: self.cache_hit_rate(),
            success_rate: self.success_rate(),
            role_record_count: self.role_records.read().unwrap().len(),
        }
    }

    /// Zero every counter and drop per-role records. Test isolation only.
    pub fn reset(&self) {
        self.total_load_count.store(0, Ordering::Relaxed);
        self.success_load_count.store(0, Ordering::Relaxed);
        self.failed_load_count.store(0, Ordering::Relaxed);
        self.cache_hit_count.store(0, Ordering::Relaxed);
        self.total_load_time_ms.store(0, Ordering::Relaxed);
        self.role_records.write().unwrap().clear();
    }

    fn role_record(&self, role_id: &str) -> Arc<RoleLoadRecord> {
        if let Some(record) = self.role_records.read().unwrap().get(role_id) {
            return Arc::clone(record);
        }
        let mut records = self.role_records.write().unwrap();
        Arc::clone(
            records
                .entry(role_id.to_string())
                .or_insert_with(|| Arc::new(RoleLoadRecord::default())),
        )
    }
}

impl RoleLoadRecord {
    fn report(&self, role_id: String) -> RoleLoadReport {
        let load_count = self.load_count.load(Ordering::Relaxed);
        let total_ms = self.total_load_time_ms.load(Ordering::Relaxed);
        let last_ms = self.last_load_ms.load(Ordering::Relaxed);

        RoleLoadReport {
            role_id,
            load_count,
            failure_count: self.failure_count.load(Ordering::Relaxed),
            cache_hit_count: self.cache_hit_count.load(Ordering::Relaxed),
            total_load_time_ms: total_ms,
            average_load_time_ms: if load_count == 0 {
                0.0
            } else {
                total_ms as f64 / load_count as f64
            },
            last_load_time: if last_ms == 0 {
                None
            } else {
                DateTime::from_timestamp_millis(last_ms as i64)
            },
        }
    }
}
