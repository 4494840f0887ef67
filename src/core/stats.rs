//! Live counters read by the transport layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Process-lifetime pipeline counters
#[derive(Debug)]
pub struct PipelineStats {
    events: AtomicU64,
    /// f64 bit pattern of the cumulative byte count
    bytes_bits: AtomicU64,
    malformed: AtomicU64,
    persisted: AtomicU64,
    store_failures: AtomicU64,
    broadcast_dropped: AtomicU64,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub events: u64,
    pub bytes: f64,
    pub malformed: u64,
    pub persisted: u64,
    pub store_failures: u64,
    pub broadcast_dropped: u64,
    pub uptime_sec: u64,
    pub started_at: DateTime<Utc>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            events: AtomicU64::new(0),
            bytes_bits: AtomicU64::new(0f64.to_bits()),
            malformed: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            broadcast_dropped: AtomicU64::new(0),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Count one produced event and its byte volume.
    pub fn record_event(&self, bytes: f64) {
        self.events.fetch_add(1, Ordering::Relaxed);
        let bytes = if bytes.is_finite() { bytes.max(0.0) } else { 0.0 };
        let _ = self
            .bytes_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + bytes).to_bits())
            });
        metrics::increment_counter!("pipeline_events_total");
        metrics::counter!("pipeline_bytes_total", bytes as u64);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("pipeline_malformed_total");
    }

    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("store_rows_written_total");
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("store_append_failures_total");
    }

    pub fn record_broadcast_dropped(&self) {
        self.broadcast_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("broadcast_dropped_total");
    }

    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> f64 {
        f64::from_bits(self.bytes_bits.load(Ordering::Relaxed))
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events: self.events(),
            bytes: self.bytes(),
            malformed: self.malformed.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            broadcast_dropped: self.broadcast_dropped.load(Ordering::Relaxed),
            uptime_sec: self.uptime_secs(),
            started_at: self.started_at,
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = PipelineStats::new();
        stats.record_event(1500.0);
        stats.record_event(500.5);
        stats.record_event(f64::NAN);
        stats.record_store_failure();
        stats.record_malformed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events, 3);
        assert_eq!(snapshot.bytes, 2000.5);
        assert_eq!(snapshot.store_failures, 1);
        assert_eq!(snapshot.malformed, 1);
        assert_eq!(snapshot.persisted, 0);
    }
}
