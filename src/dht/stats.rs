use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the events that never surface as errors.
#[derive(Debug, Default)]
pub struct DhtStats {
    datagrams_received: AtomicU64,
    malformed_dropped: AtomicU64,
    unmatched_responses: AtomicU64,
    timeouts: AtomicU64,
    evictions: AtomicU64,
    rejected_inserts: AtomicU64,
    values_stored: AtomicU64,
}

/// A copy of [`DhtStats`] at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub datagrams_received: u64,
    pub malformed_dropped: u64,
    pub unmatched_responses: u64,
    pub timeouts: u64,
    pub evictions: u64,
    pub rejected_inserts: u64,
    pub values_stored: u64,
}

impl DhtStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_datagram(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmatched(&self) {
        self.unmatched_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected_inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stored(&self) {
        self.values_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            rejected_inserts: self.rejected_inserts.load(Ordering::Relaxed),
            values_stored: self.values_stored.load(Ordering::Relaxed),
        }
    }
}
