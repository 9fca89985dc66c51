use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub chunks_enqueued: u64,
    pub chunks_dropped: u64,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub write_errors: u64,
    pub sessions_total: u64,
    pub sessions_active: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub chunks_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub write_errors: AtomicU64,
    pub sessions_total: AtomicU64,
}

impl Counters {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
