use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetricsSnapshot {
    pub uptime_millis: u64,
    pub ingress_total: u64,
    pub ingress_rate_per_sec: f64,
    pub requests_sent: u64,
    pub pending_call_count: u64,
    pub decode_error_count: u64,
    pub unmatched_response_count: u64,
    pub timeout_count: u64,
    pub events_dispatched: u64,
    pub listener_failure_count: u64,
    pub reconnect_count: u64,
}

/// Session counters used for snapshots and diagnostics.
/// All counters are lock-free atomics; hot paths must remain O(1).
#[derive(Debug)]
pub(crate) struct SessionMetrics {
    start_unix_millis: i64,
    ingress_total: AtomicU64,
    requests_sent: AtomicU64,
    decode_error_count: AtomicU64,
    unmatched_response_count: AtomicU64,
    timeout_count: AtomicU64,
    events_dispatched: AtomicU64,
    listener_failure_count: AtomicU64,
    reconnect_count: AtomicU64,
}

impl SessionMetrics {
    pub(crate) fn new(start_unix_millis: i64) -> Self {
        Self {
            start_unix_millis,
            ingress_total: AtomicU64::new(0),
            requests_sent: AtomicU64::new(0),
            decode_error_count: AtomicU64::new(0),
            unmatched_response_count: AtomicU64::new(0),
            timeout_count: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            listener_failure_count: AtomicU64::new(0),
            reconnect_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_ingress(&self) {
        self.ingress_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmatched_response(&self) {
        self.unmatched_response_count
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeouts(&self, count: u64) {
        self.timeout_count.fetch_add(count, Ordering::Relaxed);
    }

    /// Record one dispatched event and the listener failures it produced.
    pub(crate) fn record_dispatch(&self, failed_listeners: u64) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
        if failed_listeners > 0 {
            self.listener_failure_count
                .fetch_add(failed_listeners, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Build immutable metrics snapshot.
    /// `pending_call_count` is read from the correlation table by the caller.
    pub(crate) fn snapshot(
        &self,
        now_unix_millis: i64,
        pending_call_count: u64,
    ) -> SessionMetricsSnapshot {
        let uptime_millis = if now_unix_millis <= self.start_unix_millis {
            0
        } else {
            (now_unix_millis - self.start_unix_millis) as u64
        };
        let ingress_total = self.ingress_total.load(Ordering::Relaxed);
        let ingress_rate_per_sec = if uptime_millis == 0 {
            0.0
        } else {
            (ingress_total as f64) / ((uptime_millis as f64) / 1_000.0)
        };

        SessionMetricsSnapshot {
            uptime_millis,
            ingress_total,
            ingress_rate_per_sec,
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            pending_call_count,
            decode_error_count: self.decode_error_count.load(Ordering::Relaxed),
            unmatched_response_count: self.unmatched_response_count.load(Ordering::Relaxed),
            timeout_count: self.timeout_count.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            listener_failure_count: self.listener_failure_count.load(Ordering::Relaxed),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
        }
    }
}
