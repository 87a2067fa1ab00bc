//! Handler Metrics
//!
//! Per-handler counters for monitoring session health. Atomic counters keep
//! recording free of locks on the send and dispatch paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters owned by a single network handler
#[derive(Debug)]
pub struct HandlerMetrics {
    /// Frames written to the transport
    pub frames_sent: AtomicU64,
    /// Frames read from the transport
    pub frames_received: AtomicU64,
    /// Bytes written (frame payloads)
    pub bytes_sent: AtomicU64,
    /// Bytes read (frame payloads)
    pub bytes_received: AtomicU64,
    /// Responses delivered to a waiting requester
    pub responses_delivered: AtomicU64,
    /// Unsolicited events published
    pub events_published: AtomicU64,
    /// Inbound payloads that failed to decode
    pub decode_errors: AtomicU64,
    /// Requests that expired before a response arrived
    pub request_timeouts: AtomicU64,
    /// Responses with no pending request and no event meaning
    pub packets_discarded: AtomicU64,
    /// Heartbeats acknowledged by the server
    pub heartbeats_ok: AtomicU64,
    /// Heartbeats that failed or timed out
    pub heartbeats_failed: AtomicU64,
    start_time: Instant,
}

impl HandlerMetrics {
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            responses_delivered: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            request_timeouts: AtomicU64::new(0),
            packets_discarded: AtomicU64::new(0),
            heartbeats_ok: AtomicU64::new(0),
            heartbeats_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn frame_sent(&self, byte_count: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn frame_received(&self, byte_count: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn response_delivered(&self) {
        self.responses_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_timeout(&self) {
        self.request_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_discarded(&self) {
        self.packets_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat(&self, ok: bool) {
        if ok {
            self.heartbeats_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.heartbeats_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            responses_delivered: self.responses_delivered.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            request_timeouts: self.request_timeouts.load(Ordering::Relaxed),
            packets_discarded: self.packets_discarded.load(Ordering::Relaxed),
            heartbeats_ok: self.heartbeats_ok.load(Ordering::Relaxed),
            heartbeats_failed: self.heartbeats_failed.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self, bot: u32) {
        let snapshot = self.snapshot();
        info!(
            bot,
            frames_sent = snapshot.frames_sent,
            frames_received = snapshot.frames_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            responses_delivered = snapshot.responses_delivered,
            events_published = snapshot.events_published,
            decode_errors = snapshot.decode_errors,
            request_timeouts = snapshot.request_timeouts,
            packets_discarded = snapshot.packets_discarded,
            heartbeats_ok = snapshot.heartbeats_ok,
            heartbeats_failed = snapshot.heartbeats_failed,
            uptime_seconds = snapshot.uptime_seconds,
            "Network handler metrics"
        );
    }
}

impl Default for HandlerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`HandlerMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub responses_delivered: u64,
    pub events_published: u64,
    pub decode_errors: u64,
    pub request_timeouts: u64,
    pub packets_discarded: u64,
    pub heartbeats_ok: u64,
    pub heartbeats_failed: u64,
    pub uptime_seconds: u64,
}
