//! Broadcast fan-out.
//!
//! The broadcaster delivers each inbound message to every other active
//! connection. Fan-outs are serialized so every recipient observes messages
//! in the same global order; the guard is held only while enqueuing, never
//! across transport I/O.

use crate::connection::Enqueued;
use crate::error::RelayError;
use crate::message::Message;
use crate::metrics as names;
use crate::registry::Registry;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Outcome of a single fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Peers found in the snapshot, excluding the origin.
    pub recipients: usize,
    /// Peers whose queue accepted the message.
    pub queued: usize,
    /// Of those, peers that evicted an older message to make room.
    pub dropped_oldest: usize,
    /// Peers that refused the message because of backpressure.
    pub rejected: usize,
    /// Peers skipped because they were no longer active.
    pub skipped: usize,
}

/// Cumulative broadcaster statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Messages fanned out.
    pub messages: u64,
    /// Messages queued across all recipients.
    pub deliveries: u64,
    /// Messages evicted by the drop-oldest policy.
    pub dropped: u64,
    /// Enqueues refused by the disconnect policy.
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    messages: AtomicU64,
    deliveries: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

/// Fans messages out to the registry.
pub struct Broadcaster {
    registry: Arc<Registry>,
    /// Serializes fan-outs; acquisition order is the global message order.
    order: Mutex<()>,
    counters: Counters,
}

impl Broadcaster {
    /// Create a broadcaster over a registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            order: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    /// Deliver `message` to every active connection except its origin.
    ///
    /// Never blocks on a recipient: each recipient's backpressure policy is
    /// applied independently, and a full queue only affects that recipient.
    pub fn fanout(&self, message: Message) -> FanoutReport {
        let message = Arc::new(message);
        let mut report = FanoutReport::default();

        {
            let _order = self.order.lock();
            let peers = self.registry.snapshot();

            for peer in peers.iter().filter(|c| c.id() != message.origin) {
                report.recipients += 1;
                if !peer.is_active() {
                    report.skipped += 1;
                    continue;
                }
                match peer.enqueue(Arc::clone(&message)) {
                    Ok(Enqueued::Queued) => report.queued += 1,
                    Ok(Enqueued::DroppedOldest) => {
                        report.queued += 1;
                        report.dropped_oldest += 1;
                    }
                    Err(RelayError::Backpressure(_)) => report.rejected += 1,
                    Err(_) => report.skipped += 1,
                }
            }
        }

        self.record(&message, &report);
        report
    }

    /// Get cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages: self.counters.messages.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Get the registry this broadcaster reads from.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn record(&self, message: &Message, report: &FanoutReport) {
        self.counters.messages.fetch_add(1, Ordering::Relaxed);
        self.counters
            .deliveries
            .fetch_add(report.queued as u64, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(report.dropped_oldest as u64, Ordering::Relaxed);
        self.counters
            .rejected
            .fetch_add(report.rejected as u64, Ordering::Relaxed);

        counter!(names::DELIVERIES_TOTAL).increment(report.queued as u64);
        if report.dropped_oldest > 0 {
            counter!(names::DROPPED_OLDEST).increment(report.dropped_oldest as u64);
        }
        if report.rejected > 0 {
            counter!(names::SLOW_CONSUMERS).increment(report.rejected as u64);
        }
        histogram!(names::FANOUT_SECONDS).record(message.received_at.elapsed().as_secs_f64());

        trace!(
            message = message.id,
            origin = %message.origin,
            recipients = report.recipients,
            queued = report.queued,
            rejected = report.rejected,
            "Fanned out"
        );
    }
}
