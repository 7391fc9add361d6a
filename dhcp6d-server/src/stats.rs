//! Per-worker statistics counters and on-demand aggregation
//!
//! Every worker owns one counter set and updates it lock-free; nothing is
//! shared on the hot path. The control channel aggregates all sets (plus the
//! master's own, which counts queue overflow) when an operator asks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use dhcp6d_handlers::RateLimitCounters;
use dhcp6d_wire::registry::registry;

/// Counter set owned by one worker (or by the master for queue counters)
#[derive(Debug)]
pub struct WorkerCounters {
    pub incoming_packets: AtomicU64,
    pub outgoing_packets: AtomicU64,
    pub unparsable_packets: AtomicU64,
    pub handling_errors: AtomicU64,
    pub for_other_server: AtomicU64,
    pub do_not_respond: AtomicU64,
    pub incomplete_messages: AtomicU64,
    pub use_multicast: AtomicU64,
    pub deadline_exceeded: AtomicU64,
    pub queue_overflow: AtomicU64,
    /// Per message-type counts, indexed by the wire type code
    pub messages_in: [AtomicU64; 256],
    pub messages_out: [AtomicU64; 256],
}

impl Default for WorkerCounters {
    fn default() -> Self {
        Self {
            incoming_packets: AtomicU64::new(0),
            outgoing_packets: AtomicU64::new(0),
            unparsable_packets: AtomicU64::new(0),
            handling_errors: AtomicU64::new(0),
            for_other_server: AtomicU64::new(0),
            do_not_respond: AtomicU64::new(0),
            incomplete_messages: AtomicU64::new(0),
            use_multicast: AtomicU64::new(0),
            deadline_exceeded: AtomicU64::new(0),
            queue_overflow: AtomicU64::new(0),
            messages_in: std::array::from_fn(|_| AtomicU64::new(0)),
            messages_out: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl WorkerCounters {
    pub fn count_message_in(&self, message_type: u8) {
        self.messages_in[message_type as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_message_out(&self, message_type: u8) {
        self.messages_out[message_type as usize].fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything the stats commands report
#[derive(Debug, Clone, Serialize, Default)]
pub struct StatsSnapshot {
    pub incoming_packets: u64,
    pub outgoing_packets: u64,
    pub unparsable_packets: u64,
    pub handling_errors: u64,
    pub for_other_server: u64,
    pub do_not_respond: u64,
    pub incomplete_messages: u64,
    pub use_multicast: u64,
    pub deadline_exceeded: u64,
    pub queue_overflow: u64,
    pub rate_limited: u64,
    pub workers: usize,
    pub messages_in: BTreeMap<String, u64>,
    pub messages_out: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    /// The plain-text rendering used by the `stats` command
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("incoming-packets: {}\n", self.incoming_packets));
        out.push_str(&format!("outgoing-packets: {}\n", self.outgoing_packets));
        out.push_str(&format!("unparsable-packets: {}\n", self.unparsable_packets));
        out.push_str(&format!("handling-errors: {}\n", self.handling_errors));
        out.push_str(&format!("for-other-server: {}\n", self.for_other_server));
        out.push_str(&format!("do-not-respond: {}\n", self.do_not_respond));
        out.push_str(&format!(
            "incomplete-messages: {}\n",
            self.incomplete_messages
        ));
        out.push_str(&format!("use-multicast: {}\n", self.use_multicast));
        out.push_str(&format!("deadline-exceeded: {}\n", self.deadline_exceeded));
        out.push_str(&format!("queue-overflow: {}\n", self.queue_overflow));
        out.push_str(&format!("rate-limited: {}\n", self.rate_limited));
        out.push_str(&format!("workers: {}\n", self.workers));
        for (name, count) in &self.messages_in {
            out.push_str(&format!("messages-in.{}: {}\n", name, count));
        }
        for (name, count) in &self.messages_out {
            out.push_str(&format!("messages-out.{}: {}\n", name, count));
        }
        out
    }
}

/// The master's view over every counter source
#[derive(Default)]
pub struct StatsRegistry {
    counters: parking_lot::RwLock<Vec<Arc<WorkerCounters>>>,
    rate_limiters: parking_lot::RwLock<Vec<Arc<RateLimitCounters>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_counters(&self, counters: Arc<WorkerCounters>) {
        self.counters.write().push(counters);
    }

    pub fn add_rate_limiter(&self, limiter: Arc<RateLimitCounters>) {
        self.rate_limiters.write().push(limiter);
    }

    /// Replace the worker counter sets, e.g. after a reload respawned them
    pub fn reset_workers(&self, counters: Vec<Arc<WorkerCounters>>) {
        *self.counters.write() = counters;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.counters.read();
        let mut snapshot = StatsSnapshot {
            workers: counters.len().saturating_sub(1),
            ..Default::default()
        };

        for set in counters.iter() {
            snapshot.incoming_packets += set.incoming_packets.load(Ordering::Relaxed);
            snapshot.outgoing_packets += set.outgoing_packets.load(Ordering::Relaxed);
            snapshot.unparsable_packets += set.unparsable_packets.load(Ordering::Relaxed);
            snapshot.handling_errors += set.handling_errors.load(Ordering::Relaxed);
            snapshot.for_other_server += set.for_other_server.load(Ordering::Relaxed);
            snapshot.do_not_respond += set.do_not_respond.load(Ordering::Relaxed);
            snapshot.incomplete_messages += set.incomplete_messages.load(Ordering::Relaxed);
            snapshot.use_multicast += set.use_multicast.load(Ordering::Relaxed);
            snapshot.deadline_exceeded += set.deadline_exceeded.load(Ordering::Relaxed);
            snapshot.queue_overflow += set.queue_overflow.load(Ordering::Relaxed);

            for code in 0..=u8::MAX {
                let count = set.messages_in[code as usize].load(Ordering::Relaxed);
                if count > 0 {
                    let name = message_name(code);
                    *snapshot.messages_in.entry(name).or_insert(0) += count;
                }
                let count = set.messages_out[code as usize].load(Ordering::Relaxed);
                if count > 0 {
                    let name = message_name(code);
                    *snapshot.messages_out.entry(name).or_insert(0) += count;
                }
            }
        }

        for limiter in self.rate_limiters.read().iter() {
            snapshot.rate_limited += limiter.dropped();
        }

        snapshot
    }
}

fn message_name(code: u8) -> String {
    registry()
        .message(code)
        .map(|entry| entry.name.to_string())
        .unwrap_or_else(|| format!("unknown-{}", code))
}
