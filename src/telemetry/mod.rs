//! Aggregation engine for process lifecycle events.
//!
//! [`Aggregator`] owns the fork/exit counters, the [`LifetimeTracker`] and the
//! [`TopK`] set behind a single mutex. Each call to
//! [`Aggregator::handle_event`] and [`Aggregator::read`] is one critical
//! section, so a reader never observes a partially applied event.

pub mod lifetime;
pub mod topk;

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::tracer::event::{Comm, ExitEvent, ForkEvent, ProcessEvent};

pub use self::lifetime::{LifetimeTracker, StartEntry};
pub use self::topk::{Offer, ProcessRecord, TopK, DEFAULT_TOP_K};

/// What handling a single event did to the aggregate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Fork recorded. `replaced_stale` is set when a previous entry for the
    /// same pid had never seen its exit.
    Forked { replaced_stale: bool },
    /// Exit completed a lifetime that was stored in a free Top-K slot.
    Retained { record: ProcessRecord },
    /// Exit completed a lifetime that displaced `evicted` from Top-K.
    Evicted {
        record: ProcessRecord,
        evicted: ProcessRecord,
    },
    /// Exit completed a lifetime too short to enter Top-K.
    Discarded { record: ProcessRecord },
    /// Exit for a pid with no recorded fork. Counted, no lifetime.
    Untracked { pid: u32 },
    /// Exit timestamp precedes the fork timestamp. Counted, no lifetime.
    ClockAnomaly { pid: u32, start_ns: u64, exit_ns: u64 },
    /// Event type not recognized. The aggregate state is untouched.
    Unrecognized { event_type: u8 },
}

/// Most recently forked process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LastFork {
    pub pid: u32,
    pub comm: Comm,
}

/// Mutable state guarded by the aggregator lock.
struct AggregateState {
    fork_count: u64,
    exit_count: u64,
    untracked_exits: u64,
    clock_anomalies: u64,
    last_fork: Option<LastFork>,
    tracker: LifetimeTracker,
    top_k: TopK,
}

impl AggregateState {
    fn new(top_k: usize) -> Self {
        Self {
            fork_count: 0,
            exit_count: 0,
            untracked_exits: 0,
            clock_anomalies: 0,
            last_fork: None,
            tracker: LifetimeTracker::with_capacity(1024),
            top_k: TopK::new(top_k),
        }
    }

    fn record_fork(&mut self) {
        self.fork_count += 1;
    }

    fn record_exit(&mut self) {
        self.exit_count += 1;
    }

    fn fork(&mut self, e: &ForkEvent) -> Dispatch {
        self.record_fork();
        self.last_fork = Some(LastFork {
            pid: e.pid,
            comm: e.comm,
        });
        let stale = self.tracker.record_start(
            e.pid,
            StartEntry {
                start_ns: e.timestamp_ns,
                uid: e.uid,
                comm: e.comm,
            },
        );
        Dispatch::Forked {
            replaced_stale: stale.is_some(),
        }
    }

    fn exit(&mut self, e: &ExitEvent) -> Dispatch {
        self.record_exit();

        let Some(start) = self.tracker.take_start(e.pid) else {
            self.untracked_exits += 1;
            return Dispatch::Untracked { pid: e.pid };
        };

        let Some(lifetime_ns) = e.timestamp_ns.checked_sub(start.start_ns) else {
            self.clock_anomalies += 1;
            return Dispatch::ClockAnomaly {
                pid: e.pid,
                start_ns: start.start_ns,
                exit_ns: e.timestamp_ns,
            };
        };

        let record = ProcessRecord {
            pid: e.pid,
            uid: start.uid,
            comm: start.comm,
            lifetime_ns,
        };

        match self.top_k.offer(record) {
            Offer::Admitted => Dispatch::Retained { record },
            Offer::Replaced(evicted) => Dispatch::Evicted { record, evicted },
            Offer::Rejected => Dispatch::Discarded { record },
        }
    }
}

/// Point-in-time copy of the aggregate state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub fork_count: u64,
    pub exit_count: u64,
    pub untracked_exits: u64,
    pub clock_anomalies: u64,
    pub unknown_events: u64,
    /// Processes forked but not yet exited.
    pub tracked: usize,
    /// Configured Top-K capacity.
    pub capacity: usize,
    /// Filled Top-K slots in slot order.
    pub top_k: Vec<ProcessRecord>,
    /// Last process forked, `None` before the first fork.
    pub last_fork: Option<LastFork>,
}

impl Snapshot {
    /// Top-K records ordered longest lifetime first. Equal lifetimes keep
    /// slot order.
    pub fn ranked(&self) -> Vec<ProcessRecord> {
        let mut ranked = self.top_k.clone();
        ranked.sort_by(|a, b| b.lifetime_ns.cmp(&a.lifetime_ns));
        ranked
    }
}

/// Shared aggregation engine. Wrap in `Arc` to share across producers and
/// readers.
pub struct Aggregator {
    state: Mutex<AggregateState>,
    unknown_events: AtomicU64,
}

impl Aggregator {
    /// Create an aggregator retaining the `top_k` longest-lived processes.
    pub fn new(top_k: usize) -> Self {
        Self {
            state: Mutex::new(AggregateState::new(top_k)),
            unknown_events: AtomicU64::new(0),
        }
    }

    /// Configured Top-K capacity.
    pub fn capacity(&self) -> usize {
        self.state.lock().top_k.capacity()
    }

    /// Apply one event atomically and report what it did.
    pub fn handle_event(&self, event: &ProcessEvent) -> Dispatch {
        let outcome = match event {
            ProcessEvent::Fork(e) => self.state.lock().fork(e),
            ProcessEvent::Exit(e) => self.state.lock().exit(e),
            ProcessEvent::Unknown { event_type } => {
                self.unknown_events.fetch_add(1, Ordering::Relaxed);
                Dispatch::Unrecognized {
                    event_type: *event_type,
                }
            }
        };

        // Logging happens after the lock is released.
        match &outcome {
            Dispatch::Forked {
                replaced_stale: true,
            } => {
                debug!(pid = ?event.pid(), "fork replaced stale tracker entry");
            }
            Dispatch::Evicted { record, evicted } => {
                trace!(
                    pid = record.pid,
                    lifetime_ns = record.lifetime_ns,
                    evicted_pid = evicted.pid,
                    evicted_lifetime_ns = evicted.lifetime_ns,
                    "top-k eviction",
                );
            }
            Dispatch::Untracked { pid } => {
                trace!(pid, "exit without tracked fork");
            }
            Dispatch::ClockAnomaly {
                pid,
                start_ns,
                exit_ns,
            } => {
                warn!(pid, start_ns, exit_ns, "exit precedes fork, lifetime dropped");
            }
            Dispatch::Unrecognized { event_type } => {
                debug!(event_type, "unrecognized event type ignored");
            }
            _ => {}
        }

        outcome
    }

    /// Take a consistent copy of the aggregate state.
    pub fn read(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            fork_count: state.fork_count,
            exit_count: state.exit_count,
            untracked_exits: state.untracked_exits,
            clock_anomalies: state.clock_anomalies,
            unknown_events: self.unknown_events.load(Ordering::Relaxed),
            tracked: state.tracker.len(),
            capacity: state.top_k.capacity(),
            top_k: state.top_k.snapshot(),
            last_fork: state.last_fork,
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}
