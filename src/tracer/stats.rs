use std::sync::atomic::{AtomicU64, Ordering};

use super::event::{EventType, ProcessEvent, MAX_EVENT_TYPE};

/// Lock-free per-EventType counters, plus one slot for unknown types.
///
/// `snapshot()` atomically reads and resets all counters, making it
/// suitable for periodic reporting without contention.
pub struct EventStats {
    counts: [AtomicU64; MAX_EVENT_TYPE + 1],
    unknown: AtomicU64,
}

/// Counts taken by [`EventStats::snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStatsSnapshot {
    /// Non-zero counts per recognized type, in numeric order.
    pub by_type: Vec<(EventType, u64)>,
    /// Events whose type byte was not recognized.
    pub unknown: u64,
}

impl EventStatsSnapshot {
    pub fn total(&self) -> u64 {
        self.by_type.iter().map(|(_, n)| n).sum::<u64>() + self.unknown
    }
}

impl EventStats {
    /// Create a new zeroed EventStats.
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            unknown: AtomicU64::new(0),
        }
    }

    /// Increment the counter matching the event's type.
    pub fn record(&self, event: &ProcessEvent) {
        match event.event_type() {
            Some(t) => {
                if let Some(counter) = self.counts.get(t as usize) {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                self.unknown.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Atomically read and reset all counters, returning only non-zero entries.
    pub fn snapshot(&self) -> EventStatsSnapshot {
        let mut by_type = Vec::with_capacity(MAX_EVENT_TYPE);

        for (i, counter) in self.counts.iter().enumerate() {
            let v = counter.swap(0, Ordering::Relaxed);
            if v > 0 {
                if let Some(et) = EventType::from_u8(i as u8) {
                    by_type.push((et, v));
                }
            }
        }

        EventStatsSnapshot {
            by_type,
            unknown: self.unknown.swap(0, Ordering::Relaxed),
        }
    }
}

impl Default for EventStats {
    fn default() -> Self {
        Self::new()
    }
}
