use std::time::Duration;

use serde::Serialize;

use crate::tracer::event::Comm;

/// Default number of longest-lived processes retained.
pub const DEFAULT_TOP_K: usize = 5;

/// Identity and lifetime of one completed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub uid: u32,
    pub comm: Comm,
    pub lifetime_ns: u64,
}

impl ProcessRecord {
    pub fn lifetime(&self) -> Duration {
        Duration::from_nanos(self.lifetime_ns)
    }

    /// Lifetime in fractional seconds.
    pub fn lifetime_secs(&self) -> f64 {
        self.lifetime_ns as f64 / 1e9
    }
}

/// Result of offering a record to [`TopK`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Stored in a free slot.
    Admitted,
    /// Stored by overwriting the returned minimum-lifetime record.
    Replaced(ProcessRecord),
    /// Not stored; its lifetime did not exceed the current minimum.
    Rejected,
}

/// Fixed-capacity set of the records with the largest lifetimes.
///
/// Slots fill in order until full. Afterwards each offer scans all slots for
/// the minimum lifetime and overwrites it only when the candidate is strictly
/// larger. Equal minimums resolve to the lowest slot index.
#[derive(Debug, Clone)]
pub struct TopK {
    slots: Vec<ProcessRecord>,
    capacity: usize,
}

impl TopK {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Offer a completed record for retention.
    pub fn offer(&mut self, record: ProcessRecord) -> Offer {
        if self.slots.len() < self.capacity {
            self.slots.push(record);
            return Offer::Admitted;
        }

        let Some(min) = self.min_slot() else {
            return Offer::Rejected;
        };

        let slot = &mut self.slots[min];
        if record.lifetime_ns > slot.lifetime_ns {
            Offer::Replaced(std::mem::replace(slot, record))
        } else {
            Offer::Rejected
        }
    }

    /// Index of the first slot holding the minimum lifetime.
    fn min_slot(&self) -> Option<usize> {
        let mut iter = self.slots.iter().enumerate();
        let (mut min_idx, first) = iter.next()?;
        let mut min_lifetime = first.lifetime_ns;

        for (i, rec) in iter {
            if rec.lifetime_ns < min_lifetime {
                min_idx = i;
                min_lifetime = rec.lifetime_ns;
            }
        }

        Some(min_idx)
    }

    /// Copy of the filled slots, in slot order.
    pub fn snapshot(&self) -> Vec<ProcessRecord> {
        self.slots.clone()
    }
}
