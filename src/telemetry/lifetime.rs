use std::collections::HashMap;

use crate::tracer::event::Comm;

/// Start time and identity captured when a process was forked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartEntry {
    pub start_ns: u64,
    pub uid: u32,
    pub comm: Comm,
}

/// Maps in-flight process ids to their fork-time entry.
///
/// An entry exists for every pid whose FORK has been processed and whose
/// EXIT has not. Presence says nothing about whether the process is still
/// alive in the OS.
#[derive(Debug, Default)]
pub struct LifetimeTracker {
    starts: HashMap<u32, StartEntry>,
}

impl LifetimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            starts: HashMap::with_capacity(capacity),
        }
    }

    /// Store the fork entry for `pid`, returning any stale entry it replaced.
    /// The last FORK for a given pid wins.
    pub fn record_start(&mut self, pid: u32, entry: StartEntry) -> Option<StartEntry> {
        self.starts.insert(pid, entry)
    }

    /// Remove and return the fork entry for `pid`.
    /// `None` means no FORK was observed for it, which is expected at startup.
    pub fn take_start(&mut self, pid: u32) -> Option<StartEntry> {
        self.starts.remove(&pid)
    }

    /// Number of in-flight entries.
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}
