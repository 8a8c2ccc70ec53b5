//! Human and machine readable renderings of a [`Snapshot`].

use std::fmt::Write;

use anyhow::{Context, Result};

use crate::telemetry::Snapshot;

const TITLE: &str = "Process Telemetry";

/// Placeholder for last-seen fields before the first fork.
const NONE: &str = "none";

/// Render the snapshot as the plain-text report.
///
/// Retained records are listed longest lifetime first with lifetimes in
/// seconds at millisecond precision. Empty slots are not listed.
pub fn render_text(snap: &Snapshot) -> String {
    let mut out = String::with_capacity(256 + snap.top_k.len() * 64);

    // Writing into a String cannot fail.
    let _ = writeln!(out, "{TITLE}");
    let _ = writeln!(out, "{}", "-".repeat(TITLE.len()));
    let _ = writeln!(out, "Forks           : {}", snap.fork_count);
    let _ = writeln!(out, "Exits           : {}", snap.exit_count);
    let _ = writeln!(out, "Untracked exits : {}", snap.untracked_exits);
    let _ = writeln!(out, "In flight       : {}", snap.tracked);
    match &snap.last_fork {
        Some(last) => {
            let _ = writeln!(out, "Last PID        : {}", last.pid);
            let _ = writeln!(out, "Last Command    : {}", last.comm);
        }
        None => {
            let _ = writeln!(out, "Last PID        : {NONE}");
            let _ = writeln!(out, "Last Command    : {NONE}");
        }
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Top {} Longest Running Processes:", snap.capacity);

    for (rank, rec) in snap.ranked().iter().enumerate() {
        let _ = writeln!(
            out,
            "{}) PID={} UID={} CMD={} LIFETIME={:.3} sec",
            rank + 1,
            rec.pid,
            rec.uid,
            rec.comm,
            rec.lifetime_secs(),
        );
    }

    out
}

/// Render the snapshot as pretty-printed JSON.
pub fn render_json(snap: &Snapshot) -> Result<String> {
    serde_json::to_string_pretty(snap).context("serializing snapshot")
}
