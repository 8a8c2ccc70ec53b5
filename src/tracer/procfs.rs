//! Event source that synthesizes fork/exit events by polling `/proc`.
//!
//! Every poll lists the numeric entries of the proc root and diffs them
//! against the previous listing. Processes that appear and vanish between
//! two polls are never seen, so lifetimes are only as precise as the poll
//! interval.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::{Clock, MonotonicClock};

use super::event::ProcessEvent;
use super::EventSource;

/// Default proc filesystem mount point.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Polling `/proc` event source.
pub struct ProcfsSource {
    root: PathBuf,
    poll_interval: Duration,
    clock: MonotonicClock,
    known: HashSet<u32>,
    pending: VecDeque<ProcessEvent>,
    ticker: Option<Interval>,
}

impl ProcfsSource {
    /// Create a source polling the system `/proc`.
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_root(DEFAULT_PROC_ROOT, poll_interval)
    }

    /// Create a source polling an alternative proc root.
    pub fn with_root(root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            root: root.into(),
            poll_interval,
            clock: MonotonicClock::new(),
            known: HashSet::new(),
            pending: VecDeque::new(),
            ticker: None,
        }
    }

    /// Number of pids seen in the last scan.
    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    /// Scan once and queue events for every change since the previous scan.
    fn poll(&mut self) -> Result<()> {
        let mut current = scan_pids(&self.root)?;
        let now_ns = self.clock.now_ns();
        let (born, gone) = diff_pids(&self.known, &current);

        for pid in gone {
            self.pending.push_back(ProcessEvent::exit(now_ns, pid));
        }

        for pid in born {
            match read_identity(&self.root, pid) {
                Ok((uid, comm)) => {
                    self.pending
                        .push_back(ProcessEvent::fork(now_ns, pid, uid, &comm));
                }
                Err(e) => {
                    // Gone before we could read it, or unreadable. Retried on
                    // the next poll if it is still listed.
                    debug!(pid, error = %e, "skipping unreadable process");
                    current.remove(&pid);
                }
            }
        }

        self.known = current;
        Ok(())
    }
}

impl EventSource for ProcfsSource {
    fn name(&self) -> &str {
        "procfs"
    }

    async fn start(&mut self) -> Result<()> {
        if self.poll_interval.is_zero() {
            bail!("procfs poll interval must be positive");
        }

        if cfg!(not(target_os = "linux")) && self.root == Path::new(DEFAULT_PROC_ROOT) {
            warn!("procfs source is only supported on Linux, no events will be produced");
            self.ticker = None;
            return Ok(());
        }

        // Processes alive at subscription time are seeded silently; their
        // exits surface as untracked.
        self.known = scan_pids(&self.root)
            .with_context(|| format!("seeding pids from {}", self.root.display()))?;
        self.pending.clear();

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        self.ticker = Some(ticker);

        info!(
            root = %self.root.display(),
            seeded = self.known.len(),
            poll_interval = ?self.poll_interval,
            "procfs source started",
        );

        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ProcessEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let Some(ticker) = self.ticker.as_mut() else {
                return Ok(None);
            };
            ticker.tick().await;

            self.poll()?;
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.ticker = None;
        self.pending.clear();
        debug!(tracked = self.known.len(), "procfs source stopped");
        Ok(())
    }
}

/// List the numeric entries under `root`.
fn scan_pids(root: &Path) -> Result<HashSet<u32>> {
    let entries =
        std::fs::read_dir(root).with_context(|| format!("reading {}", root.display()))?;

    let mut pids = HashSet::with_capacity(512);

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        if let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() {
            pids.insert(pid);
        }
    }

    Ok(pids)
}

/// Return `(born, gone)` pids between two scans, each sorted ascending.
pub fn diff_pids(prev: &HashSet<u32>, current: &HashSet<u32>) -> (Vec<u32>, Vec<u32>) {
    let mut born: Vec<u32> = current.difference(prev).copied().collect();
    let mut gone: Vec<u32> = prev.difference(current).copied().collect();
    born.sort_unstable();
    gone.sort_unstable();
    (born, gone)
}

/// Read the real uid and command name of `pid`.
fn read_identity(root: &Path, pid: u32) -> Result<(u32, String)> {
    let comm_path = root.join(pid.to_string()).join("comm");
    let comm = std::fs::read_to_string(&comm_path)
        .with_context(|| format!("reading {}", comm_path.display()))?;

    let status_path = root.join(pid.to_string()).join("status");
    let status = std::fs::read_to_string(&status_path)
        .with_context(|| format!("reading {}", status_path.display()))?;

    let uid = parse_status_uid(&status)
        .with_context(|| format!("no Uid line in {}", status_path.display()))?;

    Ok((uid, comm.trim_end_matches('\n').to_string()))
}

/// Extract the real uid from the `Uid:` line of `/proc/<pid>/status`.
fn parse_status_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse().ok())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn add_process(root: &Path, pid: u32, uid: u32, comm: &str) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).expect("create pid dir");
        fs::write(dir.join("comm"), format!("{comm}\n")).expect("write comm");
        fs::write(
            dir.join("status"),
            format!("Name:\t{comm}\nUmask:\t0022\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\n"),
        )
        .expect("write status");
    }

    fn remove_process(root: &Path, pid: u32) {
        fs::remove_dir_all(root.join(pid.to_string())).expect("remove pid dir");
    }

    #[test]
    fn test_diff_pids() {
        let prev: HashSet<u32> = [1, 2, 3].into_iter().collect();
        let current: HashSet<u32> = [2, 3, 5, 4].into_iter().collect();
        let (born, gone) = diff_pids(&prev, &current);
        assert_eq!(born, vec![4, 5]);
        assert_eq!(gone, vec![1]);
    }

    #[test]
    fn test_parse_status_uid() {
        let status = "Name:\tbash\nState:\tS (sleeping)\nUid:\t1000\t1001\t1002\t1003\n";
        assert_eq!(parse_status_uid(status), Some(1000));
        assert_eq!(parse_status_uid("Name:\tbash\n"), None);
        assert_eq!(parse_status_uid("Uid:\tnope\n"), None);
    }

    #[test]
    fn test_scan_ignores_non_numeric_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        add_process(dir.path(), 10, 0, "init");
        fs::create_dir(dir.path().join("self")).expect("mkdir");
        fs::write(dir.path().join("uptime"), "1.0 2.0").expect("write");

        let pids = scan_pids(dir.path()).expect("scan");
        assert_eq!(pids, [10].into_iter().collect());
    }

    #[tokio::test]
    async fn test_seeded_processes_emit_only_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        add_process(dir.path(), 1, 0, "init");
        add_process(dir.path(), 200, 1000, "bash");

        let mut source = ProcfsSource::with_root(dir.path(), Duration::from_millis(5));
        source.start().await.expect("start");
        assert_eq!(source.known_len(), 2);

        remove_process(dir.path(), 200);
        let event = source.next_event().await.expect("poll");
        assert!(matches!(event, Some(ProcessEvent::Exit(e)) if e.pid == 200));
    }

    #[tokio::test]
    async fn test_new_process_emits_fork_with_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        add_process(dir.path(), 1, 0, "init");

        let mut source = ProcfsSource::with_root(dir.path(), Duration::from_millis(5));
        source.start().await.expect("start");

        add_process(dir.path(), 300, 1000, "a-rather-long-process-name");
        let event = source.next_event().await.expect("poll");
        let Some(ProcessEvent::Fork(fork)) = event else {
            panic!("expected fork, got {event:?}");
        };
        assert_eq!(fork.pid, 300);
        assert_eq!(fork.uid, 1000);
        assert_eq!(fork.comm.as_str(), "a-rather-long-p");

        remove_process(dir.path(), 300);
        let event = source.next_event().await.expect("poll");
        let Some(ProcessEvent::Exit(exit)) = event else {
            panic!("expected exit, got {event:?}");
        };
        assert_eq!(exit.pid, 300);
        assert!(exit.timestamp_ns > fork.timestamp_ns);
    }

    #[tokio::test]
    async fn test_unreadable_process_is_retried() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut source = ProcfsSource::with_root(dir.path(), Duration::from_millis(5));
        source.start().await.expect("start");

        // Listed but without comm/status yet.
        fs::create_dir(dir.path().join("77")).expect("mkdir");
        source.poll().expect("poll");
        assert_eq!(source.known_len(), 0);
        assert!(source.pending.is_empty());

        add_process(dir.path(), 77, 5, "late");
        let event = source.next_event().await.expect("poll");
        assert!(matches!(event, Some(ProcessEvent::Fork(f)) if f.pid == 77 && f.uid == 5));
    }

    #[tokio::test]
    async fn test_start_fails_on_missing_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut source =
            ProcfsSource::with_root(dir.path().join("missing"), Duration::from_millis(5));
        let err = source.start().await.unwrap_err();
        assert!(format!("{err:#}").contains("seeding pids"));
    }

    #[tokio::test]
    async fn test_stopped_source_is_exhausted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut source = ProcfsSource::with_root(dir.path(), Duration::from_millis(5));
        source.start().await.expect("start");
        source.stop().await.expect("stop");
        assert_eq!(source.next_event().await.expect("next"), None);
    }
}
