pub mod event;
pub mod parse;
pub mod procfs;
pub mod replay;
pub mod stats;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

use crate::clock::{Clock, MonotonicClock};

use self::event::ProcessEvent;
use self::procfs::ProcfsSource;
use self::replay::ReplaySource;

/// Delivers process lifecycle events to the aggregator.
///
/// Sources must deliver events for a given pid in order, with at most one
/// fork and one exit per pid lifetime. Timestamps must come from a single
/// monotonic clock.
pub trait EventSource: Send {
    /// Returns the source's name for logging.
    fn name(&self) -> &str;

    /// Subscribe to the underlying event feed.
    fn start(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Wait for the next event. `Ok(None)` means the source is exhausted.
    fn next_event(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Option<ProcessEvent>>> + Send;

    /// Unsubscribe from the event feed.
    fn stop(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Source dispatches to one of the concrete event sources.
pub enum Source {
    Procfs(ProcfsSource),
    Replay(ReplaySource),
    Channel(ChannelSource),
}

impl EventSource for Source {
    fn name(&self) -> &str {
        match self {
            Self::Procfs(s) => s.name(),
            Self::Replay(s) => s.name(),
            Self::Channel(s) => s.name(),
        }
    }

    async fn start(&mut self) -> Result<()> {
        match self {
            Self::Procfs(s) => s.start().await,
            Self::Replay(s) => s.start().await,
            Self::Channel(s) => s.start().await,
        }
    }

    async fn next_event(&mut self) -> Result<Option<ProcessEvent>> {
        match self {
            Self::Procfs(s) => s.next_event().await,
            Self::Replay(s) => s.next_event().await,
            Self::Channel(s) => s.next_event().await,
        }
    }

    async fn stop(&mut self) -> Result<()> {
        match self {
            Self::Procfs(s) => s.stop().await,
            Self::Replay(s) => s.stop().await,
            Self::Channel(s) => s.stop().await,
        }
    }
}

/// Create an in-process event channel stamped by a fresh monotonic clock.
pub fn channel(capacity: usize) -> (EventSender, ChannelSource) {
    channel_with_clock(capacity, Arc::new(MonotonicClock::new()))
}

/// Create an in-process event channel stamped by `clock`.
pub fn channel_with_clock(
    capacity: usize,
    clock: Arc<dyn Clock>,
) -> (EventSender, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx, clock }, ChannelSource { rx })
}

/// Producer half of an in-process event channel.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ProcessEvent>,
    clock: Arc<dyn Clock>,
}

impl EventSender {
    /// Send a pre-built event.
    pub async fn send(&self, event: ProcessEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow!("event channel closed"))
    }

    /// Send a fork event stamped with the sender's clock.
    pub async fn fork(&self, pid: u32, uid: u32, comm: &str) -> Result<()> {
        self.send(ProcessEvent::fork(self.clock.now_ns(), pid, uid, comm))
            .await
    }

    /// Send an exit event stamped with the sender's clock.
    pub async fn exit(&self, pid: u32) -> Result<()> {
        self.send(ProcessEvent::exit(self.clock.now_ns(), pid)).await
    }
}

/// Consumer half of an in-process event channel.
/// Exhausted once every [`EventSender`] is dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<ProcessEvent>,
}

impl EventSource for ChannelSource {
    fn name(&self) -> &str {
        "channel"
    }

    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ProcessEvent>> {
        Ok(self.rx.recv().await)
    }

    async fn stop(&mut self) -> Result<()> {
        self.rx.close();
        Ok(())
    }
}
