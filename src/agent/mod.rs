use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SourceKind};
use crate::export::health::HealthMetrics;
use crate::report;
use crate::telemetry::{Aggregator, Snapshot};
use crate::tracer::procfs::ProcfsSource;
use crate::tracer::replay::ReplaySource;
use crate::tracer::stats::EventStats;
use crate::tracer::{EventSource, Source};

/// Agent orchestrates all components: event source, aggregator, reporter and
/// health server.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    aggregator: Arc<Aggregator>,
    event_stats: Arc<EventStats>,
    source: Option<Source>,
    pump: Option<JoinHandle<()>>,
    health_addr: Option<SocketAddr>,
    cancel: CancellationToken,
}

/// Build the event source named by the configuration.
fn build_source(cfg: &Config) -> Source {
    match cfg.source.kind {
        SourceKind::Procfs => Source::Procfs(ProcfsSource::new(cfg.source.poll_interval)),
        SourceKind::Replay => Source::Replay(ReplaySource::open(&cfg.source.replay_path)),
    }
}

impl Agent {
    /// Creates a new Agent with the configured event source.
    pub fn new(cfg: Config) -> Result<Self> {
        let source = build_source(&cfg);
        Self::with_source(cfg, source)
    }

    /// Creates a new Agent fed by an explicit event source.
    pub fn with_source(cfg: Config, source: Source) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);
        let aggregator = Arc::new(Aggregator::new(cfg.top_k));

        Ok(Self {
            cfg,
            health,
            aggregator,
            event_stats: Arc::new(EventStats::new()),
            source: Some(source),
            pump: None,
            health_addr: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Shared aggregation engine.
    pub fn aggregator(&self) -> Arc<Aggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Health metrics registry.
    pub fn health(&self) -> Arc<HealthMetrics> {
        Arc::clone(&self.health)
    }

    /// Address the health server is bound to, once started.
    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.health_addr
    }

    /// Start all components and begin observation.
    pub async fn start(&mut self) -> Result<()> {
        let started = Instant::now();

        // 0. Start health server first so health checks respond during startup.
        let addr = self
            .health
            .start(Arc::clone(&self.aggregator))
            .await
            .context("starting health metrics server")?;
        self.health_addr = Some(addr);

        // 1. Subscribe to the event source.
        let mut source = self
            .source
            .take()
            .context("agent already started")?;
        source
            .start()
            .await
            .with_context(|| format!("starting {} source", source.name()))?;
        info!(source = source.name(), "event source started");

        // 2. Spawn the event pump.
        let pump = run_pump(
            source,
            Arc::clone(&self.aggregator),
            Arc::clone(&self.health),
            Arc::clone(&self.event_stats),
            self.cancel.child_token(),
        );
        self.pump = Some(tokio::spawn(pump));

        // 3. Start background reporters.
        self.spawn_reporter();

        info!(
            top_k = self.cfg.top_k,
            health_addr = %addr,
            elapsed = ?started.elapsed(),
            "agent fully started",
        );

        Ok(())
    }

    /// Wait until the event source is exhausted and every event it produced
    /// has been applied.
    pub async fn wait_for_source(&mut self) -> Result<()> {
        if let Some(pump) = self.pump.take() {
            pump.await.context("joining event pump")?;
        }

        Ok(())
    }

    /// Gracefully stop all components and log the final report.
    pub async fn stop(&mut self) -> Result<()> {
        // Signal all background tasks to stop.
        self.cancel.cancel();

        // Wait for the pump so the final report includes every applied event.
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                error!(error = %e, "event pump task failed");
            }
        }

        log_report(&self.aggregator.read(), "final process telemetry");

        // Stop health metrics server.
        self.health.stop().await?;

        Ok(())
    }

    /// Spawn the periodic report and event stats logger.
    fn spawn_reporter(&self) {
        let cancel = self.cancel.clone();
        let aggregator = Arc::clone(&self.aggregator);
        let health = Arc::clone(&self.health);
        let event_stats = Arc::clone(&self.event_stats);
        let interval = self.cfg.report_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let snap = aggregator.read();
                        health.tracked_processes.set(snap.tracked as f64);
                        log_report(&snap, "process telemetry");

                        let stats = event_stats.snapshot();
                        let total = stats.total();
                        if total == 0 {
                            continue;
                        }

                        info!(
                            captured = total,
                            interval = ?interval,
                            "event stats",
                        );

                        for (event_type, count) in &stats.by_type {
                            debug!(event_type = %event_type, count, "  by type");
                        }
                        if stats.unknown > 0 {
                            debug!(count = stats.unknown, "  unknown type");
                        }
                    }
                }
            }
        });
    }
}

/// Move events from `source` into the aggregator until cancelled or the
/// source is exhausted. Source errors are counted and skipped.
async fn run_pump(
    mut source: Source,
    aggregator: Arc<Aggregator>,
    health: Arc<HealthMetrics>,
    event_stats: Arc<EventStats>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = source.next_event() => next,
        };

        match next {
            Ok(Some(event)) => {
                let started = Instant::now();
                let outcome = aggregator.handle_event(&event);
                health.record_dispatch(&event, &outcome, started.elapsed());
                event_stats.record(&event);
            }
            Ok(None) => {
                info!(source = source.name(), "event source exhausted");
                break;
            }
            Err(e) => {
                health.source_errors.inc();
                warn!(source = source.name(), error = %format_args!("{e:#}"), "event source error");
            }
        }
    }

    health
        .tracked_processes
        .set(aggregator.read().tracked as f64);

    if let Err(e) = source.stop().await {
        error!(source = source.name(), error = %e, "error stopping event source");
    }
}

/// Feed a recorded event file through a fresh aggregator and return the
/// resulting snapshot.
pub async fn replay_file(path: &Path, top_k: usize) -> Result<Snapshot> {
    let aggregator = Arc::new(Aggregator::new(top_k));
    let health = Arc::new(HealthMetrics::new("").context("creating health metrics")?);

    let mut source = Source::Replay(ReplaySource::open(path));
    source
        .start()
        .await
        .with_context(|| format!("starting replay of {}", path.display()))?;

    run_pump(
        source,
        Arc::clone(&aggregator),
        Arc::clone(&health),
        Arc::new(EventStats::new()),
        CancellationToken::new(),
    )
    .await;

    let errors = health.source_errors.get();
    if errors > 0.0 {
        warn!(errors, path = %path.display(), "replay finished with decode errors");
    }

    Ok(aggregator.read())
}

fn log_report(snap: &Snapshot, message: &str) {
    info!(
        forks = snap.fork_count,
        exits = snap.exit_count,
        untracked_exits = snap.untracked_exits,
        clock_anomalies = snap.clock_anomalies,
        unknown_events = snap.unknown_events,
        in_flight = snap.tracked,
        last_pid = ?snap.last_fork.map(|last| last.pid),
        "{message}",
    );

    debug!("\n{}", report::render_text(snap));
}
