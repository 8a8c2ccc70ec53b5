use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::report;
use crate::telemetry::{Aggregator, Dispatch};
use crate::tracer::event::{EventType, ProcessEvent};

const NAMESPACE: &str = "proctel";

/// `event_type` label for events with an unrecognized type byte.
const UNKNOWN_EVENT_LABEL: &str = "unknown";

/// Default listen address for the exposition server.
pub const DEFAULT_ADDR: &str = ":9090";

/// Prometheus metrics for agent health, plus the HTTP server exposing them
/// alongside the current report.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Total events received from the source.
    pub events_received: Counter,
    /// Events by event type (fork/exit/unknown).
    pub events_by_type: CounterVec,
    /// Exits without a tracked fork.
    pub untracked_exits: Counter,
    /// Exits timestamped before their fork.
    pub clock_anomalies: Counter,
    /// Lifetimes stored in a free Top-K slot.
    pub topk_admissions: Counter,
    /// Lifetimes that displaced a Top-K entry.
    pub topk_evictions: Counter,
    /// Errors returned by the event source.
    pub source_errors: Counter,
    /// Processes forked but not yet exited.
    pub tracked_processes: Gauge,
    /// Per-event dispatch duration (1us-1ms buckets).
    pub event_processing_duration: Histogram,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let events_received = Counter::with_opts(
            Opts::new(
                "events_received_total",
                "Total events received from the event source.",
            )
            .namespace(NAMESPACE),
        )?;
        let events_by_type = CounterVec::new(
            Opts::new(
                "events_by_type_total",
                "Total events received by event type.",
            )
            .namespace(NAMESPACE),
            &["event_type"],
        )?;
        let untracked_exits = Counter::with_opts(
            Opts::new(
                "untracked_exits_total",
                "Total exit events with no recorded fork.",
            )
            .namespace(NAMESPACE),
        )?;
        let clock_anomalies = Counter::with_opts(
            Opts::new(
                "clock_anomalies_total",
                "Total exit events timestamped before their fork.",
            )
            .namespace(NAMESPACE),
        )?;
        let topk_admissions = Counter::with_opts(
            Opts::new(
                "topk_admissions_total",
                "Total lifetimes stored in a free top-k slot.",
            )
            .namespace(NAMESPACE),
        )?;
        let topk_evictions = Counter::with_opts(
            Opts::new(
                "topk_evictions_total",
                "Total lifetimes that displaced a shorter top-k entry.",
            )
            .namespace(NAMESPACE),
        )?;
        let source_errors = Counter::with_opts(
            Opts::new(
                "source_errors_total",
                "Total errors returned by the event source.",
            )
            .namespace(NAMESPACE),
        )?;
        let tracked_processes = Gauge::with_opts(
            Opts::new(
                "tracked_processes",
                "Number of processes forked but not yet exited.",
            )
            .namespace(NAMESPACE),
        )?;
        let event_processing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "event_processing_duration_seconds",
                "Time to apply a single event to the aggregate state.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.000001, 0.000005, 0.00001, 0.00005, 0.0001, 0.001]),
        )?;

        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(events_by_type.clone()))?;
        registry.register(Box::new(untracked_exits.clone()))?;
        registry.register(Box::new(clock_anomalies.clone()))?;
        registry.register(Box::new(topk_admissions.clone()))?;
        registry.register(Box::new(topk_evictions.clone()))?;
        registry.register(Box::new(source_errors.clone()))?;
        registry.register(Box::new(tracked_processes.clone()))?;
        registry.register(Box::new(event_processing_duration.clone()))?;

        // Expose every event type series at zero before the first event.
        for event_type in EventType::all() {
            events_by_type.with_label_values(&[event_type.as_str()]);
        }
        events_by_type.with_label_values(&[UNKNOWN_EVENT_LABEL]);

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            events_received,
            events_by_type,
            untracked_exits,
            clock_anomalies,
            topk_admissions,
            topk_evictions,
            source_errors,
            tracked_processes,
            event_processing_duration,
        })
    }

    /// Record one handled event and its outcome.
    pub fn record_dispatch(&self, event: &ProcessEvent, outcome: &Dispatch, elapsed: Duration) {
        self.events_received.inc();

        let event_type = event
            .event_type()
            .map_or(UNKNOWN_EVENT_LABEL, |t| t.as_str());
        self.events_by_type.with_label_values(&[event_type]).inc();

        match outcome {
            Dispatch::Retained { .. } => self.topk_admissions.inc(),
            Dispatch::Evicted { .. } => self.topk_evictions.inc(),
            Dispatch::Untracked { .. } => self.untracked_exits.inc(),
            Dispatch::ClockAnomaly { .. } => self.clock_anomalies.inc(),
            Dispatch::Forked { .. } | Dispatch::Discarded { .. } | Dispatch::Unrecognized { .. } => {}
        }

        self.event_processing_duration
            .observe(elapsed.as_secs_f64());
    }

    /// Render the registry in the Prometheus text format.
    pub fn gather_text(&self) -> Result<String> {
        encode_registry(&self.registry)
    }

    /// Starts the HTTP server serving /metrics, /healthz and the report
    /// endpoints. Returns the bound address.
    pub async fn start(&self, aggregator: Arc<Aggregator>) -> Result<SocketAddr> {
        let addr = if self.addr.is_empty() {
            DEFAULT_ADDR
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
            aggregator,
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .route("/report", get(report_handler))
            .route("/report.json", get(report_json_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        if let Some(previous) = self.shutdown.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the health server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
    aggregator: Arc<Aggregator>,
}

fn encode_registry(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

/// GET /report - Plain-text report of the current snapshot.
async fn report_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    report::render_text(&state.aggregator.read())
}

/// GET /report.json - JSON snapshot.
async fn report_json_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match report::render_json(&state.aggregator.read()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "rendering json report");
            (StatusCode::INTERNAL_SERVER_ERROR, "encoding error").into_response()
        }
    }
}
