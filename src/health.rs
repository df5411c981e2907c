use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::poller::CycleOutcome;

const NAMESPACE: &str = "aerostat";

/// Prometheus metrics describing the agent itself.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,

    /// Poll cycles by outcome (completed/empty/aborted).
    pub cycles_total: CounterVec,
    /// Poll cycle wall time.
    pub cycle_duration: Histogram,
    /// Nodes polled in the last completed cycle.
    pub nodes_polled: Gauge,
    /// Namespaces polled in the last completed cycle.
    pub namespaces_polled: Gauge,
    /// Nodes reporting used-bytes figures in the last completed cycle.
    pub resource_nodes: Gauge,
    /// Cluster size reported by the representative node.
    pub cluster_size: Gauge,
    /// Unix time of the last completed cycle.
    pub last_cycle_timestamp: Gauge,
    /// Metrics handed to the emitter.
    pub metrics_emitted: Counter,
    /// Metrics the emitter could not queue.
    pub metrics_dropped: Counter,
    /// Source failures by kind.
    pub source_errors: CounterVec,
    /// Source requests by endpoint and status.
    pub source_requests_total: CounterVec,
    /// Source request duration by endpoint.
    pub source_request_duration: HistogramVec,
}

impl HealthMetrics {
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let cycles_total = CounterVec::new(
            Opts::new("cycles_total", "Total poll cycles by outcome.").namespace(NAMESPACE),
            &["outcome"],
        )?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new("cycle_duration_seconds", "Time to run one poll cycle.")
                .namespace(NAMESPACE)
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        )?;
        let nodes_polled = Gauge::with_opts(
            Opts::new("nodes_polled", "Nodes polled in the last completed cycle.")
                .namespace(NAMESPACE),
        )?;
        let namespaces_polled = Gauge::with_opts(
            Opts::new(
                "namespaces_polled",
                "Namespaces polled in the last completed cycle.",
            )
            .namespace(NAMESPACE),
        )?;
        let resource_nodes = Gauge::with_opts(
            Opts::new(
                "resource_nodes",
                "Nodes reporting used-bytes figures in the last completed cycle.",
            )
            .namespace(NAMESPACE),
        )?;
        let cluster_size = Gauge::with_opts(
            Opts::new(
                "cluster_size",
                "Cluster size reported by the representative node.",
            )
            .namespace(NAMESPACE),
        )?;
        let last_cycle_timestamp = Gauge::with_opts(
            Opts::new(
                "last_cycle_timestamp_seconds",
                "Unix time of the last completed poll cycle.",
            )
            .namespace(NAMESPACE),
        )?;
        let metrics_emitted = Counter::with_opts(
            Opts::new("metrics_emitted_total", "Total metrics handed to the emitter.")
                .namespace(NAMESPACE),
        )?;
        let metrics_dropped = Counter::with_opts(
            Opts::new(
                "metrics_dropped_total",
                "Total metrics dropped because the emit queue was unavailable.",
            )
            .namespace(NAMESPACE),
        )?;
        let source_errors = CounterVec::new(
            Opts::new("source_errors_total", "Total statistics source failures by kind.")
                .namespace(NAMESPACE),
            &["kind"],
        )?;
        let source_requests_total = CounterVec::new(
            Opts::new(
                "source_requests_total",
                "Total statistics source requests by endpoint and status.",
            )
            .namespace(NAMESPACE),
            &["endpoint", "status"],
        )?;
        let source_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "source_request_duration_seconds",
                "Statistics source request duration by endpoint.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["endpoint"],
        )?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;
        registry.register(Box::new(nodes_polled.clone()))?;
        registry.register(Box::new(namespaces_polled.clone()))?;
        registry.register(Box::new(resource_nodes.clone()))?;
        registry.register(Box::new(cluster_size.clone()))?;
        registry.register(Box::new(last_cycle_timestamp.clone()))?;
        registry.register(Box::new(metrics_emitted.clone()))?;
        registry.register(Box::new(metrics_dropped.clone()))?;
        registry.register(Box::new(source_errors.clone()))?;
        registry.register(Box::new(source_requests_total.clone()))?;
        registry.register(Box::new(source_request_duration.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            local_addr: parking_lot::Mutex::new(None),
            cycles_total,
            cycle_duration,
            nodes_polled,
            namespaces_polled,
            resource_nodes,
            cluster_size,
            last_cycle_timestamp,
            metrics_emitted,
            metrics_dropped,
            source_errors,
            source_requests_total,
            source_request_duration,
        })
    }

    /// Updates cycle metrics from an outcome.
    pub fn record_cycle(&self, outcome: &CycleOutcome) {
        self.cycles_total
            .with_label_values(&[outcome.label()])
            .inc();

        match outcome {
            CycleOutcome::Completed(report) => {
                self.cycle_duration.observe(report.duration.as_secs_f64());
                self.nodes_polled.set(report.nodes as f64);
                self.namespaces_polled.set(report.namespaces as f64);
                self.resource_nodes.set(report.resource_nodes as f64);
                if let Some(size) = report.summary.cluster_size {
                    self.cluster_size.set(size);
                }
                self.metrics_emitted.inc_by(report.metrics_emitted as f64);
                self.last_cycle_timestamp
                    .set(chrono::Utc::now().timestamp_millis() as f64 / 1000.0);
            }
            CycleOutcome::EmptyCluster => {
                self.nodes_polled.set(0.0);
            }
            CycleOutcome::Aborted {
                error,
                metrics_emitted,
                ..
            } => {
                self.source_errors.with_label_values(&[error.kind()]).inc();
                self.metrics_emitted.inc_by(*metrics_emitted as f64);
            }
        }
    }

    /// Renders the registry in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        encode_registry(&self.registry)
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Handle ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;
        *self.local_addr.lock() = Some(local_addr);

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

struct AppState {
    registry: Registry,
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::aggregate::{ClusterSummary, ThroughputTotals};
    use crate::poller::CycleReport;
    use crate::source::SourceError;

    fn completed(nodes: usize, emitted: usize) -> CycleOutcome {
        CycleOutcome::Completed(CycleReport {
            nodes,
            namespaces: 2,
            resource_nodes: 1,
            metrics_emitted: emitted,
            totals: ThroughputTotals::default(),
            summary: ClusterSummary {
                cluster_size: Some(nodes as f64),
                used_bytes_memory: 0.0,
                used_bytes_disk: 0.0,
            },
            duration: Duration::from_millis(120),
        })
    }

    #[test]
    fn test_record_cycle_outcomes() {
        let health = HealthMetrics::new(":0").expect("create metrics");

        health.record_cycle(&completed(3, 40));
        health.record_cycle(&CycleOutcome::EmptyCluster);
        health.record_cycle(&CycleOutcome::Aborted {
            error: SourceError::connection("gw", "refused"),
            node: None,
            metrics_emitted: 5,
        });

        let get = |label: &str| health.cycles_total.with_label_values(&[label]).get();
        assert_eq!(get("completed"), 1.0);
        assert_eq!(get("empty"), 1.0);
        assert_eq!(get("aborted"), 1.0);
        assert_eq!(health.metrics_emitted.get(), 45.0);
        assert_eq!(health.cluster_size.get(), 3.0);
        assert_eq!(health.resource_nodes.get(), 1.0);
        assert_eq!(
            health
                .source_errors
                .with_label_values(&["connection"])
                .get(),
            1.0
        );
        assert_eq!(health.nodes_polled.get(), 0.0);
    }

    #[test]
    fn test_render_contains_namespace() {
        let health = HealthMetrics::new(":0").expect("create metrics");
        health.record_cycle(&completed(2, 1));

        let text = health.render().expect("render");
        assert!(text.contains("aerostat_cycles_total"));
        assert!(text.contains("aerostat_nodes_polled 2"));
    }

    #[tokio::test]
    async fn test_server_serves_healthz_and_metrics() {
        let health = HealthMetrics::new("127.0.0.1:0").expect("create metrics");
        health.start().await.expect("start server");
        let addr = health.local_addr().expect("bound address");

        for (path, needle) in [("/healthz", "ok"), ("/metrics", "aerostat_metrics_emitted_total")] {
            let mut stream = tokio::net::TcpStream::connect(addr)
                .await
                .expect("connect");
            let request =
                format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
            stream
                .write_all(request.as_bytes())
                .await
                .expect("write request");

            let mut response = String::new();
            stream
                .read_to_string(&mut response)
                .await
                .expect("read response");
            assert!(response.starts_with("HTTP/1.1 200"), "{response}");
            assert!(response.contains(needle), "{response}");
        }

        health.stop().await.expect("stop server");
    }
}
