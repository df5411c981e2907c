use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::aggregate::{
    emission_value, CategoryTotals, ClusterSummary, LatencyAggregator, SummaryComputer,
    ThroughputAccumulator, ThroughputTotals, TpsCounter,
};
use crate::emit::MetricEmitter;
use crate::metric::{unit, Direction, LatencyField, MetricPaths, TpsKind};
use crate::source::{NodeId, NodeStatsSource, ResourceRecord, SourceError, StatMap};

/// Where the poller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Collecting,
}

/// State carried from one cycle to the next.
#[derive(Debug, Default)]
pub struct CycleContext {
    /// Throughput totals of the last completed cycle.
    pub previous_totals: Option<ThroughputTotals>,
    /// Node statistics from the last completed cycle.
    pub node_stats: BTreeMap<NodeId, StatMap>,
    pub cycles_completed: u64,
    pub last_completed: Option<DateTime<Utc>>,
}

/// Summary of a completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub nodes: usize,
    pub namespaces: usize,
    /// Nodes that reported used-bytes figures.
    pub resource_nodes: usize,
    pub metrics_emitted: usize,
    pub totals: ThroughputTotals,
    pub summary: ClusterSummary,
    pub duration: Duration,
}

/// Result of `Poller::run_cycle`. A cycle never fails the caller.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The source listed no nodes; nothing was emitted.
    EmptyCluster,
    /// The source failed partway. Metrics emitted before the failure stay
    /// emitted.
    Aborted {
        error: SourceError,
        node: Option<NodeId>,
        metrics_emitted: usize,
    },
}

impl CycleOutcome {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::EmptyCluster => "empty",
            Self::Aborted { .. } => "aborted",
        }
    }
}

/// Failure inside `collect`, tagged with the node being polled.
struct Abort {
    error: SourceError,
    node: Option<NodeId>,
}

impl From<SourceError> for Abort {
    fn from(error: SourceError) -> Self {
        Self { error, node: None }
    }
}

/// Counts emitted metrics and drops non-finite values.
struct Tally<'a, E> {
    emitter: &'a E,
    emitted: &'a mut usize,
}

impl<E: MetricEmitter> Tally<'_, E> {
    fn emit(&mut self, path: &str, unit: &str, value: f64) {
        if !value.is_finite() {
            debug!(metric = path, value, "skipping non-finite metric");
            return;
        }
        self.emitter.emit(path, unit, value);
        *self.emitted += 1;
    }
}

/// Runs polling cycles against a source and hands metrics to an emitter.
///
/// `run_cycle` takes `&mut self`, so cycles are serialized by construction.
pub struct Poller<S, E> {
    source: S,
    emitter: E,
    paths: MetricPaths,
    throughput: ThroughputAccumulator,
    latency: LatencyAggregator,
    summary: SummaryComputer,
    context: CycleContext,
    state: CycleState,
    emitted: usize,
}

impl<S: NodeStatsSource, E: MetricEmitter> Poller<S, E> {
    pub fn new(source: S, emitter: E, paths: MetricPaths, buckets: Vec<String>) -> Self {
        Self {
            source,
            emitter,
            paths,
            throughput: ThroughputAccumulator::new(),
            latency: LatencyAggregator::new(buckets),
            summary: SummaryComputer::new(),
            context: CycleContext::default(),
            state: CycleState::Idle,
            emitted: 0,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn context(&self) -> &CycleContext {
        &self.context
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn emitter(&self) -> &E {
        &self.emitter
    }

    pub fn emitter_mut(&mut self) -> &mut E {
        &mut self.emitter
    }

    /// Runs one complete cycle. Source failures end the cycle early and are
    /// reported in the outcome.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let start = Instant::now();
        self.state = CycleState::Collecting;
        self.reset();

        let result = self.collect().await;
        self.state = CycleState::Idle;

        match result {
            Ok(Some(mut report)) => {
                report.duration = start.elapsed();
                info!(
                    nodes = report.nodes,
                    namespaces = report.namespaces,
                    metrics = report.metrics_emitted,
                    duration_ms = report.duration.as_millis() as u64,
                    "poll cycle completed",
                );
                CycleOutcome::Completed(report)
            }
            Ok(None) => {
                info!("cluster reports no nodes, server may be starting");
                CycleOutcome::EmptyCluster
            }
            Err(Abort { error, node }) => {
                error!(
                    error = %error,
                    kind = error.kind(),
                    node = node.as_ref().map(NodeId::as_str).unwrap_or("-"),
                    metrics_emitted = self.emitted,
                    "poll cycle aborted",
                );
                CycleOutcome::Aborted {
                    error,
                    node,
                    metrics_emitted: self.emitted,
                }
            }
        }
    }

    fn reset(&mut self) {
        self.throughput.reset();
        self.latency.reset();
        self.summary.reset();
        self.emitted = 0;
    }

    /// Returns `None` for an empty cluster. The report's duration is filled
    /// in by the caller.
    async fn collect(&mut self) -> Result<Option<CycleReport>, Abort> {
        let nodes = self.source.list_nodes().await?;
        if nodes.is_empty() {
            return Ok(None);
        }

        let mut snapshots = BTreeMap::new();
        for node in &nodes {
            let stats = self.poll_node(node).await.map_err(|error| Abort {
                error,
                node: Some(node.clone()),
            })?;
            snapshots.insert(node.clone(), stats);
        }

        let namespaces = self.report_namespaces(&nodes).await?;

        // First node in listing order is the representative.
        let summary = self
            .summary
            .compute(nodes.first().and_then(|n| snapshots.get(n)));
        self.report_summary(&summary);
        self.report_cluster_latency(nodes.len());

        let totals = self.throughput.totals();
        self.report_total_throughput(&totals);

        self.context.previous_totals = Some(totals);
        self.context.node_stats = snapshots;
        self.context.cycles_completed += 1;
        self.context.last_completed = Some(Utc::now());

        Ok(Some(CycleReport {
            nodes: nodes.len(),
            namespaces,
            resource_nodes: self.summary.reporting_nodes(),
            metrics_emitted: self.emitted,
            totals,
            summary,
            duration: Duration::ZERO,
        }))
    }

    /// Pulls and emits everything for one node; returns its statistics.
    async fn poll_node(&mut self, node: &NodeId) -> Result<StatMap, SourceError> {
        debug!(node = %node, "polling node");

        let stats = self.source.node_statistics(node).await?;
        let capable = self.source.node_capability(node).await?;

        let resources = if capable {
            let memory = self.source.node_memory_stats(node).await?;
            let disk = self.source.node_disk_stats(node).await?;
            Some(ResourceRecord::from_stats(&memory, &disk))
        } else {
            None
        };

        let throughput = self.source.node_throughput(node).await?;
        let latency = self.source.node_latency(node).await?;

        let paths = &self.paths;
        let mut out = Tally {
            emitter: &self.emitter,
            emitted: &mut self.emitted,
        };

        if let Some(resources) = &resources {
            out.emit(
                &paths.node_stat(node, ResourceRecord::USED_BYTES_MEMORY),
                unit::BYTES,
                resources.used_bytes_memory.unwrap_or(0.0),
            );
            out.emit(
                &paths.node_stat(node, ResourceRecord::USED_BYTES_DISK),
                unit::BYTES,
                resources.used_bytes_disk.unwrap_or(0.0),
            );
            self.summary.record(node, resources);
        }

        for (name, value) in stats.iter() {
            out.emit(&paths.node_stat(node, name), unit::NONE, value);
        }

        let node_tps = self.throughput.absorb(&throughput);
        for (direction, counter) in [
            (Direction::Reads, node_tps.reads),
            (Direction::Writes, node_tps.writes),
        ] {
            if let Some(counter) = counter {
                emit_tps(&mut out, |kind| paths.throughput(node, direction, kind), &counter);
            }
        }

        for sample in &latency.samples {
            out.emit(
                &paths.node_latency(node, &sample.category, &sample.bucket, LatencyField::Value),
                unit::NONE,
                sample.reading.value,
            );
            out.emit(
                &paths.node_latency(node, &sample.category, &sample.bucket, LatencyField::Pct),
                unit::PERCENT,
                sample.reading.percentile,
            );
        }
        self.latency.absorb(node, capable, &latency.samples);

        Ok(stats)
    }

    async fn report_namespaces(&mut self, nodes: &[NodeId]) -> Result<usize, Abort> {
        let namespaces = self.source.list_namespaces().await?;

        for namespace in &namespaces {
            for node in nodes {
                let stats = self
                    .source
                    .namespace_statistics(namespace, node)
                    .await
                    .map_err(|error| Abort {
                        error,
                        node: Some(node.clone()),
                    })?;
                if stats.is_empty() {
                    continue;
                }

                let mut out = Tally {
                    emitter: &self.emitter,
                    emitted: &mut self.emitted,
                };
                for (name, value) in stats.iter() {
                    out.emit(
                        &self.paths.namespace_stat(node, namespace, name),
                        unit::NONE,
                        value,
                    );
                }
            }
        }

        Ok(namespaces.len())
    }

    fn report_summary(&mut self, summary: &ClusterSummary) {
        let mut out = Tally {
            emitter: &self.emitter,
            emitted: &mut self.emitted,
        };

        match summary.cluster_size {
            Some(size) => out.emit(&self.paths.summary("cluster_size"), unit::NODES, size),
            None => debug!("representative node has no cluster_size, skipping"),
        }
        out.emit(
            &self.paths.summary(ResourceRecord::USED_BYTES_MEMORY),
            unit::BYTES,
            summary.used_bytes_memory,
        );
        out.emit(
            &self.paths.summary(ResourceRecord::USED_BYTES_DISK),
            unit::BYTES,
            summary.used_bytes_disk,
        );
    }

    fn report_cluster_latency(&mut self, node_count: usize) {
        let totals = self.latency.cluster_wide_totals();
        let mut out = Tally {
            emitter: &self.emitter,
            emitted: &mut self.emitted,
        };

        for map in [totals.overall, totals.namespace_scoped] {
            emit_latency_map(&mut out, &self.paths, map, node_count);
        }
    }

    fn report_total_throughput(&mut self, totals: &ThroughputTotals) {
        let paths = &self.paths;
        let mut out = Tally {
            emitter: &self.emitter,
            emitted: &mut self.emitted,
        };

        emit_tps(
            &mut out,
            |kind| paths.summary_throughput(Direction::Reads, kind),
            &totals.reads,
        );
        emit_tps(
            &mut out,
            |kind| paths.summary_throughput(Direction::Writes, kind),
            &totals.writes,
        );
    }
}

fn emit_tps<E: MetricEmitter>(
    out: &mut Tally<'_, E>,
    path: impl Fn(TpsKind) -> String,
    counter: &TpsCounter,
) {
    out.emit(&path(TpsKind::Success), unit::OPS_PER_SEC, counter.success);
    out.emit(&path(TpsKind::Total), unit::OPS_PER_SEC, counter.total);
}

fn emit_latency_map<E: MetricEmitter>(
    out: &mut Tally<'_, E>,
    paths: &MetricPaths,
    map: &CategoryTotals,
    node_count: usize,
) {
    for (category, buckets) in map {
        for (bucket, sum) in buckets {
            match emission_value(category, *sum, node_count) {
                Some(value) => out.emit(&paths.summary_latency(category, bucket), unit::NONE, value),
                None => debug!(category = %category, bucket = %bucket, "no nodes, skipping averaged latency"),
            }
        }
    }
}
