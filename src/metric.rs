use crate::source::NodeId;

pub const NODE_STATS: &str = "node_stats";
pub const THROUGHPUT: &str = "throughput";
pub const LATENCY: &str = "latency";
pub const NAMESPACE_STATS: &str = "namespace_stats";
pub const SUMMARY: &str = "summary";

/// Units attached to emitted metrics.
pub mod unit {
    pub const NONE: &str = "";
    pub const BYTES: &str = "bytes";
    pub const OPS_PER_SEC: &str = "ops/sec";
    pub const PERCENT: &str = "percent";
    pub const NODES: &str = "nodes";
}

/// Throughput direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Reads,
    Writes,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reads => "reads",
            Self::Writes => "writes",
        }
    }
}

/// Throughput sub-counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpsKind {
    Success,
    Total,
}

impl TpsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Total => "total",
        }
    }
}

/// Latency bucket figure: the reading itself or its percentile companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyField {
    Value,
    Pct,
}

impl LatencyField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Pct => "pct",
        }
    }
}

/// Builds metric paths under a fixed base name.
#[derive(Debug, Clone)]
pub struct MetricPaths {
    base: String,
}

impl MetricPaths {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn join(&self, segments: &[&str]) -> String {
        let len = self.base.len() + segments.iter().map(|s| s.len() + 1).sum::<usize>();
        let mut path = String::with_capacity(len);
        path.push_str(&self.base);
        for segment in segments {
            path.push('/');
            path.push_str(segment);
        }
        path
    }

    /// `<base>/node_stats/<node>/<stat>`
    pub fn node_stat(&self, node: &NodeId, stat: &str) -> String {
        self.join(&[NODE_STATS, node.as_str(), stat])
    }

    /// `<base>/throughput/<node>/<reads|writes>/<success|total>`
    pub fn throughput(&self, node: &NodeId, direction: Direction, kind: TpsKind) -> String {
        self.join(&[THROUGHPUT, node.as_str(), direction.as_str(), kind.as_str()])
    }

    /// `<base>/latency/<node>/<category>/<bucket>/<value|pct>`
    pub fn node_latency(
        &self,
        node: &NodeId,
        category: &str,
        bucket: &str,
        field: LatencyField,
    ) -> String {
        self.join(&[LATENCY, node.as_str(), category, bucket, field.as_str()])
    }

    /// `<base>/namespace_stats/<node>/<namespace>/<stat>`
    pub fn namespace_stat(&self, node: &NodeId, namespace: &str, stat: &str) -> String {
        self.join(&[NAMESPACE_STATS, node.as_str(), namespace, stat])
    }

    /// `<base>/summary/<name>`
    pub fn summary(&self, name: &str) -> String {
        self.join(&[SUMMARY, name])
    }

    /// `<base>/summary/<reads|writes>/<success|total>`
    pub fn summary_throughput(&self, direction: Direction, kind: TpsKind) -> String {
        self.join(&[SUMMARY, direction.as_str(), kind.as_str()])
    }

    /// `<base>/summary/latency/<category>/<bucket>/value`
    pub fn summary_latency(&self, category: &str, bucket: &str) -> String {
        self.join(&[
            SUMMARY,
            LATENCY,
            category,
            bucket,
            LatencyField::Value.as_str(),
        ])
    }
}
