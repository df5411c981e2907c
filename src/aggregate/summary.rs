use super::CLUSTER_SIZE_STAT;
use crate::source::{NodeId, ResourceRecord, StatMap};

/// Cluster-level figures derived at the end of a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClusterSummary {
    /// `None` when the representative node or its statistic is missing.
    pub cluster_size: Option<f64>,
    pub used_bytes_memory: f64,
    pub used_bytes_disk: f64,
}

/// Collects per-node resource figures and derives the cluster summary.
#[derive(Debug, Default)]
pub struct SummaryComputer {
    used_bytes_memory: f64,
    used_bytes_disk: f64,
    reporting_nodes: usize,
}

impl SummaryComputer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Adds a capable node's used-bytes figures; absent values count as zero.
    pub fn record(&mut self, node: &NodeId, resources: &ResourceRecord) {
        tracing::trace!(
            node = %node,
            memory = ?resources.used_bytes_memory,
            disk = ?resources.used_bytes_disk,
            "recording node resources",
        );
        self.used_bytes_memory += resources.used_bytes_memory.unwrap_or(0.0);
        self.used_bytes_disk += resources.used_bytes_disk.unwrap_or(0.0);
        self.reporting_nodes += 1;
    }

    /// Number of nodes recorded this cycle.
    pub fn reporting_nodes(&self) -> usize {
        self.reporting_nodes
    }

    /// Builds the summary from the representative (first listed) node's
    /// statistics and the recorded totals.
    pub fn compute(&self, representative: Option<&StatMap>) -> ClusterSummary {
        ClusterSummary {
            cluster_size: representative.and_then(|stats| stats.get(CLUSTER_SIZE_STAT)),
            used_bytes_memory: self.used_bytes_memory,
            used_bytes_disk: self.used_bytes_disk,
        }
    }
}
