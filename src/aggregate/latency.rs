use std::collections::BTreeMap;

use super::{NAMESPACE_DELIMITER, QUERY_TOKEN};
use crate::source::{LatencySample, NodeId};

/// `category -> bucket -> running sum`.
pub type CategoryTotals = BTreeMap<String, BTreeMap<String, f64>>;

/// Read-only view of both aggregated latency maps.
#[derive(Debug, Clone, Copy)]
pub struct ClusterLatency<'a> {
    /// Roll-up per statistic category, namespace prefix stripped.
    pub overall: &'a CategoryTotals,
    /// Per full `namespace-category`, only from capable nodes.
    pub namespace_scoped: &'a CategoryTotals,
}

/// Accumulates latency bucket values across nodes for one cycle.
///
/// Nodes with the capability flag report categories as `namespace-category`.
/// Those are added twice: once under the full name in the namespace-scoped
/// map and once under the bare category in the overall map. Everything else
/// goes to the overall map unchanged.
///
/// Namespace names are assumed not to contain the delimiter; a name like
/// `my-ns-query` splits at the first `-` into `my` and `ns-query`.
#[derive(Debug)]
pub struct LatencyAggregator {
    buckets: Vec<String>,
    overall: CategoryTotals,
    namespace_scoped: CategoryTotals,
}

impl LatencyAggregator {
    pub fn new(buckets: Vec<String>) -> Self {
        Self {
            buckets,
            overall: CategoryTotals::new(),
            namespace_scoped: CategoryTotals::new(),
        }
    }

    pub fn reset(&mut self) {
        self.overall.clear();
        self.namespace_scoped.clear();
    }

    /// Adds one node's samples. Percentile companions are ignored here.
    pub fn absorb(&mut self, node: &NodeId, capable: bool, samples: &[LatencySample]) {
        for sample in samples {
            let value = sample.reading.value;
            if !value.is_finite() {
                tracing::debug!(
                    node = %node,
                    category = %sample.category,
                    bucket = %sample.bucket,
                    "skipping non-finite latency value",
                );
                continue;
            }

            match split_namespace(&sample.category).filter(|_| capable) {
                Some((_, subcategory)) => {
                    accumulate(
                        &mut self.namespace_scoped,
                        &self.buckets,
                        &sample.category,
                        &sample.bucket,
                        value,
                    );
                    accumulate(
                        &mut self.overall,
                        &self.buckets,
                        subcategory,
                        &sample.bucket,
                        value,
                    );
                }
                None => accumulate(
                    &mut self.overall,
                    &self.buckets,
                    &sample.category,
                    &sample.bucket,
                    value,
                ),
            }
        }
    }

    pub fn cluster_wide_totals(&self) -> ClusterLatency<'_> {
        ClusterLatency {
            overall: &self.overall,
            namespace_scoped: &self.namespace_scoped,
        }
    }
}

/// Splits `namespace-category` at the first delimiter. Both halves must be
/// non-empty for the split to count.
pub fn split_namespace(category: &str) -> Option<(&str, &str)> {
    category
        .split_once(NAMESPACE_DELIMITER)
        .filter(|(ns, sub)| !ns.is_empty() && !sub.is_empty())
}

/// Value to emit for an aggregated bucket.
///
/// Query categories are averaged over the node count; with no nodes the
/// value is suppressed rather than divided.
pub fn emission_value(category: &str, sum: f64, node_count: usize) -> Option<f64> {
    if !category.contains(QUERY_TOKEN) {
        return Some(sum);
    }
    if node_count == 0 {
        return None;
    }
    Some(sum / node_count as f64)
}

fn accumulate(
    totals: &mut CategoryTotals,
    buckets: &[String],
    category: &str,
    bucket: &str,
    value: f64,
) {
    if let Some(per_bucket) = totals.get_mut(category) {
        match per_bucket.get_mut(bucket) {
            Some(sum) => *sum += value,
            None => {
                per_bucket.insert(bucket.to_string(), value);
            }
        }
        return;
    }

    // First sighting of the category: seed every configured bucket.
    let mut per_bucket: BTreeMap<String, f64> =
        buckets.iter().map(|b| (b.clone(), 0.0)).collect();
    *per_bucket.entry(bucket.to_string()).or_insert(0.0) += value;
    totals.insert(category.to_string(), per_bucket);
}
