pub mod latency;
pub mod summary;
pub mod throughput;

pub use latency::{emission_value, CategoryTotals, ClusterLatency, LatencyAggregator};
pub use summary::{ClusterSummary, SummaryComputer};
pub use throughput::{NodeThroughput, ThroughputAccumulator, ThroughputTotals, TpsCounter};

/// Latency buckets seeded into every category when none are configured.
pub const DEFAULT_LATENCY_BUCKETS: [&str; 3] = [">1ms", ">8ms", ">64ms"];

/// Joins a namespace prefix to a latency category (`ns1-query`).
pub const NAMESPACE_DELIMITER: char = '-';

/// Categories containing this token are averaged over the node count.
pub const QUERY_TOKEN: &str = "query";

/// Node statistic carrying the cluster size.
pub const CLUSTER_SIZE_STAT: &str = "cluster_size";
