pub mod http;
pub mod parse;
pub mod record;

use std::fmt;
use std::future::Future;

use thiserror::Error;

pub use http::HttpStatsSource;
pub use parse::{BuildVersion, LatencyParseError, VersionParseError};
pub use record::{
    LatencyReading, LatencyRecord, LatencySample, ResourceRecord, StatMap, ThroughputRecord,
    TpsPair,
};

/// Stable identifier of a cluster member (host name or `host:port`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Failure talking to the statistics source. Any of these aborts the rest
/// of the current cycle.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("connecting to {target}")]
    Connection {
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("unexpected status {status} from {path}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("decoding response from {path}")]
    Decode {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("protocol error on {path}: {detail}")]
    Protocol { path: String, detail: String },
}

impl SourceError {
    pub fn connection(
        target: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Connection {
            target: target.into(),
            source: source.into(),
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Status { .. } => "status",
            Self::Decode { .. } => "decode",
            Self::Protocol { .. } => "protocol",
        }
    }
}

/// Supplies per-node statistics for one polling cycle.
///
/// All values come back already parsed into typed records; the aggregation
/// code never sees raw strings.
pub trait NodeStatsSource: Send + Sync {
    /// Cluster members in stable order. The first entry is the
    /// representative node for cluster-level figures.
    fn list_nodes(&self) -> impl Future<Output = Result<Vec<NodeId>, SourceError>> + Send;

    /// General node statistics.
    fn node_statistics(
        &self,
        node: &NodeId,
    ) -> impl Future<Output = Result<StatMap, SourceError>> + Send;

    /// Whether the node reports the newer resource accounting and
    /// per-namespace latency categories.
    fn node_capability(&self, node: &NodeId)
        -> impl Future<Output = Result<bool, SourceError>> + Send;

    /// Memory statistics, possibly containing `used_bytes_memory`.
    fn node_memory_stats(
        &self,
        node: &NodeId,
    ) -> impl Future<Output = Result<StatMap, SourceError>> + Send;

    /// Disk statistics, possibly containing `used_bytes_disk`.
    fn node_disk_stats(
        &self,
        node: &NodeId,
    ) -> impl Future<Output = Result<StatMap, SourceError>> + Send;

    fn node_throughput(
        &self,
        node: &NodeId,
    ) -> impl Future<Output = Result<ThroughputRecord, SourceError>> + Send;

    fn node_latency(
        &self,
        node: &NodeId,
    ) -> impl Future<Output = Result<LatencyRecord, SourceError>> + Send;

    fn list_namespaces(&self) -> impl Future<Output = Result<Vec<String>, SourceError>> + Send;

    fn namespace_statistics(
        &self,
        namespace: &str,
        node: &NodeId,
    ) -> impl Future<Output = Result<StatMap, SourceError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_ordering_and_display() {
        let mut ids = vec![NodeId::new("10.0.0.3:3000"), NodeId::from("10.0.0.1:3000")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "10.0.0.1:3000");
        assert_eq!(ids[1].to_string(), "10.0.0.3:3000");
    }

    #[test]
    fn test_source_error_kind() {
        let err = SourceError::connection("http://gw", "refused");
        assert_eq!(err.kind(), "connection");
        assert_eq!(err.to_string(), "connecting to http://gw");

        let err = SourceError::Status {
            path: "/v1/nodes".to_string(),
            status: 503,
            body: "busy".to_string(),
        };
        assert_eq!(err.kind(), "status");
        assert!(err.to_string().contains("503"));
    }
}
