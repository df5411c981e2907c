use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::parse::BuildVersion;
use super::record::{LatencyRecord, StatMap, ThroughputRecord, TpsPair};
use super::{NodeId, NodeStatsSource, SourceError};
use crate::config::SourceConfig;

/// Callback type for recording source request metrics.
/// Receives (endpoint_name, status, duration).
pub type MetricsCallback = Box<dyn Fn(&str, &str, Duration) + Send + Sync>;

/// Statistics gateway client speaking HTTP/JSON.
pub struct HttpStatsSource {
    http: reqwest::Client,
    base: Url,
    user: Option<(String, String)>,
    min_version: BuildVersion,
    metrics: Option<MetricsCallback>,
}

impl HttpStatsSource {
    pub fn new(cfg: &SourceConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        let base = Url::parse(&cfg.endpoint)
            .with_context(|| format!("parsing source endpoint {:?}", cfg.endpoint))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("source endpoint {:?} cannot be a base URL", cfg.endpoint);
        }

        let min_version = BuildVersion::parse(&cfg.new_format_min_version)
            .context("parsing source.new_format_min_version")?;

        let user = if cfg.user.is_empty() {
            None
        } else {
            Some((cfg.user.clone(), cfg.password.clone()))
        };

        Ok(Self {
            http,
            base,
            user,
            min_version,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, cb: MetricsCallback) -> Self {
        self.metrics = Some(cb);
        self
    }

    fn record_request(&self, endpoint: &str, status: &str, duration: Duration) {
        if let Some(ref cb) = self.metrics {
            cb(endpoint, status, duration);
        }
    }

    /// Builds a URL under the base from path segments, percent-encoding each.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// GET a JSON document. `endpoint` is the short label used in metrics.
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        segments: &[&str],
    ) -> Result<T, SourceError> {
        let start = Instant::now();
        let url = self.url(segments);
        let path = url.path().to_string();

        let mut request = self.http.get(url.clone()).header("Accept", "application/json");
        if let Some((user, password)) = &self.user {
            request = request.basic_auth(user, Some(password));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                self.record_request(endpoint, "error", start.elapsed());
                return Err(SourceError::connection(url.to_string(), e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            self.record_request(endpoint, "error", start.elapsed());
            return Err(SourceError::Status {
                path,
                status: status.as_u16(),
                body,
            });
        }

        let result = response.json::<T>().await.map_err(|e| {
            self.record_request(endpoint, "error", start.elapsed());
            SourceError::Decode {
                path: path.clone(),
                source: Box::new(e),
            }
        })?;

        self.record_request(endpoint, "success", start.elapsed());

        Ok(result)
    }

    async fn get_stats(
        &self,
        endpoint: &'static str,
        segments: &[&str],
    ) -> Result<StatMap, SourceError> {
        let value: serde_json::Value = self.get_json(endpoint, segments).await?;
        if !value.is_object() {
            return Err(SourceError::Protocol {
                path: self.url(segments).path().to_string(),
                detail: "expected a JSON object of statistics".to_string(),
            });
        }
        Ok(StatMap::from_json(&value))
    }
}

// --- JSON response structures ---

#[derive(Deserialize)]
struct NodesResponse {
    nodes: Vec<String>,
}

#[derive(Deserialize)]
struct NamespacesResponse {
    namespaces: Vec<String>,
}

#[derive(Deserialize)]
struct BuildResponse {
    build: String,
}

#[derive(Deserialize)]
struct ThroughputResponse {
    #[serde(default)]
    reads: Option<serde_json::Value>,
    #[serde(default)]
    writes: Option<serde_json::Value>,
}

impl NodeStatsSource for HttpStatsSource {
    async fn list_nodes(&self) -> Result<Vec<NodeId>, SourceError> {
        debug!("listing cluster nodes");
        let resp: NodesResponse = self.get_json("nodes", &["v1", "nodes"]).await?;
        Ok(resp.nodes.into_iter().map(NodeId::new).collect())
    }

    async fn node_statistics(&self, node: &NodeId) -> Result<StatMap, SourceError> {
        self.get_stats("node_statistics", &["v1", "nodes", node.as_str(), "statistics"])
            .await
    }

    async fn node_capability(&self, node: &NodeId) -> Result<bool, SourceError> {
        let resp: BuildResponse = self
            .get_json("node_build", &["v1", "nodes", node.as_str(), "build"])
            .await?;

        match BuildVersion::parse(&resp.build) {
            Ok(version) => Ok(version.at_least(&self.min_version)),
            Err(e) => {
                warn!(node = %node, error = %e, "unparseable build version, assuming legacy format");
                Ok(false)
            }
        }
    }

    async fn node_memory_stats(&self, node: &NodeId) -> Result<StatMap, SourceError> {
        self.get_stats("node_memory", &["v1", "nodes", node.as_str(), "memory"])
            .await
    }

    async fn node_disk_stats(&self, node: &NodeId) -> Result<StatMap, SourceError> {
        self.get_stats("node_disk", &["v1", "nodes", node.as_str(), "disk"])
            .await
    }

    async fn node_throughput(&self, node: &NodeId) -> Result<ThroughputRecord, SourceError> {
        let resp: ThroughputResponse = self
            .get_json("node_throughput", &["v1", "nodes", node.as_str(), "throughput"])
            .await?;

        Ok(ThroughputRecord {
            reads: resp.reads.as_ref().and_then(TpsPair::from_json),
            writes: resp.writes.as_ref().and_then(TpsPair::from_json),
        })
    }

    async fn node_latency(&self, node: &NodeId) -> Result<LatencyRecord, SourceError> {
        let value: serde_json::Value = self
            .get_json("node_latency", &["v1", "nodes", node.as_str(), "latency"])
            .await?;
        Ok(LatencyRecord::from_json(&value))
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, SourceError> {
        let resp: NamespacesResponse = self.get_json("namespaces", &["v1", "namespaces"]).await?;
        Ok(resp.namespaces)
    }

    async fn namespace_statistics(
        &self,
        namespace: &str,
        node: &NodeId,
    ) -> Result<StatMap, SourceError> {
        self.get_stats(
            "namespace_statistics",
            &["v1", "namespaces", namespace, "nodes", node.as_str(), "statistics"],
        )
        .await
    }
}
