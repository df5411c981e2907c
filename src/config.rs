use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::aggregate::DEFAULT_LATENCY_BUCKETS;
use crate::source::BuildVersion;

/// Agent name used when no cluster name is configured.
pub const DEFAULT_AGENT_NAME: &str = "Aerospike";

/// Top-level configuration for the aerostat agent.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Human-readable cluster name. Also used as the agent name.
    #[serde(default)]
    pub cluster_name: String,

    /// Root segment of every emitted metric path. Default: "aerospike".
    #[serde(default = "default_metric_base_name")]
    pub metric_base_name: String,

    /// Time between polling cycles. Default: 60s.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Statistics gateway connection.
    #[serde(default)]
    pub source: SourceConfig,

    /// Latency aggregation settings.
    #[serde(default)]
    pub latency: LatencyConfig,

    /// Metric delivery configuration.
    #[serde(default)]
    pub emitter: EmitterConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Statistics gateway connection configuration.
#[derive(Clone, Deserialize)]
pub struct SourceConfig {
    /// Gateway base URL (e.g., "http://127.0.0.1:8081").
    #[serde(default)]
    pub endpoint: String,

    /// Basic auth user. Empty disables authentication.
    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Request timeout. Default: 10s.
    #[serde(default = "default_source_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Lowest server build that reports used-bytes figures and per-namespace
    /// latency. Default: "3.9".
    #[serde(default = "default_new_format_min_version")]
    pub new_format_min_version: String,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("password", &mask_secret(&self.password))
            .field("timeout", &self.timeout)
            .field("new_format_min_version", &self.new_format_min_version)
            .finish()
    }
}

/// Latency aggregation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LatencyConfig {
    /// Bucket labels every aggregated category is seeded with.
    #[serde(default = "default_latency_buckets")]
    pub buckets: Vec<String>,
}

/// Metric delivery configuration. Metrics are logged when HTTP is disabled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmitterConfig {
    #[serde(default)]
    pub http: HttpEmitterConfig,
}

/// Payload compression for HTTP delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Gzip,
    Zstd,
    Zlib,
    Snappy,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Zlib => "zlib",
            Self::Snappy => "snappy",
        };
        f.write_str(s)
    }
}

/// HTTP NDJSON emitter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpEmitterConfig {
    /// Enable the HTTP emitter. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// HTTP endpoint to send metrics to.
    #[serde(default)]
    pub address: String,

    /// Additional HTTP headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Compression algorithm. Default: gzip.
    #[serde(default)]
    pub compression: Compression,

    /// Maximum items per batch. Default: 512.
    #[serde(default = "default_http_batch_size")]
    pub batch_size: usize,

    /// Maximum wait before sending a batch. Default: 5s.
    #[serde(default = "default_http_batch_timeout", with = "humantime_serde")]
    pub batch_timeout: Duration,

    /// Maximum duration for a single export request. Default: 30s.
    #[serde(default = "default_http_export_timeout", with = "humantime_serde")]
    pub export_timeout: Duration,

    /// Maximum items to queue (dropped if full). Default: 8192.
    #[serde(default = "default_http_max_queue_size")]
    pub max_queue_size: usize,

    /// Number of concurrent workers. Default: 1.
    #[serde(default = "default_http_workers")]
    pub workers: usize,

    /// Enable HTTP keep-alive connections. Default: true.
    #[serde(default = "default_true")]
    pub keep_alive: bool,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metric_base_name() -> String {
    "aerospike".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_source_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_new_format_min_version() -> String {
    "3.9".to_string()
}

fn default_latency_buckets() -> Vec<String> {
    DEFAULT_LATENCY_BUCKETS
        .iter()
        .map(|b| (*b).to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_http_batch_size() -> usize {
    512
}

fn default_http_batch_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_http_export_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_http_max_queue_size() -> usize {
    8192
}

fn default_http_workers() -> usize {
    1
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait implementations ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            cluster_name: String::new(),
            metric_base_name: default_metric_base_name(),
            poll_interval: default_poll_interval(),
            source: SourceConfig::default(),
            latency: LatencyConfig::default(),
            emitter: EmitterConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            user: String::new(),
            password: String::new(),
            timeout: default_source_timeout(),
            new_format_min_version: default_new_format_min_version(),
        }
    }
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            buckets: default_latency_buckets(),
        }
    }
}

impl Default for HttpEmitterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: String::new(),
            headers: HashMap::new(),
            compression: Compression::default(),
            batch_size: default_http_batch_size(),
            batch_timeout: default_http_batch_timeout(),
            export_timeout: default_http_export_timeout(),
            max_queue_size: default_http_max_queue_size(),
            workers: default_http_workers(),
            keep_alive: true,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.source.endpoint.is_empty() {
            bail!("source.endpoint is required");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be positive");
        }

        if self.metric_base_name.is_empty() {
            bail!("metric_base_name is required");
        }
        if self.metric_base_name.contains('/') {
            bail!("metric_base_name must not contain '/'");
        }

        BuildVersion::parse(&self.source.new_format_min_version)
            .context("source.new_format_min_version")?;

        if self.latency.buckets.is_empty() {
            bail!("latency.buckets must not be empty");
        }
        let mut seen = HashSet::with_capacity(self.latency.buckets.len());
        for bucket in &self.latency.buckets {
            if bucket.is_empty() {
                bail!("latency.buckets must not contain empty labels");
            }
            if !seen.insert(bucket.as_str()) {
                bail!("latency.buckets contains duplicate label {bucket:?}");
            }
        }

        let http = &self.emitter.http;
        if http.enabled {
            if http.address.is_empty() {
                bail!("emitter.http.address is required when enabled");
            }
            if http.batch_size == 0 {
                bail!("emitter.http.batch_size must be positive");
            }
            if http.max_queue_size == 0 {
                bail!("emitter.http.max_queue_size must be positive");
            }
            if http.workers == 0 {
                bail!("emitter.http.workers must be positive");
            }
            if http.batch_timeout.is_zero() {
                bail!("emitter.http.batch_timeout must be positive");
            }
        }

        Ok(())
    }

    /// Name this agent reports as: the cluster name, or a fixed fallback.
    pub fn agent_name(&self) -> &str {
        let name = self.cluster_name.trim();
        if name.is_empty() {
            DEFAULT_AGENT_NAME
        } else {
            name
        }
    }
}

/// Masks a secret for logging, keeping only whether it is set.
pub fn mask_secret(secret: &str) -> &'static str {
    if secret.is_empty() {
        "n/a"
    } else {
        "********"
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                endpoint: "http://127.0.0.1:8081".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.metric_base_name, "aerospike");
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.source.timeout, Duration::from_secs(10));
        assert_eq!(cfg.source.new_format_min_version, "3.9");
        assert_eq!(cfg.latency.buckets, vec![">1ms", ">8ms", ">64ms"]);
        assert_eq!(cfg.emitter.http.compression, Compression::Gzip);
        assert_eq!(cfg.health.addr, ":9090");
    }

    #[test]
    fn test_valid_config_passes() {
        valid_config().validate().expect("valid config");
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let cfg = Config::default();
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("source.endpoint"));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut cfg = valid_config();
        cfg.poll_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_base_name_rejected() {
        let mut cfg = valid_config();
        cfg.metric_base_name = String::new();
        assert!(cfg.validate().is_err());

        cfg.metric_base_name = "a/b".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bucket_validation() {
        let mut cfg = valid_config();
        cfg.latency.buckets = vec![];
        assert!(cfg.validate().is_err());

        cfg.latency.buckets = vec![">1ms".to_string(), ">1ms".to_string()];
        let err = cfg.validate().expect_err("duplicate bucket");
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_invalid_min_version_rejected() {
        let mut cfg = valid_config();
        cfg.source.new_format_min_version = "three".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_http_emitter_requires_address() {
        let mut cfg = valid_config();
        cfg.emitter.http.enabled = true;
        assert!(cfg.validate().is_err());

        cfg.emitter.http.address = "http://collector:8080/ingest".to_string();
        cfg.validate().expect("address set");

        cfg.emitter.http.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_agent_name_fallback() {
        let mut cfg = valid_config();
        assert_eq!(cfg.agent_name(), DEFAULT_AGENT_NAME);

        cfg.cluster_name = "  ".to_string();
        assert_eq!(cfg.agent_name(), DEFAULT_AGENT_NAME);

        cfg.cluster_name = "prod-east".to_string();
        assert_eq!(cfg.agent_name(), "prod-east");
    }

    #[test]
    fn test_source_debug_masks_password() {
        let cfg = SourceConfig {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("********"));
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"
cluster_name: prod
poll_interval: 30s
source:
  endpoint: http://gw:8081
  user: admin
  password: secret
  timeout: 2s
latency:
  buckets: [">1ms", ">4ms"]
emitter:
  http:
    enabled: true
    address: http://collector/ingest
    compression: zstd
    headers:
      X-Api-Key: abc
health:
  addr: "127.0.0.1:9100"
"#
        )
        .expect("write config");

        let cfg = Config::load(file.path()).expect("load config");
        assert_eq!(cfg.agent_name(), "prod");
        assert_eq!(cfg.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.source.timeout, Duration::from_secs(2));
        assert_eq!(cfg.source.user, "admin");
        assert_eq!(cfg.latency.buckets, vec![">1ms", ">4ms"]);
        assert_eq!(cfg.emitter.http.compression, Compression::Zstd);
        assert_eq!(
            cfg.emitter.http.headers.get("X-Api-Key").map(String::as_str),
            Some("abc")
        );
        assert_eq!(cfg.emitter.http.batch_size, 512);
        assert_eq!(cfg.health.addr, "127.0.0.1:9100");
    }

    #[test]
    fn test_load_rejects_unknown_compression() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            "source:\n  endpoint: http://gw\nemitter:\n  http:\n    compression: lz4\n"
        )
        .expect("write config");

        assert!(Config::load(file.path()).is_err());
    }
}
