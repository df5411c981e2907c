pub mod http;
pub mod log;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub use self::http::HttpEmitter;
pub use self::log::LogEmitter;

/// Accepts fully qualified metric paths for delivery.
///
/// Implementations must not block: the poller calls `emit` inline while
/// walking the cluster.
pub trait MetricEmitter: Send + Sync {
    fn emit(&self, path: &str, unit: &str, value: f64);
}

impl<T: MetricEmitter + ?Sized> MetricEmitter for Arc<T> {
    fn emit(&self, path: &str, unit: &str, value: f64) {
        (**self).emit(path, unit, value)
    }
}

/// Emitter dispatches metrics to the HTTP collector or the log.
///
/// Enum dispatch keeps `start`/`stop` as plain async methods without boxing.
pub enum Emitter {
    Http(HttpEmitter),
    Log(LogEmitter),
}

impl Emitter {
    pub fn name(&self) -> &str {
        match self {
            Self::Http(e) => e.name(),
            Self::Log(e) => e.name(),
        }
    }

    /// Initialize the emitter.
    pub async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        match self {
            Self::Http(e) => e.start(ctx).await,
            Self::Log(_) => Ok(()),
        }
    }

    /// Shut down the emitter, flushing anything still queued.
    pub async fn stop(&mut self) -> Result<()> {
        match self {
            Self::Http(e) => e.stop().await,
            Self::Log(_) => Ok(()),
        }
    }

    /// Metrics dropped because they could not be queued.
    pub fn dropped_total(&self) -> u64 {
        match self {
            Self::Http(e) => e.dropped_total(),
            Self::Log(_) => 0,
        }
    }
}

impl MetricEmitter for Emitter {
    fn emit(&self, path: &str, unit: &str, value: f64) {
        match self {
            Self::Http(e) => e.emit(path, unit, value),
            Self::Log(e) => e.emit(path, unit, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpEmitterConfig;

    #[tokio::test]
    async fn test_log_emitter_lifecycle() {
        let mut emitter = Emitter::Log(LogEmitter::new("prod"));
        assert_eq!(emitter.name(), "log");

        emitter
            .start(CancellationToken::new())
            .await
            .expect("start log emitter");
        emitter.emit("aerospike/summary/cluster_size", "nodes", 2.0);
        emitter.stop().await.expect("stop log emitter");
        assert_eq!(emitter.dropped_total(), 0);
    }

    #[test]
    fn test_http_dispatch_name() {
        let emitter = Emitter::Http(HttpEmitter::new(HttpEmitterConfig::default(), "prod"));
        assert_eq!(emitter.name(), "http");
    }
}
