use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use prometheus::Counter;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::{Compression, HttpEmitterConfig};

/// One metric as sent over the wire (one NDJSON line).
#[derive(Debug, Clone, Serialize)]
pub struct MetricJson {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub unit: String,
    pub value: f64,
    pub component: Arc<str>,
    pub timestamp: String,
}

impl MetricJson {
    fn new(path: &str, unit: &str, value: f64, component: &Arc<str>) -> Self {
        Self {
            name: path.to_string(),
            unit: unit.to_string(),
            value,
            component: Arc::clone(component),
            timestamp: format_datetime(SystemTime::now()),
        }
    }
}

/// Batches metrics and POSTs them as NDJSON.
///
/// `emit` never blocks: items go onto a bounded queue and are dropped when
/// it is full.
pub struct HttpEmitter {
    cfg: HttpEmitterConfig,
    component: Arc<str>,
    tx: Option<mpsc::Sender<MetricJson>>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    dropped: AtomicU64,
    drop_counter: Option<Counter>,
}

impl HttpEmitter {
    pub fn new(cfg: HttpEmitterConfig, component: &str) -> Self {
        Self {
            cfg,
            component: Arc::from(component),
            tx: None,
            cancel: None,
            task: None,
            dropped: AtomicU64::new(0),
            drop_counter: None,
        }
    }

    /// Mirror drops into a Prometheus counter.
    pub fn with_drop_counter(mut self, counter: Counter) -> Self {
        self.drop_counter = Some(counter);
        self
    }

    pub fn name(&self) -> &str {
        "http"
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Start the background batching task.
    pub async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        if self.cfg.max_queue_size == 0 {
            bail!("http max_queue_size must be positive");
        }
        if self.cfg.workers == 0 {
            bail!("http workers must be positive");
        }
        if self.cfg.batch_size == 0 {
            bail!("http batch_size must be positive");
        }
        if self.cfg.batch_timeout.is_zero() {
            bail!("http batch_timeout must be positive");
        }

        let (tx, rx) = mpsc::channel::<MetricJson>(self.cfg.max_queue_size);
        self.tx = Some(tx);
        self.cancel = Some(ctx.clone());

        let mut client_builder = reqwest::Client::builder().timeout(self.cfg.export_timeout);
        if !self.cfg.keep_alive {
            client_builder = client_builder.pool_max_idle_per_host(0);
        }
        let client = client_builder.build().context("building HTTP client")?;

        let dispatcher = BatchDispatcher::new(client, Arc::new(self.cfg.clone()));
        self.task = Some(tokio::spawn(dispatcher.run(rx, ctx)));

        tracing::info!(
            address = %self.cfg.address,
            compression = %self.cfg.compression,
            workers = self.cfg.workers,
            "HTTP emitter started",
        );

        Ok(())
    }

    pub fn emit(&self, path: &str, unit: &str, value: f64) {
        let Some(tx) = &self.tx else {
            self.record_drop();
            return;
        };

        let item = MetricJson::new(path, unit, value, &self.component);
        if tx.try_send(item).is_err() {
            self.record_drop();
        }
    }

    fn record_drop(&self) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(counter) = &self.drop_counter {
            counter.inc();
        }
        if total.is_power_of_two() {
            tracing::warn!(dropped_total = total, "HTTP emit queue unavailable, dropping metrics");
        }
    }

    /// Stop accepting metrics and wait for queued ones to be sent.
    pub async fn stop(&mut self) -> Result<()> {
        // Dropping the sender lets the dispatcher drain and exit.
        self.tx.take();

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }

        if let Some(task) = self.task.take() {
            task.await.context("joining HTTP emitter task")?;
        }

        Ok(())
    }
}

/// Owns the pending batch and the in-flight send tasks.
struct BatchDispatcher {
    client: reqwest::Client,
    cfg: Arc<HttpEmitterConfig>,
    semaphore: Arc<Semaphore>,
    batch: Vec<MetricJson>,
    in_flight: JoinSet<()>,
}

impl BatchDispatcher {
    fn new(client: reqwest::Client, cfg: Arc<HttpEmitterConfig>) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(cfg.workers)),
            batch: Vec::with_capacity(cfg.batch_size),
            in_flight: JoinSet::new(),
            cfg,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<MetricJson>, ctx: CancellationToken) {
        let mut interval = tokio::time::interval(self.cfg.batch_timeout);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    while let Ok(item) = rx.try_recv() {
                        self.push(item);
                    }
                    break;
                }

                item = rx.recv() => {
                    let Some(item) = item else { break };
                    self.push(item);

                    // Drain more items without blocking.
                    while self.batch.len() < self.cfg.batch_size {
                        match rx.try_recv() {
                            Ok(item) => self.batch.push(item),
                            Err(_) => break,
                        }
                    }
                    if self.batch.len() >= self.cfg.batch_size {
                        self.flush();
                    }
                }

                _ = interval.tick() => self.flush(),

                joined = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Some(Err(e)) = joined {
                        tracing::debug!(error = %e, "HTTP emit worker join failed");
                    }
                }
            }
        }

        self.flush();
        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::debug!(error = %e, "HTTP emit worker join failed");
            }
        }
    }

    fn push(&mut self, item: MetricJson) {
        self.batch.push(item);
        if self.batch.len() >= self.cfg.batch_size {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let items = std::mem::replace(&mut self.batch, Vec::with_capacity(self.cfg.batch_size));
        let client = self.client.clone();
        let cfg = Arc::clone(&self.cfg);
        let semaphore = Arc::clone(&self.semaphore);

        self.in_flight.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::warn!(error = %e, "HTTP emitter semaphore closed");
                    return;
                }
            };

            if let Err(e) = send_batch(&client, &cfg, &items).await {
                tracing::warn!(error = %e, items = items.len(), "HTTP emit request failed");
            }
        });
    }
}

/// Sends one batch of items via HTTP.
async fn send_batch(
    client: &reqwest::Client,
    cfg: &HttpEmitterConfig,
    items: &[MetricJson],
) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }

    let buf = encode_ndjson(items)?;
    let raw_len = buf.len();

    let body = compress(&buf, cfg.compression).context("compressing NDJSON data")?;

    let mut request = client
        .post(&cfg.address)
        .header("Content-Type", "application/x-ndjson")
        .body(body);

    if let Some(encoding) = content_encoding(cfg.compression) {
        request = request.header("Content-Encoding", encoding);
    }

    for (k, v) in &cfg.headers {
        request = request.header(k.as_str(), v.as_str());
    }

    let resp = request.send().await.context("sending HTTP emit request")?;

    let status = resp.status();
    // Drain body for connection reuse.
    let _ = resp.bytes().await;

    if !status.is_success() {
        bail!("HTTP emit unexpected status: {status}");
    }

    tracing::debug!(items = items.len(), bytes = raw_len, "emitted batch via HTTP");

    Ok(())
}

fn encode_ndjson(items: &[MetricJson]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(items.len() * 128);
    for item in items {
        serde_json::to_writer(&mut buf, item).context("serializing metric to JSON")?;
        buf.push(b'\n');
    }
    Ok(buf)
}

// --- Compression ---

fn compress(data: &[u8], algorithm: Compression) -> Result<Vec<u8>> {
    match algorithm {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).context("gzip write")?;
            encoder.finish().context("gzip finish")
        }
        Compression::Zstd => zstd::encode_all(data, 0).context("zstd encode"),
        Compression::Zlib => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).context("zlib write")?;
            encoder.finish().context("zlib finish")
        }
        Compression::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .context("snappy encode"),
    }
}

/// Content-Encoding header value for the algorithm.
fn content_encoding(algorithm: Compression) -> Option<&'static str> {
    match algorithm {
        Compression::None => None,
        Compression::Gzip => Some("gzip"),
        Compression::Zstd => Some("zstd"),
        Compression::Zlib => Some("deflate"),
        Compression::Snappy => Some("snappy"),
    }
}

/// Formats a SystemTime as "YYYY-MM-DD HH:MM:SS.mmm" in UTC.
fn format_datetime(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
