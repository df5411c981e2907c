use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{mask_secret, Config};
use crate::emit::{Emitter, HttpEmitter, LogEmitter};
use crate::health::HealthMetrics;
use crate::metric::MetricPaths;
use crate::poller::Poller;
use crate::source::HttpStatsSource;

/// Agent wires the source, poller, emitter and health server together and
/// drives polling on a fixed interval.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    cancel: CancellationToken,
    poll_task: Option<JoinHandle<()>>,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            cancel: CancellationToken::new(),
            poll_task: None,
        })
    }

    /// Start the health server and the polling loop.
    pub async fn start(&mut self) -> Result<()> {
        self.health
            .start()
            .await
            .context("starting health metrics server")?;

        if let Err(e) = self.start_polling().await {
            self.health.stop().await?;
            return Err(e);
        }

        info!("agent fully started");

        Ok(())
    }

    async fn start_polling(&mut self) -> Result<()> {
        let user = if self.cfg.source.user.is_empty() {
            "n/a"
        } else {
            self.cfg.source.user.as_str()
        };
        info!(
            agent = self.cfg.agent_name(),
            endpoint = %self.cfg.source.endpoint,
            user,
            password = mask_secret(&self.cfg.source.password),
            poll_interval = ?self.cfg.poll_interval,
            "agent parameters",
        );

        let source = self.create_source()?;

        // The emitter gets its own token: it must outlive the poll loop so
        // the final cycle's metrics are flushed.
        let mut emitter = self.create_emitter();
        emitter
            .start(CancellationToken::new())
            .await
            .with_context(|| format!("starting {} emitter", emitter.name()))?;
        info!(emitter = emitter.name(), "metric emitter started");

        let poller = Poller::new(
            source,
            emitter,
            MetricPaths::new(self.cfg.metric_base_name.clone()),
            self.cfg.latency.buckets.clone(),
        );
        self.spawn_poll_loop(poller);

        Ok(())
    }

    /// Stop polling, flush the emitter and shut down the health server.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(task) = self.poll_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "poll task failed");
            }
        }

        self.health.stop().await?;

        Ok(())
    }

    /// Create the statistics source with a request metrics callback.
    fn create_source(&self) -> Result<HttpStatsSource> {
        let source =
            HttpStatsSource::new(&self.cfg.source).context("creating statistics source")?;

        let health = Arc::clone(&self.health);
        let source = source.with_metrics(Box::new(move |endpoint, status, duration| {
            health
                .source_requests_total
                .with_label_values(&[endpoint, status])
                .inc();
            health
                .source_request_duration
                .with_label_values(&[endpoint])
                .observe(duration.as_secs_f64());
        }));

        Ok(source)
    }

    fn create_emitter(&self) -> Emitter {
        let http = &self.cfg.emitter.http;
        if http.enabled {
            Emitter::Http(
                HttpEmitter::new(http.clone(), self.cfg.agent_name())
                    .with_drop_counter(self.health.metrics_dropped.clone()),
            )
        } else {
            Emitter::Log(LogEmitter::new(self.cfg.agent_name()))
        }
    }

    /// Spawn the polling loop. A cycle in progress always runs to completion;
    /// cancellation is only observed between cycles.
    fn spawn_poll_loop(&mut self, mut poller: Poller<HttpStatsSource, Emitter>) {
        let cancel = self.cancel.clone();
        let health = Arc::clone(&self.health);
        let poll_interval = self.cfg.poll_interval;

        self.poll_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcome = poller.run_cycle().await;
                        health.record_cycle(&outcome);
                    }
                }
            }

            let emitter = poller.emitter_mut();
            if let Err(e) = emitter.stop().await {
                error!(error = %e, "error stopping emitter");
            }
            info!(
                cycles = poller.context().cycles_completed,
                dropped = poller.emitter().dropped_total(),
                "poll loop stopped",
            );
        }));
    }
}
