//! Collector orchestration.
//!
//! A running collector is two tasks:
//! - the ingest pump, which owns the transport and decodes messages
//! - the collector task, the single owner of the reorder buffer, the emission
//!   timer and the sink
//!
//! They share one broadcast shutdown signal. Stopping discards whatever is
//! still buffered; the count is reported in the [`CollectorSummary`].

use super::scheduler::EmissionScheduler;
use crate::config::{CollectorConfig, Config, RecordFormat};
use crate::health::{Component, HealthCheck};
use crate::ingest::{IngestAdapter, PumpHandle};
use crate::metrics::CollectorMetrics;
use crate::record::{DecodedRecord, Extractor};
use crate::sink::SinkWriter;
use crate::transport::{experiment_topic, Transport};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What a collector did between start and stop.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorSummary {
    /// Experiment identifier
    pub experiment: String,
    /// Record format collected
    pub format: RecordFormat,
    /// Messages received from the transport
    pub messages_received: u64,
    /// Messages dropped because they could not be decoded
    pub decode_failures: u64,
    /// Records written to the sink
    pub records_emitted: u64,
    /// Records still buffered at stop and dropped
    pub records_discarded: usize,
    /// Bytes written to the sink, header included
    pub bytes_written: u64,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock stop
    pub stopped_at: DateTime<Utc>,
}

/// A configured, not yet started collector for one experiment and format.
pub struct Collector {
    config: CollectorConfig,
    topic: String,
    sink: SinkWriter,
    metrics: Arc<CollectorMetrics>,
    health: Arc<HealthCheck>,
}

impl Collector {
    /// Create a collector writing to `sink`.
    pub fn new(config: &Config, sink: SinkWriter) -> Result<Self> {
        config.validate()?;

        if sink.format() != config.collector.record_type {
            return Err(Error::Config(format!(
                "sink format {} does not match record type {}",
                sink.format(),
                config.collector.record_type
            )));
        }

        let topic = experiment_topic(
            config.broker.topic_root.as_deref(),
            &config.collector.experiment,
            config.collector.record_type,
        );

        Ok(Self {
            config: config.collector.clone(),
            topic,
            sink,
            metrics: Arc::new(CollectorMetrics::new()),
            health: Arc::new(HealthCheck::new()),
        })
    }

    /// Create a collector writing to the configured output file.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let sink = SinkWriter::create(
            config.collector.record_type,
            &config.collector.output_path(),
        )?;
        Self::new(config, sink)
    }

    /// Share externally owned metrics.
    pub fn with_metrics(mut self, metrics: Arc<CollectorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Share an externally owned health check.
    pub fn with_health(mut self, health: Arc<HealthCheck>) -> Self {
        self.health = health;
        self
    }

    /// Topic filter this collector subscribes to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get metrics.
    pub fn metrics(&self) -> Arc<CollectorMetrics> {
        self.metrics.clone()
    }

    /// Get health check.
    pub fn health(&self) -> Arc<HealthCheck> {
        self.health.clone()
    }

    /// Start collecting from `transport`.
    ///
    /// Writes the capture header in raw mode, then connects and subscribes.
    /// Connect and subscribe failures are returned here.
    pub async fn start<T>(mut self, transport: T) -> Result<RunningCollector>
    where
        T: Transport + 'static,
    {
        let started_at = Utc::now();

        if let Err(e) = self.sink.begin() {
            self.health
                .mark_unhealthy(Component::Sink, &format!("Header write failed: {}", e));
            return Err(e);
        }
        self.metrics
            .record_header_bytes(self.sink.bytes_written() as usize);
        self.health.mark_healthy(Component::Sink);

        let (shutdown_tx, _) = broadcast::channel(1);

        let adapter = IngestAdapter::new(
            transport,
            Extractor::from_config(&self.config),
            self.topic.clone(),
            self.metrics.clone(),
            self.health.clone(),
        );
        let (records, pump) = adapter.start(shutdown_tx.subscribe()).await?;

        self.health.mark_healthy(Component::Buffer);
        self.health.collector_started();

        info!(
            experiment = %self.config.experiment,
            format = %self.config.record_type,
            retention_ms = self.config.retention_ms,
            output = %self.sink.destination(),
            "Collector started"
        );

        let task = CollectorTask {
            scheduler: EmissionScheduler::new(self.config.retention()),
            sink: self.sink,
            records,
            pump: Some(pump),
            shutdown_tx: shutdown_tx.clone(),
            shutdown_rx: shutdown_tx.subscribe(),
            metrics: self.metrics.clone(),
            health: self.health.clone(),
        };

        Ok(RunningCollector {
            experiment: self.config.experiment,
            format: self.config.record_type,
            started_at,
            shutdown_tx,
            task: tokio::spawn(task.run()),
            metrics: self.metrics,
            health: self.health,
        })
    }
}

/// Records still buffered when the collector task ended.
type TaskOutcome = Result<usize>;

/// Handle to a started collector.
pub struct RunningCollector {
    experiment: String,
    format: RecordFormat,
    started_at: DateTime<Utc>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<TaskOutcome>,
    metrics: Arc<CollectorMetrics>,
    health: Arc<HealthCheck>,
}

impl RunningCollector {
    /// Stop collecting and discard whatever is still buffered.
    ///
    /// Returns the error that ended the collector if it had already failed.
    pub async fn stop(self) -> Result<CollectorSummary> {
        // Fails only if the task already ended and dropped its receivers.
        let _ = self.shutdown_tx.send(());
        let joined = self.task.await;
        Self::finish(
            self.experiment,
            self.format,
            self.started_at,
            &self.metrics,
            &self.health,
            joined,
        )
    }

    /// Run until `signal` completes or the collector fails, then stop.
    pub async fn run_until<F>(mut self, signal: F) -> Result<CollectorSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = signal => {
                info!(experiment = %self.experiment, "Stop requested");
                self.stop().await
            }
            joined = &mut self.task => {
                Self::finish(
                    self.experiment,
                    self.format,
                    self.started_at,
                    &self.metrics,
                    &self.health,
                    joined,
                )
            }
        }
    }

    /// Check if the collector task has ended on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Get metrics.
    pub fn metrics(&self) -> Arc<CollectorMetrics> {
        self.metrics.clone()
    }

    /// Get health check.
    pub fn health(&self) -> Arc<HealthCheck> {
        self.health.clone()
    }

    fn finish(
        experiment: String,
        format: RecordFormat,
        started_at: DateTime<Utc>,
        metrics: &CollectorMetrics,
        health: &HealthCheck,
        joined: std::result::Result<TaskOutcome, tokio::task::JoinError>,
    ) -> Result<CollectorSummary> {
        health.collector_stopped();

        let records_discarded = joined.map_err(|e| Error::Task(e.to_string()))??;

        let summary = CollectorSummary {
            experiment,
            format,
            messages_received: metrics.messages_total(),
            decode_failures: metrics.decode_failures_total(),
            records_emitted: metrics.records_emitted_total(),
            records_discarded,
            bytes_written: metrics.bytes_written_total(),
            started_at,
            stopped_at: Utc::now(),
        };

        info!(
            experiment = %summary.experiment,
            emitted = summary.records_emitted,
            discarded = summary.records_discarded,
            decode_failures = summary.decode_failures,
            "Collector stopped"
        );
        Ok(summary)
    }
}

/// Single owner of buffer, timer and sink.
struct CollectorTask {
    scheduler: EmissionScheduler,
    sink: SinkWriter,
    records: mpsc::UnboundedReceiver<DecodedRecord>,
    pump: Option<PumpHandle>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    metrics: Arc<CollectorMetrics>,
    health: Arc<HealthCheck>,
}

impl CollectorTask {
    async fn run(mut self) -> TaskOutcome {
        let result = self.run_loop().await;

        // Make sure the pump disconnects whichever way the loop ended.
        let _ = self.shutdown_tx.send(());
        let pump_result = self.join_pump().await;

        let discarded = self.scheduler.discard();
        self.metrics.record_discarded(discarded);
        if discarded > 0 {
            warn!(discarded, "Discarding buffered records on stop");
        }
        if let Err(e) = self.sink.flush() {
            warn!(error = %e, "Final sink flush failed");
        }

        result.and(pump_result).map(|()| discarded)
    }

    async fn run_loop(&mut self) -> Result<()> {
        let mut inbound_open = true;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    debug!("Collector task received shutdown");
                    return Ok(());
                }

                _ = self.scheduler.expired() => {
                    self.emit_next()?;
                }

                received = self.records.recv(), if inbound_open => match received {
                    Some(record) => self.accept(record),
                    None => {
                        // Pump ended: a failure is fatal, a clean close
                        // leaves the buffer to drain.
                        inbound_open = false;
                        self.join_pump().await?;
                    }
                }
            }
        }
    }

    fn accept(&mut self, record: DecodedRecord) {
        let outcome = self.scheduler.submit(record, Instant::now());
        self.metrics
            .record_buffered(outcome.postponed, self.scheduler.pending());
        self.metrics
            .set_timer_reschedules(self.scheduler.reschedules());
    }

    fn emit_next(&mut self) -> Result<()> {
        if let Some(record) = self.scheduler.fire() {
            let held = record.arrived_at().elapsed();
            match self.sink.write(&record.payload) {
                Ok(bytes) => {
                    self.metrics.record_emission(bytes, held);
                    debug!(
                        timestamp = record.timestamp,
                        bytes,
                        held_ms = held.as_millis() as u64,
                        "Record emitted"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Sink write failed");
                    self.health
                        .mark_unhealthy(Component::Sink, &format!("Write failed: {}", e));
                    return Err(e);
                }
            }
        }

        self.metrics
            .set_buffered_records(self.scheduler.pending() as u64);
        self.metrics
            .set_timer_reschedules(self.scheduler.reschedules());
        Ok(())
    }

    async fn join_pump(&mut self) -> Result<()> {
        match self.pump.take() {
            Some(pump) => pump.await.map_err(|e| Error::Task(e.to_string()))?,
            None => Ok(()),
        }
    }
}
