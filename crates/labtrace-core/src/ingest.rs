//! Ingest adapter: transport subscription plus record decoding.
//!
//! The adapter connects and subscribes up front so those failures reach the
//! caller, then hands the transport to a pump task. The pump decodes every
//! message and forwards the good ones over an unbounded channel; bad ones are
//! logged, counted and dropped.

use crate::health::{Component, HealthCheck};
use crate::metrics::CollectorMetrics;
use crate::record::{DecodedRecord, Extractor};
use crate::transport::Transport;
use crate::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to a running pump task.
pub type PumpHandle = JoinHandle<Result<()>>;

/// Subscribes a transport and decodes what it delivers.
pub struct IngestAdapter<T> {
    transport: T,
    extractor: Extractor,
    topic: String,
    metrics: Arc<CollectorMetrics>,
    health: Arc<HealthCheck>,
}

impl<T: Transport + 'static> IngestAdapter<T> {
    /// Create an adapter for one topic filter.
    pub fn new(
        transport: T,
        extractor: Extractor,
        topic: impl Into<String>,
        metrics: Arc<CollectorMetrics>,
        health: Arc<HealthCheck>,
    ) -> Self {
        Self {
            transport,
            extractor,
            topic: topic.into(),
            metrics,
            health,
        }
    }

    /// Connect, subscribe and spawn the pump.
    ///
    /// Returns the channel of decoded records and the pump's handle. The pump
    /// runs until `shutdown` fires, the transport closes, or the connection
    /// is lost; it disconnects the transport on the way out.
    pub async fn start(
        mut self,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(mpsc::UnboundedReceiver<DecodedRecord>, PumpHandle)> {
        let endpoint = self.transport.endpoint();

        if let Err(e) = self.transport.connect().await {
            self.health
                .mark_unhealthy(Component::Transport, &format!("Connect failed: {}", e));
            return Err(e);
        }
        if let Err(e) = self.transport.subscribe(&self.topic).await {
            self.health
                .mark_unhealthy(Component::Transport, &format!("Subscribe failed: {}", e));
            let _ = self.transport.disconnect().await;
            return Err(e);
        }
        self.health.mark_healthy(Component::Transport);

        info!(
            broker = %endpoint,
            topic = %self.topic,
            format = %self.extractor.format(),
            "Ingest started"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(self.pump(tx, shutdown));
        Ok((rx, pump))
    }

    async fn pump(
        mut self,
        tx: mpsc::UnboundedSender<DecodedRecord>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let outcome = loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Ingest pump received shutdown");
                    break Ok(());
                }

                received = self.transport.recv() => match received {
                    Ok(Some(message)) => {
                        self.metrics.record_message();
                        match self.extractor.decode(message.payload) {
                            Ok(record) => {
                                debug!(
                                    topic = %message.topic,
                                    timestamp = record.timestamp,
                                    "Record received"
                                );
                                if tx.send(record).is_err() {
                                    debug!("Collector gone, ingest pump exiting");
                                    break Ok(());
                                }
                            }
                            Err(e) => {
                                self.metrics.record_decode_failure();
                                warn!(
                                    topic = %message.topic,
                                    error = %e,
                                    "Dropping undecodable message"
                                );
                            }
                        }
                    }
                    Ok(None) => {
                        info!("Transport closed, no further records");
                        self.health.mark_degraded(Component::Transport, "Transport closed");
                        break Ok(());
                    }
                    Err(e) => {
                        error!(error = %e, "Transport failed");
                        self.health
                            .mark_unhealthy(Component::Transport, &format!("Receive failed: {}", e));
                        break Err(e);
                    }
                }
            }
        };

        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Error disconnecting transport");
        }
        outcome
    }
}
