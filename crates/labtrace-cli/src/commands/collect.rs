//! Collect command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use labtrace_core::transport::MqttTransport;
use labtrace_core::{Collector, CollectorSummary, Config, RecordFormat};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Command-line overrides applied on top of the configuration file.
#[derive(Debug, Default)]
pub struct CollectOverrides {
    pub broker: Option<String>,
    pub port: Option<u16>,
    pub experiment: Option<String>,
    pub record_type: Option<RecordFormat>,
    pub retention_ms: Option<u64>,
    pub output: Option<PathBuf>,
}

impl CollectOverrides {
    /// Apply every override that was given.
    pub fn apply(self, config: &mut Config) {
        if let Some(address) = self.broker {
            config.broker.address = address;
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(experiment) = self.experiment {
            config.collector.experiment = experiment;
        }
        if let Some(record_type) = self.record_type {
            config.collector.record_type = record_type;
        }
        if let Some(retention_ms) = self.retention_ms {
            config.collector.retention_ms = retention_ms;
        }
        if let Some(output) = self.output {
            config.collector.output = Some(output);
        }
    }
}

/// Run one collector until interrupted or failed.
pub async fn run(mut config: Config, overrides: CollectOverrides) -> Result<()> {
    overrides.apply(&mut config);
    config.validate()?;

    info!(
        broker = %config.broker.endpoint(),
        experiment = %config.collector.experiment,
        format = %config.collector.record_type,
        "Starting collector"
    );

    let collector = Collector::from_config(&config)?;
    let (server_shutdown_tx, _) = broadcast::channel(1);

    if let Some(port) = config.monitoring.http_port {
        let state = Arc::new(ServerState {
            health: collector.health(),
            metrics: collector.metrics(),
        });
        tokio::spawn(start_server(state, port, server_shutdown_tx.subscribe()));
    }

    let transport = MqttTransport::from_config(&config);
    let running = collector.start(transport).await?;

    let result = running.run_until(shutdown_signal()).await;
    let _ = server_shutdown_tx.send(());

    print_summary(&result?);
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), stopping collector");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, stopping collector");
                    }
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, using Ctrl+C only");
            }
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, stopping collector");
}

fn print_summary(summary: &CollectorSummary) {
    let elapsed = summary.stopped_at - summary.started_at;

    println!("\n--- Collection summary ---");
    println!("Experiment:       {}", summary.experiment);
    println!("Record type:      {}", summary.format);
    println!("Duration:         {}s", elapsed.num_seconds());
    println!("Messages:         {}", summary.messages_received);
    println!("Decode failures:  {}", summary.decode_failures);
    println!("Records emitted:  {}", summary.records_emitted);
    println!("Bytes written:    {}", summary.bytes_written);
    if summary.records_discarded > 0 {
        println!(
            "Discarded:        {} (still buffered at stop)",
            summary.records_discarded
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let mut config = Config::default();
        CollectOverrides {
            broker: Some("broker.lab".into()),
            port: Some(8883),
            experiment: Some("exp-3".into()),
            record_type: Some(RecordFormat::RawCapture),
            retention_ms: Some(750),
            output: Some(PathBuf::from("/tmp/out.pcap")),
        }
        .apply(&mut config);

        assert_eq!(config.broker.endpoint(), "broker.lab:8883");
        assert_eq!(config.collector.experiment, "exp-3");
        assert_eq!(config.collector.record_type, RecordFormat::RawCapture);
        assert_eq!(config.collector.retention_ms, 750);
        assert_eq!(
            config.collector.output_path(),
            PathBuf::from("/tmp/out.pcap")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_overrides_keep_config() {
        let mut config = Config::default();
        config.collector.experiment = "from-file".into();
        CollectOverrides::default().apply(&mut config);
        assert_eq!(config.collector.experiment, "from-file");
        assert_eq!(config.broker.port, 1883);
    }
}
