//! MQTT transport over rumqttc.
//!
//! Uses a persistent session by default so messages published while the
//! collector is briefly offline are redelivered, and subscribes with QoS 2.
//! CONNACK and SUBACK are awaited explicitly so that connect and subscribe
//! failures surface from `connect()` / `subscribe()` instead of later.

use super::{InboundMessage, Transport};
use crate::config::{Config, RecordFormat};
use crate::{Error, Result, TransportError};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Capacity of the request channel between client and event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// rumqttc rejects keep-alive intervals below this.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Client identifier `{hostname}:{experiment}:{type}`.
pub fn default_client_id(experiment: &str, format: RecordFormat) -> String {
    format!("{}:{}:{}", hostname(), experiment, format)
}

/// Local hostname, or `labtrace` when the system cannot report one.
fn hostname() -> String {
    match hostname::get() {
        Ok(name) if !name.is_empty() => name.to_string_lossy().into_owned(),
        Ok(_) => "labtrace".to_string(),
        Err(e) => {
            warn!(error = %e, "Failed to read hostname, client id may collide");
            "labtrace".to_string()
        }
    }
}

/// Connection options for the configured broker.
///
/// The packet limit applies to incoming and outgoing packets alike.
fn mqtt_options(config: &Config, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(
        client_id.to_string(),
        config.broker.address.clone(),
        config.broker.port,
    );
    options
        .set_keep_alive(Duration::from_secs(config.broker.keep_alive_seconds).max(MIN_KEEP_ALIVE))
        .set_clean_session(config.broker.clean_session)
        .set_max_packet_size(config.broker.max_packet_size, config.broker.max_packet_size);
    options
}

/// Broker connection delivering one subscription.
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    endpoint: String,
    connect_timeout: Duration,
    /// Publishes that arrived while waiting for SUBACK
    pending: VecDeque<InboundMessage>,
    connected: bool,
}

impl MqttTransport {
    /// Build a transport for the configured broker and collector.
    pub fn from_config(config: &Config) -> Self {
        let client_id = config.broker.client_id.clone().unwrap_or_else(|| {
            default_client_id(&config.collector.experiment, config.collector.record_type)
        });

        let options = mqtt_options(config, &client_id);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        debug!(
            client_id = %client_id,
            broker = %config.broker.endpoint(),
            clean_session = config.broker.clean_session,
            max_packet_size = config.broker.max_packet_size,
            "MQTT client created"
        );

        Self {
            client,
            eventloop,
            endpoint: config.broker.endpoint(),
            connect_timeout: config.broker.connect_timeout(),
            pending: VecDeque::new(),
            connected: false,
        }
    }

    fn inbound(publish: rumqttc::Publish) -> InboundMessage {
        InboundMessage {
            topic: publish.topic,
            payload: publish.payload,
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<()> {
        let eventloop = &mut self.eventloop;
        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if matches!(ack.code, ConnectReturnCode::Success) {
                            Ok(ack.session_present)
                        } else {
                            Err(format!("broker refused connection: {:?}", ack.code))
                        };
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(e.to_string()),
                }
            }
        };

        match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(Ok(session_present)) => {
                self.connected = true;
                info!(
                    broker = %self.endpoint,
                    session_present,
                    "Connected to MQTT broker"
                );
                Ok(())
            }
            Ok(Err(message)) => Err(Error::Transport(TransportError::ConnectionFailed {
                broker: self.endpoint.clone(),
                message,
            })),
            Err(_) => Err(Error::Transport(TransportError::Timeout(format!(
                "no CONNACK from {} within {:?}",
                self.endpoint, self.connect_timeout
            )))),
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        if !self.connected {
            return Err(Error::Transport(TransportError::Closed));
        }

        self.client
            .subscribe(topic, QoS::ExactlyOnce)
            .await
            .map_err(|e| {
                Error::Transport(TransportError::SubscribeFailed {
                    topic: topic.to_string(),
                    message: e.to_string(),
                })
            })?;

        let eventloop = &mut self.eventloop;
        let pending = &mut self.pending;
        let ack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        return if ack
                            .return_codes
                            .iter()
                            .any(|code| matches!(code, SubscribeReasonCode::Failure))
                        {
                            Err("broker rejected subscription".to_string())
                        } else {
                            Ok(())
                        };
                    }
                    // Persistent sessions may replay messages before SUBACK.
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        pending.push_back(Self::inbound(publish));
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(e.to_string()),
                }
            }
        };

        match tokio::time::timeout(self.connect_timeout, ack).await {
            Ok(Ok(())) => {
                info!(topic = %topic, qos = 2, "Subscribed");
                Ok(())
            }
            Ok(Err(message)) => Err(Error::Transport(TransportError::SubscribeFailed {
                topic: topic.to_string(),
                message,
            })),
            Err(_) => Err(Error::Transport(TransportError::Timeout(format!(
                "no SUBACK for {} within {:?}",
                topic, self.connect_timeout
            )))),
        }
    }

    async fn recv(&mut self) -> Result<Option<InboundMessage>> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        if !self.connected {
            return Err(Error::Transport(TransportError::Closed));
        }

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(Some(Self::inbound(publish)));
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.connected = false;
                    warn!(broker = %self.endpoint, "Broker closed the connection");
                    return Ok(None);
                }
                Ok(_) => continue,
                Err(e) => {
                    self.connected = false;
                    return Err(Error::Transport(TransportError::ConnectionLost(
                        e.to_string(),
                    )));
                }
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        self.client
            .disconnect()
            .await
            .map_err(|e| Error::Transport(TransportError::ConnectionLost(e.to_string())))?;

        // The DISCONNECT packet only leaves once the event loop is driven.
        let eventloop = &mut self.eventloop;
        let drained = tokio::time::timeout(self.connect_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(broker = %self.endpoint, "Timed out sending DISCONNECT");
        } else {
            info!(broker = %self.endpoint, "Disconnected from MQTT broker");
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}
