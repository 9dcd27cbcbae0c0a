//! Publish/subscribe transports that deliver experiment output.
//!
//! The collector only needs four things from a transport: connect, subscribe
//! to one topic filter, hand over raw message bytes, and disconnect.

mod channel;
mod mqtt;

pub use channel::{ChannelPublisher, ChannelTransport};
pub use mqtt::{default_client_id, MqttTransport};

use crate::config::RecordFormat;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// A raw message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Message body
    pub payload: Bytes,
}

impl InboundMessage {
    /// Create a message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Message source for one collector.
#[async_trait]
pub trait Transport: Send {
    /// Establish the connection to the broker.
    async fn connect(&mut self) -> Result<()>;

    /// Subscribe to a topic filter with exactly-once delivery.
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Next message, or `None` once the transport has closed.
    async fn recv(&mut self) -> Result<Option<InboundMessage>>;

    /// Tear down the subscription and the connection.
    async fn disconnect(&mut self) -> Result<()>;

    /// Broker identity for logs.
    fn endpoint(&self) -> String;
}

/// Topic filter carrying an experiment's output of the given format.
///
/// `experiment/{id}/output/{binary|structured}/#`, prefixed with
/// `{root}/` when a topic root is configured.
pub fn experiment_topic(root: Option<&str>, experiment: &str, format: RecordFormat) -> String {
    let topic = format!(
        "experiment/{}/output/{}/#",
        experiment,
        format.topic_segment()
    );
    match root.map(|r| r.trim_end_matches('/')) {
        Some(root) if !root.is_empty() => format!("{}/{}", root, topic),
        _ => topic,
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
