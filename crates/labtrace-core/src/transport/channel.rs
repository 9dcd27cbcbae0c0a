//! In-process transport fed through a tokio channel.
//!
//! Behaves like a broker connection for a single subscriber: messages whose
//! topic does not match the subscribed filter are dropped.

use super::{topic_matches, InboundMessage, Transport};
use crate::{Error, Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

/// Sending half of an in-process transport.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl ChannelPublisher {
    /// Publish a message on `topic`.
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Bytes>) -> Result<()> {
        self.tx
            .send(InboundMessage::new(topic, payload))
            .map_err(|_| Error::Transport(TransportError::Closed))
    }
}

/// Receiving half of an in-process transport.
#[derive(Debug)]
pub struct ChannelTransport {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    filter: Option<String>,
    connected: bool,
}

impl ChannelTransport {
    /// Create a connected publisher/transport pair.
    pub fn pair() -> (ChannelPublisher, ChannelTransport) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ChannelPublisher { tx },
            ChannelTransport {
                rx,
                filter: None,
                connected: false,
            },
        )
    }

    /// Subscribed topic filter.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        if !self.connected {
            return Err(Error::Transport(TransportError::Closed));
        }
        self.filter = Some(topic.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<InboundMessage>> {
        if !self.connected {
            return Err(Error::Transport(TransportError::Closed));
        }

        while let Some(message) = self.rx.recv().await {
            match self.filter.as_deref() {
                Some(filter) if topic_matches(filter, &message.topic) => return Ok(Some(message)),
                _ => trace!(topic = %message.topic, "Dropping message outside subscription"),
            }
        }
        Ok(None)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        self.rx.close();
        Ok(())
    }

    fn endpoint(&self) -> String {
        "in-process".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivers_matching_topics_only() {
        let (publisher, mut transport) = ChannelTransport::pair();
        transport.connect().await.unwrap();
        transport
            .subscribe("experiment/e1/output/structured/#")
            .await
            .unwrap();

        publisher
            .publish("experiment/e2/output/structured/n1", "skip")
            .unwrap();
        publisher
            .publish("experiment/e1/output/structured/n1", "keep")
            .unwrap();

        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg.topic, "experiment/e1/output/structured/n1");
        assert_eq!(&msg.payload[..], b"keep");
    }

    #[tokio::test]
    async fn test_subscribe_requires_connect() {
        let (_publisher, mut transport) = ChannelTransport::pair();
        assert!(transport.subscribe("a/#").await.is_err());
        assert!(transport.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_closed_when_publishers_dropped() {
        let (publisher, mut transport) = ChannelTransport::pair();
        transport.connect().await.unwrap();
        transport.subscribe("#").await.unwrap();
        drop(publisher);
        assert!(transport.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_rejects_publishes() {
        let (publisher, mut transport) = ChannelTransport::pair();
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(publisher.publish("a", "b").is_err());
    }
}
