//! Broker publish/poll abstraction (mechanics only).
//!
//! The broker is the transport for integration events leaving the catalog and
//! for externally-sourced events entering it.
//!
//! ## Delivery semantics
//!
//! - **At-least-once**: a message may be delivered more than once; consumers must
//!   be idempotent.
//! - **Fire-and-forget publish**: `publish()` returning `Ok` means the transport
//!   accepted the message, nothing more.
//! - **No ordering across keys**: ordering, if any, is the transport's business.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use catalog_core::CatalogError;

/// A keyed byte-payload message as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    /// Transport-assigned delivery id (stream entry id, offset, ...), used for acks.
    pub delivery_id: Option<String>,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, key: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload: payload.into(),
            delivery_id: None,
        }
    }

    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker subscribe error: {0}")]
    Subscribe(String),

    #[error("broker publish error: {0}")]
    Publish(String),

    #[error("broker poll error: {0}")]
    Poll(String),

    #[error("event serialization error: {0}")]
    Serialize(String),

    /// Internal lock poisoning (in-memory transport).
    #[error("broker state poisoned")]
    Poisoned,
}

impl From<BrokerError> for CatalogError {
    fn from(value: BrokerError) -> Self {
        match value {
            BrokerError::Serialize(msg) => CatalogError::malformed(msg),
            other => CatalogError::upstream("broker", other.to_string()),
        }
    }
}

/// Topic-addressed message transport.
///
/// Implementations must be safe to share across tasks; multiple tasks may
/// publish concurrently. Polling is intended for a single consumer loop.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` to `topic` under `key`.
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next message on a subscribed topic.
    ///
    /// `Ok(None)` means the timeout elapsed without a delivery.
    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError>;

    /// Mark a polled message as handled. Acking transports redeliver a polled
    /// message that is never acked; transports without acks ignore this.
    async fn ack(&self, _message: &BrokerMessage) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[async_trait]
impl<B> Broker for Arc<B>
where
    B: Broker + ?Sized,
{
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<(), BrokerError> {
        (**self).publish(topic, key, payload).await
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        (**self).poll(timeout).await
    }

    async fn ack(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        (**self).ack(message).await
    }
}
