use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::broker::BrokerError;

/// A catalog event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "catalog.product.created").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// An event that leaves the process through the broker.
///
/// Topic and message key are part of the event's wire contract; the payload
/// is the JSON encoding of [`IntegrationEvent::body`].
pub trait IntegrationEvent: Event {
    type Body: Serialize;

    fn topic(&self) -> &'static str;

    /// Broker message key (raw bytes).
    fn key(&self) -> Vec<u8>;

    fn body(&self) -> &Self::Body;

    fn encode(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self.body()).map_err(|e| BrokerError::Serialize(e.to_string()))
    }
}
