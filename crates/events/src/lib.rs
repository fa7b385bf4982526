//! Catalog integration events and the broker transport abstraction.

pub mod broker;
pub mod event;
pub mod in_memory_broker;

pub use broker::{Broker, BrokerError, BrokerMessage};
pub use event::{Event, IntegrationEvent};
pub use in_memory_broker::InMemoryBroker;
