//! Background workers.

pub mod quantity_consumer;

pub use quantity_consumer::{
    ConsumerConfig, ConsumerSignal, ConsumerState, ConsumerStats, MAX_POLL_TIMEOUT, Outcome, QuantityConsumer,
    transition,
};
