//! Long-running consumer applying external stock changes to products.
//!
//! The loop is a small state machine:
//!
//! ```text
//! Running --interrupt--> Draining --drained--> Stopped
//! ```
//!
//! While `Running` it polls the broker with a sub-second timeout and handles
//! one message at a time. An interrupt is only observed between messages (or
//! while waiting in `poll`), so a message being handled is finished and acked
//! before the loop stops and is never handled twice by this consumer.
//!
//! Per-message failures never stop the loop. Malformed payloads and unknown
//! topics are logged and dropped; failed applications are logged and counted.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use catalog_core::{CatalogError, CatalogResult};
use catalog_events::{Broker, BrokerMessage};
use catalog_products::{Product, QuantityUpdated, topics};

use crate::repository::ProductRepository;
use crate::store::ItemStore;

/// Longest allowed poll wait; keeps interrupts responsive.
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_millis(999);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Running,
    Draining,
    Stopped,
}

/// Inputs to [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerSignal {
    /// A poll returned (message, timeout or error).
    Polled,
    Interrupted,
    /// Nothing is in flight anymore.
    Drained,
}

/// The consumer's transition function.
pub fn transition(state: ConsumerState, signal: ConsumerSignal) -> ConsumerState {
    use ConsumerSignal::*;
    use ConsumerState::*;

    match (state, signal) {
        (Running, Polled) => Running,
        (Running, Interrupted) => Draining,
        (Running, Drained) => Running,
        (Draining, Drained) => Stopped,
        (Draining, Polled | Interrupted) => Draining,
        (Stopped, _) => Stopped,
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub name: String,
    pub poll_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: "quantity-consumer".to_string(),
            poll_timeout: Duration::from_millis(500),
        }
    }
}

impl ConsumerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Clamped to `1ms..=MAX_POLL_TIMEOUT`.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout.clamp(Duration::from_millis(1), MAX_POLL_TIMEOUT);
        self
    }
}

/// Consumer runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub messages_processed: u64,
    pub quantities_applied: u64,
    pub messages_dropped: u64,
    pub applies_failed: u64,
    pub poll_errors: u64,
}

/// What happened to one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied(Box<Product>),
    /// Unknown topic or malformed payload.
    Dropped,
    /// Decoded but could not be applied; `retry` when the cause is transient.
    Failed { retry: bool },
}

pub struct QuantityConsumer<S, B> {
    products: ProductRepository<S>,
    broker: B,
    config: ConsumerConfig,
}

impl<S, B> QuantityConsumer<S, B>
where
    S: ItemStore,
    B: Broker,
{
    pub fn new(store: S, broker: B, config: ConsumerConfig) -> Self {
        let poll_timeout = config.poll_timeout;
        let config = config.with_poll_timeout(poll_timeout);
        Self {
            products: ProductRepository::new(store),
            broker,
            config,
        }
    }

    /// Run until `shutdown` is cancelled; returns the final statistics.
    pub async fn run(&self, shutdown: CancellationToken) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        let mut state = ConsumerState::Running;
        info!(worker = %self.config.name, "consumer started");

        loop {
            match state {
                ConsumerState::Running => {
                    let polled = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => None,
                        polled = self.broker.poll(self.config.poll_timeout) => Some(polled),
                    };

                    let signal = match polled {
                        None => ConsumerSignal::Interrupted,
                        Some(Ok(None)) => ConsumerSignal::Polled,
                        Some(Ok(Some(message))) => {
                            self.process(&message, &mut stats).await;
                            ConsumerSignal::Polled
                        }
                        Some(Err(e)) => {
                            stats.poll_errors += 1;
                            error!(worker = %self.config.name, error = %e, "broker poll failed");
                            // Back off one poll interval so a dead broker is not hammered.
                            tokio::select! {
                                biased;
                                _ = shutdown.cancelled() => {}
                                _ = tokio::time::sleep(self.config.poll_timeout) => {}
                            }
                            ConsumerSignal::Polled
                        }
                    };
                    state = transition(state, signal);
                    if shutdown.is_cancelled() {
                        state = transition(state, ConsumerSignal::Interrupted);
                    }
                }
                ConsumerState::Draining => {
                    debug!(worker = %self.config.name, "consumer draining");
                    state = transition(state, ConsumerSignal::Drained);
                }
                ConsumerState::Stopped => break,
            }
        }

        info!(
            worker = %self.config.name,
            processed = stats.messages_processed,
            applied = stats.quantities_applied,
            dropped = stats.messages_dropped,
            failed = stats.applies_failed,
            "consumer stopped"
        );
        stats
    }

    async fn process(&self, message: &BrokerMessage, stats: &mut ConsumerStats) {
        stats.messages_processed += 1;
        let outcome = self.handle(message).await;
        let ack = match &outcome {
            Outcome::Applied(_) => {
                stats.quantities_applied += 1;
                true
            }
            Outcome::Dropped => {
                stats.messages_dropped += 1;
                true
            }
            Outcome::Failed { retry } => {
                stats.applies_failed += 1;
                !retry
            }
        };

        if ack {
            if let Err(e) = self.broker.ack(message).await {
                warn!(topic = %message.topic, error = %e, "ack failed; message may be redelivered");
            }
        }
    }

    /// Dispatch one message by topic.
    pub async fn handle(&self, message: &BrokerMessage) -> Outcome {
        if message.topic != topics::PRODUCT_QUANTITY_UPDATED {
            warn!(topic = %message.topic, key = %message.key_str(), "dropping message on unknown topic");
            return Outcome::Dropped;
        }

        match self.apply(message).await {
            Ok(product) => {
                info!(
                    product_id = %product.id,
                    quantity = product.quantity.value(),
                    "product quantity updated"
                );
                Outcome::Applied(Box::new(product))
            }
            Err(CatalogError::Malformed(reason)) => {
                warn!(topic = %message.topic, key = %message.key_str(), reason = %reason, "dropping malformed message");
                Outcome::Dropped
            }
            Err(e) => {
                error!(key = %message.key_str(), error = %e, "failed to apply quantity update");
                Outcome::Failed {
                    retry: e.is_transient(),
                }
            }
        }
    }

    async fn apply(&self, message: &BrokerMessage) -> CatalogResult<Product> {
        let update = QuantityUpdated::decode(&message.payload)?;
        let quantity = update.quantity()?;

        let current = self
            .products
            .find_live(update.product_id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("product {}", update.product_id)))?;

        Ok(self
            .products
            .set_quantity(current.id, current.category_id, quantity, Utc::now())
            .await?)
    }
}
