//! In-memory broker for tests/dev.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::broker::{Broker, BrokerError, BrokerMessage};

const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_millis(50);

/// In-memory topic broker.
///
/// - Every published message is recorded (inspect with [`InMemoryBroker::published`])
/// - Messages on subscribed topics are queued for [`Broker::poll`]
/// - A polled message that is not acked within the redelivery delay is queued again
/// - Publish and poll failures can be injected for tests
#[derive(Debug)]
pub struct InMemoryBroker {
    subscribed: HashSet<String>,
    queue: Mutex<VecDeque<BrokerMessage>>,
    in_flight: Mutex<Vec<(Instant, BrokerMessage)>>,
    published: Mutex<Vec<BrokerMessage>>,
    acked: Mutex<Vec<String>>,
    notify: Notify,
    next_delivery: AtomicU64,
    redelivery_delay: Duration,
    fail_publish: AtomicBool,
    fail_next_poll: AtomicBool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            subscribed: HashSet::new(),
            queue: Mutex::default(),
            in_flight: Mutex::default(),
            published: Mutex::default(),
            acked: Mutex::default(),
            notify: Notify::new(),
            next_delivery: AtomicU64::new(0),
            redelivery_delay: DEFAULT_REDELIVERY_DELAY,
            fail_publish: AtomicBool::new(false),
            fail_next_poll: AtomicBool::new(false),
        }
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker whose `poll` delivers messages published to `topics`.
    pub fn subscribed_to<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subscribed: topics.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// How long a polled, unacked message waits before redelivery (at least 1ms).
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay.max(Duration::from_millis(1));
        self
    }

    /// Queue a message for delivery regardless of subscriptions (simulates an
    /// external producer, including for topics nobody subscribed to).
    pub fn deliver(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        self.enqueue(message)
    }

    /// Make every subsequent publish fail until reset.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make the next poll fail once.
    pub fn fail_next_poll(&self) {
        self.fail_next_poll.store(true, Ordering::SeqCst);
    }

    /// All successfully published messages, optionally filtered by topic.
    pub fn published(&self, topic: Option<&str>) -> Vec<BrokerMessage> {
        let published = match self.published.lock() {
            Ok(p) => p,
            Err(_) => return vec![],
        };
        published
            .iter()
            .filter(|m| topic.is_none_or(|t| m.topic == t))
            .cloned()
            .collect()
    }

    /// Delivery ids acknowledged by consumers, in ack order.
    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Messages waiting for their first delivery or a redelivery.
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Messages polled but not yet acked.
    pub fn unacked(&self) -> usize {
        self.in_flight.lock().map(|f| f.len()).unwrap_or(0)
    }

    fn enqueue(&self, mut message: BrokerMessage) -> Result<(), BrokerError> {
        let seq = self.next_delivery.fetch_add(1, Ordering::SeqCst);
        message.delivery_id = Some(format!("mem-{seq}"));
        self.queue
            .lock()
            .map_err(|_| BrokerError::Poisoned)?
            .push_back(message);
        self.notify.notify_one();
        Ok(())
    }

    /// Next message, redeliveries first. The returned message is tracked until acked.
    fn take(&self) -> Result<Option<BrokerMessage>, BrokerError> {
        let now = Instant::now();
        let mut in_flight = self.in_flight.lock().map_err(|_| BrokerError::Poisoned)?;
        let mut queue = self.queue.lock().map_err(|_| BrokerError::Poisoned)?;

        let expired = in_flight
            .iter()
            .position(|(at, _)| now.duration_since(*at) >= self.redelivery_delay);
        let next = match expired {
            Some(i) => Some(in_flight.remove(i).1),
            None => queue.pop_front(),
        };
        if let Some(message) = &next {
            in_flight.push((now, message.clone()));
        }
        Ok(next)
    }

    /// When the oldest unacked message becomes due for redelivery.
    fn next_redelivery(&self) -> Result<Option<Instant>, BrokerError> {
        Ok(self
            .in_flight
            .lock()
            .map_err(|_| BrokerError::Poisoned)?
            .iter()
            .map(|(at, _)| *at + self.redelivery_delay)
            .min())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<(), BrokerError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish(format!("injected failure on topic {topic}")));
        }

        let message = BrokerMessage::new(topic, key, payload);
        self.published
            .lock()
            .map_err(|_| BrokerError::Poisoned)?
            .push(message.clone());

        if self.subscribed.contains(topic) {
            self.enqueue(message)?;
        }
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        if self.fail_next_poll.swap(false, Ordering::SeqCst) {
            return Err(BrokerError::Poll("injected failure".to_string()));
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.take()? {
                return Ok(Some(message));
            }
            let wake = match self.next_redelivery()? {
                Some(due) => due.min(deadline),
                None => deadline,
            };
            // `notify_one` stores a permit, so a publish racing this check is not lost.
            let woken = tokio::time::timeout_at(wake, self.notify.notified()).await.is_ok();
            if !woken && wake >= deadline {
                return self.take();
            }
        }
    }

    async fn ack(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        if let Some(id) = &message.delivery_id {
            self.in_flight
                .lock()
                .map_err(|_| BrokerError::Poisoned)?
                .retain(|(_, m)| m.delivery_id.as_ref() != Some(id));
            self.acked
                .lock()
                .map_err(|_| BrokerError::Poisoned)?
                .push(id.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_times_out_when_nothing_is_queued() {
        let broker = InMemoryBroker::subscribed_to(["t"]);
        let polled = broker.poll(Duration::from_millis(10)).await.unwrap();
        assert!(polled.is_none());
    }

    #[tokio::test]
    async fn publish_on_subscribed_topic_is_delivered() {
        let broker = InMemoryBroker::subscribed_to(["t"]);
        broker.publish("t", b"k", b"{}").await.unwrap();
        broker.publish("other", b"k", b"{}").await.unwrap();

        let msg = broker.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(msg.topic, "t");
        assert_eq!(msg.key_str(), "k");
        broker.ack(&msg).await.unwrap();
        assert!(broker.poll(Duration::from_millis(10)).await.unwrap().is_none());
        assert_eq!(broker.published(None).len(), 2);
    }

    #[tokio::test]
    async fn injected_publish_failure_records_nothing() {
        let broker = InMemoryBroker::new();
        broker.fail_publishes(true);
        assert!(broker.publish("t", b"k", b"{}").await.is_err());
        assert!(broker.published(None).is_empty());
    }

    #[tokio::test]
    async fn waiting_poll_wakes_on_delivery() {
        let broker = std::sync::Arc::new(InMemoryBroker::subscribed_to(["t"]));
        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.publish("t", b"k", b"1").await.unwrap();
        });

        let msg = broker.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(msg.map(|m| m.payload), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_after_the_delay() {
        let broker = InMemoryBroker::subscribed_to(["t"]).with_redelivery_delay(Duration::from_millis(20));
        broker.publish("t", b"k", b"1").await.unwrap();

        let first = broker.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert!(broker.poll(Duration::from_millis(5)).await.unwrap().is_none());
        assert_eq!(broker.unacked(), 1);

        let again = broker.poll(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(again.delivery_id, first.delivery_id);

        broker.ack(&again).await.unwrap();
        assert_eq!(broker.unacked(), 0);
        assert!(broker.poll(Duration::from_millis(40)).await.unwrap().is_none());
    }
}
