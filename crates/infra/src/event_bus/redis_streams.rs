//! Redis Streams-backed broker (durable, at-least-once delivery).
//!
//! ## Architecture
//!
//! - **Stream per topic**: `{prefix}{topic}` (default prefix `catalog:`)
//! - **Entry fields**: `key` (message key bytes) and `payload` (message bytes)
//! - **Consumer group**: one per consuming service, created with `MKSTREAM`
//! - **Pending first**: entries delivered to this consumer but never acked
//!   (e.g. before a crash) are re-read before new entries
//! - **Re-armed pending scan**: the pending list is scanned again whenever a
//!   blocking read comes back empty or the redelivery interval has passed since
//!   the last scan, so entries left unacked after a transient failure are retried

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use tracing::{debug, instrument, warn};

use catalog_events::{Broker, BrokerError, BrokerMessage};

const DEFAULT_STREAM_PREFIX: &str = "catalog:";
const DEFAULT_REDELIVERY_INTERVAL: Duration = Duration::from_secs(5);

/// Progress through this consumer's pending entries list.
#[derive(Debug, Default)]
struct PendingScan {
    /// Last pending entry id re-read; `None` while no scan is in progress.
    cursor: Option<String>,
    /// When the last scan found nothing more.
    finished_at: Option<Instant>,
}

impl PendingScan {
    fn starting() -> Self {
        Self {
            cursor: Some("0".to_string()),
            finished_at: None,
        }
    }

    fn rearm(&mut self) {
        self.cursor = Some("0".to_string());
    }

    /// Cursor to read pending entries from, re-arming once `interval` has passed.
    fn next_cursor(&mut self, interval: Duration, now: Instant) -> Option<String> {
        if self.cursor.is_none()
            && self
                .finished_at
                .is_some_and(|at| now.duration_since(at) >= interval)
        {
            self.rearm();
        }
        self.cursor.clone()
    }

    fn advance(&mut self, delivered: Option<&str>, now: Instant) {
        match delivered {
            Some(id) => self.cursor = Some(id.to_string()),
            None => {
                self.cursor = None;
                self.finished_at = Some(now);
            }
        }
    }
}

#[derive(Clone)]
pub struct RedisStreamsBroker {
    conn: ConnectionManager,
    prefix: String,
    group: String,
    consumer: String,
    topics: Vec<String>,
    pending: Arc<Mutex<PendingScan>>,
    redelivery_interval: Duration,
}

impl core::fmt::Debug for RedisStreamsBroker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamsBroker")
            .field("prefix", &self.prefix)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsBroker {
    /// Connect and make sure a consumer group exists on every subscribed topic.
    ///
    /// Any failure here is a setup failure; callers are expected to abort.
    pub async fn connect(
        redis_url: &str,
        group: impl Into<String>,
        consumer: impl Into<String>,
        topics: &[&str],
    ) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| BrokerError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let broker = Self {
            conn,
            prefix: DEFAULT_STREAM_PREFIX.to_string(),
            group: group.into(),
            consumer: consumer.into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            pending: Arc::new(Mutex::new(PendingScan::starting())),
            redelivery_interval: DEFAULT_REDELIVERY_INTERVAL,
        };
        broker.ensure_consumer_groups().await?;
        Ok(broker)
    }

    /// Minimum time between pending scans while the streams stay busy.
    pub fn with_redelivery_interval(mut self, interval: Duration) -> Self {
        self.redelivery_interval = interval;
        self
    }

    fn stream_key(&self, topic: &str) -> String {
        format!("{}{}", self.prefix, topic)
    }

    /// Create the consumer group on each stream (idempotent).
    async fn ensure_consumer_groups(&self) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        for topic in &self.topics {
            // "0" makes a fresh group see entries written before it existed.
            let created: redis::RedisResult<()> = conn
                .xgroup_create_mkstream(self.stream_key(topic), &self.group, "0")
                .await;
            match created {
                Ok(()) => debug!(topic = %topic, group = %self.group, "consumer group created"),
                Err(e) if e.code() == Some("BUSYGROUP") => {}
                Err(e) => return Err(BrokerError::Subscribe(format!("XGROUP CREATE {topic}: {e}"))),
            }
        }
        Ok(())
    }

    fn to_message(&self, stream: &str, entry: &StreamId) -> BrokerMessage {
        let topic = stream.strip_prefix(&self.prefix).unwrap_or(stream);
        let key: Vec<u8> = entry.get("key").unwrap_or_default();
        let payload: Vec<u8> = entry.get("payload").unwrap_or_default();
        let mut message = BrokerMessage::new(topic, key, payload);
        message.delivery_id = Some(entry.id.clone());
        message
    }

    async fn read_group(&self, start: &str, block: Option<Duration>) -> Result<Option<BrokerMessage>, BrokerError> {
        let keys: Vec<String> = self.topics.iter().map(|t| self.stream_key(t)).collect();
        let ids: Vec<&str> = keys.iter().map(|_| start).collect();
        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);
        if let Some(block) = block {
            options = options.block(block.as_millis() as usize);
        }

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(keys.as_slice(), ids.as_slice(), &options)
            .await
            .map_err(|e| BrokerError::Poll(format!("XREADGROUP failed: {e}")))?;

        Ok(reply.and_then(|reply| {
            reply.keys.iter().find_map(|stream| {
                stream
                    .ids
                    .first()
                    .map(|entry| self.to_message(&stream.key, entry))
            })
        }))
    }
}

#[async_trait]
impl Broker for RedisStreamsBroker {
    #[instrument(skip(self, key, payload), fields(stream = %self.stream_key(topic)), err)]
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd(self.stream_key(topic), "*", &[("key", key), ("payload", payload)])
            .await
            .map_err(|e| BrokerError::Publish(format!("XADD failed: {e}")))?;
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        if self.topics.is_empty() {
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }

        let cursor = self
            .pending
            .lock()
            .map_err(|_| BrokerError::Poisoned)?
            .next_cursor(self.redelivery_interval, Instant::now());
        if let Some(cursor) = cursor {
            let next = self.read_group(&cursor, None).await?;
            self.pending
                .lock()
                .map_err(|_| BrokerError::Poisoned)?
                .advance(next.as_ref().and_then(|m| m.delivery_id.as_deref()), Instant::now());
            if let Some(message) = next {
                warn!(
                    topic = %message.topic,
                    delivery_id = ?message.delivery_id,
                    "redelivering unacknowledged entry"
                );
                return Ok(Some(message));
            }
        }

        let next = self.read_group(">", Some(timeout)).await?;
        if next.is_none() {
            // Idle: anything still pending is retried on the next poll.
            self.pending.lock().map_err(|_| BrokerError::Poisoned)?.rearm();
        }
        Ok(next)
    }

    async fn ack(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let Some(id) = &message.delivery_id else {
            return Ok(());
        };
        let mut conn = self.conn.clone();
        let _: u64 = conn
            .xack(self.stream_key(&message.topic), &self.group, &[id])
            .await
            .map_err(|e| BrokerError::Poll(format!("XACK failed: {e}")))?;
        Ok(())
    }
}
