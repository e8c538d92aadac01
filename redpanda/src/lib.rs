//! Kafka/Redpanda message queue for tracemesh.
//!
//! This crate implements the [`MessageQueue`] trait from `tracemesh-core` on
//! top of rdkafka, so any Kafka-compatible broker (Redpanda, Apache Kafka,
//! MSK) can carry tracemesh events.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────── KafkaQueue ───────────────────────┐
//!            │  AdminClient (ensure_topic)   FutureProducer (write)      │
//!            │        one long-lived handle each, shared by callers      │
//!            └────────────────────────────────┬──────────────────────────┘
//!                                             │ open_reader(group)
//!                                             ▼
//!                                  KafkaReader (StreamConsumer)
//!                                  read() ─► QueueMessage
//!                                  commit() ─► offset + 1
//! ```
//!
//! The admin client and producer are created once and reused across writes.
//! librdkafka handles are internally synchronized, so concurrent writers do
//! not need an extra lock. [`KafkaQueue::close`](MessageQueue::close) flushes
//! the producer at shutdown.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - `enable.auto.commit` is off; offsets move only through
//!   [`QueueReader::commit`]
//! - if the process dies before commit, the message is redelivered
//! - topics have a single partition, so read order is publish order
//!
//! # Example
//!
//! ```no_run
//! use tracemesh_core::{MessageQueue, MessageQueueExt};
//! use tracemesh_redpanda::KafkaQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = KafkaQueue::builder()
//!     .brokers("localhost:9092")
//!     .topic("payments")
//!     .build()?;
//!
//! queue.ensure_topic().await?;
//! queue.write_message(None, &serde_json::json!({"amount": 42})).await?;
//!
//! let mut reader = queue.open_reader("payment-service")?;
//! let message = reader.read().await?;
//! reader.commit(&message)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracemesh_core::{
    BoxFuture, MessageQueue, Position, QueueError, QueueMessage, QueueReader, TOPIC_PARTITIONS,
    TOPIC_REPLICATION,
};

/// Minimum bytes a fetch waits for; small to favor latency.
pub const FETCH_MIN_BYTES: u32 = 10_000;

/// Maximum bytes per fetch; bounds reader memory.
pub const FETCH_MAX_BYTES: u32 = 10_000_000;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka-backed [`MessageQueue`] for one topic.
///
/// # Configuration
///
/// - **Brokers**: bootstrap servers (required)
/// - **Topic**: the topic this queue owns (required)
/// - **Producer acks**: `"0"`, `"1"` or `"all"` (default `"all"`)
/// - **Timeout**: producer send and admin operation timeout (default 5 s)
/// - **Offset reset**: where new consumer groups start (default `"earliest"`)
///
/// # Example
///
/// ```no_run
/// use tracemesh_redpanda::KafkaQueue;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = KafkaQueue::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .topic("orders")
///     .producer_acks("1")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaQueue {
    topic: String,
    brokers: String,
    admin: AdminClient<DefaultClientContext>,
    producer: FutureProducer,
    timeout: Duration,
    auto_offset_reset: String,
    closed: AtomicBool,
}

impl KafkaQueue {
    /// Create a queue with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if the clients cannot be
    /// created.
    pub fn new(brokers: &str, topic: &str) -> Result<Self, QueueError> {
        Self::builder().brokers(brokers).topic(topic).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> KafkaQueueBuilder {
        KafkaQueueBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Builder for [`KafkaQueue`].
#[derive(Default)]
pub struct KafkaQueueBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl KafkaQueueBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic this queue owns.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer send and admin operation timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where new consumer groups start reading: `"earliest"` or
    /// `"latest"`.
    ///
    /// Default: `"earliest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`KafkaQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if brokers or topic are not
    /// set, or a client cannot be created.
    pub fn build(self) -> Result<KafkaQueue, QueueError> {
        let brokers = self
            .brokers
            .ok_or_else(|| QueueError::ConnectionFailed("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .filter(|t| !t.is_empty())
            .ok_or_else(|| QueueError::ConnectionFailed("Topic not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .create()
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to create admin client: {e}")))?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .create()
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            acks = %acks,
            auto_offset_reset = %auto_offset_reset,
            "KafkaQueue created successfully"
        );

        Ok(KafkaQueue {
            topic,
            brokers,
            admin,
            producer,
            timeout,
            auto_offset_reset,
            closed: AtomicBool::new(false),
        })
    }
}

impl MessageQueue for KafkaQueue {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn ensure_topic(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            self.ensure_open()?;
            let new_topic = NewTopic::new(
                &self.topic,
                TOPIC_PARTITIONS,
                TopicReplication::Fixed(TOPIC_REPLICATION),
            );
            let options = AdminOptions::new().operation_timeout(Some(Timeout::After(self.timeout)));

            let results = self
                .admin
                .create_topics(&[new_topic], &options)
                .await
                .map_err(|e| QueueError::TopicAdmin {
                    topic: self.topic.clone(),
                    reason: e.to_string(),
                })?;

            for result in results {
                match result {
                    Ok(name) => tracing::info!(topic = %name, "Topic created"),
                    Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                        tracing::debug!(topic = %name, "Topic already exists");
                    },
                    Err((name, code)) => {
                        tracing::error!(topic = %name, error = %code, "Failed to create topic");
                        return Err(QueueError::TopicAdmin {
                            topic: name,
                            reason: code.to_string(),
                        });
                    },
                }
            }
            Ok(())
        })
    }

    fn write(&self, message: QueueMessage) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            self.ensure_open()?;
            let record = FutureRecord::<(), [u8]>::to(&self.topic)
                .payload(&message.payload)
                .headers(owned_headers(&message.headers));

            match self
                .producer
                .send(record, Timeout::After(self.timeout))
                .await
            {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition = partition,
                        offset = offset,
                        "Message written"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        error = %kafka_error,
                        "Failed to write message"
                    );
                    Err(QueueError::WriteFailed {
                        topic: self.topic.clone(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn open_reader(&self, group: &str) -> Result<Box<dyn QueueReader>, QueueError> {
        self.ensure_open()?;
        let reader_failed = |reason: String| QueueError::ReaderFailed {
            group: group.to_string(),
            reason,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("fetch.min.bytes", FETCH_MIN_BYTES.to_string())
            .set("fetch.max.bytes", FETCH_MAX_BYTES.to_string())
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| reader_failed(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| reader_failed(format!("Failed to subscribe: {e}")))?;

        tracing::info!(
            topic = %self.topic,
            consumer_group = %group,
            manual_commit = true,
            "Reader subscribed"
        );

        Ok(Box::new(KafkaReader {
            consumer,
            topic: self.topic.clone(),
        }))
    }

    fn close(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            let producer = self.producer.clone();
            let timeout = self.timeout;
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| QueueError::WriteFailed {
                    topic: self.topic.clone(),
                    reason: format!("flush task failed: {e}"),
                })?
                .map_err(|e| QueueError::WriteFailed {
                    topic: self.topic.clone(),
                    reason: format!("flush failed: {e}"),
                })?;
            tracing::info!(topic = %self.topic, "KafkaQueue closed");
            Ok(())
        })
    }
}

/// [`QueueReader`] backed by a `StreamConsumer` bound to one consumer group.
pub struct KafkaReader {
    consumer: StreamConsumer,
    topic: String,
}

impl QueueReader for KafkaReader {
    fn read(&mut self) -> BoxFuture<'_, Result<QueueMessage, QueueError>> {
        Box::pin(async move {
            // recv() is cancel-safe: an unreturned message stays buffered.
            match self.consumer.recv().await {
                Ok(message) => {
                    tracing::trace!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        "Received message"
                    );
                    Ok(to_queue_message(&message))
                },
                Err(e) => Err(QueueError::ReadFailed(e.to_string())),
            }
        })
    }

    fn commit(&mut self, message: &QueueMessage) -> Result<(), QueueError> {
        let Some(position) = message.position else {
            return Err(QueueError::CommitFailed(
                "message has no broker position".to_string(),
            ));
        };
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &self.topic,
                position.partition,
                Offset::Offset(position.offset + 1),
            )
            .map_err(|e| QueueError::CommitFailed(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| QueueError::CommitFailed(e.to_string()))
    }
}

fn owned_headers(headers: &[(String, Vec<u8>)]) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key,
                value: Some(value),
            })
        })
}

fn collect_headers<H: Headers>(headers: &H) -> Vec<(String, Vec<u8>)> {
    headers
        .iter()
        .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec).unwrap_or_default()))
        .collect()
}

fn to_queue_message(message: &BorrowedMessage<'_>) -> QueueMessage {
    QueueMessage {
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers: message.headers().map(collect_headers).unwrap_or_default(),
        position: Some(Position {
            partition: message.partition(),
            offset: message.offset(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn kafka_queue_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KafkaQueue>();
        assert_sync::<KafkaQueue>();
        assert_send::<KafkaReader>();
    }

    #[test]
    fn builder_requires_brokers_and_topic() {
        let err = KafkaQueue::builder().topic("t").build().err().unwrap();
        assert!(matches!(err, QueueError::ConnectionFailed(_)));

        let err = KafkaQueue::builder()
            .brokers("localhost:9092")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, QueueError::ConnectionFailed(_)));
    }

    #[test]
    fn headers_survive_conversion() {
        let headers = vec![
            ("span-context".to_string(), br#"{"version":1}"#.to_vec()),
            ("x-error".to_string(), b"boom".to_vec()),
        ];
        let owned = owned_headers(&headers);
        assert_eq!(owned.count(), 2);
        assert_eq!(collect_headers(&owned), headers);
    }

    #[tokio::test]
    async fn closed_queue_rejects_writes() {
        // Client creation is lazy; no broker is contacted here.
        let queue = KafkaQueue::new("localhost:9092", "closed-test").unwrap();
        queue.close().await.unwrap();
        let err = queue.write(QueueMessage::default()).await.unwrap_err();
        assert_eq!(err, QueueError::Closed);
        assert!(queue.open_reader("g").is_err());
    }
}
