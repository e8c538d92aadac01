//! Integration tests for [`KafkaQueue`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Topic creation is idempotent and keeps a single partition
//! - Publish/drain order with headers intact
//! - At-least-once redelivery of uncommitted messages
//! - Independent consumer groups
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take 15-60 seconds each:
//! ```bash
//! cargo test -p tracemesh-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use rdkafka::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use tracemesh_core::{
    MessageQueue, MessageQueueExt, QueueMessage, QueueReader, SPAN_CONTEXT_HEADER, TraceCarrier,
};
use tracemesh_redpanda::KafkaQueue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Payment {
    amount: i32,
}

const TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
const SPAN: &str = "00f067aa0ba902b7";

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "false")
        .start()
        .await
        .expect("Failed to start Kafka container");
    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

/// Create the topic, retrying while the broker finishes starting.
async fn ready_queue(brokers: &str, topic: &str) -> KafkaQueue {
    let queue = KafkaQueue::builder()
        .brokers(brokers)
        .topic(topic)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create queue");
    for attempt in 1..=60 {
        if queue.ensure_topic().await.is_ok() {
            // Let topic metadata propagate.
            tokio::time::sleep(Duration::from_secs(1)).await;
            return queue;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "Kafka failed to become ready");
    }
    queue
}

fn partition_count(brokers: &str, topic: &str) -> usize {
    let consumer: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .create()
        .expect("metadata consumer");
    let metadata = consumer
        .fetch_metadata(Some(topic), Duration::from_secs(10))
        .expect("metadata");
    metadata
        .topics()
        .iter()
        .find(|t| t.name() == topic)
        .map(|t| t.partitions().len())
        .expect("topic in metadata")
}

async fn read_n(reader: &mut Box<dyn QueueReader>, n: usize, commit: bool) -> Vec<QueueMessage> {
    let mut received = Vec::with_capacity(n);
    tokio::time::timeout(Duration::from_secs(30), async {
        while received.len() < n {
            let message = reader.read().await.expect("read");
            if commit {
                reader.commit(&message).expect("commit");
            }
            received.push(message);
        }
    })
    .await
    .expect("Timeout waiting for messages");
    received
}

#[tokio::test]
#[ignore]
async fn ensure_topic_twice_keeps_single_partition() {
    let (_kafka, brokers) = start_kafka().await;
    let queue = ready_queue(&brokers, "ensure-twice").await;

    queue
        .ensure_topic()
        .await
        .expect("second ensure_topic must succeed");

    assert_eq!(partition_count(&brokers, "ensure-twice"), 1);
}

#[tokio::test]
#[ignore]
async fn publish_n_then_drain_preserves_order_and_headers() {
    let (_kafka, brokers) = start_kafka().await;
    let queue = ready_queue(&brokers, "ordered").await;
    let carrier = TraceCarrier::new(TRACE, SPAN, true);

    for amount in 0..20 {
        queue
            .write_message(Some(&carrier), &Payment { amount })
            .await
            .expect("write");
    }

    let mut reader = queue.open_reader("drain-group").expect("reader");
    let messages = read_n(&mut reader, 20, true).await;

    let amounts: Vec<i32> = messages
        .iter()
        .map(|m| m.decode::<Payment>().expect("payload").amount)
        .collect();
    assert_eq!(amounts, (0..20).collect::<Vec<_>>());

    for message in &messages {
        assert!(message.header(SPAN_CONTEXT_HEADER).is_some());
        assert_eq!(message.trace_carrier().unwrap(), Some(carrier.clone()));
    }
    queue.close().await.expect("close");
}

#[tokio::test]
#[ignore]
async fn uncommitted_messages_are_redelivered() {
    let (_kafka, brokers) = start_kafka().await;
    let queue = ready_queue(&brokers, "redelivery").await;

    for amount in [1, 2, 3] {
        queue
            .write_message(None, &Payment { amount })
            .await
            .expect("write");
    }

    {
        let mut reader = queue.open_reader("redelivery-group").expect("reader");
        let first = read_n(&mut reader, 1, true).await;
        assert_eq!(first[0].decode::<Payment>().unwrap().amount, 1);
        // Read the second message but do not commit it.
        let _ = read_n(&mut reader, 1, false).await;
        // Async commits need a moment before the consumer leaves the group.
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let mut reader = queue.open_reader("redelivery-group").expect("reader");
    let again = read_n(&mut reader, 2, true).await;
    let amounts: Vec<i32> = again
        .iter()
        .map(|m| m.decode::<Payment>().unwrap().amount)
        .collect();
    assert_eq!(amounts, vec![2, 3]);
}

#[tokio::test]
#[ignore]
async fn consumer_groups_have_independent_offsets() {
    let (_kafka, brokers) = start_kafka().await;
    let queue = ready_queue(&brokers, "fanout").await;

    for amount in 0..5 {
        queue
            .write_message(None, &Payment { amount })
            .await
            .expect("write");
    }

    let mut billing = queue.open_reader("billing").expect("reader");
    let mut audit = queue.open_reader("audit").expect("reader");

    assert_eq!(read_n(&mut billing, 5, true).await.len(), 5);
    assert_eq!(read_n(&mut audit, 5, true).await.len(), 5);
}

#[tokio::test]
#[ignore]
async fn write_to_unreachable_broker_fails() {
    let queue = KafkaQueue::builder()
        .brokers("127.0.0.1:1")
        .topic("nowhere")
        .timeout(Duration::from_millis(500))
        .build()
        .expect("client creation is lazy");

    let err = queue
        .write_message(None, &Payment { amount: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, tracemesh_core::QueueError::WriteFailed { .. }));
}
