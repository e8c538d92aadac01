//! In-memory message queue for fast, deterministic tests.
//!
//! [`InMemoryQueue`] keeps one append-only log per topic and one committed
//! offset per consumer group, mirroring a single-partition broker topic:
//! - readers of a new group start at the beginning of the log
//! - readers of an existing group start at its committed offset
//! - uncommitted messages are redelivered to the next reader of the group
//!
//! Failures can be injected for reads and writes.

#![allow(clippy::missing_panics_doc)] // Poisoned locks only happen after a test already panicked

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracemesh_core::{
    BoxFuture, MessageQueue, Position, QueueError, QueueMessage, QueueReader, TOPIC_PARTITIONS,
};

#[derive(Debug, Default)]
struct State {
    partitions: Option<i32>,
    ensure_calls: usize,
    log: Vec<QueueMessage>,
    committed: HashMap<String, i64>,
    failing_reads: usize,
    failing_writes: Option<String>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    appended: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory [`MessageQueue`] for one topic.
///
/// Clones share the same log.
///
/// # Example
///
/// ```
/// use tracemesh_core::{MessageQueue, MessageQueueExt};
/// use tracemesh_testing::InMemoryQueue;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryQueue::new("payments");
/// queue.write_message(None, &serde_json::json!({"amount": 42})).await?;
///
/// let mut reader = queue.open_reader("payment-service")?;
/// let message = reader.read().await?;
/// reader.commit(&message)?;
/// assert_eq!(queue.committed_offset("payment-service"), Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    topic: String,
    inner: Arc<Inner>,
}

impl InMemoryQueue {
    /// Empty queue for `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            inner: Arc::new(Inner::default()),
        }
    }

    /// Every message written so far, in write order.
    #[must_use]
    pub fn messages(&self) -> Vec<QueueMessage> {
        self.inner.lock().log.clone()
    }

    /// Number of messages written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().log.len()
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().log.is_empty()
    }

    /// Next offset to read for `group`, if the group has committed.
    #[must_use]
    pub fn committed_offset(&self, group: &str) -> Option<i64> {
        self.inner.lock().committed.get(group).copied()
    }

    /// Partition count, once the topic exists.
    #[must_use]
    pub fn partition_count(&self) -> Option<i32> {
        self.inner.lock().partitions
    }

    /// Number of `ensure_topic` calls.
    #[must_use]
    pub fn ensure_calls(&self) -> usize {
        self.inner.lock().ensure_calls
    }

    /// Make the next `count` reads fail with [`QueueError::ReadFailed`].
    pub fn fail_next_reads(&self, count: usize) {
        self.inner.lock().failing_reads = count;
    }

    /// Make every write fail with `reason`, or succeed again with `None`.
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.inner.lock().failing_writes = reason.map(str::to_string);
    }

    /// Whether `close` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl MessageQueue for InMemoryQueue {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn ensure_topic(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            let mut state = self.inner.lock();
            state.ensure_calls += 1;
            state.partitions.get_or_insert(TOPIC_PARTITIONS);
            Ok(())
        })
    }

    fn write(&self, mut message: QueueMessage) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            {
                let mut state = self.inner.lock();
                if state.closed {
                    return Err(QueueError::Closed);
                }
                if let Some(reason) = &state.failing_writes {
                    return Err(QueueError::WriteFailed {
                        topic: self.topic.clone(),
                        reason: reason.clone(),
                    });
                }
                let offset = i64::try_from(state.log.len()).unwrap_or(i64::MAX);
                message.position = Some(Position {
                    partition: 0,
                    offset,
                });
                state.log.push(message);
            }
            self.inner.appended.notify_waiters();
            Ok(())
        })
    }

    fn open_reader(&self, group: &str) -> Result<Box<dyn QueueReader>, QueueError> {
        let state = self.inner.lock();
        if state.closed {
            return Err(QueueError::ReaderFailed {
                group: group.to_string(),
                reason: "queue closed".to_string(),
            });
        }
        let cursor = state.committed.get(group).copied().unwrap_or(0);
        Ok(Box::new(InMemoryReader {
            inner: Arc::clone(&self.inner),
            group: group.to_string(),
            cursor,
        }))
    }

    fn close(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            self.inner.lock().closed = true;
            Ok(())
        })
    }
}

/// Reader over an [`InMemoryQueue`] log.
#[derive(Debug)]
pub struct InMemoryReader {
    inner: Arc<Inner>,
    group: String,
    cursor: i64,
}

impl QueueReader for InMemoryReader {
    fn read(&mut self) -> BoxFuture<'_, Result<QueueMessage, QueueError>> {
        Box::pin(async move {
            loop {
                // Registered before the check so an append in between is not missed.
                let appended = self.inner.appended.notified();
                {
                    let mut state = self.inner.lock();
                    if state.failing_reads > 0 {
                        state.failing_reads -= 1;
                        return Err(QueueError::ReadFailed("injected read failure".to_string()));
                    }
                    let next = usize::try_from(self.cursor)
                        .ok()
                        .and_then(|index| state.log.get(index).cloned());
                    if let Some(message) = next {
                        self.cursor += 1;
                        return Ok(message);
                    }
                }
                appended.await;
            }
        })
    }

    fn commit(&mut self, message: &QueueMessage) -> Result<(), QueueError> {
        let position = message
            .position
            .ok_or_else(|| QueueError::CommitFailed("message has no position".to_string()))?;
        let mut state = self.inner.lock();
        let committed = state.committed.entry(self.group.clone()).or_insert(0);
        *committed = (*committed).max(position.offset + 1);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use std::time::Duration;
    use tracemesh_core::MessageQueueExt;

    #[tokio::test]
    async fn ensure_topic_is_idempotent() {
        let queue = InMemoryQueue::new("t");
        assert_eq!(queue.partition_count(), None);
        queue.ensure_topic().await.unwrap();
        queue.ensure_topic().await.unwrap();
        assert_eq!(queue.partition_count(), Some(1));
        assert_eq!(queue.ensure_calls(), 2);
    }

    #[tokio::test]
    async fn uncommitted_messages_are_redelivered() {
        let queue = InMemoryQueue::new("t");
        for n in 0..3 {
            queue.write_message(None, &n).await.unwrap();
        }

        let mut reader = queue.open_reader("g").unwrap();
        let first = reader.read().await.unwrap();
        reader.commit(&first).unwrap();
        let _second = reader.read().await.unwrap();
        drop(reader);

        let mut reader = queue.open_reader("g").unwrap();
        let again = reader.read().await.unwrap();
        assert_eq!(again.decode::<i32>().unwrap(), 1);
    }

    #[tokio::test]
    async fn read_waits_for_append() {
        let queue = InMemoryQueue::new("t");
        let mut reader = queue.open_reader("g").unwrap();

        let writer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.write_message(None, &"late").await.unwrap();
        });

        let message = tokio::time::timeout(Duration::from_secs(1), reader.read())
            .await
            .expect("append wakes the reader")
            .unwrap();
        assert_eq!(message.decode::<String>().unwrap(), "late");
    }

    #[tokio::test]
    async fn injected_failures() {
        let queue = InMemoryQueue::new("t");
        queue.fail_writes(Some("broker down"));
        assert!(matches!(
            queue.write_message(None, &1).await,
            Err(QueueError::WriteFailed { .. })
        ));
        queue.fail_writes(None);
        queue.write_message(None, &1).await.unwrap();

        queue.fail_next_reads(1);
        let mut reader = queue.open_reader("g").unwrap();
        assert!(matches!(reader.read().await, Err(QueueError::ReadFailed(_))));
        assert!(reader.read().await.is_ok());
    }
}
