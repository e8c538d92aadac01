//! Message-queue abstraction over a single broker topic.
//!
//! A [`MessageQueue`] owns one topic: it can make sure the topic exists,
//! write messages with an embedded trace carrier, and open
//! [`QueueReader`]s bound to a consumer group.
//!
//! # Wire format
//!
//! - payload: JSON-encoded typed body
//! - headers: key/value pairs; [`SPAN_CONTEXT_HEADER`] carries the JSON
//!   [`TraceCarrier`]
//!
//! # Delivery
//!
//! At-least-once per consumer group up to dispatch. Readers commit an offset
//! only when told to, and the consumer does so once the message has been
//! handed to its handler task, before the handler finishes. A crash before
//! commit causes redelivery, so handlers must be idempotent; a crash after
//! commit but mid-handler loses the message.
//!
//! # Dyn Compatibility
//!
//! Like the other traits in this crate, these return boxed futures instead of
//! using `async fn`, so they can live behind `Arc<dyn MessageQueue>`.

use crate::carrier::{SPAN_CONTEXT_HEADER, TraceCarrier, TraceContextError};
use crate::error::QueueError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future used by the dyn-compatible traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Topics are single-partition: one logical stream per topic.
pub const TOPIC_PARTITIONS: i32 = 1;

/// Topics are created with a single replica.
pub const TOPIC_REPLICATION: i32 = 1;

/// Where a message sits in the broker log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    /// Partition number.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// One message: payload bytes plus headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMessage {
    /// JSON payload.
    pub payload: Vec<u8>,
    /// Header pairs, in write order.
    pub headers: Vec<(String, Vec<u8>)>,
    /// Log position, set on messages returned by a reader.
    pub position: Option<Position>,
}

impl QueueMessage {
    /// Encode a typed payload and optional carrier into a message.
    ///
    /// Both values are serialized before anything is returned, so a failure
    /// never leaves a partially built message behind.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] if the payload cannot be encoded.
    pub fn encode<T: Serialize + ?Sized>(
        carrier: Option<&TraceCarrier>,
        payload: &T,
    ) -> Result<Self, QueueError> {
        let payload =
            serde_json::to_vec(payload).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let mut headers = Vec::with_capacity(1);
        if let Some(carrier) = carrier {
            headers.push((SPAN_CONTEXT_HEADER.to_string(), carrier.embed()));
        }
        Ok(Self {
            payload,
            headers,
            position: None,
        })
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// First header value for `key`.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Recover the trace carrier from the `span-context` header.
    ///
    /// A missing header is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`TraceContextError`] if the header is present but malformed.
    pub fn trace_carrier(&self) -> Result<Option<TraceCarrier>, TraceContextError> {
        self.header(SPAN_CONTEXT_HEADER)
            .map_or(Ok(None), TraceCarrier::recover)
    }

    /// Decode the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_slice(&self.payload).map_err(|e| QueueError::Serialization(e.to_string()))
    }
}

/// Owner of one broker topic and of the long-lived broker handle.
pub trait MessageQueue: Send + Sync {
    /// Topic this queue writes to and reads from.
    fn topic(&self) -> &str;

    /// Create the topic with [`TOPIC_PARTITIONS`] partitions and
    /// [`TOPIC_REPLICATION`] replicas if it does not exist.
    ///
    /// Idempotent: an existing topic is not an error and is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::TopicAdmin`] if the broker refuses the request.
    fn ensure_topic(&self) -> BoxFuture<'_, Result<(), QueueError>>;

    /// Write one already-encoded message, waiting for the broker's
    /// acknowledgement (not for any consumer).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::WriteFailed`] if the broker does not accept it.
    fn write(&self, message: QueueMessage) -> BoxFuture<'_, Result<(), QueueError>>;

    /// Open a reader bound to `group`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ReaderFailed`] if the reader cannot subscribe.
    fn open_reader(&self, group: &str) -> Result<Box<dyn QueueReader>, QueueError>;

    /// Flush and release the shared broker handle at shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if pending writes could not be flushed.
    fn close(&self) -> BoxFuture<'_, Result<(), QueueError>>;
}

/// Pull-based, blocking reader bound to a consumer group.
pub trait QueueReader: Send {
    /// Wait for the next message.
    ///
    /// The returned future is cancel-safe: dropping it before completion does
    /// not lose a message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ReadFailed`] on fetch failures. These are
    /// transient; callers may read again.
    fn read(&mut self) -> BoxFuture<'_, Result<QueueMessage, QueueError>>;

    /// Record `message` as consumed for this reader's group.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::CommitFailed`] if the offset cannot be stored.
    fn commit(&mut self, message: &QueueMessage) -> Result<(), QueueError>;
}

/// Typed helpers on top of [`MessageQueue`].
pub trait MessageQueueExt: MessageQueue {
    /// Serialize `payload` and `carrier`, then write one message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] before any broker I/O if encoding
    /// fails, otherwise whatever [`MessageQueue::write`] returns.
    fn write_message<'a, T>(
        &'a self,
        carrier: Option<&TraceCarrier>,
        payload: &T,
    ) -> BoxFuture<'a, Result<(), QueueError>>
    where
        T: Serialize + ?Sized,
    {
        match QueueMessage::encode(carrier, payload) {
            Ok(message) => self.write(message),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}

impl<Q: MessageQueue + ?Sized> MessageQueueExt for Q {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Payment {
        amount: i32,
    }

    #[test]
    fn encode_embeds_carrier_header() {
        let carrier = TraceCarrier::new("4bf92f3577b34da6a3ce929d0e0e4736", "00f067aa0ba902b7", true);
        let msg = QueueMessage::encode(Some(&carrier), &Payment { amount: 42 }).unwrap();

        assert_eq!(msg.payload, br#"{"amount":42}"#);
        assert_eq!(msg.trace_carrier().unwrap(), Some(carrier));
        assert_eq!(msg.decode::<Payment>().unwrap(), Payment { amount: 42 });
    }

    #[test]
    fn missing_header_is_no_parent() {
        let msg = QueueMessage::encode(None, &Payment { amount: 1 }).unwrap();
        assert!(msg.headers.is_empty());
        assert_eq!(msg.trace_carrier().unwrap(), None);
    }

    #[test]
    fn malformed_header_is_reported() {
        let msg = QueueMessage::default().with_header(SPAN_CONTEXT_HEADER, b"garbage".to_vec());
        assert!(msg.trace_carrier().is_err());
    }

    #[test]
    fn encode_failure_is_serialization_error() {
        use std::collections::HashMap;
        // Non-string map keys cannot be encoded as JSON objects.
        let mut bad = HashMap::new();
        bad.insert((1, 2), "x");
        let err = QueueMessage::encode(None, &bad).unwrap_err();
        assert!(matches!(err, QueueError::Serialization(_)));
    }
}
