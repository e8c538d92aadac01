//! Events strategy: publish to the topic registered for the event key.

use super::TransportStrategy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracemesh_core::{
    ApiItem, BoxFuture, DispatchErrorKind, Envelope, MessageQueue, MessageQueueExt, QueueError,
    Target, Transport,
};

/// Publishes the JSON payload and the full carrier (credential included).
///
/// Fire-and-forget with respect to consumers: the call completes when the
/// broker acknowledges the write.
#[derive(Default)]
pub struct EventStrategy {
    queues: HashMap<String, Arc<dyn MessageQueue>>,
}

impl EventStrategy {
    /// Strategy with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `queue` for its topic.
    pub fn register(&mut self, queue: Arc<dyn MessageQueue>) {
        self.queues.insert(queue.topic().to_string(), queue);
    }

    /// Topics with a registered queue, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.queues.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }
}

impl TransportStrategy for EventStrategy {
    fn transport(&self) -> Transport {
        Transport::Events
    }

    fn dispatch<'a>(
        &'a self,
        item: &'a ApiItem,
        target: &'a Target,
        envelope: Envelope,
    ) -> BoxFuture<'a, Result<Option<Value>, DispatchErrorKind>> {
        Box::pin(async move {
            let topic = item.events.get(&target.key).ok_or_else(|| {
                DispatchErrorKind::Resolution(format!(
                    "no event '{}' on service '{}'",
                    target.key, target.service
                ))
            })?;
            let queue = self.queues.get(topic).ok_or_else(|| {
                DispatchErrorKind::Resolution(format!("no queue for topic '{topic}'"))
            })?;

            queue
                .write_message(envelope.carrier.as_ref(), &envelope.body)
                .await
                .map_err(|e| match e {
                    QueueError::Serialization(msg) => DispatchErrorKind::Serialization(msg),
                    other => DispatchErrorKind::Transport(other.to_string()),
                })?;
            tracing::debug!(topic = %topic, "Event published");
            Ok(None)
        })
    }
}
