//! Event consumer core.
//!
//! An [`EventController`] turns one topic into a stream of concurrently
//! dispatched handler invocations for a fixed consumer group.
//!
//! # State machine
//!
//! ```text
//!  Idle ──listen()──► Reading ──message──► Dispatching ──spawned──► Reading
//!                        │  ▲                                          │
//!                        │  └──── read error (logged, backoff) ────────┘
//!                        │
//!                   cancel token
//!                        │
//!                        ▼
//!                 Draining (ShutdownMode::Drain) ──► Stopped
//!                        └──────── ShutdownMode::Detach ──────────────► Stopped
//! ```
//!
//! # Guarantees
//!
//! - Read order is broker order; handler completion order is not.
//! - A pending read never delays cancellation: reads and permit acquisition
//!   race the cancellation token.
//! - Cancellation is never forced on running handlers; each [`Delivery`]
//!   carries a child token they may observe.
//! - An offset is committed once its message holds an in-flight permit,
//!   right before the handler task is spawned. Delivery is at-least-once up
//!   to dispatch; a crash while the handler runs loses the message.
//! - A missing or malformed `span-context` header never stops a message: the
//!   handler runs under a root span instead.

use crate::backoff::Backoff;
use crate::metrics::{ConsumerMetrics, RequestMeter};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracemesh_core::{BoxFuture, MessageQueue, QueueError, QueueMessage, TraceCarrier};
use tracing::{Instrument, Span};

/// Header naming the handler error on dead-lettered messages.
pub const DEAD_LETTER_ERROR_HEADER: &str = "x-error";

/// Header naming the consumer group on dead-lettered messages.
pub const DEAD_LETTER_GROUP_HEADER: &str = "x-consumer-group";

/// Lifecycle state of an [`EventController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Constructed, not listening.
    Idle,
    /// Waiting for the next message.
    Reading,
    /// Handing a message to its handler task.
    Dispatching,
    /// Cancelled; waiting for in-flight handlers.
    Draining,
    /// Loop exited.
    Stopped,
}

/// What `listen` does with in-flight handlers after cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Wait for in-flight handlers, at most this long.
    Drain(Duration),
    /// Return immediately; handlers keep running in the background.
    Detach,
}

impl Default for ShutdownMode {
    fn default() -> Self {
        Self::Drain(Duration::from_secs(30))
    }
}

/// Tuning for [`EventController::listen`].
#[derive(Clone)]
pub struct ListenOptions {
    /// Maximum handlers running at once.
    pub max_in_flight: usize,
    /// Behaviour after cancellation.
    pub shutdown: ShutdownMode,
    /// Delay schedule after consecutive read errors.
    pub read_error_backoff: Backoff,
    /// Where failed messages are republished, if anywhere.
    pub dead_letter: Option<Arc<dyn MessageQueue>>,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            shutdown: ShutdownMode::default(),
            read_error_backoff: Backoff::new(Duration::from_millis(100)),
            dead_letter: None,
        }
    }
}

impl std::fmt::Debug for ListenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenOptions")
            .field("max_in_flight", &self.max_in_flight)
            .field("shutdown", &self.shutdown)
            .field("read_error_backoff", &self.read_error_backoff)
            .field("dead_letter", &self.dead_letter.as_ref().map(|q| q.topic().to_string()))
            .finish()
    }
}

/// Observability collaborators exposed to handlers.
#[derive(Debug, Clone)]
pub struct Telemetry {
    service: String,
    meter: RequestMeter,
}

impl Telemetry {
    /// Telemetry for `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        let service = service.into();
        Self {
            meter: RequestMeter::new(service.clone()),
            service,
        }
    }

    /// Service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Request counter.
    #[must_use]
    pub const fn meter(&self) -> &RequestMeter {
        &self.meter
    }
}

/// One message handed to a handler.
#[derive(Debug)]
pub struct Delivery {
    /// The message as read from the broker.
    pub message: QueueMessage,
    /// Carrier recovered from the `span-context` header.
    pub carrier: Option<TraceCarrier>,
    /// `handle_message` span, parented on the carrier when present.
    pub span: Span,
    /// Cancelled when the controller is cancelled.
    pub cancel: CancellationToken,
    /// Service telemetry.
    pub telemetry: Telemetry,
}

impl Delivery {
    /// Decode the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        self.message.decode()
    }

    /// Bearer credential forwarded by the publisher.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.carrier.as_ref().and_then(|c| c.credential.as_deref())
    }
}

/// Per-message handler.
///
/// Implemented for any `Fn(Delivery) -> impl Future<Output = anyhow::Result<()>>`.
pub trait EventHandler: Send + Sync + 'static {
    /// Process one delivery.
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(self(delivery))
    }
}

/// Read loop bound to one queue and one consumer group.
pub struct EventController {
    queue: Arc<dyn MessageQueue>,
    group: String,
    telemetry: Telemetry,
    options: ListenOptions,
    state: watch::Sender<ControllerState>,
}

impl EventController {
    /// Controller with default [`ListenOptions`].
    #[must_use]
    pub fn new(queue: Arc<dyn MessageQueue>, group: impl Into<String>, telemetry: Telemetry) -> Self {
        Self::with_options(queue, group, telemetry, ListenOptions::default())
    }

    /// Controller with explicit options.
    #[must_use]
    pub fn with_options(
        queue: Arc<dyn MessageQueue>,
        group: impl Into<String>,
        telemetry: Telemetry,
        options: ListenOptions,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::Idle);
        Self {
            queue,
            group: group.into(),
            telemetry,
            options,
            state,
        }
    }

    /// Consumer group this controller reads for.
    #[must_use]
    pub fn consumer_group_id(&self) -> &str {
        &self.group
    }

    /// Telemetry handed to every delivery.
    #[must_use]
    pub const fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Options in effect.
    #[must_use]
    pub const fn options(&self) -> &ListenOptions {
        &self.options
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn current_state(&self) -> ControllerState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ControllerState) {
        self.state.send_replace(state);
    }

    /// Run the read loop until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ReaderFailed`] only when the reader cannot be
    /// opened. Read, commit and handler failures are logged and the loop
    /// continues.
    pub async fn listen<H: EventHandler>(
        &self,
        cancel: CancellationToken,
        handler: H,
    ) -> Result<(), QueueError> {
        let mut reader = self.queue.open_reader(&self.group)?;
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        let permits = Arc::new(Semaphore::new(self.options.max_in_flight.max(1)));
        let tracker = TaskTracker::new();
        let mut read_failures: u32 = 0;

        tracing::info!(
            topic = %self.queue.topic(),
            consumer_group = %self.group,
            max_in_flight = self.options.max_in_flight,
            "Listening"
        );
        self.set_state(ControllerState::Reading);

        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                read = reader.read() => read,
            };
            let message = match read {
                Ok(message) => {
                    read_failures = 0;
                    message
                },
                Err(e) => {
                    ConsumerMetrics::record_read_error(&self.group);
                    let delay = self.options.read_error_backoff.delay_for_attempt(read_failures);
                    read_failures = read_failures.saturating_add(1);
                    tracing::error!(
                        consumer_group = %self.group,
                        error = %e,
                        consecutive_failures = read_failures,
                        "Read failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => continue,
                    }
                },
            };

            // Uncommitted on cancellation, so the message is redelivered.
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            self.set_state(ControllerState::Dispatching);
            if let Err(e) = reader.commit(&message) {
                tracing::warn!(
                    consumer_group = %self.group,
                    error = %e,
                    "Failed to commit offset (message may be redelivered)"
                );
            }
            let delivery = self.prepare(message, &cancel);
            let dead_letter = self.dead_letter_copy(&delivery.message);
            let span = delivery.span.clone();
            let handler = Arc::clone(&handler);
            let group = self.group.clone();
            ConsumerMetrics::record_consume(&group);

            tracker.spawn(
                async move {
                    let result = handler.handle(delivery).await;
                    ConsumerMetrics::record_handler_done(&group, result.is_err());
                    if let Err(e) = result {
                        tracing::error!(consumer_group = %group, error = %e, "Handler failed");
                        if let Some((queue, message)) = dead_letter {
                            publish_dead_letter(queue.as_ref(), message, &group, &e).await;
                        }
                    }
                    drop(permit);
                }
                .instrument(span),
            );
            self.set_state(ControllerState::Reading);
        }

        tracker.close();
        match self.options.shutdown {
            ShutdownMode::Drain(timeout) => {
                self.set_state(ControllerState::Draining);
                tracing::info!(in_flight = tracker.len(), "Draining in-flight handlers");
                if tokio::time::timeout(timeout, tracker.wait()).await.is_err() {
                    tracing::warn!(
                        in_flight = tracker.len(),
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "Drain timed out, detaching remaining handlers"
                    );
                }
            },
            ShutdownMode::Detach => {
                tracing::info!(in_flight = tracker.len(), "Detaching in-flight handlers");
            },
        }
        self.set_state(ControllerState::Stopped);
        tracing::info!(consumer_group = %self.group, "Stopped listening");
        Ok(())
    }

    fn prepare(&self, message: QueueMessage, cancel: &CancellationToken) -> Delivery {
        let span = tracing::info_span!(
            "handle_message",
            otel.name = "handle_message",
            topic = %self.queue.topic(),
            consumer_group = %self.group,
            partition = message.position.map(|p| p.partition),
            offset = message.position.map(|p| p.offset),
        );
        let carrier = match message.trace_carrier() {
            Ok(carrier) => carrier,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed trace context");
                None
            },
        };
        if let Some(carrier) = &carrier {
            carrier.attach_to(&span);
        }
        Delivery {
            message,
            carrier,
            span,
            cancel: cancel.child_token(),
            telemetry: self.telemetry.clone(),
        }
    }

    fn dead_letter_copy(&self, message: &QueueMessage) -> Option<(Arc<dyn MessageQueue>, QueueMessage)> {
        self.options.dead_letter.as_ref().map(|queue| {
            let copy = QueueMessage {
                payload: message.payload.clone(),
                headers: message.headers.clone(),
                position: None,
            };
            (Arc::clone(queue), copy)
        })
    }
}

async fn publish_dead_letter(
    queue: &dyn MessageQueue,
    message: QueueMessage,
    group: &str,
    error: &anyhow::Error,
) {
    let message = message
        .with_header(DEAD_LETTER_ERROR_HEADER, error.to_string())
        .with_header(DEAD_LETTER_GROUP_HEADER, group);
    match queue.write(message).await {
        Ok(()) => {
            ConsumerMetrics::record_dead_letter(group);
            tracing::info!(topic = %queue.topic(), "Message dead-lettered");
        },
        Err(e) => tracing::error!(
            topic = %queue.topic(),
            error = %e,
            "Failed to dead-letter message; it is dropped"
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ListenOptions::default();
        assert_eq!(options.max_in_flight, 64);
        assert_eq!(options.shutdown, ShutdownMode::Drain(Duration::from_secs(30)));
        assert_eq!(options.read_error_backoff.initial_delay(), Duration::from_millis(100));
        assert!(options.dead_letter.is_none());
    }

    #[test]
    fn telemetry_exposes_service_meter() {
        let telemetry = Telemetry::new("payment");
        assert_eq!(telemetry.service(), "payment");
        assert_eq!(telemetry.meter().service(), "payment");
    }

    #[test]
    fn controller_reports_its_configuration() {
        let options = ListenOptions {
            max_in_flight: 2,
            shutdown: ShutdownMode::Detach,
            ..ListenOptions::default()
        };
        let queue = Arc::new(tracemesh_testing::InMemoryQueue::new("payments"));
        let controller = EventController::with_options(queue, "payment-service", Telemetry::new("payment"), options);

        assert_eq!(controller.consumer_group_id(), "payment-service");
        assert_eq!(controller.options().max_in_flight, 2);
        assert_eq!(controller.options().shutdown, ShutdownMode::Detach);
        assert_eq!(controller.current_state(), ControllerState::Idle);
    }
}
