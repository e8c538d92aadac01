//! Payment service: consumes `process-payment` events and answers payment
//! lookups.
//!
//! Payments arrive only through the broker. Each event is handled by
//! [`handler`] under the `handle_message` span recovered from the event, so
//! the payment shows up in the same trace as the gateway request that
//! published it. Lookups are served over gRPC by [`rpc_router`] as
//! `/payment.Payment/GetPaymentInfo`.

use crate::proto::{GetPaymentInfoRequest, PaymentMessage, ProcessPaymentMessage};
use axum::Router;
use axum::routing::get;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tonic::server::NamedService;
use tracemesh_runtime::{ControllerState, Delivery, EventHandler, RpcRequest, RpcRouter};
use tracemesh_web::handlers::{consumer_readiness, health_check};

/// Status of a processed payment.
pub const STATUS_PROCESSED: &str = "processed";

/// Operation name counted for every consumed event.
pub const PROCESS_PAYMENT: &str = "process-payment";

/// Errors from payment operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// No payment exists for the order.
    #[error("no payment for order {0}")]
    NotFound(String),

    /// The payment request is unusable.
    #[error("invalid payment: {0}")]
    Invalid(String),
}

impl From<PaymentError> for tonic::Status {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotFound(_) => Self::not_found(err.to_string()),
            PaymentError::Invalid(_) => Self::invalid_argument(err.to_string()),
        }
    }
}

/// Payments keyed by order id.
#[derive(Default)]
pub struct PaymentService {
    payments: Mutex<HashMap<String, PaymentMessage>>,
}

impl PaymentService {
    /// Empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the payment of an order.
    ///
    /// Idempotent per order: a redelivered event returns the stored payment.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Invalid`] for a missing order id or a
    /// non-positive amount.
    pub fn process_payment(&self, request: ProcessPaymentMessage) -> Result<PaymentMessage, PaymentError> {
        if request.order_id.is_empty() {
            return Err(PaymentError::Invalid("order id is empty".to_string()));
        }
        if request.amount <= 0 {
            return Err(PaymentError::Invalid(format!("amount {} is not positive", request.amount)));
        }
        let mut payments = self.payments.lock().unwrap_or_else(PoisonError::into_inner);
        let payment = payments
            .entry(request.order_id.clone())
            .or_insert_with(|| PaymentMessage {
                id: uuid::Uuid::new_v4().to_string(),
                order_id: request.order_id,
                name: request.name,
                amount: request.amount,
                status: STATUS_PROCESSED.to_string(),
            })
            .clone();
        tracing::info!(order_id = %payment.order_id, amount = payment.amount, "Payment processed");
        Ok(payment)
    }

    /// Payment of an order, as served by `GetPaymentInfo`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::NotFound`] if the order has not been paid.
    pub fn get_payment_info(&self, request: &GetPaymentInfoRequest) -> Result<PaymentMessage, PaymentError> {
        self.payments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.order_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(request.order_id.clone()))
    }
}

/// Event handler feeding `process-payment` events into `service`.
///
/// Failures are returned to the controller, which logs them and dead-letters
/// the message when configured.
pub fn handler(service: Arc<PaymentService>) -> impl EventHandler {
    move |delivery: Delivery| {
        let service = Arc::clone(&service);
        async move {
            delivery.telemetry.meter().inc_request_count(PROCESS_PAYMENT);
            let request: ProcessPaymentMessage = delivery.decode()?;
            let _span = tracing::info_span!(
                parent: &delivery.span,
                "process-payment",
                order_id = %request.order_id,
            )
            .entered();
            service.process_payment(request)?;
            anyhow::Ok(())
        }
    }
}

/// The `payment.Payment` gRPC service.
pub struct PaymentRpc;

impl NamedService for PaymentRpc {
    const NAME: &'static str = "payment.Payment";
}

/// gRPC methods of the payment service.
///
/// ```text
/// /payment.Payment/GetPaymentInfo   GetPaymentInfoRequest -> PaymentMessage
/// ```
pub fn rpc_router(service: Arc<PaymentService>) -> RpcRouter<PaymentRpc> {
    RpcRouter::new().unary("GetPaymentInfo", move |request: RpcRequest<GetPaymentInfoRequest>| {
        let service = Arc::clone(&service);
        async move {
            tracing::info!(order_id = %request.message.order_id, "Payment lookup");
            service
                .get_payment_info(&request.message)
                .map_err(tonic::Status::from)
        }
    })
}

/// HTTP routes of the payment service.
///
/// ```text
/// GET /health         liveness
/// GET /health/ready   200 while the event controller is reading
/// ```
pub fn router(state: watch::Receiver<ControllerState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(consumer_readiness))
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn request(order_id: &str, amount: i32) -> ProcessPaymentMessage {
        ProcessPaymentMessage {
            order_id: order_id.to_string(),
            name: "book".to_string(),
            amount,
        }
    }

    #[test]
    fn processed_payment_can_be_looked_up() {
        let service = PaymentService::new();
        let payment = service.process_payment(request("o-1", 42)).unwrap();
        assert_eq!(payment.status, STATUS_PROCESSED);

        let found = service
            .get_payment_info(&GetPaymentInfoRequest {
                order_id: "o-1".to_string(),
            })
            .unwrap();
        assert_eq!(found, payment);
    }

    #[test]
    fn redelivery_is_idempotent() {
        let service = PaymentService::new();
        let first = service.process_payment(request("o-1", 42)).unwrap();
        let second = service.process_payment(request("o-1", 42)).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn invalid_payments_are_rejected() {
        let service = PaymentService::new();
        assert!(matches!(
            service.process_payment(request("", 1)),
            Err(PaymentError::Invalid(_))
        ));
        assert!(matches!(
            service.process_payment(request("o-1", 0)),
            Err(PaymentError::Invalid(_))
        ));
    }

    #[test]
    fn missing_payment_maps_to_not_found_status() {
        let err = PaymentService::new()
            .get_payment_info(&GetPaymentInfoRequest {
                order_id: "o-9".to_string(),
            })
            .unwrap_err();
        assert_eq!(tonic::Status::from(err).code(), tonic::Code::NotFound);
    }

    #[test]
    fn rpc_router_serves_the_gateway_path() {
        let router = rpc_router(Arc::new(PaymentService::new()));
        let paths: Vec<_> = router.paths().collect();
        assert_eq!(paths, vec![crate::proto::GET_PAYMENT_INFO_PATH]);
    }
}
