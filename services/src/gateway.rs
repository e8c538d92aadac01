//! API gateway: the public HTTP surface, fanning out to the order service
//! over REST, to the payment service over gRPC and to the broker as events.
//!
//! Every handler forwards the caller's bearer token and continues the
//! caller's trace through the `Sender`.
//!
//! ```text
//! POST /order                       → REST   order.create
//! PUT  /order/:id                   → REST   order.process
//! GET  /payment/:order_id           → RPC    payment.GetPaymentInfo
//! POST /payment/:order_id/process   → Events payment.process-payment (202)
//! ```

use crate::config::ServiceConfig;
use crate::proto::{
    CreateOrderMessage, GET_PAYMENT_INFO_PATH, GetPaymentInfoRequest, OrderMessage,
    PaymentMessage, ProcessPaymentMessage,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracemesh_core::{
    ApiItem, MessageQueue, RequestMeta, RestMethod, ServiceCatalog, Transport,
};
use tracemesh_runtime::{Sender, SenderError};
use tracemesh_web::handlers::health_check;
use tracemesh_web::{AppError, BearerToken, InboundTrace, WebResult, trace_context_layer};

/// Catalog used when no `CATALOG_PATH` is configured.
#[must_use]
pub fn default_catalog(config: &ServiceConfig) -> ServiceCatalog {
    ServiceCatalog::new()
        .with_service(
            "order",
            ApiItem::new(&config.order_url)
                .with_rest("create", RestMethod::Post, "/order")
                .with_rest("process", RestMethod::Post, "/order/:id")
                .with_rest("get", RestMethod::Get, "/order/:id"),
        )
        .with_service(
            "payment",
            ApiItem::new(&config.payment_url)
                .with_rpc("GetPaymentInfo", GET_PAYMENT_INFO_PATH)
                .with_event("process-payment", &config.kafka_topic),
        )
}

/// Gateway state shared by every handler.
pub struct Gateway {
    sender: Sender,
}

impl Gateway {
    /// Wire the sender over `catalog`, publishing events through `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`SenderError`] if the HTTP client cannot be built.
    pub fn new(
        catalog: ServiceCatalog,
        queue: Arc<dyn MessageQueue>,
        config: &ServiceConfig,
    ) -> Result<Self, SenderError> {
        let mut sender = Sender::builder(Arc::new(catalog))
            .timeout(config.request_timeout)
            .queue(queue)
            .build()?;
        sender.register_rpc::<GetPaymentInfoRequest, PaymentMessage>("payment", "GetPaymentInfo");
        Ok(Self { sender })
    }

    /// The sender, e.g. to register more RPC methods.
    pub const fn sender_mut(&mut self) -> &mut Sender {
        &mut self.sender
    }

    /// Public routes.
    pub fn router(self) -> Router {
        Router::new()
            .route("/order", post(create_order))
            .route("/order/:id", put(process_order))
            .route("/payment/:order_id", get(get_payment_info))
            .route("/payment/:order_id/process", post(process_payment))
            .layer(trace_context_layer())
            .route("/health", get(health_check))
            .with_state(Arc::new(self))
    }
}

type Shared = State<Arc<Gateway>>;

fn credential(token: Option<BearerToken>) -> Option<String> {
    token.map(|t| t.0)
}

async fn create_order(
    State(gateway): Shared,
    token: Option<BearerToken>,
    trace: InboundTrace,
    Json(request): Json<CreateOrderMessage>,
) -> WebResult<(StatusCode, Json<OrderMessage>)> {
    let carrier = trace.outgoing(credential(token));
    let order = gateway
        .sender
        .perform_request(Transport::Rest, "order", "create", &request, carrier.as_ref(), None)
        .await?
        .ok_or_else(|| AppError::internal("order service returned no order"))?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn process_order(
    State(gateway): Shared,
    token: Option<BearerToken>,
    trace: InboundTrace,
    Path(id): Path<String>,
) -> WebResult<Json<OrderMessage>> {
    let carrier = trace.outgoing(credential(token));
    let meta = RequestMeta::new().with_param("id", id);
    let order = gateway
        .sender
        .perform_request(Transport::Rest, "order", "process", &(), carrier.as_ref(), Some(&meta))
        .await?
        .ok_or_else(|| AppError::internal("order service returned no order"))?;
    Ok(Json(order))
}

async fn get_payment_info(
    State(gateway): Shared,
    token: Option<BearerToken>,
    trace: InboundTrace,
    Path(order_id): Path<String>,
) -> WebResult<Json<PaymentMessage>> {
    let carrier = trace.outgoing(credential(token));
    let request = GetPaymentInfoRequest { order_id };
    let payment = gateway
        .sender
        .perform_request(Transport::Rpc, "payment", "GetPaymentInfo", &request, carrier.as_ref(), None)
        .await?
        .ok_or_else(|| AppError::internal("payment service returned no payment"))?;
    Ok(Json(payment))
}

/// Body of `POST /payment/:order_id/process`.
#[derive(Debug, Deserialize)]
struct ProcessPaymentBody {
    #[serde(default)]
    name: String,
    amount: i32,
}

async fn process_payment(
    State(gateway): Shared,
    token: Option<BearerToken>,
    trace: InboundTrace,
    Path(order_id): Path<String>,
    Json(body): Json<ProcessPaymentBody>,
) -> WebResult<StatusCode> {
    let carrier = trace.outgoing(credential(token));
    let event = ProcessPaymentMessage {
        order_id,
        name: body.name,
        amount: body.amount,
    };
    gateway
        .sender
        .perform_request::<_, serde_json::Value>(
            Transport::Events,
            "payment",
            "process-payment",
            &event,
            carrier.as_ref(),
            None,
        )
        .await?;
    tracing::info!(order_id = %event.order_id, "Payment requested");
    Ok(StatusCode::ACCEPTED)
}
