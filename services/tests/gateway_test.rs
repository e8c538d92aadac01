//! End-to-end tests of the gateway against a live order router, an
//! in-memory broker and a payment service reached through a canned RPC
//! method or its live gRPC server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracemesh_core::{
    DispatchErrorKind, RemoteStatus, SPAN_CONTEXT_HEADER, TraceCarrier,
};
use tracemesh_runtime::{EventController, Telemetry, rpc_server};
use tracemesh_services::gateway::{Gateway, default_catalog};
use tracemesh_services::order::{self, OrderService};
use tracemesh_services::payment::{self, PaymentService};
use tracemesh_services::proto::{
    GetPaymentInfoRequest, OrderMessage, PaymentMessage, ProcessPaymentMessage,
};
use tracemesh_services::ServiceConfig;
use tracemesh_testing::{InMemoryQueue, StaticRpcMethod};

const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

struct Fixture {
    gateway: TestServer,
    queue: InMemoryQueue,
    payments: Arc<PaymentService>,
    rpc: Arc<StaticRpcMethod>,
}

async fn fixture() -> Fixture {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let order_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, order::router(Arc::new(OrderService::new())))
            .await
            .unwrap();
    });

    let config = ServiceConfig::from_lookup("gateway", |var| match var {
        "ORDER_URL" => Some(order_url.clone()),
        _ => None,
    })
    .unwrap();
    let queue = InMemoryQueue::new(config.kafka_topic.clone());
    let payments = Arc::new(PaymentService::new());

    let service = Arc::clone(&payments);
    let rpc = Arc::new(StaticRpcMethod::new(move |call| {
        let request: GetPaymentInfoRequest = serde_json::from_value(call.body.clone())
            .map_err(|e| DispatchErrorKind::Serialization(e.to_string()))?;
        let payment = service.get_payment_info(&request).map_err(|e| {
            let status = tonic::Status::from(e);
            DispatchErrorKind::Remote {
                status: RemoteStatus::Rpc(status.code() as i32),
                body: status.message().to_string(),
            }
        })?;
        serde_json::to_value(payment).map_err(|e| DispatchErrorKind::Serialization(e.to_string()))
    }));

    let mut gateway = Gateway::new(default_catalog(&config), Arc::new(queue.clone()), &config).unwrap();
    gateway
        .sender_mut()
        .register_rpc_method("payment", "GetPaymentInfo", rpc.clone());

    Fixture {
        gateway: TestServer::new(gateway.router()).unwrap(),
        queue,
        payments,
        rpc,
    }
}

fn header(name: &'static str, value: &str) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static(name), HeaderValue::from_str(value).unwrap())
}

#[tokio::test]
async fn orders_flow_through_rest() {
    let fx = fixture().await;

    let response = fx
        .gateway
        .post("/order")
        .json(&json!({"name": "book", "amount": 42}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let created: OrderMessage = response.json();
    assert_eq!(created.status, "new");

    let processed: OrderMessage = fx.gateway.put(&format!("/order/{}", created.id)).await.json();
    assert_eq!(processed.id, created.id);
    assert_eq!(processed.status, "processed");
}

#[tokio::test]
async fn remote_not_found_passes_through() {
    let fx = fixture().await;

    let response = fx.gateway.put("/order/missing").await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "REMOTE_REJECTED");
}

#[tokio::test]
async fn payment_event_carries_trace_and_credential() {
    let fx = fixture().await;
    let parent = TraceCarrier::new(TRACE_ID, "00f067aa0ba902b7", true);
    let (trace_name, trace_value) = header(SPAN_CONTEXT_HEADER, &parent.header_value());
    let (auth_name, auth_value) = header("authorization", "Bearer user-token");

    fx.gateway
        .post("/payment/o-1/process")
        .add_header(trace_name, trace_value)
        .add_header(auth_name, auth_value)
        .json(&json!({"name": "book", "amount": 42}))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let messages = fx.queue.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].decode::<Value>().unwrap(),
        json!({"orderId": "o-1", "name": "book", "amount": 42})
    );
    let carrier = messages[0].trace_carrier().unwrap().unwrap();
    assert_eq!(carrier.trace_id, TRACE_ID);
    assert_eq!(carrier.credential.as_deref(), Some("user-token"));
}

#[tokio::test]
async fn published_payment_is_consumed_then_served_over_rpc() {
    let fx = fixture().await;
    let controller = Arc::new(EventController::new(
        Arc::new(fx.queue.clone()),
        "payment-service",
        Telemetry::new("payment"),
    ));
    let cancel = CancellationToken::new();
    let listen = {
        let (controller, cancel) = (Arc::clone(&controller), cancel.clone());
        let handler = payment::handler(Arc::clone(&fx.payments));
        tokio::spawn(async move { controller.listen(cancel, handler).await })
    };

    fx.gateway
        .get("/payment/o-7")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    fx.gateway
        .post("/payment/o-7/process")
        .json(&json!({"name": "lamp", "amount": 15}))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let payment = loop {
        let response = fx.gateway.get("/payment/o-7").await;
        if response.status_code() == StatusCode::OK {
            break response.json::<PaymentMessage>();
        }
        assert!(tokio::time::Instant::now() < deadline, "payment never became visible");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    assert_eq!(payment.order_id, "o-7");
    assert_eq!(payment.amount, 15);
    assert_eq!(payment.status, "processed");
    assert!(fx.rpc.calls().iter().all(|call| call.path == "/payment.Payment/GetPaymentInfo"));

    cancel.cancel();
    listen.await.unwrap().unwrap();
}

#[tokio::test]
async fn broker_failure_is_service_unavailable() {
    let fx = fixture().await;
    fx.queue.fail_writes(Some("broker down"));

    let response = fx
        .gateway
        .post("/payment/o-1/process")
        .json(&json!({"amount": 1}))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["code"], "TRANSPORT_ERROR");
    assert!(fx.queue.is_empty());
}

#[tokio::test]
async fn payment_lookup_goes_over_grpc() {
    let payments = Arc::new(PaymentService::new());
    payments
        .process_payment(ProcessPaymentMessage {
            order_id: "o-3".to_string(),
            name: "pen".to_string(),
            amount: 7,
        })
        .unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let payment_url = format!("http://{}", listener.local_addr().unwrap());
    let cancel = CancellationToken::new();
    let server = tokio::spawn(rpc_server::serve(
        payment::rpc_router(Arc::clone(&payments)),
        listener,
        cancel.clone().cancelled_owned(),
    ));

    let config = ServiceConfig::from_lookup("gateway", |var| match var {
        "PAYMENT_URL" => Some(payment_url.clone()),
        _ => None,
    })
    .unwrap();
    let queue = InMemoryQueue::new(config.kafka_topic.clone());
    let gateway = Gateway::new(default_catalog(&config), Arc::new(queue), &config).unwrap();
    let gateway = TestServer::new(gateway.router()).unwrap();

    let payment: PaymentMessage = gateway.get("/payment/o-3").await.json();
    assert_eq!(payment.order_id, "o-3");
    assert_eq!(payment.amount, 7);
    assert_eq!(payment.status, "processed");

    let response = gateway.get("/payment/o-404").await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "REMOTE_REJECTED");

    cancel.cancel();
    server.await.unwrap().unwrap();
}
