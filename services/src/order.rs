//! Order service: REST create, process and lookup over an in-memory store.

use crate::proto::{CreateOrderMessage, OrderMessage};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracemesh_runtime::metrics::RequestMeter;
use tracemesh_web::handlers::health_check;
use tracemesh_web::{AppError, WebResult, trace_context_layer};

/// Status of a freshly created order.
pub const STATUS_NEW: &str = "new";

/// Status of a processed order.
pub const STATUS_PROCESSED: &str = "processed";

/// Orders keyed by id.
pub struct OrderService {
    orders: Mutex<HashMap<String, OrderMessage>>,
    meter: RequestMeter,
}

impl OrderService {
    /// Empty service.
    #[must_use]
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            meter: RequestMeter::new("order"),
        }
    }

    /// Store a new order with a fresh id and status `new`.
    pub fn create(&self, request: CreateOrderMessage) -> OrderMessage {
        let order = OrderMessage {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            amount: request.amount,
            status: STATUS_NEW.to_string(),
        };
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(order.id.clone(), order.clone());
        tracing::info!(order_id = %order.id, amount = order.amount, "Order created");
        order
    }

    /// Mark an order processed.
    pub fn process(&self, id: &str) -> Option<OrderMessage> {
        let mut orders = self.orders.lock().unwrap_or_else(PoisonError::into_inner);
        let order = orders.get_mut(id)?;
        order.status = STATUS_PROCESSED.to_string();
        tracing::info!(order_id = %id, "Order processed");
        Some(order.clone())
    }

    /// Look up an order.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<OrderMessage> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

impl Default for OrderService {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes of the order service.
///
/// ```text
/// POST /order       create (201)
/// POST /order/:id   process
/// GET  /order/:id   lookup
/// GET  /health      liveness
/// ```
pub fn router(service: Arc<OrderService>) -> Router {
    Router::new()
        .route("/order", post(create_order))
        .route("/order/:id", post(process_order).get(get_order))
        .layer(trace_context_layer())
        .route("/health", get(health_check))
        .with_state(service)
}

async fn create_order(
    State(service): State<Arc<OrderService>>,
    Json(request): Json<CreateOrderMessage>,
) -> WebResult<(StatusCode, Json<OrderMessage>)> {
    service.meter.inc_request_count("create_order");
    if request.name.trim().is_empty() {
        return Err(AppError::bad_request("name cannot be empty"));
    }
    Ok((StatusCode::CREATED, Json(service.create(request))))
}

async fn process_order(
    State(service): State<Arc<OrderService>>,
    Path(id): Path<String>,
) -> WebResult<Json<OrderMessage>> {
    service.meter.inc_request_count("process_order");
    service
        .process(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("order", &id))
}

async fn get_order(
    State(service): State<Arc<OrderService>>,
    Path(id): Path<String>,
) -> WebResult<Json<OrderMessage>> {
    service.meter.inc_request_count("get_order");
    service
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("order", &id))
}
