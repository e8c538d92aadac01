//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use tokio::sync::watch;
use tracemesh_runtime::ControllerState;

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK to indicate the service is running.
/// This endpoint does NOT check dependencies (broker, remote services).
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness body.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Readiness {
    /// Consumer state, lowercase.
    pub consumer: String,
    /// Whether the consumer is reading.
    pub ready: bool,
}

/// Readiness of a service whose work arrives through an event controller.
///
/// # Status Codes
///
/// - 200 OK: the controller is reading or dispatching
/// - 503 Service Unavailable: not started yet, draining or stopped
///
/// # Endpoint
///
/// ```text
/// GET /health/ready
/// ```
#[allow(clippy::unused_async)]
pub async fn consumer_readiness(
    State(state): State<watch::Receiver<ControllerState>>,
) -> (StatusCode, Json<Readiness>) {
    let current = *state.borrow();
    let ready = matches!(current, ControllerState::Reading | ControllerState::Dispatching);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Readiness {
        consumer: format!("{current:?}").to_lowercase(),
        ready,
    };
    (status, Json(body))
}
