//! Error types for web handlers.
//!
//! [`AppError`] is the single error type returned by edge handlers. It maps
//! the dispatch error taxonomy onto HTTP statuses:
//!
//! | Failure | Status | Code |
//! |---|---|---|
//! | Resolution | 501 | `UNRESOLVED_TARGET` |
//! | Serialization | 500 | `SERIALIZATION_ERROR` |
//! | Remote HTTP 4xx | same status | `REMOTE_REJECTED` |
//! | Remote HTTP 5xx | 502 | `REMOTE_FAILURE` |
//! | Remote RPC | per gRPC code | `REMOTE_REJECTED` / `REMOTE_FAILURE` |
//! | Transport | 503 | `TRANSPORT_ERROR` |

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use tracemesh_core::{DispatchError, DispatchErrorKind, RemoteStatus};

/// Application error type for web handlers.
///
/// Implements Axum's `IntoResponse`, so handlers can return
/// `Result<_, AppError>` and use `?` on [`DispatchError`].
///
/// # Examples
///
/// ```ignore
/// async fn get_order(State(state): State<Gateway>) -> Result<Json<Order>, AppError> {
///     let order = state
///         .sender
///         .perform_request(Transport::Rest, "order", "get", &(), None, Some(&meta))
///         .await?
///         .ok_or_else(|| AppError::not_found("order", id))?;
///     Ok(Json(order))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error, logged for 5xx responses.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, "UNAUTHORIZED")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_SERVER_ERROR")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        let (status, code, message) = match &err.kind {
            DispatchErrorKind::Resolution(msg) => {
                (StatusCode::NOT_IMPLEMENTED, "UNRESOLVED_TARGET", msg.clone())
            },
            DispatchErrorKind::Serialization(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                msg.clone(),
            ),
            DispatchErrorKind::Remote { status, body } => {
                let status = remote_status(*status);
                let code = if status.is_client_error() {
                    "REMOTE_REJECTED"
                } else {
                    "REMOTE_FAILURE"
                };
                (status, code, body.clone())
            },
            DispatchErrorKind::Transport(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "TRANSPORT_ERROR", msg.clone())
            },
        };
        Self::new(status, message, code).with_source(err)
    }
}

/// HTTP status returned to the client for a remote failure status.
#[must_use]
pub fn remote_status(status: RemoteStatus) -> StatusCode {
    match status {
        RemoteStatus::Http(code) => match StatusCode::from_u16(code) {
            Ok(status) if status.is_client_error() => status,
            _ => StatusCode::BAD_GATEWAY,
        },
        RemoteStatus::Rpc(code) => match code {
            3 => StatusCode::BAD_REQUEST,
            4 => StatusCode::GATEWAY_TIMEOUT,
            5 => StatusCode::NOT_FOUND,
            6 => StatusCode::CONFLICT,
            7 => StatusCode::FORBIDDEN,
            14 => StatusCode::SERVICE_UNAVAILABLE,
            16 => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_GATEWAY,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use tracemesh_core::{Target, Transport};

    fn dispatch_error(kind: DispatchErrorKind) -> AppError {
        DispatchError::new(Transport::Rest, &Target::new("order", "get"), kind).into()
    }

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_not_found() {
        let err = AppError::not_found("payment", "o-1");
        assert_eq!(err.to_string(), "[NOT_FOUND] payment with id o-1 not found");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn resolution_is_not_implemented() {
        let err = dispatch_error(DispatchErrorKind::Resolution("no service".into()));
        assert_eq!(err.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(err.code(), "UNRESOLVED_TARGET");
    }

    #[test]
    fn remote_client_errors_pass_through() {
        let err = dispatch_error(DispatchErrorKind::Remote {
            status: RemoteStatus::Http(404),
            body: "missing".into(),
        });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "REMOTE_REJECTED");
        assert_eq!(err.to_string(), "[REMOTE_REJECTED] missing");
    }

    #[test]
    fn remote_server_errors_are_bad_gateway() {
        let err = dispatch_error(DispatchErrorKind::Remote {
            status: RemoteStatus::Http(500),
            body: String::new(),
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), "REMOTE_FAILURE");
    }

    #[test]
    fn rpc_codes_map_to_http() {
        let cases = [
            (16, StatusCode::UNAUTHORIZED),
            (7, StatusCode::FORBIDDEN),
            (5, StatusCode::NOT_FOUND),
            (3, StatusCode::BAD_REQUEST),
            (6, StatusCode::CONFLICT),
            (4, StatusCode::GATEWAY_TIMEOUT),
            (14, StatusCode::SERVICE_UNAVAILABLE),
            (13, StatusCode::BAD_GATEWAY),
        ];
        for (code, expected) in cases {
            assert_eq!(remote_status(RemoteStatus::Rpc(code)), expected, "grpc code {code}");
        }
    }

    #[test]
    fn transport_and_serialization() {
        let err = dispatch_error(DispatchErrorKind::Transport("refused".into()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "TRANSPORT_ERROR");

        let err = dispatch_error(DispatchErrorKind::Serialization("bad".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "SERIALIZATION_ERROR");
    }
}
