//! Error types and HTTP error response handling.
//!
//! This module defines all ledger errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.
//! The same enum is used by the storage backends, the services and the
//! route handlers, so a failure keeps its meaning all the way out.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Storage Errors**: Any sqlx::Error from database operations
/// - **Authentication Errors**: Missing or invalid bearer token
/// - **Resource Errors**: Time card, session or package not found
/// - **Idempotency Guards**: Already activated / already ended / duplicate session
/// - **Business Logic Errors**: Insufficient balance
/// - **Payment Errors**: Bad webhook signature, gateway failures
/// - **Validation Errors**: Invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Bearer token is missing, malformed, expired or signed with another key.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid or expired token")]
    Unauthorized,

    /// No time card matches the activation code, payment reference or id.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Time card not found")]
    TimeCardNotFound,

    /// Session id does not exist (or belongs to another user).
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Session not found")]
    SessionNotFound,

    /// Pricing package does not exist or is no longer sold.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Package not found")]
    PackageNotFound,

    /// The card exists but has already left the `pending` state.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Time card already activated")]
    AlreadyActivated,

    /// The session has already been sealed by a previous `end` call.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Session already ended")]
    AlreadyEnded,

    /// A session with the same caller-supplied id already exists.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Session already exists")]
    DuplicateSession,

    /// Generated activation code collided with an existing one.
    ///
    /// Internal: retried by the card service, only surfaced once the
    /// retry budget is exhausted.
    #[error("Activation code collision")]
    DuplicateActivationCode,

    /// The user's spendable balance cannot cover the request.
    ///
    /// Returns HTTP 402 Payment Required.
    #[error("Insufficient time balance")]
    InsufficientBalance,

    /// Stripe-Signature header is missing, stale or does not match.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid webhook signature")]
    InvalidWebhookSignature,

    /// The payment provider rejected or failed a request.
    ///
    /// Returns HTTP 502 Bad Gateway.
    #[error("Payment processing error: {0}")]
    PaymentGateway(String),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    /// The String contains details about what was invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Storage errors and internal code collisions are reported as a generic
/// 500 so that no SQL detail reaches the client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            AppError::TimeCardNotFound => (
                StatusCode::NOT_FOUND,
                "time_card_not_found",
                "Invalid activation code or card already used".to_string(),
            ),
            AppError::SessionNotFound => {
                (StatusCode::NOT_FOUND, "session_not_found", self.to_string())
            }
            AppError::PackageNotFound => {
                (StatusCode::NOT_FOUND, "package_not_found", self.to_string())
            }
            AppError::AlreadyActivated => {
                (StatusCode::CONFLICT, "already_activated", self.to_string())
            }
            AppError::AlreadyEnded => (StatusCode::CONFLICT, "already_ended", self.to_string()),
            AppError::DuplicateSession => {
                (StatusCode::CONFLICT, "duplicate_session", self.to_string())
            }
            AppError::InsufficientBalance => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_balance",
                self.to_string(),
            ),
            AppError::InvalidWebhookSignature => {
                (StatusCode::BAD_REQUEST, "invalid_signature", self.to_string())
            }
            AppError::PaymentGateway(_) => (
                StatusCode::BAD_GATEWAY,
                "payment_gateway_error",
                self.to_string(),
            ),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Database(ref e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::DuplicateActivationCode => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
