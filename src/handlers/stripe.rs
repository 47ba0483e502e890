//! Stripe webhook endpoint.
//!
//! The body is taken as a raw string: the signature covers the exact bytes
//! Stripe sent, so it must be verified before any JSON parsing.

use axum::{Json, extract::State, http::HeaderMap};
use chrono::Utc;

use crate::{
    error::AppError,
    models::payment::{StripeEvent, WebhookAck},
    services::payment_service,
    state::AppState,
};

/// Receive a Stripe event.
///
/// # Endpoint
///
/// `POST /webhooks/stripe` (public, signature-verified)
///
/// # Response
///
/// - **Success (200 OK)**: `{"status": "<outcome>", "event_id": "evt_..."}`
/// - **Error (400)**: Missing or invalid `Stripe-Signature`, or malformed body
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidWebhookSignature)?;

    payment_service::verify_stripe_signature(
        &state.config.stripe_webhook_secret,
        &body,
        signature,
        Utc::now().timestamp(),
        state.config.webhook_tolerance_seconds,
    )?;

    let event: StripeEvent = serde_json::from_str(&body)
        .map_err(|e| AppError::InvalidRequest(format!("Malformed event: {}", e)))?;
    let event_id = event.id.clone();

    let outcome =
        payment_service::handle_event(state.store.as_ref(), &state.config.ledger(), event).await?;

    Ok(Json(WebhookAck {
        status: outcome.as_str().to_string(),
        event_id,
    }))
}
