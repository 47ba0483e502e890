//! Low-balance notifications.
//!
//! After a session ends the owner's balance is checked; when it has dropped
//! to or below the configured threshold (but is not empty) a `balance.low`
//! event is logged and, if a sink is configured, POSTed to it.
//!
//! Delivery is best-effort. Failures are logged and never reach the ledger.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    config::Config,
    error::AppError,
    models::time_card::{Balance, BalanceResponse},
    services::payment_service::hmac_sha256_hex,
    store::LedgerStore,
};

/// Body of the `balance.low` event.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "0b9d...",
///   "type": "balance.low",
///   "user_id": "5f1c...",
///   "threshold_minutes": 30,
///   "balance": { "total_minutes": 12, "total_hours": 0.2, "active_cards": 1, "next_expiration": null },
///   "created_at": "2026-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct LowBalanceEvent {
    pub id: Uuid,

    #[serde(rename = "type")]
    pub event_type: &'static str,

    pub user_id: Uuid,

    pub threshold_minutes: i64,

    pub balance: BalanceResponse,

    pub created_at: DateTime<Utc>,
}

/// Whether `balance` should trigger a notification.
///
/// An empty balance does not; the user is told at the next session start.
pub fn is_low_balance(balance: &Balance, threshold_minutes: i64) -> bool {
    balance.total_minutes > 0 && balance.total_minutes <= threshold_minutes
}

/// Check `owner`'s balance and notify if it is low.
///
/// Returns whether a notification was emitted.
pub async fn check_low_balance(
    store: &dyn LedgerStore,
    http: &reqwest::Client,
    config: &Config,
    owner: Uuid,
) -> Result<bool, AppError> {
    let balance = store.balance(owner, Utc::now()).await?;

    if !is_low_balance(&balance, config.low_balance_threshold_minutes) {
        return Ok(false);
    }

    tracing::warn!(
        user_id = %owner,
        remaining_minutes = balance.total_minutes,
        threshold = config.low_balance_threshold_minutes,
        "Low time balance"
    );

    if let Some(ref url) = config.low_balance_webhook_url {
        let event = LowBalanceEvent {
            id: Uuid::new_v4(),
            event_type: "balance.low",
            user_id: owner,
            threshold_minutes: config.low_balance_threshold_minutes,
            balance: balance.into(),
            created_at: Utc::now(),
        };

        if let Err(e) = send_notification(
            http,
            url,
            config.low_balance_webhook_secret.as_deref(),
            &event,
        )
        .await
        {
            tracing::error!(user_id = %owner, error = %e, "Failed to deliver low-balance notification");
        }
    }

    Ok(true)
}

/// POST a signed event to the notification sink.
///
/// # Headers Sent
///
/// - `Content-Type: application/json`
/// - `X-Webhook-Signature: sha256=<hex>` (only when a secret is configured)
/// - `X-Webhook-Event-Id: <uuid>`
///
/// # Timeout
///
/// 5 seconds
async fn send_notification(
    http: &reqwest::Client,
    url: &str,
    secret: Option<&str>,
    event: &LowBalanceEvent,
) -> Result<(), AppError> {
    let payload = serde_json::to_string(event)
        .map_err(|e| AppError::InvalidRequest(format!("Failed to serialize payload: {}", e)))?;

    let mut request = http
        .post(url)
        .timeout(Duration::from_secs(5))
        .header("Content-Type", "application/json")
        .header("X-Webhook-Event-Id", event.id.to_string());

    if let Some(secret) = secret {
        let signature = hmac_sha256_hex(secret, &payload)?;
        request = request.header("X-Webhook-Signature", format!("sha256={}", signature));
    }

    match request.body(payload).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::debug!(event_id = %event.id, status = response.status().as_u16(), "Notification delivered");
        }
        Ok(response) => {
            tracing::warn!(
                event_id = %event.id,
                status = response.status().as_u16(),
                "Notification sink rejected event"
            );
        }
        Err(e) => {
            tracing::warn!(event_id = %event.id, error = %e, "Notification request failed");
        }
    }

    Ok(())
}
