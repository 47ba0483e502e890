//! Payment models: purchase requests, payment history and the subset of
//! Stripe webhook events the ledger reacts to.
//!
//! # Payment Flow
//!
//! 1. User purchases a package via `POST /time/purchase`
//! 2. A PaymentIntent is created and a pending card is tied to its id
//! 3. Stripe calls `POST /webhooks/stripe` once the payment settles
//! 4. The card tied to that PaymentIntent is activated (or the failure is recorded)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome recorded in `payment_history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
    Refunded,
}

/// Represents a row of the `payment_history` table.
///
/// Unique per `(payment_reference, status)` so webhook redelivery never
/// produces duplicate rows.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    pub payment_reference: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub time_card_id: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Values for inserting a payment history row.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub owner_id: Option<Uuid>,
    pub payment_reference: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub time_card_id: Option<Uuid>,
    pub failure_reason: Option<String>,
}

/// PaymentIntent handed back by a [`crate::services::payment_service::PaymentGateway`].
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    /// Provider id (`pi_...`), stored as the card's payment reference
    pub reference: String,

    /// Secret the client uses to confirm the payment
    pub client_secret: Option<String>,
}

/// Request body for `POST /time/purchase`.
///
/// # JSON Example
///
/// ```json
/// { "package_id": "basic_5h", "payment_method": "pm_card_visa" }
/// ```
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub package_id: String,
    pub payment_method: String,
}

/// Package summary embedded in a purchase response.
#[derive(Debug, Serialize, Deserialize)]
pub struct PurchasedPackage {
    pub name: String,
    pub hours: i32,
    pub bonus_minutes: i32,
    pub total_minutes: i32,
}

/// Response for `POST /time/purchase`.
///
/// The card is still pending; it becomes spendable when the payment
/// succeeds or when the activation code is redeemed.
#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub payment_intent_ref: String,
    pub client_secret: Option<String>,
    pub activation_code: String,
    pub time_card_id: Uuid,
    pub package: PurchasedPackage,
}

/// Envelope of a Stripe webhook event.
///
/// Only the fields the ledger needs are modeled; `data.object` is kept as
/// raw JSON and decoded per event type.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// `data.object` of `payment_intent.*` events.
#[derive(Debug, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,

    #[serde(default)]
    pub amount: i64,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    pub last_payment_error: Option<PaymentErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentErrorObject {
    pub message: Option<String>,
}

/// `data.object` of `charge.refunded` events.
#[derive(Debug, Deserialize)]
pub struct ChargeObject {
    pub id: String,

    pub payment_intent: Option<String>,

    #[serde(default)]
    pub amount_refunded: i64,

    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "usd".to_string()
}

impl PaymentIntentObject {
    /// Purchaser id stamped into the PaymentIntent metadata at purchase time.
    pub fn user_id(&self) -> Option<Uuid> {
        self.metadata
            .get("user_id")
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// Acknowledgement returned to Stripe.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub status: String,
    pub event_id: String,
}
