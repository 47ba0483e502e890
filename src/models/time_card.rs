//! Time card data models and API request/response types.
//!
//! This module defines:
//! - `TimeCard`: Database entity representing a prepaid bucket of minutes
//! - `CardStatus`: Lifecycle state of a card
//! - `Balance`: Derived spendable-balance aggregate
//! - Request/response bodies for activation, balance and card listing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a time card.
///
/// Transitions only move forward:
/// `pending -> active -> {used, expired, refunded}`.
///
/// `expired` is never written by the ledger; an active card whose
/// `expires_at` has passed is reported as expired by [`TimeCard::effective_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Pending,
    Active,
    Used,
    Expired,
    Refunded,
}

/// Represents a time card record from the database.
///
/// # Database Table
///
/// Maps to the `time_cards` table. Each card:
/// - Is created `pending` with `remaining_minutes = total_minutes`
/// - Becomes spendable once activated (by code or by payment confirmation)
/// - Only ever loses minutes after activation
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TimeCard {
    /// Unique identifier for this card
    pub id: Uuid,

    /// User who can spend the card
    ///
    /// NULL for codes that were issued but not yet claimed.
    pub owner_id: Option<Uuid>,

    /// Human-enterable `XXXX-XXXX-XXXX` code, single use
    pub activation_code: String,

    /// Minutes granted at creation (package hours * 60 + bonus)
    pub total_minutes: i32,

    /// Minutes still spendable
    ///
    /// Always `0 <= remaining_minutes <= total_minutes`
    /// (enforced by CHECK constraints in the database).
    pub remaining_minutes: i32,

    pub status: CardStatus,

    /// External payment id (Stripe PaymentIntent) this card was bought with
    pub payment_reference: Option<String>,

    /// Set exactly once, when the card leaves `pending`
    pub activated_at: Option<DateTime<Utc>>,

    /// `activated_at + card validity`; NULL while pending
    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl TimeCard {
    /// Whether the card has passed its expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    /// Whether `deduct` may take minutes from this card at `now`.
    pub fn is_spendable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CardStatus::Active && self.remaining_minutes > 0 && !self.is_expired_at(now)
    }

    /// Status as observed at `now`, with lazy expiry applied.
    pub fn effective_status(&self, now: DateTime<Utc>) -> CardStatus {
        if self.status == CardStatus::Active && self.is_expired_at(now) {
            CardStatus::Expired
        } else {
            self.status
        }
    }
}

/// Values for inserting a new pending card.
#[derive(Debug, Clone)]
pub struct NewTimeCard {
    pub owner_id: Option<Uuid>,
    pub activation_code: String,
    pub total_minutes: i32,
    pub payment_reference: Option<String>,
}

/// How a pending card is located for activation.
///
/// Self-service activation uses the code printed on the card; payment
/// confirmation uses the PaymentIntent id the card was created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationKey {
    Code(String),
    PaymentReference(String),
}

/// Spendable balance of a user, derived from their cards.
///
/// Only `active`, unexpired cards count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub total_minutes: i64,
    pub active_cards: i64,
    pub next_expiration: Option<DateTime<Utc>>,
}

/// Request body for activating a card.
///
/// # JSON Example
///
/// ```json
/// { "activation_code": "AB12-CD34-EF56" }
/// ```
#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub activation_code: String,
}

/// Balance as returned by `GET /time/balance`.
///
/// # JSON Example
///
/// ```json
/// {
///   "total_minutes": 630,
///   "total_hours": 10.5,
///   "active_cards": 2,
///   "next_expiration": "2026-12-20T10:00:00Z"
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub total_minutes: i64,
    pub total_hours: f64,
    pub active_cards: i64,
    pub next_expiration: Option<DateTime<Utc>>,
}

impl From<Balance> for BalanceResponse {
    fn from(balance: Balance) -> Self {
        // One decimal place, e.g. 95 minutes -> 1.6 hours
        let total_hours = (balance.total_minutes as f64 / 60.0 * 10.0).round() / 10.0;
        Self {
            total_minutes: balance.total_minutes,
            total_hours,
            active_cards: balance.active_cards,
            next_expiration: balance.next_expiration,
        }
    }
}

/// Card as shown to its owner.
///
/// This removes the internal `owner_id` and `payment_reference` fields.
#[derive(Debug, Serialize, Deserialize)]
pub struct TimeCardResponse {
    pub id: Uuid,
    pub activation_code: String,
    pub total_minutes: i32,
    pub remaining_minutes: i32,
    pub status: CardStatus,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<TimeCard> for TimeCardResponse {
    fn from(card: TimeCard) -> Self {
        Self {
            status: card.status,
            id: card.id,
            activation_code: card.activation_code,
            total_minutes: card.total_minutes,
            remaining_minutes: card.remaining_minutes,
            activated_at: card.activated_at,
            expires_at: card.expires_at,
            created_at: card.created_at,
        }
    }
}
