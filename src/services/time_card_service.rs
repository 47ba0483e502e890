//! Time card service - create, activate, deduct and refund prepaid cards.
//!
//! This service handles:
//! - Activation-code generation with collision retry
//! - Activation by code (self-service) or by payment reference (webhook)
//! - Validated deductions
//!
//! # Expiry Policy
//!
//! A card's validity window starts when it is activated, not when it is
//! bought: `expires_at = activated_at + card_validity`. Pending cards have
//! no expiry.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    config::LedgerConfig,
    error::AppError,
    ledger,
    models::time_card::{ActivationKey, NewTimeCard, TimeCard},
    store::LedgerStore,
};

/// Create a pending card holding `total_minutes`.
///
/// # Process
///
/// 1. Validate the amount
/// 2. Generate an activation code
/// 3. Insert; on a code collision go back to 2, up to
///    `config.activation_code_attempts` times
///
/// # Arguments
///
/// * `store` - Ledger storage
/// * `config` - Ledger configuration
/// * `owner` - Purchaser, or `None` for an unclaimed code
/// * `total_minutes` - Minutes granted by the card (must be positive)
/// * `payment_reference` - PaymentIntent id the card is paid with
///
/// # Errors
///
/// - `InvalidRequest`: Non-positive amount
/// - `DuplicateActivationCode`: Every generated code collided
/// - `Database`: Database error occurred
pub async fn create_card(
    store: &dyn LedgerStore,
    config: &LedgerConfig,
    owner: Option<Uuid>,
    total_minutes: i32,
    payment_reference: Option<String>,
) -> Result<TimeCard, AppError> {
    if total_minutes <= 0 {
        return Err(AppError::InvalidRequest(
            "Card minutes must be positive".to_string(),
        ));
    }

    for attempt in 1..=config.activation_code_attempts {
        let new_card = NewTimeCard {
            owner_id: owner,
            activation_code: ledger::generate_activation_code(),
            total_minutes,
            payment_reference: payment_reference.clone(),
        };

        match store.insert_card(new_card).await {
            Ok(card) => {
                tracing::info!(
                    card_id = %card.id,
                    user_id = ?owner,
                    minutes = total_minutes,
                    "Created pending time card"
                );
                return Ok(card);
            }
            Err(AppError::DuplicateActivationCode) => {
                tracing::warn!(attempt, "Activation code collision, retrying");
            }
            Err(e) => return Err(e),
        }
    }

    Err(AppError::DuplicateActivationCode)
}

/// Activate a pending card with its activation code.
///
/// Binds the card to `owner` if it has no owner yet. The code is matched
/// case-insensitively and ignoring surrounding whitespace.
///
/// # Errors
///
/// - `TimeCardNotFound`: No card has this code, or it is pending for another user
/// - `AlreadyActivated`: The card is no longer pending
pub async fn activate_card(
    store: &dyn LedgerStore,
    config: &LedgerConfig,
    activation_code: &str,
    owner: Uuid,
) -> Result<TimeCard, AppError> {
    let code = ledger::normalize_activation_code(activation_code);
    if !ledger::is_activation_code(&code) {
        return Err(AppError::TimeCardNotFound);
    }

    let now = Utc::now();
    let card = store
        .activate_card(
            ActivationKey::Code(code),
            Some(owner),
            now,
            now + config.card_validity,
        )
        .await?;

    tracing::info!(card_id = %card.id, user_id = %owner, "Activated time card by code");
    Ok(card)
}

/// Activate the pending card bought with `payment_reference`.
///
/// Called when the payment provider confirms the payment. `owner` is the
/// purchaser reported by the provider and is only used if the card has no
/// owner yet.
pub async fn activate_by_payment(
    store: &dyn LedgerStore,
    config: &LedgerConfig,
    payment_reference: &str,
    owner: Option<Uuid>,
) -> Result<TimeCard, AppError> {
    let now = Utc::now();
    let card = store
        .activate_card(
            ActivationKey::PaymentReference(payment_reference.to_string()),
            owner,
            now,
            now + config.card_validity,
        )
        .await?;

    tracing::info!(
        card_id = %card.id,
        payment_reference,
        "Activated time card by payment"
    );
    Ok(card)
}

/// Take `minutes` from `owner`'s balance, soonest-expiring card first.
///
/// Returns `false` (and changes nothing) if the balance cannot cover the
/// full amount. Zero minutes is always covered.
///
/// # Errors
///
/// - `InvalidRequest`: Negative amount
pub async fn deduct_minutes(
    store: &dyn LedgerStore,
    owner: Uuid,
    minutes: i32,
) -> Result<bool, AppError> {
    if minutes < 0 {
        return Err(AppError::InvalidRequest(
            "Minutes to deduct must not be negative".to_string(),
        ));
    }

    let covered = store.deduct_minutes(owner, minutes, Utc::now()).await?;

    if covered {
        tracing::debug!(user_id = %owner, minutes, "Deducted minutes");
    } else {
        tracing::warn!(user_id = %owner, minutes, "Deduction refused: insufficient balance");
    }

    Ok(covered)
}

/// Withdraw the active card bought with `payment_reference` after a refund.
pub async fn refund_by_payment(
    store: &dyn LedgerStore,
    payment_reference: &str,
) -> Result<TimeCard, AppError> {
    let card = store.refund_card(payment_reference, Utc::now()).await?;

    tracing::info!(
        card_id = %card.id,
        payment_reference,
        forfeited_minutes = card.remaining_minutes,
        "Refunded time card"
    );
    Ok(card)
}
