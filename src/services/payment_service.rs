//! Payment service - package purchases and Stripe webhook processing.
//!
//! This module handles:
//! - Creating PaymentIntents through a [`PaymentGateway`]
//! - Tying each purchase to a pending time card
//! - Verifying `Stripe-Signature` headers
//! - Applying payment events to the ledger
//!
//! # Security
//!
//! Webhook bodies are only trusted after the HMAC over `"<t>.<body>"` has
//! been checked in constant time and the timestamp is inside the tolerance
//! window.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{
    config::LedgerConfig,
    error::AppError,
    models::{
        payment::{
            ChargeObject, NewPayment, PaymentIntent, PaymentIntentObject, PaymentStatus,
            StripeEvent,
        },
        pricing::PricingTier,
        time_card::TimeCard,
    },
    services::{pricing_service, time_card_service},
    store::LedgerStore,
};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Creates payment intents with an external provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        owner: Uuid,
        tier: &PricingTier,
        payment_method: &str,
    ) -> Result<PaymentIntent, AppError>;
}

/// Stripe REST API gateway.
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::PaymentGateway(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            secret_key: secret_key.into(),
            api_base: STRIPE_API_BASE.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntentResponse {
    id: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    /// Create a PaymentIntent for `tier`.
    ///
    /// # Metadata Sent
    ///
    /// `user_id`, `package_id`, `hours` and `bonus_minutes` are stamped on
    /// the intent so the `payment_intent.succeeded` webhook can bind the
    /// card to its purchaser.
    async fn create_payment_intent(
        &self,
        owner: Uuid,
        tier: &PricingTier,
        payment_method: &str,
    ) -> Result<PaymentIntent, AppError> {
        let mut params: Vec<(String, String)> = vec![
            ("amount".to_string(), tier.price_cents.to_string()),
            ("currency".to_string(), "usd".to_string()),
            ("payment_method".to_string(), payment_method.to_string()),
            ("description".to_string(), format!("Time card: {}", tier.name)),
        ];
        params.extend(
            purchase_metadata(owner, tier)
                .into_iter()
                .map(|(key, value)| (format!("metadata[{}]", key), value)),
        );

        let response = self
            .client
            .post(format!("{}/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::PaymentGateway(format!("Stripe request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<StripeErrorResponse>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| format!("Stripe returned {}", status));
            return Err(AppError::PaymentGateway(message));
        }

        let intent = response
            .json::<StripePaymentIntentResponse>()
            .await
            .map_err(|e| AppError::PaymentGateway(format!("Invalid Stripe response: {}", e)))?;

        Ok(PaymentIntent {
            reference: intent.id,
            client_secret: intent.client_secret,
        })
    }
}

/// Gateway used when no Stripe key is configured.
///
/// Issues local `pi_offline_<uuid>` references. Cards bought this way are
/// activated with their activation code or a signed webhook.
#[derive(Debug, Default)]
pub struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn create_payment_intent(
        &self,
        owner: Uuid,
        tier: &PricingTier,
        _payment_method: &str,
    ) -> Result<PaymentIntent, AppError> {
        let reference = format!("pi_offline_{}", Uuid::new_v4().simple());
        tracing::debug!(user_id = %owner, package_id = %tier.id, %reference, "Issued offline payment intent");
        Ok(PaymentIntent {
            reference,
            client_secret: None,
        })
    }
}

/// A completed purchase: the package, the intent and the pending card.
#[derive(Debug)]
pub struct Purchase {
    pub tier: PricingTier,
    pub intent: PaymentIntent,
    pub card: TimeCard,
}

/// Buy a package.
///
/// # Process
///
/// 1. Look up the package
/// 2. Create a PaymentIntent with the gateway
/// 3. Create a pending card owned by the purchaser, tied to the intent
///
/// # Errors
///
/// - `InvalidRequest`: Empty payment method
/// - `PackageNotFound`: Unknown or retired package
/// - `PaymentGateway`: The provider refused the intent
pub async fn purchase_package(
    store: &dyn LedgerStore,
    gateway: &dyn PaymentGateway,
    config: &LedgerConfig,
    owner: Uuid,
    package_id: &str,
    payment_method: &str,
) -> Result<Purchase, AppError> {
    if payment_method.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "payment_method must not be empty".to_string(),
        ));
    }

    let tier = pricing_service::lookup_package(store, package_id).await?;
    let intent = gateway
        .create_payment_intent(owner, &tier, payment_method)
        .await?;

    let card = time_card_service::create_card(
        store,
        config,
        Some(owner),
        tier.total_minutes(),
        Some(intent.reference.clone()),
    )
    .await?;

    tracing::info!(
        user_id = %owner,
        package_id = %tier.id,
        card_id = %card.id,
        payment_reference = %intent.reference,
        "Package purchased, card pending payment"
    );

    Ok(Purchase { tier, intent, card })
}

/// HMAC-SHA256 of `payload` under `secret`, hex encoded.
pub fn hmac_sha256_hex(secret: &str, payload: &str) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::InvalidRequest(format!("Invalid HMAC key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a `Stripe-Signature` header value for `payload` at `timestamp`.
pub fn compute_stripe_signature(
    secret: &str,
    payload: &str,
    timestamp: i64,
) -> Result<String, AppError> {
    let signature = hmac_sha256_hex(secret, &format!("{}.{}", timestamp, payload))?;
    Ok(format!("t={},v1={}", timestamp, signature))
}

/// Verify a `Stripe-Signature` header against the raw request body.
///
/// # Header Format
///
/// `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`. Any `v1` entry may match;
/// other schemes (`v0`) are ignored.
///
/// # Errors
///
/// - `InvalidWebhookSignature`: Malformed header, timestamp outside
///   `tolerance_seconds` of `now_unix`, or no matching signature
pub fn verify_stripe_signature(
    secret: &str,
    payload: &str,
    header: &str,
    now_unix: i64,
    tolerance_seconds: i64,
) -> Result<(), AppError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(AppError::InvalidWebhookSignature)?;
    if signatures.is_empty() {
        return Err(AppError::InvalidWebhookSignature);
    }

    if (now_unix - timestamp).abs() > tolerance_seconds {
        tracing::warn!(timestamp, now_unix, "Webhook timestamp outside tolerance");
        return Err(AppError::InvalidWebhookSignature);
    }

    let expected = hmac_sha256_hex(secret, &format!("{}.{}", timestamp, payload))?;
    let expected = expected.as_bytes();

    let matched = signatures
        .iter()
        .any(|candidate| candidate.len() == expected.len() && bool::from(expected.ct_eq(candidate.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(AppError::InvalidWebhookSignature)
    }
}

/// What a webhook event did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A pending card was activated
    Activated,
    /// Redelivery of an event that was already applied
    AlreadyProcessed,
    /// A failed payment was recorded; the card stays pending
    PaymentFailed,
    /// An active card was withdrawn
    Refunded,
    /// Event type the ledger does not react to
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Activated => "activated",
            WebhookOutcome::AlreadyProcessed => "already_processed",
            WebhookOutcome::PaymentFailed => "payment_failed",
            WebhookOutcome::Refunded => "refunded",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// Apply a verified Stripe event to the ledger.
///
/// # Events
///
/// - `payment_intent.succeeded`: activate the card tied to the intent
/// - `payment_intent.payment_failed`: record the failure
/// - `charge.refunded`: withdraw the card tied to the charge's intent
///
/// Everything else is acknowledged and ignored. Events that refer to
/// unknown cards are logged and acknowledged so Stripe stops retrying.
pub async fn handle_event(
    store: &dyn LedgerStore,
    config: &LedgerConfig,
    event: StripeEvent,
) -> Result<WebhookOutcome, AppError> {
    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Processing Stripe event");

    match event.event_type.as_str() {
        "payment_intent.succeeded" => {
            let intent = parse_object::<PaymentIntentObject>(event.data.object)?;
            handle_payment_succeeded(store, config, intent).await
        }
        "payment_intent.payment_failed" => {
            let intent = parse_object::<PaymentIntentObject>(event.data.object)?;
            handle_payment_failed(store, intent).await
        }
        "charge.refunded" => {
            let charge = parse_object::<ChargeObject>(event.data.object)?;
            handle_charge_refunded(store, charge).await
        }
        other => {
            tracing::debug!(event_type = other, "Ignoring Stripe event");
            Ok(WebhookOutcome::Ignored)
        }
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(object: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(object)
        .map_err(|e| AppError::InvalidRequest(format!("Malformed event object: {}", e)))
}

async fn handle_payment_succeeded(
    store: &dyn LedgerStore,
    config: &LedgerConfig,
    intent: PaymentIntentObject,
) -> Result<WebhookOutcome, AppError> {
    let owner = intent.user_id();

    let (card, outcome) =
        match time_card_service::activate_by_payment(store, config, &intent.id, owner).await {
            Ok(card) => (card, WebhookOutcome::Activated),
            Err(AppError::AlreadyActivated) => {
                tracing::info!(payment_reference = %intent.id, "Payment already applied");
                // The history write is separate from activation; a redelivery
                // fills it in if the first attempt stopped in between.
                match store.find_card_by_payment(&intent.id).await? {
                    Some(card) => (card, WebhookOutcome::AlreadyProcessed),
                    None => return Ok(WebhookOutcome::AlreadyProcessed),
                }
            }
            Err(AppError::TimeCardNotFound) => {
                tracing::warn!(payment_reference = %intent.id, "No time card for succeeded payment");
                return Ok(WebhookOutcome::Ignored);
            }
            Err(e) => return Err(e),
        };

    let recorded = store
        .record_payment(NewPayment {
            owner_id: card.owner_id,
            payment_reference: intent.id.clone(),
            amount_cents: intent.amount,
            currency: intent.currency,
            status: PaymentStatus::Succeeded,
            time_card_id: Some(card.id),
            failure_reason: None,
        })
        .await?;

    if recorded.is_some() && outcome == WebhookOutcome::AlreadyProcessed {
        tracing::info!(payment_reference = %intent.id, "Recorded missing payment history");
    }

    Ok(outcome)
}

async fn handle_payment_failed(
    store: &dyn LedgerStore,
    intent: PaymentIntentObject,
) -> Result<WebhookOutcome, AppError> {
    let reason = intent
        .last_payment_error
        .as_ref()
        .and_then(|e| e.message.clone());

    tracing::warn!(
        payment_reference = %intent.id,
        reason = ?reason,
        "Payment failed"
    );

    let recorded = store
        .record_payment(NewPayment {
            owner_id: intent.user_id(),
            payment_reference: intent.id.clone(),
            amount_cents: intent.amount,
            currency: intent.currency.clone(),
            status: PaymentStatus::Failed,
            time_card_id: None,
            failure_reason: reason,
        })
        .await?;

    Ok(match recorded {
        Some(_) => WebhookOutcome::PaymentFailed,
        None => WebhookOutcome::AlreadyProcessed,
    })
}

async fn handle_charge_refunded(
    store: &dyn LedgerStore,
    charge: ChargeObject,
) -> Result<WebhookOutcome, AppError> {
    let Some(reference) = charge.payment_intent else {
        tracing::warn!(charge_id = %charge.id, "Refunded charge has no payment intent");
        return Ok(WebhookOutcome::Ignored);
    };

    let card = match time_card_service::refund_by_payment(store, &reference).await {
        Ok(card) => card,
        Err(AppError::TimeCardNotFound) => {
            tracing::warn!(payment_reference = %reference, "No active time card for refunded charge");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }
        Err(e) => return Err(e),
    };

    store
        .record_payment(NewPayment {
            owner_id: card.owner_id,
            payment_reference: reference,
            amount_cents: charge.amount_refunded,
            currency: charge.currency,
            status: PaymentStatus::Refunded,
            time_card_id: Some(card.id),
            failure_reason: None,
        })
        .await?;

    Ok(WebhookOutcome::Refunded)
}

/// Metadata stamped on every PaymentIntent created for a purchase.
pub fn purchase_metadata(owner: Uuid, tier: &PricingTier) -> HashMap<String, String> {
    HashMap::from([
        ("user_id".to_string(), owner.to_string()),
        ("package_id".to_string(), tier.id.clone()),
        ("hours".to_string(), tier.hours.to_string()),
        ("bonus_minutes".to_string(), tier.bonus_minutes.to_string()),
    ])
}
