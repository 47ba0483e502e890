#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use time_ledger_server::{
    AppState,
    config::{Config, LedgerConfig},
    middleware::auth::Claims,
    models::time_card::{ActivationKey, NewTimeCard, TimeCard},
    services::{payment_service::OfflineGateway, time_card_service},
    store::{LedgerStore, MemoryLedgerStore},
};
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_integration";

pub fn test_config() -> Config {
    Config {
        database_url: None,
        db_max_connections: 5,
        server_port: 0,
        jwt_secret: JWT_SECRET.to_string(),
        stripe_secret_key: None,
        stripe_webhook_secret: WEBHOOK_SECRET.to_string(),
        webhook_tolerance_seconds: 300,
        card_validity_days: 365,
        minimum_billing_minutes: 1,
        activation_code_attempts: 10,
        require_balance_to_start: true,
        low_balance_threshold_minutes: 30,
        low_balance_webhook_url: None,
        low_balance_webhook_secret: None,
    }
}

pub fn test_state() -> (AppState, Arc<MemoryLedgerStore>) {
    let store = Arc::new(MemoryLedgerStore::new());
    let state = AppState::new(store.clone(), test_config(), Arc::new(OfflineGateway));
    (state, store)
}

pub fn bearer(user: Uuid) -> String {
    let claims = Claims {
        sub: user.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

/// Create and activate a card for `owner` through the card service.
pub async fn funded_card(store: &dyn LedgerStore, owner: Uuid, minutes: i32) -> TimeCard {
    let config = LedgerConfig::default();
    let card = time_card_service::create_card(store, &config, Some(owner), minutes, None)
        .await
        .unwrap();
    time_card_service::activate_card(store, &config, &card.activation_code, owner)
        .await
        .unwrap()
}

/// Create a card for `owner` that was activated at `activated_at` and
/// expires `validity` later.
pub async fn card_activated_at(
    store: &dyn LedgerStore,
    owner: Uuid,
    minutes: i32,
    activated_at: chrono::DateTime<Utc>,
    validity: Duration,
) -> TimeCard {
    let card = store
        .insert_card(NewTimeCard {
            owner_id: Some(owner),
            activation_code: time_ledger_server::ledger::generate_activation_code(),
            total_minutes: minutes,
            payment_reference: None,
        })
        .await
        .unwrap();
    store
        .activate_card(
            ActivationKey::Code(card.activation_code),
            None,
            activated_at,
            activated_at + validity,
        )
        .await
        .unwrap()
}
