//! Time card HTTP handlers.
//!
//! This module implements the card-related API endpoints:
//! - POST /time/purchase - Buy a package (creates a pending card)
//! - POST /time/activate - Activate a card with its code
//! - GET /time/balance - Spendable balance
//! - GET /time/cards - All of the caller's cards

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        payment::{PurchaseRequest, PurchaseResponse, PurchasedPackage},
        time_card::{ActivateRequest, BalanceResponse, TimeCardResponse},
    },
    services::{balance_service, payment_service, time_card_service},
    state::AppState,
};

/// Buy a package.
///
/// # Endpoint
///
/// `POST /time/purchase`
///
/// # Request Body
///
/// ```json
/// { "package_id": "basic_5h", "payment_method": "pm_card_visa" }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: PaymentIntent reference and the pending card
/// - **Error (404)**: Unknown package
/// - **Error (502)**: Payment provider refused the intent
///
/// ```json
/// {
///   "payment_intent_ref": "pi_3N...",
///   "client_secret": "pi_3N..._secret_...",
///   "activation_code": "AB12-CD34-EF56",
///   "time_card_id": "550e8400-e29b-41d4-a716-446655440000",
///   "package": { "name": "Basic", "hours": 5, "bonus_minutes": 30, "total_minutes": 330 }
/// }
/// ```
pub async fn purchase(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<PurchaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let purchase = payment_service::purchase_package(
        state.store.as_ref(),
        state.gateway.as_ref(),
        &state.config.ledger(),
        auth.user_id,
        &request.package_id,
        &request.payment_method,
    )
    .await?;

    let response = PurchaseResponse {
        payment_intent_ref: purchase.intent.reference,
        client_secret: purchase.intent.client_secret,
        activation_code: purchase.card.activation_code,
        time_card_id: purchase.card.id,
        package: PurchasedPackage {
            total_minutes: purchase.tier.total_minutes(),
            name: purchase.tier.name,
            hours: purchase.tier.hours,
            bonus_minutes: purchase.tier.bonus_minutes,
        },
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Activate a card with its activation code.
///
/// # Endpoint
///
/// `POST /time/activate`
///
/// # Response
///
/// - **Success (200 OK)**: The activated card
/// - **Error (404)**: Unknown code
/// - **Error (409)**: Card already activated
pub async fn activate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ActivateRequest>,
) -> Result<Json<TimeCardResponse>, AppError> {
    let card = time_card_service::activate_card(
        state.store.as_ref(),
        &state.config.ledger(),
        &request.activation_code,
        auth.user_id,
    )
    .await?;

    Ok(Json(card.into()))
}

/// Spendable balance of the caller.
///
/// # Endpoint
///
/// `GET /time/balance`
pub async fn balance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = balance_service::get_balance(state.store.as_ref(), auth.user_id).await?;
    Ok(Json(balance.into()))
}

/// Every card the caller owns, newest first.
///
/// # Endpoint
///
/// `GET /time/cards`
pub async fn list_cards(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<TimeCardResponse>>, AppError> {
    let cards = balance_service::list_cards(state.store.as_ref(), auth.user_id).await?;
    Ok(Json(cards.into_iter().map(TimeCardResponse::from).collect()))
}
