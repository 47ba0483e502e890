//! Prepaid time-card ledger for a voice AI service.
//!
//! Users buy packages of conversational minutes as time cards, activate
//! them, and spend them in voice sessions that are billed when they end.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Storage**: PostgreSQL with sqlx, or an in-memory store for development
//! - **Authentication**: HS256 bearer tokens
//! - **Payments**: Stripe PaymentIntents plus signed webhooks
//! - **Format**: JSON requests/responses

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod services;
pub mod state;
pub mod store;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use state::AppState;

/// Build the HTTP router with all routes and middleware.
///
/// # Routes
///
/// Public: `/health`, `/time/pricing`, `/webhooks/stripe`.
/// Everything under `/time` except pricing requires a bearer token.
pub fn build_router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        // Time cards
        .route("/time/purchase", post(handlers::time_cards::purchase))
        .route("/time/activate", post(handlers::time_cards::activate))
        .route("/time/balance", get(handlers::time_cards::balance))
        .route("/time/cards", get(handlers::time_cards::list_cards))
        // Sessions
        .route(
            "/time/session/start",
            post(handlers::sessions::start_session),
        )
        .route("/time/session/end", post(handlers::sessions::end_session))
        .route("/time/sessions", get(handlers::sessions::list_sessions))
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        .route("/time/pricing", get(handlers::pricing::list_pricing))
        .route("/webhooks/stripe", post(handlers::stripe::stripe_webhook))
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
