//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, query string, headers)
//! 2. Calls into the services layer
//! 3. Returns HTTP response (JSON, status code)

/// Service health endpoint
pub mod health;
/// Pricing catalog endpoint
pub mod pricing;
/// Session endpoints
pub mod sessions;
/// Stripe webhook receiver
pub mod stripe;
/// Time card endpoints
pub mod time_cards;
