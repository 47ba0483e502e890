//! Data models representing database entities and API payloads.

/// Payment history and Stripe webhook payloads
pub mod payment;
/// Purchasable packages
pub mod pricing;
/// Voice session ledger records
pub mod session;
/// Prepaid time cards and balances
pub mod time_card;
