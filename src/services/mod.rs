//! Business logic services.
//!
//! Services contain the ledger's business rules, separated from HTTP
//! handlers. They take the store by reference and never touch card or
//! session fields except through the store's atomic primitives.

pub mod balance_service;
pub mod notification_service;
pub mod payment_service;
pub mod pricing_service;
pub mod session_service;
pub mod time_card_service;
