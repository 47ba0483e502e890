//! Storage seam for the time-card ledger.
//!
//! `LedgerStore` carries the primitives that must be atomic: each method is
//! one unit of transactional atomicity. Services build ledger operations on
//! top of it and never write card or session fields directly.
//!
//! Two backends exist:
//! - [`PgLedgerStore`]: PostgreSQL, one transaction per mutating call
//! - [`MemoryLedgerStore`]: process-local, for development and tests

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    payment::{NewPayment, PaymentRecord},
    pricing::PricingTier,
    session::{NewSession, Session, SessionSeal},
    time_card::{ActivationKey, Balance, NewTimeCard, TimeCard},
};

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Shared handle to the store, constructed once in `main`.
pub type DynLedgerStore = Arc<dyn LedgerStore>;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Active pricing tiers, cheapest first.
    async fn list_pricing_tiers(&self) -> Result<Vec<PricingTier>, AppError>;

    /// Active pricing tier by id.
    async fn get_pricing_tier(&self, id: &str) -> Result<Option<PricingTier>, AppError>;

    /// Insert a pending card.
    ///
    /// Fails with `DuplicateActivationCode` if the code is already taken.
    async fn insert_card(&self, card: NewTimeCard) -> Result<TimeCard, AppError>;

    /// Move the pending card matching `key` to `active`.
    ///
    /// Binds `owner` if the card has none. A code presented by someone other
    /// than the card's owner matches nothing (`TimeCardNotFound`). Exactly
    /// one of any number of concurrent callers succeeds; the others see
    /// `AlreadyActivated`.
    /// Fails with `TimeCardNotFound` if nothing matches `key`, and with
    /// `InvalidRequest` if neither the card nor the caller supplies an owner.
    async fn activate_card(
        &self,
        key: ActivationKey,
        owner: Option<Uuid>,
        activated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<TimeCard, AppError>;

    /// Move the active, unexpired card bought with `payment_reference` to
    /// `refunded`. Fails with `TimeCardNotFound` if there is none.
    async fn refund_card(
        &self,
        payment_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<TimeCard, AppError>;

    async fn get_card(&self, id: Uuid) -> Result<Option<TimeCard>, AppError>;

    /// The card bought with `payment_reference`, in any state.
    async fn find_card_by_payment(
        &self,
        payment_reference: &str,
    ) -> Result<Option<TimeCard>, AppError>;

    /// All of a user's cards, newest first.
    async fn list_cards(&self, owner: Uuid) -> Result<Vec<TimeCard>, AppError>;

    /// Take `minutes` from `owner`'s spendable cards, soonest expiry first.
    ///
    /// Returns `false` and modifies nothing when the balance cannot cover
    /// the full amount. Serialized per owner.
    async fn deduct_minutes(
        &self,
        owner: Uuid,
        minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn balance(&self, owner: Uuid, now: DateTime<Utc>) -> Result<Balance, AppError>;

    /// Insert an active session; fails with `DuplicateSession` if the id exists.
    async fn insert_session(&self, session: NewSession) -> Result<Session, AppError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, AppError>;

    /// Seal an active session and deduct its cost in the same atomic step.
    ///
    /// The session ends `completed` if the deduction succeeded and `error`
    /// otherwise. Fails with `SessionNotFound` or `AlreadyEnded`.
    async fn seal_session(&self, seal: SessionSeal) -> Result<Session, AppError>;

    /// A user's sessions, most recent first.
    async fn list_sessions(&self, owner: Uuid, limit: i64) -> Result<Vec<Session>, AppError>;

    /// Insert a payment history row; `None` if that outcome was already recorded.
    async fn record_payment(&self, payment: NewPayment) -> Result<Option<PaymentRecord>, AppError>;

    /// Check that the backing storage is reachable.
    async fn ping(&self) -> Result<(), AppError>;
}
