//! Process-local ledger store.
//!
//! All state lives behind one async `RwLock`. Every mutating call holds the
//! write guard for its whole read-check-write sequence, which makes each
//! call atomic and linearizable with respect to every other call.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger;
use crate::models::{
    payment::{NewPayment, PaymentRecord},
    pricing::PricingTier,
    session::{NewSession, Session, SessionSeal, SessionStatus},
    time_card::{ActivationKey, Balance, CardStatus, NewTimeCard, TimeCard},
};
use crate::store::LedgerStore;

#[derive(Default)]
struct MemoryState {
    tiers: Vec<PricingTier>,
    cards: HashMap<Uuid, TimeCard>,
    sessions: HashMap<String, Session>,
    payments: Vec<PaymentRecord>,
}

impl MemoryState {
    /// Apply a deduction to the owner's cards. Nothing changes on `false`.
    fn deduct(&mut self, owner: Uuid, minutes: i32, now: DateTime<Utc>) -> bool {
        if minutes == 0 {
            return true;
        }

        let owned: Vec<TimeCard> = self
            .cards
            .values()
            .filter(|c| c.owner_id == Some(owner))
            .cloned()
            .collect();

        let Some(plan) = ledger::plan_deduction(&owned, minutes, now) else {
            return false;
        };

        for debit in plan {
            if let Some(card) = self.cards.get_mut(&debit.card_id) {
                card.remaining_minutes = debit.remaining_minutes;
                card.status = debit.status;
                card.updated_at = now;
            }
        }

        true
    }
}

/// In-memory [`LedgerStore`] seeded with the default pricing catalog.
pub struct MemoryLedgerStore {
    state: RwLock<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_tiers(PricingTier::defaults())
    }

    pub fn with_tiers(tiers: Vec<PricingTier>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                tiers,
                ..MemoryState::default()
            }),
        }
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn list_pricing_tiers(&self) -> Result<Vec<PricingTier>, AppError> {
        let state = self.state.read().await;
        let mut tiers: Vec<PricingTier> = state.tiers.iter().filter(|t| t.active).cloned().collect();
        tiers.sort_by_key(|t| t.price_cents);
        Ok(tiers)
    }

    async fn get_pricing_tier(&self, id: &str) -> Result<Option<PricingTier>, AppError> {
        let state = self.state.read().await;
        Ok(state.tiers.iter().find(|t| t.id == id && t.active).cloned())
    }

    async fn insert_card(&self, card: NewTimeCard) -> Result<TimeCard, AppError> {
        let mut state = self.state.write().await;

        if state
            .cards
            .values()
            .any(|c| c.activation_code == card.activation_code)
        {
            return Err(AppError::DuplicateActivationCode);
        }

        let now = Utc::now();
        let record = TimeCard {
            id: Uuid::new_v4(),
            owner_id: card.owner_id,
            activation_code: card.activation_code,
            total_minutes: card.total_minutes,
            remaining_minutes: card.total_minutes,
            status: CardStatus::Pending,
            payment_reference: card.payment_reference,
            activated_at: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        };

        state.cards.insert(record.id, record.clone());
        Ok(record)
    }

    async fn activate_card(
        &self,
        key: ActivationKey,
        owner: Option<Uuid>,
        activated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<TimeCard, AppError> {
        let mut state = self.state.write().await;

        let card = state
            .cards
            .values_mut()
            .find(|c| match &key {
                ActivationKey::Code(code) => c.activation_code == *code,
                ActivationKey::PaymentReference(reference) => {
                    c.payment_reference.as_deref() == Some(reference.as_str())
                }
            })
            .ok_or(AppError::TimeCardNotFound)?;

        if card.status != CardStatus::Pending {
            return Err(AppError::AlreadyActivated);
        }

        // A code only redeems cards that are unclaimed or already the caller's
        let foreign = card
            .owner_id
            .zip(owner)
            .is_some_and(|(bound, caller)| bound != caller);
        if matches!(key, ActivationKey::Code(_)) && foreign {
            return Err(AppError::TimeCardNotFound);
        }

        let owner = card.owner_id.or(owner).ok_or_else(|| {
            AppError::InvalidRequest("Time card has no owner to activate for".to_string())
        })?;

        card.owner_id = Some(owner);
        card.status = CardStatus::Active;
        card.activated_at = Some(activated_at);
        card.expires_at = Some(expires_at);
        card.updated_at = activated_at;

        Ok(card.clone())
    }

    async fn refund_card(
        &self,
        payment_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<TimeCard, AppError> {
        let mut state = self.state.write().await;

        let card = state
            .cards
            .values_mut()
            .find(|c| {
                c.payment_reference.as_deref() == Some(payment_reference)
                    && c.status == CardStatus::Active
                    && !c.is_expired_at(now)
            })
            .ok_or(AppError::TimeCardNotFound)?;

        card.status = CardStatus::Refunded;
        card.updated_at = now;
        Ok(card.clone())
    }

    async fn get_card(&self, id: Uuid) -> Result<Option<TimeCard>, AppError> {
        let state = self.state.read().await;
        Ok(state.cards.get(&id).cloned())
    }

    async fn find_card_by_payment(
        &self,
        payment_reference: &str,
    ) -> Result<Option<TimeCard>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .cards
            .values()
            .find(|c| c.payment_reference.as_deref() == Some(payment_reference))
            .cloned())
    }

    async fn list_cards(&self, owner: Uuid) -> Result<Vec<TimeCard>, AppError> {
        let state = self.state.read().await;
        let mut cards: Vec<TimeCard> = state
            .cards
            .values()
            .filter(|c| c.owner_id == Some(owner))
            .cloned()
            .collect();
        cards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(cards)
    }

    async fn deduct_minutes(
        &self,
        owner: Uuid,
        minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        Ok(state.deduct(owner, minutes, now))
    }

    async fn balance(&self, owner: Uuid, now: DateTime<Utc>) -> Result<Balance, AppError> {
        let state = self.state.read().await;
        Ok(ledger::summarize_balance(
            state.cards.values().filter(|c| c.owner_id == Some(owner)),
            now,
        ))
    }

    async fn insert_session(&self, session: NewSession) -> Result<Session, AppError> {
        let mut state = self.state.write().await;

        if state.sessions.contains_key(&session.session_id) {
            return Err(AppError::DuplicateSession);
        }

        let record = Session {
            id: Uuid::new_v4(),
            session_id: session.session_id,
            owner_id: session.owner_id,
            room_name: session.room_name,
            start_time: session.start_time,
            end_time: None,
            duration_seconds: None,
            cost_minutes: None,
            status: SessionStatus::Active,
        };

        state
            .sessions
            .insert(record.session_id.clone(), record.clone());
        Ok(record)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, AppError> {
        let state = self.state.read().await;
        Ok(state.sessions.get(session_id).cloned())
    }

    async fn seal_session(&self, seal: SessionSeal) -> Result<Session, AppError> {
        let mut state = self.state.write().await;

        let (owner, status) = match state.sessions.get(&seal.session_id) {
            None => return Err(AppError::SessionNotFound),
            Some(session) => (session.owner_id, session.status),
        };
        if status != SessionStatus::Active {
            return Err(AppError::AlreadyEnded);
        }

        let covered = state.deduct(owner, seal.cost_minutes, seal.ended_at);

        let session = state
            .sessions
            .get_mut(&seal.session_id)
            .ok_or(AppError::SessionNotFound)?;
        session.end_time = Some(seal.ended_at);
        session.duration_seconds = Some(seal.duration_seconds);
        session.cost_minutes = Some(seal.cost_minutes);
        session.status = if covered {
            SessionStatus::Completed
        } else {
            SessionStatus::Error
        };

        Ok(session.clone())
    }

    async fn list_sessions(&self, owner: Uuid, limit: i64) -> Result<Vec<Session>, AppError> {
        let state = self.state.read().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.owner_id == owner)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        sessions.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(sessions)
    }

    async fn record_payment(&self, payment: NewPayment) -> Result<Option<PaymentRecord>, AppError> {
        let mut state = self.state.write().await;

        if state
            .payments
            .iter()
            .any(|p| p.payment_reference == payment.payment_reference && p.status == payment.status)
        {
            return Ok(None);
        }

        let record = PaymentRecord {
            id: Uuid::new_v4(),
            owner_id: payment.owner_id,
            payment_reference: payment.payment_reference,
            amount_cents: payment.amount_cents,
            currency: payment.currency,
            status: payment.status,
            time_card_id: payment.time_card_id,
            failure_reason: payment.failure_reason,
            created_at: Utc::now(),
        };

        state.payments.push(record.clone());
        Ok(Some(record))
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}
