//! PostgreSQL ledger store.
//!
//! # Atomicity Guarantees
//!
//! Every mutating method runs inside one PostgreSQL transaction:
//! - Activation is a single conditional `UPDATE ... WHERE status = 'pending'`,
//!   so concurrent activations of one card cannot both match.
//! - Deduction takes a transaction-scoped advisory lock keyed by owner, then
//!   locks the owner's spendable cards `FOR UPDATE` before planning.
//! - Session sealing locks the session row and deducts in the same
//!   transaction, so a session is never sealed without its deduction (or
//!   deducted twice).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::ledger;
use crate::models::{
    payment::{NewPayment, PaymentRecord},
    pricing::PricingTier,
    session::{NewSession, Session, SessionSeal, SessionStatus},
    time_card::{ActivationKey, Balance, CardStatus, NewTimeCard, TimeCard},
};
use crate::store::LedgerStore;

const ACTIVATION_CODE_CONSTRAINT: &str = "time_cards_activation_code_unique";

/// [`LedgerStore`] backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: DbPool,
}

impl PgLedgerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Deduct `minutes` from `owner` inside an open transaction.
///
/// # Process
///
/// 1. Serialize with every other deduction for this owner (advisory lock)
/// 2. Lock the owner's spendable cards in spend order
/// 3. Plan the deduction; bail out untouched if the cards cannot cover it
/// 4. Write the new remaining minutes / status of each touched card
async fn deduct_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    owner: Uuid,
    minutes: i32,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    if minutes == 0 {
        return Ok(true);
    }

    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(owner.to_string())
        .execute(&mut **tx)
        .await?;

    let cards = sqlx::query_as::<_, TimeCard>(
        r#"
        SELECT *
        FROM time_cards
        WHERE owner_id = $1
          AND status = 'active'
          AND remaining_minutes > 0
          AND (expires_at IS NULL OR expires_at > $2)
        ORDER BY expires_at ASC NULLS LAST, created_at ASC
        FOR UPDATE
        "#,
    )
    .bind(owner)
    .bind(now)
    .fetch_all(&mut **tx)
    .await?;

    let Some(plan) = ledger::plan_deduction(&cards, minutes, now) else {
        return Ok(false);
    };

    for debit in plan {
        sqlx::query(
            r#"
            UPDATE time_cards
            SET remaining_minutes = $1,
                status = $2,
                updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(debit.remaining_minutes)
        .bind(debit.status)
        .bind(now)
        .bind(debit.card_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(true)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn list_pricing_tiers(&self) -> Result<Vec<PricingTier>, AppError> {
        let tiers = sqlx::query_as::<_, PricingTier>(
            r#"
            SELECT id, name, hours, price_cents, bonus_minutes, description, active
            FROM pricing_tiers
            WHERE active = TRUE
            ORDER BY price_cents ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tiers)
    }

    async fn get_pricing_tier(&self, id: &str) -> Result<Option<PricingTier>, AppError> {
        let tier = sqlx::query_as::<_, PricingTier>(
            r#"
            SELECT id, name, hours, price_cents, bonus_minutes, description, active
            FROM pricing_tiers
            WHERE id = $1 AND active = TRUE
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tier)
    }

    async fn insert_card(&self, card: NewTimeCard) -> Result<TimeCard, AppError> {
        let result = sqlx::query_as::<_, TimeCard>(
            r#"
            INSERT INTO time_cards (
                owner_id,
                activation_code,
                total_minutes,
                remaining_minutes,
                payment_reference,
                status
            )
            VALUES ($1, $2, $3, $3, $4, 'pending')
            RETURNING *
            "#,
        )
        .bind(card.owner_id)
        .bind(&card.activation_code)
        .bind(card.total_minutes)
        .bind(&card.payment_reference)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(card) => Ok(card),
            Err(sqlx::Error::Database(db_err))
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some(ACTIVATION_CODE_CONSTRAINT) =>
            {
                Err(AppError::DuplicateActivationCode)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                AppError::InvalidRequest("Payment reference already has a time card".to_string()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn activate_card(
        &self,
        key: ActivationKey,
        owner: Option<Uuid>,
        activated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<TimeCard, AppError> {
        let (column, value) = match &key {
            ActivationKey::Code(code) => ("activation_code", code.as_str()),
            ActivationKey::PaymentReference(reference) => ("payment_reference", reference.as_str()),
        };
        let by_code = matches!(key, ActivationKey::Code(_));

        // A code only redeems cards that are unclaimed or already the caller's
        let owner_guard = if by_code {
            "AND ($2::uuid IS NULL OR owner_id IS NULL OR owner_id = $2::uuid)"
        } else {
            ""
        };

        // Conditional on the pending status: of several concurrent callers
        // only the first to take the row lock still sees 'pending'.
        let activate_sql = format!(
            r#"
            UPDATE time_cards
            SET status = 'active',
                owner_id = COALESCE(owner_id, $2::uuid),
                activated_at = $3,
                expires_at = $4,
                updated_at = $3
            WHERE {column} = $1
              AND status = 'pending'
              AND (owner_id IS NOT NULL OR $2::uuid IS NOT NULL)
              {owner_guard}
            RETURNING *
            "#
        );

        let activated = sqlx::query_as::<_, TimeCard>(&activate_sql)
            .bind(value)
            .bind(owner)
            .bind(activated_at)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(card) = activated {
            return Ok(card);
        }

        // Nothing activated: work out why
        let lookup_sql = format!("SELECT status, owner_id FROM time_cards WHERE {column} = $1");
        let found: Option<(CardStatus, Option<Uuid>)> = sqlx::query_as(&lookup_sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        match found {
            None => Err(AppError::TimeCardNotFound),
            Some((CardStatus::Pending, Some(bound)))
                if by_code && owner.is_some_and(|caller| caller != bound) =>
            {
                Err(AppError::TimeCardNotFound)
            }
            Some((CardStatus::Pending, _)) => Err(AppError::InvalidRequest(
                "Time card has no owner to activate for".to_string(),
            )),
            Some(_) => Err(AppError::AlreadyActivated),
        }
    }

    async fn refund_card(
        &self,
        payment_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<TimeCard, AppError> {
        sqlx::query_as::<_, TimeCard>(
            r#"
            UPDATE time_cards
            SET status = 'refunded',
                updated_at = $2
            WHERE payment_reference = $1
              AND status = 'active'
              AND (expires_at IS NULL OR expires_at > $2)
            RETURNING *
            "#,
        )
        .bind(payment_reference)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::TimeCardNotFound)
    }

    async fn get_card(&self, id: Uuid) -> Result<Option<TimeCard>, AppError> {
        let card = sqlx::query_as::<_, TimeCard>("SELECT * FROM time_cards WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(card)
    }

    async fn find_card_by_payment(
        &self,
        payment_reference: &str,
    ) -> Result<Option<TimeCard>, AppError> {
        let card =
            sqlx::query_as::<_, TimeCard>("SELECT * FROM time_cards WHERE payment_reference = $1")
                .bind(payment_reference)
                .fetch_optional(&self.pool)
                .await?;

        Ok(card)
    }

    async fn list_cards(&self, owner: Uuid) -> Result<Vec<TimeCard>, AppError> {
        let cards = sqlx::query_as::<_, TimeCard>(
            "SELECT * FROM time_cards WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(cards)
    }

    async fn deduct_minutes(
        &self,
        owner: Uuid,
        minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let covered = deduct_in_tx(&mut tx, owner, minutes, now).await?;

        if covered {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }

        Ok(covered)
    }

    async fn balance(&self, owner: Uuid, now: DateTime<Utc>) -> Result<Balance, AppError> {
        let (total_minutes, active_cards, next_expiration): (i64, i64, Option<DateTime<Utc>>) =
            sqlx::query_as(
                r#"
                SELECT
                    COALESCE(SUM(remaining_minutes), 0)::BIGINT,
                    COUNT(*),
                    MIN(expires_at)
                FROM time_cards
                WHERE owner_id = $1
                  AND status = 'active'
                  AND (expires_at IS NULL OR expires_at > $2)
                "#,
            )
            .bind(owner)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(Balance {
            total_minutes,
            active_cards,
            next_expiration,
        })
    }

    async fn insert_session(&self, session: NewSession) -> Result<Session, AppError> {
        sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO time_sessions (session_id, owner_id, room_name, start_time, status)
            VALUES ($1, $2, $3, $4, 'active')
            ON CONFLICT (session_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&session.session_id)
        .bind(session.owner_id)
        .bind(&session.room_name)
        .bind(session.start_time)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::DuplicateSession)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, AppError> {
        let session =
            sqlx::query_as::<_, Session>("SELECT * FROM time_sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(session)
    }

    async fn seal_session(&self, seal: SessionSeal) -> Result<Session, AppError> {
        let mut tx = self.pool.begin().await?;

        // Lock the session row so a concurrent end() waits and then sees it sealed
        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM time_sessions WHERE session_id = $1 FOR UPDATE",
        )
        .bind(&seal.session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::SessionNotFound)?;

        if session.status != SessionStatus::Active {
            tx.rollback().await?;
            return Err(AppError::AlreadyEnded);
        }

        let covered = deduct_in_tx(&mut tx, session.owner_id, seal.cost_minutes, seal.ended_at).await?;
        let status = if covered {
            SessionStatus::Completed
        } else {
            SessionStatus::Error
        };

        let sealed = sqlx::query_as::<_, Session>(
            r#"
            UPDATE time_sessions
            SET end_time = $2,
                duration_seconds = $3,
                cost_minutes = $4,
                status = $5
            WHERE session_id = $1
            RETURNING *
            "#,
        )
        .bind(&seal.session_id)
        .bind(seal.ended_at)
        .bind(seal.duration_seconds)
        .bind(seal.cost_minutes)
        .bind(status)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(sealed)
    }

    async fn list_sessions(&self, owner: Uuid, limit: i64) -> Result<Vec<Session>, AppError> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT *
            FROM time_sessions
            WHERE owner_id = $1
            ORDER BY start_time DESC
            LIMIT $2
            "#,
        )
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn record_payment(&self, payment: NewPayment) -> Result<Option<PaymentRecord>, AppError> {
        let record = sqlx::query_as::<_, PaymentRecord>(
            r#"
            INSERT INTO payment_history (
                owner_id,
                payment_reference,
                amount_cents,
                currency,
                status,
                time_card_id,
                failure_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (payment_reference, status) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(payment.owner_id)
        .bind(&payment.payment_reference)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(payment.status)
        .bind(payment.time_card_id)
        .bind(&payment.failure_reason)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
