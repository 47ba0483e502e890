//! PostgreSQL store tests. Each test gets a fresh database with the crate's
//! migrations applied; run with `cargo test -- --ignored` and `DATABASE_URL`
//! pointing at a server the test user may create databases on.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use time_ledger_server::{
    error::AppError,
    ledger,
    models::{
        payment::{NewPayment, PaymentStatus},
        session::{NewSession, SessionSeal, SessionStatus},
        time_card::{ActivationKey, CardStatus, NewTimeCard, TimeCard},
    },
    store::{LedgerStore, PgLedgerStore},
};
use uuid::Uuid;

async fn pending_card(
    store: &PgLedgerStore,
    owner: Option<Uuid>,
    minutes: i32,
    payment_reference: Option<&str>,
) -> TimeCard {
    store
        .insert_card(NewTimeCard {
            owner_id: owner,
            activation_code: ledger::generate_activation_code(),
            total_minutes: minutes,
            payment_reference: payment_reference.map(str::to_string),
        })
        .await
        .unwrap()
}

async fn active_card(
    store: &PgLedgerStore,
    owner: Uuid,
    minutes: i32,
    activated_at: DateTime<Utc>,
    validity: Duration,
) -> TimeCard {
    let card = pending_card(store, Some(owner), minutes, None).await;
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

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires PostgreSQL
async fn seeded_pricing_tiers_are_listed_cheapest_first(pool: PgPool) {
    let store = PgLedgerStore::new(pool);

    let tiers = store.list_pricing_tiers().await.unwrap();
    assert!(!tiers.is_empty());
    assert!(tiers.windows(2).all(|w| w[0].price_cents <= w[1].price_cents));
    assert!(store.get_pricing_tier("no_such_tier").await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires PostgreSQL
async fn deduction_spends_the_soonest_expiring_card_first(pool: PgPool) {
    let store = PgLedgerStore::new(pool);
    let owner = Uuid::new_v4();
    let now = Utc::now();

    let later = active_card(&store, owner, 10, now, Duration::days(30)).await;
    let sooner = active_card(&store, owner, 10, now, Duration::days(1)).await;

    assert!(store.deduct_minutes(owner, 15, Utc::now()).await.unwrap());

    let sooner = store.get_card(sooner.id).await.unwrap().unwrap();
    let later = store.get_card(later.id).await.unwrap().unwrap();
    assert_eq!(sooner.remaining_minutes, 0);
    assert_eq!(sooner.status, CardStatus::Used);
    assert_eq!(later.remaining_minutes, 5);
    assert_eq!(later.status, CardStatus::Active);

    let balance = store.balance(owner, Utc::now()).await.unwrap();
    assert_eq!(balance.total_minutes, 5);
    assert_eq!(balance.active_cards, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires PostgreSQL
async fn failed_deduction_rolls_back(pool: PgPool) {
    let store = PgLedgerStore::new(pool);
    let owner = Uuid::new_v4();
    let now = Utc::now();
    let first = active_card(&store, owner, 10, now, Duration::days(30)).await;
    let second = active_card(&store, owner, 5, now, Duration::days(1)).await;

    assert!(!store.deduct_minutes(owner, 16, Utc::now()).await.unwrap());

    assert_eq!(store.get_card(first.id).await.unwrap().unwrap().remaining_minutes, 10);
    assert_eq!(store.get_card(second.id).await.unwrap().unwrap().remaining_minutes, 5);
    assert_eq!(store.balance(owner, Utc::now()).await.unwrap().total_minutes, 15);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires PostgreSQL
async fn expired_cards_are_skipped_and_not_refunded(pool: PgPool) {
    let store = PgLedgerStore::new(pool);
    let owner = Uuid::new_v4();
    let activated_at = Utc::now() - Duration::days(40);
    pending_card(&store, Some(owner), 60, Some("pi_lapsed")).await;
    let card = store
        .activate_card(
            ActivationKey::PaymentReference("pi_lapsed".to_string()),
            None,
            activated_at,
            activated_at + Duration::days(30),
        )
        .await
        .unwrap();

    assert!(!store.deduct_minutes(owner, 1, Utc::now()).await.unwrap());
    assert_eq!(store.balance(owner, Utc::now()).await.unwrap().total_minutes, 0);

    let err = store.refund_card("pi_lapsed", Utc::now()).await.unwrap_err();
    assert!(matches!(err, AppError::TimeCardNotFound));
    let card = store.get_card(card.id).await.unwrap().unwrap();
    assert_eq!(card.effective_status(Utc::now()), CardStatus::Expired);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires PostgreSQL
async fn concurrent_activation_succeeds_exactly_once(pool: PgPool) {
    let store = Arc::new(PgLedgerStore::new(pool));
    let card = pending_card(&store, None, 60, None).await;
    let now = Utc::now();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let code = card.activation_code.clone();
        handles.push(tokio::spawn(async move {
            store
                .activate_card(
                    ActivationKey::Code(code),
                    Some(Uuid::new_v4()),
                    now,
                    now + Duration::days(365),
                )
                .await
        }));
    }

    let mut winners = Vec::new();
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(card) => winners.push(card),
            Err(AppError::AlreadyActivated) => already += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(already, 7);
    let stored = store.get_card(card.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CardStatus::Active);
    assert_eq!(stored.owner_id, winners[0].owner_id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires PostgreSQL
async fn activation_binds_or_keeps_the_owner(pool: PgPool) {
    let store = PgLedgerStore::new(pool);
    let buyer = Uuid::new_v4();
    let now = Utc::now();
    let expires = now + Duration::days(365);

    // Owned card: a stranger's code redemption matches nothing
    let owned = pending_card(&store, Some(buyer), 60, None).await;
    let err = store
        .activate_card(
            ActivationKey::Code(owned.activation_code.clone()),
            Some(Uuid::new_v4()),
            now,
            expires,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TimeCardNotFound));
    let activated = store
        .activate_card(ActivationKey::Code(owned.activation_code), Some(buyer), now, expires)
        .await
        .unwrap();
    assert_eq!(activated.owner_id, Some(buyer));

    // Unowned card without anyone to bind it to stays pending
    let orphan = pending_card(&store, None, 60, Some("pi_orphan")).await;
    let err = store
        .activate_card(
            ActivationKey::PaymentReference("pi_orphan".to_string()),
            None,
            now,
            expires,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));

    let payer = Uuid::new_v4();
    let activated = store
        .activate_card(
            ActivationKey::PaymentReference("pi_orphan".to_string()),
            Some(payer),
            now,
            expires,
        )
        .await
        .unwrap();
    assert_eq!(activated.id, orphan.id);
    assert_eq!(activated.owner_id, Some(payer));
    assert_eq!(
        store.find_card_by_payment("pi_orphan").await.unwrap().map(|c| c.id),
        Some(orphan.id)
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires PostgreSQL
async fn sealing_twice_deducts_once(pool: PgPool) {
    let store = Arc::new(PgLedgerStore::new(pool));
    let owner = Uuid::new_v4();
    active_card(&store, owner, 100, Utc::now(), Duration::days(365)).await;
    store
        .insert_session(NewSession {
            session_id: "sess-race".to_string(),
            owner_id: owner,
            room_name: "room".to_string(),
            start_time: Utc::now(),
        })
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .seal_session(SessionSeal {
                    session_id: "sess-race".to_string(),
                    duration_seconds: 300,
                    cost_minutes: 5,
                    ended_at: Utc::now(),
                })
                .await
        }));
    }

    let mut sealed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(session) => {
                assert_eq!(session.status, SessionStatus::Completed);
                sealed += 1;
            }
            Err(AppError::AlreadyEnded) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(sealed, 1);
    assert_eq!(store.balance(owner, Utc::now()).await.unwrap().total_minutes, 95);

    let session = store.get_session("sess-race").await.unwrap().unwrap();
    assert_eq!(session.cost_minutes, Some(5));
    assert_eq!(session.duration_seconds, Some(300));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires PostgreSQL
async fn unaffordable_session_is_sealed_as_error(pool: PgPool) {
    let store = PgLedgerStore::new(pool);
    let owner = Uuid::new_v4();
    active_card(&store, owner, 3, Utc::now(), Duration::days(365)).await;
    store
        .insert_session(NewSession {
            session_id: "sess-broke".to_string(),
            owner_id: owner,
            room_name: "room".to_string(),
            start_time: Utc::now(),
        })
        .await
        .unwrap();

    let session = store
        .seal_session(SessionSeal {
            session_id: "sess-broke".to_string(),
            duration_seconds: 600,
            cost_minutes: 10,
            ended_at: Utc::now(),
        })
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Error);
    assert_eq!(store.balance(owner, Utc::now()).await.unwrap().total_minutes, 3);
    assert!(matches!(
        store.insert_session(NewSession {
            session_id: "sess-broke".to_string(),
            owner_id: owner,
            room_name: "room".to_string(),
            start_time: Utc::now(),
        })
        .await,
        Err(AppError::DuplicateSession)
    ));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires PostgreSQL
async fn payment_history_ignores_repeated_outcomes(pool: PgPool) {
    let store = PgLedgerStore::new(pool);
    let payment = NewPayment {
        owner_id: Some(Uuid::new_v4()),
        payment_reference: "pi_repeat".to_string(),
        amount_cents: 999,
        currency: "usd".to_string(),
        status: PaymentStatus::Succeeded,
        time_card_id: None,
        failure_reason: None,
    };

    let first = store.record_payment(payment.clone()).await.unwrap().unwrap();
    assert_eq!(first.status, PaymentStatus::Succeeded);
    assert!(store.record_payment(payment.clone()).await.unwrap().is_none());

    let refunded = NewPayment {
        status: PaymentStatus::Refunded,
        ..payment
    };
    assert!(store.record_payment(refunded).await.unwrap().is_some());
}
