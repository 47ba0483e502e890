mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use time_ledger_server::{
    config::LedgerConfig,
    error::AppError,
    ledger,
    models::{
        payment::{NewPayment, PaymentStatus, StripeEvent, StripeEventData},
        session::SessionStatus,
        time_card::{ActivationKey, CardStatus, NewTimeCard, TimeCard},
    },
    services::{
        balance_service,
        payment_service::{self, WebhookOutcome},
        session_service, time_card_service,
    },
    store::{LedgerStore, MemoryLedgerStore},
};
use uuid::Uuid;

use common::{card_activated_at, funded_card};

#[tokio::test]
async fn soonest_expiring_card_is_spent_first() {
    let store = MemoryLedgerStore::new();
    let owner = Uuid::new_v4();
    let now = Utc::now();

    // B is created first so creation order would pick it; expiry must win
    let b = card_activated_at(&store, owner, 10, now, Duration::days(30)).await;
    let a = card_activated_at(&store, owner, 10, now, Duration::days(1)).await;

    assert!(time_card_service::deduct_minutes(&store, owner, 15).await.unwrap());

    let a = store.get_card(a.id).await.unwrap().unwrap();
    let b = store.get_card(b.id).await.unwrap().unwrap();
    assert_eq!(a.remaining_minutes, 0);
    assert_eq!(a.status, CardStatus::Used);
    assert_eq!(b.remaining_minutes, 5);
    assert_eq!(b.status, CardStatus::Active);
}

#[tokio::test]
async fn insufficient_deduction_changes_nothing() {
    let store = MemoryLedgerStore::new();
    let owner = Uuid::new_v4();
    let first = funded_card(&store, owner, 10).await;
    let second = funded_card(&store, owner, 5).await;

    assert!(!time_card_service::deduct_minutes(&store, owner, 16).await.unwrap());

    assert_eq!(store.get_card(first.id).await.unwrap().unwrap().remaining_minutes, 10);
    assert_eq!(store.get_card(second.id).await.unwrap().unwrap().remaining_minutes, 5);
    assert_eq!(
        balance_service::get_balance(&store, owner).await.unwrap().total_minutes,
        15
    );
}

#[tokio::test]
async fn negative_deduction_is_rejected() {
    let store = MemoryLedgerStore::new();
    let owner = Uuid::new_v4();
    funded_card(&store, owner, 10).await;

    let err = time_card_service::deduct_minutes(&store, owner, -1).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_activation_succeeds_exactly_once() {
    let store = Arc::new(MemoryLedgerStore::new());
    let config = LedgerConfig::default();
    let card = time_card_service::create_card(&*store, &config, None, 60, None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let code = card.activation_code.clone();
        handles.push(tokio::spawn(async move {
            time_card_service::activate_card(&*store, &config, &code, Uuid::new_v4()).await
        }));
    }

    let mut successes = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AppError::AlreadyActivated) => already += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(already, 7);
}

#[tokio::test]
async fn activation_code_is_case_and_whitespace_insensitive() {
    let store = MemoryLedgerStore::new();
    let config = LedgerConfig::default();
    let owner = Uuid::new_v4();
    let card = time_card_service::create_card(&store, &config, None, 60, None)
        .await
        .unwrap();

    let typed = format!("  {}  ", card.activation_code.to_lowercase());
    let activated = time_card_service::activate_card(&store, &config, &typed, owner)
        .await
        .unwrap();

    assert_eq!(activated.owner_id, Some(owner));
    assert_eq!(activated.status, CardStatus::Active);
    let activated_at = activated.activated_at.unwrap();
    assert_eq!(activated.expires_at, Some(activated_at + Duration::days(365)));
}

#[tokio::test]
async fn unknown_code_is_not_found() {
    let store = MemoryLedgerStore::new();
    let config = LedgerConfig::default();

    for code in ["ZZZZ-ZZZZ-ZZZZ", "not-a-code", ""] {
        let err = time_card_service::activate_card(&store, &config, code, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TimeCardNotFound), "code {code:?}");
    }
}

#[tokio::test]
async fn owned_card_only_activates_for_its_owner() {
    let store = MemoryLedgerStore::new();
    let config = LedgerConfig::default();
    let buyer = Uuid::new_v4();
    let redeemer = Uuid::new_v4();
    let card = time_card_service::create_card(&store, &config, Some(buyer), 60, None)
        .await
        .unwrap();

    let err = time_card_service::activate_card(&store, &config, &card.activation_code, redeemer)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TimeCardNotFound));
    assert_eq!(
        store.get_card(card.id).await.unwrap().unwrap().status,
        CardStatus::Pending
    );

    let activated = time_card_service::activate_card(&store, &config, &card.activation_code, buyer)
        .await
        .unwrap();
    assert_eq!(activated.owner_id, Some(buyer));
    assert_eq!(activated.status, CardStatus::Active);
}

#[tokio::test]
async fn unowned_card_is_bound_to_whoever_redeems_it() {
    let store = MemoryLedgerStore::new();
    let config = LedgerConfig::default();
    let redeemer = Uuid::new_v4();
    let card = time_card_service::create_card(&store, &config, None, 60, None)
        .await
        .unwrap();

    let activated = time_card_service::activate_card(&store, &config, &card.activation_code, redeemer)
        .await
        .unwrap();
    assert_eq!(activated.owner_id, Some(redeemer));
}

#[tokio::test]
async fn ending_twice_deducts_once() {
    let store = MemoryLedgerStore::new();
    let config = LedgerConfig::default();
    let owner = Uuid::new_v4();
    funded_card(&store, owner, 60).await;

    session_service::start_session(&store, owner, "sess-1", "room-a").await.unwrap();

    let ended = session_service::end_session(&store, &config, "sess-1", 600).await.unwrap();
    assert_eq!(ended.status, SessionStatus::Completed);
    assert_eq!(ended.cost_minutes, Some(10));

    let err = session_service::end_session(&store, &config, "sess-1", 600)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyEnded));

    let balance = balance_service::get_balance(&store, owner).await.unwrap();
    assert_eq!(balance.total_minutes, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ends_of_one_session_deduct_once() {
    let store = Arc::new(MemoryLedgerStore::new());
    let config = LedgerConfig::default();
    let owner = Uuid::new_v4();
    funded_card(&*store, owner, 100).await;
    session_service::start_session(&*store, owner, "sess-race", "room")
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            session_service::end_session(&*store, &config, "sess-race", 300).await
        }));
    }

    let mut sealed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => sealed += 1,
            Err(AppError::AlreadyEnded) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(sealed, 1);
    let balance = balance_service::get_balance(&*store, owner).await.unwrap();
    assert_eq!(balance.total_minutes, 95);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_never_overdraw() {
    let store = Arc::new(MemoryLedgerStore::new());
    let config = LedgerConfig::default();
    let owner = Uuid::new_v4();
    funded_card(&*store, owner, 25).await;

    for i in 0..10 {
        session_service::start_session(&*store, owner, &format!("s-{i}"), "room")
            .await
            .unwrap();
    }

    // Ten 5-minute sessions against 25 minutes: exactly five can be paid
    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            session_service::end_session(&*store, &config, &format!("s-{i}"), 300).await
        }));
    }

    let mut completed = 0;
    let mut errored = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap().status {
            SessionStatus::Completed => completed += 1,
            SessionStatus::Error => errored += 1,
            SessionStatus::Active => panic!("session left active"),
        }
    }

    assert_eq!(completed, 5);
    assert_eq!(errored, 5);
    let balance = balance_service::get_balance(&*store, owner).await.unwrap();
    assert_eq!(balance.total_minutes, 0);
}

#[tokio::test]
async fn short_sessions_bill_the_minimum_and_longer_ones_round() {
    let store = MemoryLedgerStore::new();
    let config = LedgerConfig::default();
    let owner = Uuid::new_v4();
    funded_card(&store, owner, 100).await;

    session_service::start_session(&store, owner, "short", "room").await.unwrap();
    session_service::start_session(&store, owner, "longer", "room").await.unwrap();

    let short = session_service::end_session(&store, &config, "short", 10).await.unwrap();
    let longer = session_service::end_session(&store, &config, "longer", 125).await.unwrap();

    assert_eq!(short.cost_minutes, Some(1));
    assert_eq!(longer.cost_minutes, Some(2));
    assert_eq!(
        balance_service::get_balance(&store, owner).await.unwrap().total_minutes,
        97
    );
}

#[tokio::test]
async fn session_that_cannot_be_paid_ends_in_error() {
    let store = MemoryLedgerStore::new();
    let config = LedgerConfig::default();
    let owner = Uuid::new_v4();
    funded_card(&store, owner, 5).await;

    session_service::start_session(&store, owner, "too-long", "room").await.unwrap();
    let ended = session_service::end_session(&store, &config, "too-long", 3600).await.unwrap();

    assert_eq!(ended.status, SessionStatus::Error);
    assert_eq!(ended.cost_minutes, Some(60));
    assert!(ended.end_time.is_some());
    assert_eq!(
        balance_service::get_balance(&store, owner).await.unwrap().total_minutes,
        5
    );
}

#[tokio::test]
async fn start_and_end_validate_their_input() {
    let store = MemoryLedgerStore::new();
    let config = LedgerConfig::default();
    let owner = Uuid::new_v4();

    assert!(matches!(
        session_service::start_session(&store, owner, "  ", "room").await,
        Err(AppError::InvalidRequest(_))
    ));
    assert!(matches!(
        session_service::end_session(&store, &config, "missing", 60).await,
        Err(AppError::SessionNotFound)
    ));

    session_service::start_session(&store, owner, "dup", "room").await.unwrap();
    assert!(matches!(
        session_service::start_session(&store, owner, "dup", "room").await,
        Err(AppError::DuplicateSession)
    ));
    assert!(matches!(
        session_service::end_session(&store, &config, "dup", -1).await,
        Err(AppError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn full_card_round_trip() {
    let store = MemoryLedgerStore::new();
    let owner = Uuid::new_v4();
    let card = funded_card(&store, owner, 600).await;

    let balance = balance_service::get_balance(&store, owner).await.unwrap();
    assert_eq!(balance.total_minutes, 600);
    assert_eq!(balance.active_cards, 1);
    assert_eq!(balance.next_expiration, card.expires_at);

    assert!(time_card_service::deduct_minutes(&store, owner, 600).await.unwrap());

    let card = store.get_card(card.id).await.unwrap().unwrap();
    assert_eq!(card.status, CardStatus::Used);
    let balance = balance_service::get_balance(&store, owner).await.unwrap();
    assert_eq!(balance.total_minutes, 0);
    assert_eq!(balance.active_cards, 0);
}

#[tokio::test]
async fn expired_cards_are_neither_spent_nor_counted() {
    let store = MemoryLedgerStore::new();
    let owner = Uuid::new_v4();
    let year_ago = Utc::now() - Duration::days(400);
    let expired = card_activated_at(&store, owner, 100, year_ago, Duration::days(365)).await;
    let live = funded_card(&store, owner, 10).await;

    let balance = balance_service::get_balance(&store, owner).await.unwrap();
    assert_eq!(balance.total_minutes, 10);
    assert_eq!(balance.active_cards, 1);

    assert!(!time_card_service::deduct_minutes(&store, owner, 11).await.unwrap());
    assert!(time_card_service::deduct_minutes(&store, owner, 10).await.unwrap());

    assert_eq!(store.get_card(expired.id).await.unwrap().unwrap().remaining_minutes, 100);
    assert_eq!(store.get_card(live.id).await.unwrap().unwrap().remaining_minutes, 0);

    let listed = balance_service::list_cards(&store, owner).await.unwrap();
    let shown = listed.iter().find(|c| c.id == expired.id).unwrap();
    assert_eq!(shown.status, CardStatus::Expired);
}

#[tokio::test]
async fn session_history_defaults_and_clamps_the_limit() {
    let store = MemoryLedgerStore::new();
    let owner = Uuid::new_v4();
    for i in 0..3 {
        session_service::start_session(&store, owner, &format!("h-{i}"), "room")
            .await
            .unwrap();
    }

    assert_eq!(session_service::list_sessions(&store, owner, None).await.unwrap().len(), 3);
    assert_eq!(session_service::list_sessions(&store, owner, Some(0)).await.unwrap().len(), 1);
    assert_eq!(
        session_service::list_sessions(&store, owner, Some(10_000)).await.unwrap().len(),
        3
    );
    assert!(session_service::list_sessions(&store, Uuid::new_v4(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn foreign_sessions_are_hidden() {
    let store = MemoryLedgerStore::new();
    let owner = Uuid::new_v4();
    session_service::start_session(&store, owner, "mine", "room").await.unwrap();

    assert!(session_service::get_owned_session(&store, owner, "mine").await.is_ok());
    assert!(matches!(
        session_service::get_owned_session(&store, Uuid::new_v4(), "mine").await,
        Err(AppError::SessionNotFound)
    ));
}

#[tokio::test]
async fn payment_history_ignores_repeated_outcomes() {
    let store = MemoryLedgerStore::new();
    let payment = NewPayment {
        owner_id: Some(Uuid::new_v4()),
        payment_reference: "pi_repeat".to_string(),
        amount_cents: 999,
        currency: "usd".to_string(),
        status: PaymentStatus::Succeeded,
        time_card_id: None,
        failure_reason: None,
    };

    assert!(store.record_payment(payment.clone()).await.unwrap().is_some());
    assert!(store.record_payment(payment.clone()).await.unwrap().is_none());

    let refunded = NewPayment {
        status: PaymentStatus::Refunded,
        ..payment
    };
    assert!(store.record_payment(refunded).await.unwrap().is_some());
}

/// A card bought with `payment_reference` and activated at `activated_at`.
async fn paid_card_activated_at(
    store: &dyn LedgerStore,
    owner: Uuid,
    payment_reference: &str,
    activated_at: chrono::DateTime<Utc>,
    validity: Duration,
) -> TimeCard {
    store
        .insert_card(NewTimeCard {
            owner_id: Some(owner),
            activation_code: ledger::generate_activation_code(),
            total_minutes: 60,
            payment_reference: Some(payment_reference.to_string()),
        })
        .await
        .unwrap();
    store
        .activate_card(
            ActivationKey::PaymentReference(payment_reference.to_string()),
            None,
            activated_at,
            activated_at + validity,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn expired_card_is_not_refunded() {
    let store = MemoryLedgerStore::new();
    let owner = Uuid::new_v4();
    let activated_at = Utc::now() - Duration::days(40);
    let card =
        paid_card_activated_at(&store, owner, "pi_lapsed", activated_at, Duration::days(30)).await;

    let err = time_card_service::refund_by_payment(&store, "pi_lapsed")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TimeCardNotFound));

    let card = store.get_card(card.id).await.unwrap().unwrap();
    assert_eq!(card.status, CardStatus::Active);
    assert_eq!(card.effective_status(Utc::now()), CardStatus::Expired);

    // The webhook path acknowledges it without touching the card
    let outcome = payment_service::handle_event(
        &store,
        &LedgerConfig::default(),
        stripe_event(
            "charge.refunded",
            json!({ "id": "ch_lapsed", "payment_intent": "pi_lapsed", "amount_refunded": 999 }),
        ),
    )
    .await
    .unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);
    assert_eq!(
        store.get_card(card.id).await.unwrap().unwrap().effective_status(Utc::now()),
        CardStatus::Expired
    );
}

#[tokio::test]
async fn redelivered_success_fills_in_missing_payment_history() {
    let store = MemoryLedgerStore::new();
    let owner = Uuid::new_v4();
    // Activated, but the succeeded history row was never written
    let card =
        paid_card_activated_at(&store, owner, "pi_half_done", Utc::now(), Duration::days(365))
            .await;

    let outcome = payment_service::handle_event(
        &store,
        &LedgerConfig::default(),
        stripe_event(
            "payment_intent.succeeded",
            json!({ "id": "pi_half_done", "amount": 999, "currency": "usd" }),
        ),
    )
    .await
    .unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);

    let again = store
        .record_payment(NewPayment {
            owner_id: Some(owner),
            payment_reference: "pi_half_done".to_string(),
            amount_cents: 999,
            currency: "usd".to_string(),
            status: PaymentStatus::Succeeded,
            time_card_id: Some(card.id),
            failure_reason: None,
        })
        .await
        .unwrap();
    assert!(again.is_none(), "succeeded payment should already be recorded");

    // Only the first redelivery writes it
    let outcome = payment_service::handle_event(
        &store,
        &LedgerConfig::default(),
        stripe_event(
            "payment_intent.succeeded",
            json!({ "id": "pi_half_done", "amount": 999, "currency": "usd" }),
        ),
    )
    .await
    .unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);
}

fn stripe_event(event_type: &str, object: serde_json::Value) -> StripeEvent {
    StripeEvent {
        id: format!("evt_{}", Uuid::new_v4().simple()),
        event_type: event_type.to_string(),
        data: StripeEventData { object },
    }
}
