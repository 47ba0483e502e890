//! Read-only projections over a user's time cards.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::time_card::{Balance, TimeCard},
    store::LedgerStore,
};

/// Spendable balance: active, unexpired cards only.
pub async fn get_balance(store: &dyn LedgerStore, owner: Uuid) -> Result<Balance, AppError> {
    store.balance(owner, Utc::now()).await
}

/// All of a user's cards, newest first, with lazy expiry applied to `status`.
pub async fn list_cards(store: &dyn LedgerStore, owner: Uuid) -> Result<Vec<TimeCard>, AppError> {
    let now = Utc::now();
    let cards = store
        .list_cards(owner)
        .await?
        .into_iter()
        .map(|mut card| {
            card.status = card.effective_status(now);
            card
        })
        .collect();

    Ok(cards)
}
