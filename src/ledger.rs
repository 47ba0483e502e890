//! Pure ledger rules shared by every storage backend.
//!
//! Nothing in here touches storage or the clock: callers pass the cards
//! they have locked and the instant they consider "now", and get back a
//! plan to apply. Keeping the rules here means the Postgres and in-memory
//! stores cannot drift apart on ordering, rounding or eligibility.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::models::time_card::{Balance, CardStatus, TimeCard};

/// Alphabet of activation codes: uppercase letters and digits.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Number of characters per dash-separated group.
const CODE_GROUP_LEN: usize = 4;

const CODE_GROUPS: usize = 3;

/// Minutes billed for a session of `duration_seconds`.
///
/// The duration is rounded to the nearest minute (ties go to the even
/// minute) and then raised to `minimum_billing_minutes`. Negative
/// durations are treated as zero.
///
/// ```
/// use time_ledger_server::ledger::billed_minutes;
///
/// assert_eq!(billed_minutes(10, 1), 1);
/// assert_eq!(billed_minutes(125, 1), 2);
/// ```
pub fn billed_minutes(duration_seconds: i64, minimum_billing_minutes: i32) -> i32 {
    let duration_seconds = duration_seconds.max(0);
    let whole = duration_seconds / 60;
    let rest = duration_seconds % 60;

    let rounded = match rest.cmp(&30) {
        Ordering::Greater => whole + 1,
        Ordering::Equal if whole % 2 == 1 => whole + 1,
        _ => whole,
    };

    let rounded = i32::try_from(rounded).unwrap_or(i32::MAX);
    rounded.max(minimum_billing_minutes)
}

/// Order in which cards are spent: soonest expiry first (cards without an
/// expiry last), then oldest first.
pub fn spend_order(a: &TimeCard, b: &TimeCard) -> Ordering {
    let by_expiry = match (a.expires_at, b.expires_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_expiry.then_with(|| a.created_at.cmp(&b.created_at))
}

/// New state of one card after a deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardDebit {
    pub card_id: Uuid,
    /// Minutes taken from this card
    pub debited: i32,
    pub remaining_minutes: i32,
    /// `Used` if the card was drained, `Active` otherwise
    pub status: CardStatus,
}

/// Plan a deduction of `minutes` over `cards`.
///
/// Ineligible cards (not active, empty or expired at `now`) are ignored.
/// Returns `None` when the eligible cards together hold fewer than
/// `minutes`; in that case nothing may be modified. Otherwise returns one
/// [`CardDebit`] per card touched, in spend order.
pub fn plan_deduction(cards: &[TimeCard], minutes: i32, now: DateTime<Utc>) -> Option<Vec<CardDebit>> {
    let mut eligible: Vec<&TimeCard> = cards.iter().filter(|c| c.is_spendable_at(now)).collect();
    eligible.sort_by(|a, b| spend_order(a, b));

    let available: i64 = eligible.iter().map(|c| i64::from(c.remaining_minutes)).sum();
    if available < i64::from(minutes) {
        return None;
    }

    let mut outstanding = minutes;
    let mut debits = Vec::new();

    for card in eligible {
        if outstanding <= 0 {
            break;
        }

        let debited = card.remaining_minutes.min(outstanding);
        let remaining_minutes = card.remaining_minutes - debited;
        outstanding -= debited;

        debits.push(CardDebit {
            card_id: card.id,
            debited,
            remaining_minutes,
            status: if remaining_minutes == 0 {
                CardStatus::Used
            } else {
                CardStatus::Active
            },
        });
    }

    Some(debits)
}

/// Aggregate the spendable balance of `cards` at `now`.
pub fn summarize_balance<'a, I>(cards: I, now: DateTime<Utc>) -> Balance
where
    I: IntoIterator<Item = &'a TimeCard>,
{
    let mut balance = Balance::default();

    for card in cards {
        if card.status != CardStatus::Active || card.is_expired_at(now) {
            continue;
        }
        balance.total_minutes += i64::from(card.remaining_minutes);
        balance.active_cards += 1;
        if let Some(expires_at) = card.expires_at {
            balance.next_expiration = Some(match balance.next_expiration {
                Some(current) => current.min(expires_at),
                None => expires_at,
            });
        }
    }

    balance
}

/// Generate a fresh `XXXX-XXXX-XXXX` activation code.
///
/// Uniqueness is not checked here; the card service retries on collision.
pub fn generate_activation_code() -> String {
    let mut rng = rand::rng();
    let mut code = String::with_capacity(CODE_GROUPS * (CODE_GROUP_LEN + 1));

    for group in 0..CODE_GROUPS {
        if group > 0 {
            code.push('-');
        }
        for _ in 0..CODE_GROUP_LEN {
            let idx = rng.random_range(0..CODE_ALPHABET.len());
            code.push(CODE_ALPHABET[idx] as char);
        }
    }

    code
}

/// Canonical form of a code typed by a human: trimmed and uppercased.
pub fn normalize_activation_code(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}

/// Whether `code` has the `XXXX-XXXX-XXXX` shape.
pub fn is_activation_code(code: &str) -> bool {
    let groups: Vec<&str> = code.split('-').collect();
    groups.len() == CODE_GROUPS
        && groups.iter().all(|g| {
            g.len() == CODE_GROUP_LEN && g.bytes().all(|b| CODE_ALPHABET.contains(&b))
        })
}
