//! Session ledger - records voice sessions and bills them when they end.
//!
//! A session is opened by [`start_session`] and sealed exactly once by
//! [`end_session`], which bills the elapsed time against the owner's cards.
//! Starting a session does not check the balance; billing is settled at
//! the end. A session whose cost cannot be covered is still sealed, with
//! status `error`, and the balance is left untouched.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    config::LedgerConfig,
    error::AppError,
    ledger,
    models::session::{NewSession, Session, SessionSeal, SessionStatus},
    store::LedgerStore,
};

/// Default page size of the session history.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Largest page of session history served at once.
pub const MAX_HISTORY_LIMIT: i64 = 200;

/// Open a session for `owner`.
///
/// # Errors
///
/// - `InvalidRequest`: Empty session id or room name
/// - `DuplicateSession`: The session id is already in the ledger
pub async fn start_session(
    store: &dyn LedgerStore,
    owner: Uuid,
    session_id: &str,
    room_name: &str,
) -> Result<Session, AppError> {
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return Err(AppError::InvalidRequest(
            "session_id must not be empty".to_string(),
        ));
    }
    if room_name.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "room_name must not be empty".to_string(),
        ));
    }

    let session = store
        .insert_session(NewSession {
            session_id: session_id.to_string(),
            owner_id: owner,
            room_name: room_name.trim().to_string(),
            start_time: Utc::now(),
        })
        .await?;

    tracing::info!(
        session_id = %session.session_id,
        user_id = %owner,
        room = %session.room_name,
        "Started time session"
    );
    Ok(session)
}

/// Seal a session and bill `duration_seconds` against its owner.
///
/// # Process
///
/// 1. Compute `cost_minutes = max(minimum_billing_minutes, round(duration / 60))`
/// 2. In one atomic step: check the session is active, deduct the cost,
///    record end time, duration, cost and the resulting status
///
/// # Errors
///
/// - `InvalidRequest`: Negative duration
/// - `SessionNotFound`: Unknown session id
/// - `AlreadyEnded`: The session was already sealed; nothing is deducted again
pub async fn end_session(
    store: &dyn LedgerStore,
    config: &LedgerConfig,
    session_id: &str,
    duration_seconds: i64,
) -> Result<Session, AppError> {
    if duration_seconds < 0 {
        return Err(AppError::InvalidRequest(
            "duration_seconds must not be negative".to_string(),
        ));
    }

    let cost_minutes = ledger::billed_minutes(duration_seconds, config.minimum_billing_minutes);

    let session = store
        .seal_session(SessionSeal {
            session_id: session_id.trim().to_string(),
            duration_seconds,
            cost_minutes,
            ended_at: Utc::now(),
        })
        .await?;

    match session.status {
        SessionStatus::Error => tracing::warn!(
            session_id = %session.session_id,
            user_id = %session.owner_id,
            cost_minutes,
            "Session ended with insufficient balance; nothing deducted"
        ),
        _ => tracing::info!(
            session_id = %session.session_id,
            user_id = %session.owner_id,
            duration_seconds,
            cost_minutes,
            "Ended time session"
        ),
    }

    Ok(session)
}

/// Look up a session, hiding sessions owned by someone else.
pub async fn get_owned_session(
    store: &dyn LedgerStore,
    owner: Uuid,
    session_id: &str,
) -> Result<Session, AppError> {
    store
        .get_session(session_id.trim())
        .await?
        .filter(|s| s.owner_id == owner)
        .ok_or(AppError::SessionNotFound)
}

/// A user's most recent sessions.
///
/// `limit` defaults to [`DEFAULT_HISTORY_LIMIT`] and is clamped to
/// `1..=MAX_HISTORY_LIMIT`.
pub async fn list_sessions(
    store: &dyn LedgerStore,
    owner: Uuid,
    limit: Option<i64>,
) -> Result<Vec<Session>, AppError> {
    let limit = limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    store.list_sessions(owner, limit).await
}
