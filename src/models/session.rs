//! Session ledger records and API request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::time_card::BalanceResponse;

/// State of a voice session in the ledger.
///
/// - `active`: started, not yet billed
/// - `completed`: sealed and its cost deducted
/// - `error`: sealed, but the balance could not cover the cost; nothing was deducted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Error,
}

/// Represents a session record from the `time_sessions` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Session {
    pub id: Uuid,

    /// Caller-supplied unique identifier (e.g. the voice room session id)
    pub session_id: String,

    pub owner_id: Uuid,

    pub room_name: String,

    pub start_time: DateTime<Utc>,

    /// NULL while the session is active
    pub end_time: Option<DateTime<Utc>>,

    pub duration_seconds: Option<i64>,

    /// Billed minutes, set once when the session is sealed
    pub cost_minutes: Option<i32>,

    pub status: SessionStatus,
}

/// Values for inserting a new active session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub owner_id: Uuid,
    pub room_name: String,
    pub start_time: DateTime<Utc>,
}

/// Everything needed to seal a session in one atomic step.
#[derive(Debug, Clone)]
pub struct SessionSeal {
    pub session_id: String,
    pub duration_seconds: i64,
    pub cost_minutes: i32,
    pub ended_at: DateTime<Utc>,
}

/// Request body for `POST /time/session/start`.
#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub session_id: String,
    pub room_name: String,
}

/// Response for `POST /time/session/start`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub remaining_balance_minutes: i64,
}

/// Request body for `POST /time/session/end`.
///
/// # JSON Example
///
/// ```json
/// { "session_id": "room-42-abc", "duration_seconds": 125 }
/// ```
#[derive(Debug, Deserialize)]
pub struct EndSessionRequest {
    pub session_id: String,
    pub duration_seconds: i64,
}

/// Response for `POST /time/session/end`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EndSessionResponse {
    pub session_id: String,
    pub duration_seconds: i64,
    pub cost_minutes: i32,
    pub status: SessionStatus,
    pub remaining_balance: BalanceResponse,
}

/// Query string for `GET /time/sessions`.
#[derive(Debug, Deserialize)]
pub struct SessionHistoryQuery {
    pub limit: Option<i64>,
}

/// Session as listed in the user's history.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub room_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub cost_minutes: Option<i32>,
    pub status: SessionStatus,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.session_id,
            room_name: session.room_name,
            start_time: session.start_time,
            end_time: session.end_time,
            duration_seconds: session.duration_seconds,
            cost_minutes: session.cost_minutes,
            status: session.status,
        }
    }
}
