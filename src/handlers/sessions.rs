//! Session HTTP handlers.
//!
//! - POST /time/session/start - Open a session
//! - POST /time/session/end - Seal a session and bill it
//! - GET /time/sessions - Session history

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::session::{
        EndSessionRequest, EndSessionResponse, SessionHistoryQuery, SessionResponse,
        StartSessionRequest, StartSessionResponse,
    },
    services::{balance_service, notification_service, session_service},
    state::AppState,
};

/// Open a session.
///
/// # Endpoint
///
/// `POST /time/session/start`
///
/// # Response
///
/// - **Success (201 Created)**: Session id, start time and current balance
/// - **Error (402)**: Balance is empty and `REQUIRE_BALANCE_TO_START` is on
/// - **Error (409)**: Session id already used
pub async fn start_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store.as_ref();

    let balance = balance_service::get_balance(store, auth.user_id).await?;
    if state.config.require_balance_to_start && balance.total_minutes <= 0 {
        tracing::info!(user_id = %auth.user_id, "Session start refused: no balance");
        return Err(AppError::InsufficientBalance);
    }

    let session = session_service::start_session(
        store,
        auth.user_id,
        &request.session_id,
        &request.room_name,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id: session.session_id,
            start_time: session.start_time,
            remaining_balance_minutes: balance.total_minutes,
        }),
    ))
}

/// Seal a session and bill it.
///
/// # Endpoint
///
/// `POST /time/session/end`
///
/// # Response
///
/// - **Success (200 OK)**: Cost, final status and the balance afterwards.
///   `status` is `error` when the balance could not cover the cost; nothing
///   was deducted in that case.
/// - **Error (404)**: Unknown session or owned by someone else
/// - **Error (409)**: Session already ended
///
/// ```json
/// {
///   "session_id": "room-42-abc",
///   "duration_seconds": 125,
///   "cost_minutes": 2,
///   "status": "completed",
///   "remaining_balance": { "total_minutes": 328, "total_hours": 5.5, "active_cards": 1, "next_expiration": "..." }
/// }
/// ```
pub async fn end_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<EndSessionRequest>,
) -> Result<Json<EndSessionResponse>, AppError> {
    let store = state.store.as_ref();

    session_service::get_owned_session(store, auth.user_id, &request.session_id).await?;

    let session = session_service::end_session(
        store,
        &state.config.ledger(),
        &request.session_id,
        request.duration_seconds,
    )
    .await?;

    let balance = balance_service::get_balance(store, auth.user_id).await?;

    // Notification runs after the response; it never affects the ledger
    let background = state.clone();
    let owner = auth.user_id;
    tokio::spawn(async move {
        if let Err(e) = notification_service::check_low_balance(
            background.store.as_ref(),
            &background.http,
            &background.config,
            owner,
        )
        .await
        {
            tracing::error!(user_id = %owner, error = %e, "Low-balance check failed");
        }
    });

    Ok(Json(EndSessionResponse {
        session_id: session.session_id,
        duration_seconds: request.duration_seconds,
        cost_minutes: session.cost_minutes.unwrap_or_default(),
        status: session.status,
        remaining_balance: balance.into(),
    }))
}

/// Session history, most recent first.
///
/// # Endpoint
///
/// `GET /time/sessions?limit=50` (limit defaults to 50, capped at 200)
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SessionHistoryQuery>,
) -> Result<Json<Vec<SessionResponse>>, AppError> {
    let sessions =
        session_service::list_sessions(state.store.as_ref(), auth.user_id, query.limit).await?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}
