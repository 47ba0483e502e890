//! Bearer token authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the token from the Authorization header
//! 2. Verify its HS256 signature and expiry against `JWT_SECRET`
//! 3. Inject the caller's user id into the request
//! 4. Reject unauthorized requests with HTTP 401

use crate::{error::AppError, state::AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by a bearer token.
///
/// Tokens are issued by the identity service; this service only verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,

    /// Expiry, seconds since the epoch
    pub exp: usize,
}

/// Authentication context attached to authenticated requests.
///
/// Route handlers extract it with `Extension<AuthContext>` to know whose
/// cards and sessions they are working on.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
}

/// Verify a bearer token and return the user id it was issued for.
///
/// # Errors
///
/// - `Unauthorized`: Bad signature, expired, wrong algorithm, or a `sub`
///   that is not a UUID
pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, AppError> {
    let validation = Validation::new(Algorithm::HS256);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "Rejected bearer token");
        AppError::Unauthorized
    })?;

    Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::Unauthorized)
}

/// Bearer token authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <jwt>` header from request
/// 2. Verify the token with [`verify_token`]
/// 3. If valid: inject `AuthContext` into request, call next handler
/// 4. If not: return 401 Unauthorized error
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let user_id = verify_token(token, &state.config.jwt_secret)?;

    // Route handlers can now extract this using Extension<AuthContext>
    request.extensions_mut().insert(AuthContext { user_id });

    Ok(next.run(request).await)
}
