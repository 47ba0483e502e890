//! Pricing catalog endpoint.

use crate::{
    error::AppError, models::pricing::PackageResponse, services::pricing_service,
    state::AppState,
};
use axum::{Json, extract::State};

/// List the packages on sale.
///
/// # Endpoint
///
/// `GET /time/pricing` (public)
///
/// # Response (200 OK)
///
/// Array of packages, cheapest first. See [`PackageResponse`].
pub async fn list_pricing(
    State(state): State<AppState>,
) -> Result<Json<Vec<PackageResponse>>, AppError> {
    let packages = pricing_service::list_packages(state.store.as_ref()).await?;
    Ok(Json(packages.into_iter().map(PackageResponse::from).collect()))
}
