//! Pricing catalog lookups.

use crate::{error::AppError, models::pricing::PricingTier, store::LedgerStore};

/// Packages currently on sale, cheapest first.
pub async fn list_packages(store: &dyn LedgerStore) -> Result<Vec<PricingTier>, AppError> {
    store.list_pricing_tiers().await
}

/// Find a package on sale by id.
///
/// # Errors
///
/// - `PackageNotFound`: Unknown or retired package id
pub async fn lookup_package(store: &dyn LedgerStore, package_id: &str) -> Result<PricingTier, AppError> {
    store
        .get_pricing_tier(package_id)
        .await?
        .ok_or(AppError::PackageNotFound)
}
