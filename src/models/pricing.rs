//! Pricing catalog: purchasable time packages.

use serde::{Deserialize, Serialize};

/// Represents a row of the read-only `pricing_tiers` table.
///
/// Prices are stored in cents (never floats).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct PricingTier {
    /// Stable package id, e.g. `premium_10h`
    pub id: String,
    pub name: String,
    pub hours: i32,
    pub price_cents: i64,
    pub bonus_minutes: i32,
    pub description: String,
    pub active: bool,
}

impl PricingTier {
    /// Minutes a card bought with this package starts with.
    pub fn total_minutes(&self) -> i32 {
        self.hours * 60 + self.bonus_minutes
    }

    /// The catalog seeded on a fresh install.
    ///
    /// Mirrors the rows inserted by the `pricing_tiers` migration.
    pub fn defaults() -> Vec<PricingTier> {
        [
            ("starter_1h", "Starter Pack", 1, 999, 0, "Perfect for trying out voice sessions - 1 hour of AI conversation time"),
            ("basic_5h", "Basic Pack", 5, 4499, 30, "Great for regular users - 5 hours + 30 bonus minutes"),
            ("premium_10h", "Premium Pack", 10, 7999, 120, "Best value - 10 hours + 2 bonus hours"),
            ("pro_25h", "Pro Pack", 25, 17999, 300, "For power users - 25 hours + 5 bonus hours"),
            ("enterprise_50h", "Enterprise Pack", 50, 29999, 600, "Maximum value - 50 hours + 10 bonus hours"),
        ]
        .into_iter()
        .map(|(id, name, hours, price_cents, bonus_minutes, description)| PricingTier {
            id: id.to_string(),
            name: name.to_string(),
            hours,
            price_cents,
            bonus_minutes,
            description: description.to_string(),
            active: true,
        })
        .collect()
    }
}

/// Package as shown on `GET /time/pricing`.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "basic_5h",
///   "name": "Basic Pack",
///   "hours": 5,
///   "price_cents": 4499,
///   "price_display": "$44.99",
///   "bonus_minutes": 30,
///   "total_minutes": 330,
///   "description": "Great for regular users - 5 hours + 30 bonus minutes"
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct PackageResponse {
    pub id: String,
    pub name: String,
    pub hours: i32,
    pub price_cents: i64,
    pub price_display: String,
    pub bonus_minutes: i32,
    pub total_minutes: i32,
    pub description: String,
}

impl From<PricingTier> for PackageResponse {
    fn from(tier: PricingTier) -> Self {
        Self {
            price_display: format!("${}.{:02}", tier.price_cents / 100, tier.price_cents % 100),
            total_minutes: tier.total_minutes(),
            id: tier.id,
            name: tier.name,
            hours: tier.hours,
            price_cents: tier.price_cents,
            bonus_minutes: tier.bonus_minutes,
            description: tier.description,
        }
    }
}
