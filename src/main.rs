//! Time Ledger Server - Main Application Entry Point
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Open storage: PostgreSQL (with migrations) if `DATABASE_URL` is set,
//!    otherwise the in-memory store
//! 3. Pick the payment gateway: Stripe if `STRIPE_SECRET_KEY` is set
//! 4. Build HTTP router with routes and middleware
//! 5. Start server on configured port

use std::sync::Arc;

use time_ledger_server::{
    AppState, build_router,
    config::Config,
    db,
    services::payment_service::{OfflineGateway, PaymentGateway, StripeGateway},
    store::{DynLedgerStore, MemoryLedgerStore, PgLedgerStore},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let store: DynLedgerStore = match config.database_url {
        Some(ref url) => {
            let pool = db::create_pool(url, config.db_max_connections).await?;
            tracing::info!("Database pool created");

            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");

            Arc::new(PgLedgerStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store; data is lost on restart");
            Arc::new(MemoryLedgerStore::new())
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match config.stripe_secret_key {
        Some(ref key) => Arc::new(StripeGateway::new(key.clone())?),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, using offline payment gateway");
            Arc::new(OfflineGateway)
        }
    };

    let addr = format!("0.0.0.0:{}", config.server_port);
    let app = build_router(AppState::new(store, config, gateway));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
