//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::{config::Config, services::payment_service::PaymentGateway, store::DynLedgerStore};

/// Everything a request needs, constructed once in `main`.
///
/// Cloning is cheap: every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub store: DynLedgerStore,
    pub config: Arc<Config>,
    pub gateway: Arc<dyn PaymentGateway>,

    /// Client for outbound notification webhooks
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(store: DynLedgerStore, config: Config, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            store,
            config: Arc::new(config),
            gateway,
            http: reqwest::Client::new(),
        }
    }
}
