pub mod broadcast;
pub mod config;
pub mod error;
pub mod fcm;
pub mod firestore;
pub mod gauth;
pub mod rest;
pub mod retry;
pub mod tenant;

use std::sync::Arc;

use config::NotifydConfig;
use tenant::TenantRegistry;

/// Shared application state passed to every request handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<NotifydConfig>,
    /// Per-domain provider clients, built lazily and cached.
    pub tenants: Arc<TenantRegistry>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    pub fn new(config: Arc<NotifydConfig>) -> Self {
        Self {
            tenants: Arc::new(TenantRegistry::new(Arc::clone(&config))),
            config,
            started_at: std::time::Instant::now(),
        }
    }
}
