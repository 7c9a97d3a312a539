//! Host-header tenant resolution.
//!
//! Every request is scoped to a tenant: the `Host` header's domain selects a
//! configured provider project, token collection, and topic. Provider clients
//! are built on first use and cached per domain, the same way the original
//! kept one admin-app instance per domain.

use anyhow::{anyhow, bail, Context as _, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::{EndpointsConfig, NotifydConfig, TenantConfig};
use crate::fcm::FcmClient;
use crate::firestore::FirestoreClient;
use crate::gauth::{ServiceAccountKey, TokenProvider};

/// One resolved tenant: its config plus ready-to-use provider clients.
pub struct Tenant {
    pub domain: String,
    pub config: TenantConfig,
    pub firestore: FirestoreClient,
    pub fcm: FcmClient,
}

impl Tenant {
    /// Wire up clients for a tenant with an already-built token provider.
    pub fn new(
        domain: impl Into<String>,
        config: TenantConfig,
        auth: Arc<TokenProvider>,
        endpoints: &EndpointsConfig,
    ) -> Self {
        let firestore = FirestoreClient::new(
            config.project_id.clone(),
            Arc::clone(&auth),
            endpoints.firestore_url.clone(),
        );
        let fcm = FcmClient::new(
            config.project_id.clone(),
            auth,
            endpoints.fcm_url.clone(),
            endpoints.topic_mgmt_url.clone(),
        );
        Self {
            domain: domain.into(),
            config,
            firestore,
            fcm,
        }
    }
}

/// Lazily built, cached tenants keyed by domain.
pub struct TenantRegistry {
    config: Arc<NotifydConfig>,
    cache: RwLock<HashMap<String, Arc<Tenant>>>,
}

impl TenantRegistry {
    pub fn new(config: Arc<NotifydConfig>) -> Self {
        Self {
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Tenant for a domain; builds and caches the clients on first call.
    /// Fails for domains with no `[tenant."..."]` section.
    pub async fn resolve(&self, domain: &str) -> Result<Arc<Tenant>> {
        if let Some(tenant) = self.cache.read().await.get(domain) {
            return Ok(Arc::clone(tenant));
        }

        let tenant_config = self
            .config
            .tenant(domain)
            .cloned()
            .ok_or_else(|| anyhow!("no config found for domain: {domain}"))?;

        let mut cache = self.cache.write().await;
        // Another request may have built it while we waited for the lock.
        if let Some(tenant) = cache.get(domain) {
            return Ok(Arc::clone(tenant));
        }

        let key = load_key(domain, &tenant_config)?;
        let auth = Arc::new(TokenProvider::with_token_uri(
            key,
            self.config.endpoints.oauth_token_url.clone(),
        ));
        let tenant = Arc::new(Tenant::new(
            domain,
            tenant_config,
            auth,
            &self.config.endpoints,
        ));

        info!(domain, project = %tenant.config.project_id, "tenant clients initialised");
        cache.insert(domain.to_string(), Arc::clone(&tenant));
        Ok(tenant)
    }

    /// Pre-populate the cache. Test wiring — lets tests install tenants with
    /// a fixed token provider and mock endpoints.
    pub async fn insert(&self, tenant: Arc<Tenant>) {
        self.cache
            .write()
            .await
            .insert(tenant.domain.clone(), tenant);
    }
}

/// Load the tenant's service-account key from its env var or key file.
fn load_key(domain: &str, config: &TenantConfig) -> Result<ServiceAccountKey> {
    if let Some(var) = &config.service_account_env {
        let json = std::env::var(var)
            .with_context(|| format!("service account not found for domain {domain}: check the {var} environment variable"))?;
        return ServiceAccountKey::from_json(&json);
    }
    if let Some(path) = &config.service_account {
        return ServiceAccountKey::from_file(path);
    }
    bail!("tenant {domain} has neither service_account nor service_account_env configured")
}
