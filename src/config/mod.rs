//! Layered daemon configuration.
//!
//! Priority: CLI / env var > TOML file > built-in default, mirrored from the
//! same three-layer scheme throughout. Tenants are static TOML sections — one
//! per served domain — mapping the request `Host` to a provider project,
//! token collection, and broadcast topic.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;

use crate::retry::BackoffPolicy;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── Tenant sections ─────────────────────────────────────────────────────────

/// Subscribe-page branding returned with the public client config.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BrandingConfig {
    pub title: String,
    pub subtitle: String,
}

/// Public web-client fields (safe to expose; served by `/api/firebase-config`).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WebClientConfig {
    pub api_key: String,
    pub auth_domain: String,
    pub storage_bucket: String,
    pub messaging_sender_id: String,
    pub app_id: String,
    pub vapid_key: String,
}

/// One served domain (`[tenant."client1.com"]` in notifyd.toml).
#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    /// Provider project ID.
    pub project_id: String,
    /// Path to the service-account key JSON file.
    pub service_account: Option<PathBuf>,
    /// Name of an environment variable holding the key JSON. Takes
    /// precedence over `service_account` when both are set.
    pub service_account_env: Option<String>,
    /// Token collection in the document store (default: "fcm_tokens").
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Broadcast topic name (default: "notifications").
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub branding: BrandingConfig,
    #[serde(default)]
    pub web: WebClientConfig,
}

fn default_collection() -> String {
    "fcm_tokens".to_string()
}

fn default_topic() -> String {
    "notifications".to_string()
}

// ─── Broadcast tuning ────────────────────────────────────────────────────────

/// Fan-out tuning (`[broadcast]` in notifyd.toml).
///
/// The 500-recipient batch size is a provider limit, not configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Attempts per quota-throttled batch, including the first (default: 3).
    pub max_attempts: u32,
    /// First backoff delay in milliseconds (default: 2000).
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds (default: 30000).
    pub max_backoff_ms: u64,
    /// Pause between consecutive batches in milliseconds (default: 100).
    pub inter_batch_delay_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
            inter_batch_delay_ms: 100,
        }
    }
}

impl BroadcastConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            multiplier: 2.0,
        }
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

// ─── Endpoint overrides ──────────────────────────────────────────────────────

/// Provider endpoint overrides (`[endpoints]`), for tests and private
/// gateways. `None` means the public default URL.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointsConfig {
    pub firestore_url: Option<String>,
    pub fcm_url: Option<String>,
    pub topic_mgmt_url: Option<String>,
    pub oauth_token_url: Option<String>,
}

// ─── TOML config file ────────────────────────────────────────────────────────

/// All fields are optional overrides.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// HTTP server port (default: 8080).
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; use "0.0.0.0" behind a proxy).
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,notifyd=trace".
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json".
    log_format: Option<String>,
    /// Admin password for the login gate and cleanup endpoint.
    admin_password: Option<String>,
    /// Fan-out tuning (`[broadcast]`).
    broadcast: Option<BroadcastConfig>,
    /// Provider endpoint overrides (`[endpoints]`).
    endpoints: Option<EndpointsConfig>,
    /// Tenant sections (`[tenant."domain"]`).
    tenant: Option<HashMap<String, TenantConfig>>,
}

fn load_toml(path: &Path) -> Option<TomlConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config file — using defaults");
            None
        }
    }
}

// ─── NotifydConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NotifydConfig {
    pub port: u16,
    pub bind_address: String,
    pub log: String,
    pub log_format: String,
    /// Password for `/api/admin/login` and the cleanup endpoint.
    pub admin_password: String,
    /// True when no password was configured and the built-in default is live.
    pub default_admin_password: bool,
    pub broadcast: BroadcastConfig,
    pub endpoints: EndpointsConfig,
    tenants: HashMap<String, TenantConfig>,
}

impl NotifydConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `config_path`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        config_path: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let config_path = config_path.unwrap_or_else(|| PathBuf::from("notifyd.toml"));
        let toml = load_toml(&config_path).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let log_format = std::env::var("NOTIFYD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let bind_address = bind_address
            .or(std::env::var("NOTIFYD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let configured_password = std::env::var("ADMIN_PASSWORD")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.admin_password);
        let default_admin_password = configured_password.is_none();
        let admin_password =
            configured_password.unwrap_or_else(|| DEFAULT_ADMIN_PASSWORD.to_string());

        let mut endpoints = toml.endpoints.unwrap_or_default();
        if let Ok(url) = std::env::var("NOTIFYD_FIRESTORE_URL") {
            if !url.is_empty() {
                endpoints.firestore_url = Some(url);
            }
        }
        if let Ok(url) = std::env::var("NOTIFYD_FCM_URL") {
            if !url.is_empty() {
                endpoints.fcm_url = Some(url);
            }
        }

        Self {
            port,
            bind_address,
            log,
            log_format,
            admin_password,
            default_admin_password,
            broadcast: toml.broadcast.unwrap_or_default(),
            endpoints,
            tenants: toml.tenant.unwrap_or_default(),
        }
    }

    /// Config for tests: no file, no env, explicit tenants.
    pub fn for_tests(tenants: HashMap<String, TenantConfig>) -> Self {
        Self {
            port: 0,
            bind_address: default_bind_address(),
            log: "error".to_string(),
            log_format: "pretty".to_string(),
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
            default_admin_password: true,
            broadcast: BroadcastConfig::default(),
            endpoints: EndpointsConfig::default(),
            tenants,
        }
    }

    pub fn tenant(&self, domain: &str) -> Option<&TenantConfig> {
        self.tenants.get(domain)
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }
}

/// Strip the port from a `Host` header value.
pub fn domain_from_host(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_header_port_is_stripped() {
        assert_eq!(domain_from_host("client1.com:8080"), "client1.com");
        assert_eq!(domain_from_host("client1.com"), "client1.com");
        assert_eq!(domain_from_host("localhost:3000"), "localhost");
        assert_eq!(domain_from_host(""), "");
    }

    #[test]
    fn tenant_sections_parse_with_defaults() {
        let toml: TomlConfig = toml::from_str(
            r#"
            port = 9090

            [broadcast]
            max_attempts = 5

            [tenant."client1.com"]
            project_id = "demo-project"
            service_account = "/etc/notifyd/client1.json"

            [tenant."client2.com"]
            project_id = "other-project"
            service_account_env = "SERVICE_ACCOUNT_CLIENT2"
            collection = "push_tokens"
            topic = "alerts"

            [tenant."client2.com".branding]
            title = "Get updates"
            subtitle = "Stay informed"
            "#,
        )
        .unwrap();

        assert_eq!(toml.port, Some(9090));
        assert_eq!(toml.broadcast.unwrap().max_attempts, 5);

        let tenants = toml.tenant.unwrap();
        let t1 = &tenants["client1.com"];
        assert_eq!(t1.project_id, "demo-project");
        assert_eq!(t1.collection, "fcm_tokens");
        assert_eq!(t1.topic, "notifications");

        let t2 = &tenants["client2.com"];
        assert_eq!(t2.collection, "push_tokens");
        assert_eq!(t2.topic, "alerts");
        assert_eq!(t2.branding.title, "Get updates");
    }

    #[test]
    fn broadcast_policy_mirrors_config() {
        let cfg = BroadcastConfig {
            max_attempts: 4,
            initial_backoff_ms: 250,
            max_backoff_ms: 1000,
            inter_batch_delay_ms: 10,
        };
        let policy = cfg.policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_millis(1000));
        assert_eq!(cfg.inter_batch_delay(), Duration::from_millis(10));
    }

    #[test]
    fn max_attempts_is_clamped_to_at_least_one() {
        let cfg = BroadcastConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(cfg.policy().max_attempts, 1);
    }
}
