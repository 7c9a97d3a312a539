// rest/routes/health.rs — health, tenant warm-up, and public client config.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::rest::{failure, request_domain, ApiResult};
use crate::AppContext;

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let uptime = ctx.started_at.elapsed().as_secs();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime,
        "tenants": ctx.config.tenant_count(),
    }))
}

/// Builds the tenant's provider clients (and their access token on first
/// send) so the first admin action is fast. Never fails the caller.
pub async fn warm(State(ctx): State<Arc<AppContext>>, headers: HeaderMap) -> Json<Value> {
    let domain = request_domain(&headers);
    let _ = ctx.tenants.resolve(&domain).await;
    Json(json!({ "ok": true }))
}

/// Public web-client config for the tenant — safe-to-expose fields only.
pub async fn client_config(State(ctx): State<Arc<AppContext>>, headers: HeaderMap) -> ApiResult {
    let domain = request_domain(&headers);
    let tenant = ctx.config.tenant(&domain).ok_or_else(|| {
        failure(
            StatusCode::BAD_REQUEST,
            format!("No config found for domain: {domain}"),
        )
    })?;

    let web = &tenant.web;
    Ok(Json(json!({
        "success": true,
        "config": {
            "apiKey": web.api_key,
            "authDomain": web.auth_domain,
            "projectId": tenant.project_id,
            "storageBucket": web.storage_bucket,
            "messagingSenderId": web.messaging_sender_id,
            "appId": web.app_id,
            "vapidKey": web.vapid_key,
        },
        "branding": {
            "title": tenant.branding.title,
            "subtitle": tenant.branding.subtitle,
        },
    })))
}
