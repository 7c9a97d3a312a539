// rest/mod.rs — Public JSON API server.
//
// Axum HTTP server wrapping the managed document store and messaging
// provider. Every /api handler resolves its tenant from the Host header
// first; an unknown domain is a 400 in the original response shape.
//
// Endpoints:
//   GET  /health
//   GET  /api/warm
//   GET  /api/firebase-config
//   POST /api/admin/login
//   POST /api/save-fcm-token
//   POST /api/batch-save-tokens
//   POST /api/check-subscription
//   POST /api/cleanup-invalid-tokens
//   GET  /api/get-subscriber-count
//   GET  /api/get-notification-stats
//   POST /api/send-push-notification
//   POST /api/retry-failed-notifications
//   GET/POST /api/news, GET/PUT/DELETE /api/news/{id}

pub mod routes;

use anyhow::Result;
use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::domain_from_host;
use crate::tenant::Tenant;
use crate::AppContext;

/// Handler result in the original wire shape: JSON body either way.
pub type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health (no tenant)
        .route("/health", get(routes::health::health))
        // Tenant warm-up + public client config
        .route("/api/warm", get(routes::health::warm))
        .route("/api/firebase-config", get(routes::health::client_config))
        // Admin gate
        .route("/api/admin/login", post(routes::admin::login))
        // Token subscription
        .route("/api/save-fcm-token", post(routes::tokens::save_token))
        .route("/api/batch-save-tokens", post(routes::tokens::batch_save_tokens))
        .route("/api/check-subscription", post(routes::tokens::check_subscription))
        .route(
            "/api/cleanup-invalid-tokens",
            post(routes::tokens::cleanup_invalid_tokens),
        )
        .route(
            "/api/get-subscriber-count",
            get(routes::tokens::subscriber_count),
        )
        // Broadcast
        .route(
            "/api/send-push-notification",
            post(routes::notifications::send_push),
        )
        .route(
            "/api/retry-failed-notifications",
            post(routes::notifications::retry_failed),
        )
        .route(
            "/api/get-notification-stats",
            get(routes::notifications::stats),
        )
        // News CRUD
        .route(
            "/api/news",
            get(routes::news::list).post(routes::news::create),
        )
        .route(
            "/api/news/{id}",
            get(routes::news::get_one)
                .put(routes::news::update)
                .delete(routes::news::delete),
        )
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

// ─── Shared handler helpers ──────────────────────────────────────────────────

/// `{success: false, message}` with a status — the original error shape.
pub(crate) fn failure(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({ "success": false, "message": message.into() })),
    )
}

/// Domain from the request `Host` header (port stripped).
pub(crate) fn request_domain(headers: &HeaderMap) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    domain_from_host(host).to_string()
}

/// Resolve the tenant for a request, or the original 400 response.
pub(crate) async fn tenant_for_request(
    ctx: &AppContext,
    headers: &HeaderMap,
) -> Result<Arc<Tenant>, (StatusCode, Json<Value>)> {
    let domain = request_domain(headers);
    ctx.tenants.resolve(&domain).await.map_err(|_| {
        failure(
            StatusCode::BAD_REQUEST,
            format!("No config found for domain: {domain}"),
        )
    })
}

/// Absolute site URL used in webpush links: plain http only for localhost.
pub(crate) fn site_url(domain: &str) -> String {
    let protocol = if domain.contains("localhost") {
        "http"
    } else {
        "https"
    };
    format!("{protocol}://{domain}")
}
