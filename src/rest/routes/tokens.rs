// rest/routes/tokens.rs — token subscription bookkeeping.
//
// Token documents are keyed by the SHA-256 of the token string, which makes
// every save idempotent and lets the fan-out path delete dead tokens without
// a lookup.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::broadcast::token_doc_id;
use crate::error::ProviderError;
use crate::firestore::{value, WriteOp, MAX_WRITES_PER_COMMIT};
use crate::rest::{failure, tenant_for_request, ApiResult};
use crate::retry::retry_if;
use crate::AppContext;

/// Same validation everywhere a token crosses the API boundary.
fn is_valid_token(token: &str) -> bool {
    !token.trim().is_empty()
}

fn token_fields(token: &str) -> Map<String, Value> {
    let now = Utc::now();
    let mut fields = Map::new();
    fields.insert("token".to_string(), value::string(token));
    fields.insert("createdAt".to_string(), value::timestamp(now));
    fields.insert("updatedAt".to_string(), value::timestamp(now));
    fields
}

// ─── Save one token ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SaveTokenRequest {
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn save_token(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<SaveTokenRequest>,
) -> ApiResult {
    let tenant = tenant_for_request(&ctx, &headers).await?;

    let token = match body.token.as_deref() {
        Some(t) if is_valid_token(t) => t,
        _ => return Err(failure(StatusCode::BAD_REQUEST, "FCM token is required")),
    };

    let collection = tenant.config.collection.as_str();
    tenant
        .firestore
        .set_document(collection, &token_doc_id(token), token_fields(token))
        .await
        .map_err(|e| {
            error!(domain = %tenant.domain, err = %e, "failed to save token");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    // Topic subscription is best-effort: the saved record alone is enough
    // for the fan-out path.
    if let Err(e) = tenant
        .fcm
        .subscribe_to_topic(std::slice::from_ref(&token.to_string()), &tenant.config.topic)
        .await
    {
        warn!(domain = %tenant.domain, err = %e, "topic subscribe failed — continuing");
    }

    Ok(Json(json!({
        "success": true,
        "message": "Token saved successfully",
    })))
}

// ─── Batch save ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BatchSaveRequest {
    #[serde(default)]
    pub tokens: Option<Vec<Value>>,
}

/// Save many tokens at once: one store commit per 500-token chunk, committed
/// sequentially with quota-retry so a subscription burst stays under the
/// store's write limits.
pub async fn batch_save_tokens(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<BatchSaveRequest>,
) -> ApiResult {
    let tenant = tenant_for_request(&ctx, &headers).await?;

    let tokens = match body.tokens {
        Some(t) if !t.is_empty() => t,
        _ => return Err(failure(StatusCode::BAD_REQUEST, "Tokens array is required")),
    };

    let valid_tokens: Vec<String> = tokens
        .iter()
        .filter_map(Value::as_str)
        .filter(|t| is_valid_token(t))
        .map(str::to_string)
        .collect();
    if valid_tokens.is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "No valid tokens provided"));
    }

    let collection = tenant.config.collection.as_str();
    let policy = ctx.config.broadcast.policy();
    let inter_batch_delay = ctx.config.broadcast.inter_batch_delay();
    let total_batches = valid_tokens.len().div_ceil(MAX_WRITES_PER_COMMIT);

    let mut saved = 0usize;
    let mut failed = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for (index, chunk) in valid_tokens.chunks(MAX_WRITES_PER_COMMIT).enumerate() {
        let batch_number = index + 1;
        if index > 0 && !inter_batch_delay.is_zero() {
            tokio::time::sleep(inter_batch_delay).await;
        }

        let writes: Vec<WriteOp> = chunk
            .iter()
            .map(|token| WriteOp::Set {
                collection: collection.to_string(),
                doc_id: token_doc_id(token),
                fields: token_fields(token),
            })
            .collect();

        let result = retry_if(&policy, ProviderError::is_quota, || {
            tenant.firestore.commit(&writes)
        })
        .await;

        match result {
            Ok(()) => {
                saved += chunk.len();
                info!(
                    batch = batch_number,
                    total = total_batches,
                    count = chunk.len(),
                    "token batch saved"
                );
            }
            Err(e) => {
                failed += chunk.len();
                errors.push(format!("Batch {batch_number}: {e}"));
                error!(batch = batch_number, err = %e, "token batch failed");
            }
        }
    }

    let mut response = json!({
        "success": failed == 0,
        "total": valid_tokens.len(),
        "saved": saved,
        "failed": failed,
        "batches": total_batches,
        "message": format!(
            "Saved {saved} of {} tokens in {total_batches} batches",
            valid_tokens.len()
        ),
    });
    if !errors.is_empty() {
        response["errors"] = json!(errors);
    }
    Ok(Json(response))
}

// ─── Check subscription ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CheckSubscriptionRequest {
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn check_subscription(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<CheckSubscriptionRequest>,
) -> ApiResult {
    let tenant = tenant_for_request(&ctx, &headers).await?;

    let token = match body.token.as_deref() {
        Some(t) if is_valid_token(t) => t,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "isSubscribed": false })),
            ));
        }
    };

    let doc = tenant
        .firestore
        .get_document(&tenant.config.collection, &token_doc_id(token))
        .await
        .map_err(|e| {
            error!(domain = %tenant.domain, err = %e, "subscription check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "isSubscribed": false })),
            )
        })?;

    let is_subscribed = doc
        .map(|d| d.get_str("token") == Some(token))
        .unwrap_or(false);

    Ok(Json(json!({
        "success": true,
        "isSubscribed": is_subscribed,
    })))
}

// ─── Subscriber count ────────────────────────────────────────────────────────

pub async fn subscriber_count(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> ApiResult {
    let tenant = tenant_for_request(&ctx, &headers).await?;

    match tenant.firestore.count(&tenant.config.collection).await {
        Ok(count) => Ok(Json(json!({ "success": true, "count": count }))),
        Err(e) => {
            error!(domain = %tenant.domain, err = %e, "subscriber count failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": e.to_string(), "count": 0 })),
            ))
        }
    }
}

// ─── Cleanup ─────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct CleanupRequest {
    #[serde(default)]
    pub password: Option<String>,
}

/// Delete token documents whose `token` field is missing or blank — the same
/// validation the count and send paths apply. Admin-gated.
pub async fn cleanup_invalid_tokens(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Option<Json<CleanupRequest>>,
) -> ApiResult {
    let tenant = tenant_for_request(&ctx, &headers).await?;

    let Json(body) = body.unwrap_or_default();
    if body.password.as_deref() != Some(ctx.config.admin_password.as_str()) {
        return Err(failure(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    let collection = tenant.config.collection.as_str();
    let docs = tenant.firestore.list_all(collection).await.map_err(|e| {
        error!(domain = %tenant.domain, err = %e, "token listing failed");
        failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let to_delete: Vec<String> = docs
        .iter()
        .filter(|doc| !doc.get_str("token").map(is_valid_token).unwrap_or(false))
        .map(|doc| doc.id().to_string())
        .collect();

    if to_delete.is_empty() {
        return Ok(Json(json!({
            "success": true,
            "message": "No invalid tokens found",
            "deleted": [],
        })));
    }

    for chunk in to_delete.chunks(MAX_WRITES_PER_COMMIT) {
        let writes: Vec<WriteOp> = chunk
            .iter()
            .map(|doc_id| WriteOp::Delete {
                collection: collection.to_string(),
                doc_id: doc_id.clone(),
            })
            .collect();
        tenant.firestore.commit(&writes).await.map_err(|e| {
            error!(domain = %tenant.domain, err = %e, "cleanup delete failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    }

    info!(domain = %tenant.domain, deleted = to_delete.len(), "invalid token documents removed");
    Ok(Json(json!({
        "success": true,
        "message": format!("Deleted {} invalid token documents", to_delete.len()),
        "deleted": to_delete,
    })))
}
