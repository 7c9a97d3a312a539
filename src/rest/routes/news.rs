// rest/routes/news.rs — tenant-scoped news CRUD.
//
// News documents live in a shared `news` collection with a `domain` field;
// listing filters on that field and sorts in memory, which avoids needing a
// composite index on the store.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::firestore::{value, Document};
use crate::rest::{failure, tenant_for_request, ApiResult};
use crate::AppContext;

const NEWS_COLLECTION: &str = "news";
const LIST_LIMIT: usize = 50;

#[derive(Deserialize)]
pub struct NewsRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn validated(body: &NewsRequest) -> Result<(&str, &str), (StatusCode, Json<Value>)> {
    match (body.title.as_deref(), body.body.as_deref()) {
        (Some(t), Some(b)) if !t.is_empty() && !b.is_empty() => Ok((t, b)),
        _ => Err(failure(StatusCode::BAD_REQUEST, "Title and body are required")),
    }
}

fn created_at(doc: &Document) -> Option<DateTime<Utc>> {
    doc.get_timestamp("createdAt")
}

fn news_item(doc: &Document) -> Value {
    json!({
        "id": doc.id(),
        "title": doc.get_str("title").unwrap_or_default(),
        "body": doc.get_str("body").unwrap_or_default(),
        "createdAt": created_at(doc)
            .map(|t| t.to_rfc3339())
            .or_else(|| doc.get_str("createdAt").map(str::to_string))
            .unwrap_or_default(),
    })
}

/// Fetch a news document and confirm it belongs to the tenant. Documents
/// from other domains are reported as missing, not forbidden.
async fn owned_doc(
    ctx: &AppContext,
    headers: &HeaderMap,
    id: &str,
) -> Result<(Arc<crate::tenant::Tenant>, Document), (StatusCode, Json<Value>)> {
    let tenant = tenant_for_request(ctx, headers).await?;
    let doc = tenant
        .firestore
        .get_document(NEWS_COLLECTION, id)
        .await
        .map_err(|e| failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match doc {
        Some(doc) if doc.get_str("domain") == Some(tenant.domain.as_str()) => Ok((tenant, doc)),
        _ => Err(failure(StatusCode::NOT_FOUND, "News not found")),
    }
}

pub async fn list(State(ctx): State<Arc<AppContext>>, headers: HeaderMap) -> ApiResult {
    let tenant = tenant_for_request(&ctx, &headers).await?;

    let mut docs = tenant
        .firestore
        .query_equals(NEWS_COLLECTION, "domain", &tenant.domain)
        .await
        .map_err(|e| {
            error!(domain = %tenant.domain, err = %e, "news listing failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    // Newest first; documents without a timestamp sink to the end.
    docs.sort_by_key(|doc| std::cmp::Reverse(created_at(doc).unwrap_or(DateTime::UNIX_EPOCH)));

    let news: Vec<Value> = docs.iter().take(LIST_LIMIT).map(news_item).collect();
    Ok(Json(json!({ "success": true, "news": news })))
}

pub async fn create(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<NewsRequest>,
) -> ApiResult {
    let tenant = tenant_for_request(&ctx, &headers).await?;
    let (title, news_body) = validated(&body)?;

    let mut fields = Map::new();
    fields.insert("title".to_string(), value::string(title));
    fields.insert("body".to_string(), value::string(news_body));
    fields.insert("domain".to_string(), value::string(&tenant.domain));
    fields.insert("createdAt".to_string(), value::timestamp(Utc::now()));

    let id = tenant
        .firestore
        .create_document(NEWS_COLLECTION, fields)
        .await
        .map_err(|e| {
            error!(domain = %tenant.domain, err = %e, "news create failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    info!(domain = %tenant.domain, %id, "news item created");
    Ok(Json(json!({ "success": true, "message": "News saved successfully" })))
}

pub async fn get_one(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let (_tenant, doc) = owned_doc(&ctx, &headers, &id).await?;
    Ok(Json(json!({ "success": true, "news": news_item(&doc) })))
}

pub async fn update(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<NewsRequest>,
) -> ApiResult {
    let (tenant, existing) = owned_doc(&ctx, &headers, &id).await?;
    let (title, news_body) = validated(&body)?;

    // Full-document set, so carry the original creation time forward.
    let mut fields = Map::new();
    fields.insert("title".to_string(), value::string(title));
    fields.insert("body".to_string(), value::string(news_body));
    fields.insert("domain".to_string(), value::string(&tenant.domain));
    fields.insert(
        "createdAt".to_string(),
        value::timestamp(created_at(&existing).unwrap_or_else(Utc::now)),
    );
    fields.insert("updatedAt".to_string(), value::timestamp(Utc::now()));

    tenant
        .firestore
        .set_document(NEWS_COLLECTION, &id, fields)
        .await
        .map_err(|e| {
            error!(domain = %tenant.domain, err = %e, "news update failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(json!({ "success": true, "message": "News updated successfully" })))
}

pub async fn delete(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let (tenant, _doc) = owned_doc(&ctx, &headers, &id).await?;

    tenant
        .firestore
        .delete_document(NEWS_COLLECTION, &id)
        .await
        .map_err(|e| {
            error!(domain = %tenant.domain, err = %e, "news delete failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    info!(domain = %tenant.domain, %id, "news item deleted");
    Ok(Json(json!({ "success": true, "message": "News deleted successfully" })))
}
