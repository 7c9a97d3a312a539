// rest/routes/notifications.rs — broadcast send, retry of failed tokens, and
// delivery stats.
//
// A fresh send goes out over the provider-managed topic (one HTTP call, the
// provider fans out). A retry targets the exact tokens that failed before, so
// it runs the batched per-token engine instead. Both paths log to
// `notification_logs` for the stats endpoint.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::broadcast::Broadcaster;
use crate::fcm::PushContent;
use crate::firestore::{value, Document};
use crate::rest::{failure, site_url, tenant_for_request, ApiResult};
use crate::AppContext;

const LOGS_COLLECTION: &str = "notification_logs";

// ─── Send ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(rename = "clientId", default)]
    pub client_id: Option<String>,
}

pub async fn send_push(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<SendRequest>,
) -> ApiResult {
    let tenant = tenant_for_request(&ctx, &headers).await?;

    let (title, message_body) = match (body.title.as_deref(), body.body.as_deref()) {
        (Some(t), Some(b)) if !t.is_empty() && !b.is_empty() => (t, b),
        _ => return Err(failure(StatusCode::BAD_REQUEST, "Title and body are required")),
    };

    // An explicit clientId overrides the tenant's configured topic.
    let topic = body
        .client_id
        .as_deref()
        .map(|c| format!("{c}_notifications"))
        .unwrap_or_else(|| tenant.config.topic.clone());

    // Count snapshot before sending, for the log and the response; an
    // unreachable store aborts the send.
    let subscriber_count = tenant
        .firestore
        .count(&tenant.config.collection)
        .await
        .map_err(|e| {
            error!(domain = %tenant.domain, err = %e, "subscriber count lookup failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let content = PushContent::new(title, message_body);
    let send_result = tenant.fcm.send_to_topic(&topic, &content).await;
    let (success, message_id, error_message) = match &send_result {
        Ok(id) => (true, Some(id.clone()), None),
        Err(e) => (false, None, Some(e.to_string())),
    };

    let mut fields = Map::new();
    fields.insert("title".to_string(), value::string(title));
    fields.insert("body".to_string(), value::string(message_body));
    fields.insert("topic".to_string(), value::string(&topic));
    fields.insert(
        "subscriberCount".to_string(),
        value::integer(subscriber_count as i64),
    );
    fields.insert("success".to_string(), value::boolean(success));
    if let Some(id) = &message_id {
        fields.insert("messageId".to_string(), value::string(id));
    }
    if let Some(msg) = &error_message {
        fields.insert("error".to_string(), value::string(msg));
    }
    fields.insert("sentAt".to_string(), value::timestamp(Utc::now()));
    fields.insert("domain".to_string(), value::string(&tenant.domain));

    if let Err(e) = tenant.firestore.create_document(LOGS_COLLECTION, fields).await {
        error!(domain = %tenant.domain, err = %e, "failed to write notification log");
    }

    if success {
        info!(domain = %tenant.domain, %topic, subscriber_count, "notification sent");
        Ok(Json(json!({
            "success": true,
            "messageId": message_id,
            "subscriberCount": subscriber_count,
            "message": format!("Notification sent successfully to {subscriber_count} subscribers"),
        })))
    } else {
        error!(domain = %tenant.domain, %topic, err = ?error_message, "notification send failed");
        Err(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_message.unwrap_or_else(|| "Failed to send notification".to_string()),
        ))
    }
}

// ─── Retry ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RetryRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(rename = "logId", default)]
    pub log_id: Option<String>,
    #[serde(rename = "failedTokens", default)]
    pub failed_tokens: Option<Vec<String>>,
}

/// Re-send to the tokens that failed in a previous broadcast — from a log
/// document, or from a list the caller supplies directly. Runs the batched
/// fan-out engine so invalid tokens get pruned from the store as well.
pub async fn retry_failed(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<RetryRequest>,
) -> ApiResult {
    let tenant = tenant_for_request(&ctx, &headers).await?;

    if body.log_id.is_none() && body.failed_tokens.is_none() {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            "Either logId or failedTokens array is required",
        ));
    }

    let tokens_to_retry: Vec<String> = if let Some(log_id) = body.log_id.as_deref() {
        let doc = tenant
            .firestore
            .get_document(LOGS_COLLECTION, log_id)
            .await
            .map_err(|e| failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let Some(doc) = doc else {
            return Err(failure(StatusCode::NOT_FOUND, "Notification log not found"));
        };
        match doc.get_str_array("failedTokens") {
            Some(tokens) if !tokens.is_empty() => tokens,
            _ => {
                return Ok(Json(json!({
                    "success": false,
                    "message": "No failed tokens found in this notification log",
                })));
            }
        }
    } else {
        body.failed_tokens.clone().unwrap_or_default()
    };

    if tokens_to_retry.is_empty() {
        return Ok(Json(json!({
            "success": false,
            "message": "No tokens to retry",
        })));
    }

    let (title, message_body) = match (body.title.as_deref(), body.body.as_deref()) {
        (Some(t), Some(b)) if !t.is_empty() && !b.is_empty() => (t, b),
        _ => return Err(failure(StatusCode::BAD_REQUEST, "Title and body are required")),
    };

    let content =
        PushContent::new(title, message_body).with_link(site_url(&tenant.domain));
    let broadcaster = Broadcaster::new(&tenant.fcm, &tenant.firestore, &tenant.config.collection)
        .with_policy(ctx.config.broadcast.policy())
        .with_inter_batch_delay(ctx.config.broadcast.inter_batch_delay());

    let report = broadcaster.send(&tokens_to_retry, &content).await;
    let success = report.any_delivered();

    let batch_results: Vec<Value> = report
        .batch_results
        .iter()
        .map(|b| serde_json::to_value(b).unwrap_or(Value::Null))
        .collect();

    let mut fields = Map::new();
    fields.insert("title".to_string(), value::string(format!("[RETRY] {title}")));
    fields.insert("body".to_string(), value::string(message_body));
    fields.insert(
        "subscriberCount".to_string(),
        value::integer(report.subscriber_count as i64),
    );
    fields.insert("success".to_string(), value::boolean(success));
    fields.insert(
        "successCount".to_string(),
        value::integer(report.success_count as i64),
    );
    fields.insert(
        "failedCount".to_string(),
        value::integer(report.failed_count as i64),
    );
    fields.insert("sentAt".to_string(), value::timestamp(Utc::now()));
    fields.insert("domain".to_string(), value::string(&tenant.domain));
    fields.insert(
        "totalBatches".to_string(),
        value::integer(report.total_batches as i64),
    );
    fields.insert(
        "batchResults".to_string(),
        value::array(
            report
                .batch_results
                .iter()
                .map(|b| {
                    let mut m = Map::new();
                    m.insert("batchNumber".to_string(), value::integer(b.batch_number as i64));
                    m.insert("successCount".to_string(), value::integer(b.success_count as i64));
                    m.insert("failedCount".to_string(), value::integer(b.failed_count as i64));
                    value::map(m)
                })
                .collect(),
        ),
    );
    fields.insert("isRetry".to_string(), value::boolean(true));
    if let Some(log_id) = body.log_id.as_deref() {
        fields.insert("originalLogId".to_string(), value::string(log_id));
    }
    if !report.failed_tokens.is_empty() {
        // Keeps the chain going: a later retry can target what failed here.
        fields.insert(
            "failedTokens".to_string(),
            value::array(report.failed_tokens.iter().map(value::string).collect()),
        );
    }

    if let Err(e) = tenant.firestore.create_document(LOGS_COLLECTION, fields).await {
        error!(domain = %tenant.domain, err = %e, "failed to write retry log");
    }

    if success {
        info!(
            domain = %tenant.domain,
            delivered = report.success_count,
            targeted = report.subscriber_count,
            pruned = report.pruned,
            "retry complete"
        );
        Ok(Json(json!({
            "success": true,
            "subscriberCount": report.subscriber_count,
            "successCount": report.success_count,
            "totalBatches": report.total_batches,
            "batchResults": batch_results,
            "message": format!(
                "Retry: Sent to {} of {} failed subscribers across {} batches",
                report.success_count, report.subscriber_count, report.total_batches
            ),
        })))
    } else {
        Err(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!(
                "Retry failed: Could not deliver to any of {} subscribers",
                report.subscriber_count
            ),
        ))
    }
}

// ─── Stats ───────────────────────────────────────────────────────────────────

/// One log row reduced to what the stats math needs.
#[derive(Debug, Clone)]
pub struct LogSummary {
    pub sent_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub subscriber_count: i64,
}

#[derive(Debug, PartialEq)]
pub struct Stats {
    pub total_sent: usize,
    pub sent_today: usize,
    pub sent_this_week: usize,
    pub sent_this_month: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: String,
    pub total_subscribers_reached: i64,
}

/// Windowed counts over the most recent logs. `now` is injected so the
/// midnight/week/month boundaries are testable.
pub fn compute_stats(logs: &[LogSummary], now: DateTime<Utc>) -> Stats {
    let today = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .unwrap_or(now);
    let week_ago = now - ChronoDuration::days(7);
    let month_start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);

    let total_sent = logs.len();
    let in_window = |cutoff: DateTime<Utc>| {
        logs.iter()
            .filter(|l| l.sent_at.map(|t| t >= cutoff).unwrap_or(false))
            .count()
    };

    let successful = logs.iter().filter(|l| l.success == Some(true)).count();
    let failed = logs.iter().filter(|l| l.success == Some(false)).count();
    let success_rate = if total_sent > 0 {
        format!("{:.1}%", successful as f64 / total_sent as f64 * 100.0)
    } else {
        "0%".to_string()
    };

    Stats {
        total_sent,
        sent_today: in_window(today),
        sent_this_week: in_window(week_ago),
        sent_this_month: in_window(month_start),
        successful,
        failed,
        success_rate,
        total_subscribers_reached: logs.iter().map(|l| l.subscriber_count).sum(),
    }
}

fn log_to_json(doc: &Document) -> Value {
    let mut out = Map::new();
    out.insert("id".to_string(), json!(doc.id()));
    for (field, raw) in &doc.fields {
        let decoded = if let Some(s) = value::as_string(raw) {
            json!(s)
        } else if let Some(b) = value::as_boolean(raw) {
            json!(b)
        } else if let Some(i) = value::as_integer(raw) {
            json!(i)
        } else if let Some(t) = value::as_timestamp(raw) {
            json!(t.to_rfc3339())
        } else if let Some(items) = value::as_string_array(raw) {
            json!(items)
        } else {
            // Nested maps (batchResults) stay in wire form; the admin UI
            // only reads the scalar fields.
            continue;
        };
        out.insert(field.clone(), decoded);
    }
    Value::Object(out)
}

pub async fn stats(State(ctx): State<Arc<AppContext>>, headers: HeaderMap) -> ApiResult {
    let tenant = tenant_for_request(&ctx, &headers).await?;

    let docs = tenant
        .firestore
        .query_latest(LOGS_COLLECTION, "sentAt", 100)
        .await
        .map_err(|e| {
            error!(domain = %tenant.domain, err = %e, "failed to load notification logs");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": e.to_string(),
                    "stats": {
                        "totalSent": 0,
                        "sentToday": 0,
                        "sentThisWeek": 0,
                        "sentThisMonth": 0,
                        "successful": 0,
                        "failed": 0,
                        "successRate": "0%",
                        "totalSubscribersReached": 0,
                    },
                    "recentLogs": [],
                })),
            )
        })?;

    let summaries: Vec<LogSummary> = docs
        .iter()
        .map(|doc| LogSummary {
            sent_at: doc.get_timestamp("sentAt"),
            success: doc.get_bool("success"),
            subscriber_count: doc.get_integer("subscriberCount").unwrap_or(0),
        })
        .collect();
    let stats = compute_stats(&summaries, Utc::now());

    let recent: Vec<Value> = docs.iter().take(10).map(log_to_json).collect();

    Ok(Json(json!({
        "success": true,
        "stats": {
            "totalSent": stats.total_sent,
            "sentToday": stats.sent_today,
            "sentThisWeek": stats.sent_this_week,
            "sentThisMonth": stats.sent_this_month,
            "successful": stats.successful,
            "failed": stats.failed,
            "successRate": stats.success_rate,
            "totalSubscribersReached": stats.total_subscribers_reached,
        },
        "recentLogs": recent,
    })))
}
