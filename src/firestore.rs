//! REST client for the managed document store.
//!
//! Speaks the Firestore v1 JSON surface directly: document get/patch/delete,
//! auto-ID creation, `:commit` batch writes, `:runQuery` with a single field
//! filter, and `:runAggregationQuery` for counts. The store's typed value
//! encoding (`stringValue`, `timestampValue`, ...) is wrapped by the small
//! codec in [`value`].
//!
//! All writes and consistency guarantees belong to the store; this client is
//! deliberately thin.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{classify_response, ProviderError};
use crate::gauth::TokenProvider;

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// The store rejects commits with more than 500 writes.
pub const MAX_WRITES_PER_COMMIT: usize = 500;

// ─── Value codec ─────────────────────────────────────────────────────────────

/// Helpers for the store's typed value JSON.
pub mod value {
    use super::*;

    pub fn string(s: impl Into<String>) -> Value {
        json!({ "stringValue": s.into() })
    }

    pub fn integer(i: i64) -> Value {
        // Integers travel as decimal strings.
        json!({ "integerValue": i.to_string() })
    }

    pub fn boolean(b: bool) -> Value {
        json!({ "booleanValue": b })
    }

    pub fn timestamp(t: DateTime<Utc>) -> Value {
        json!({ "timestampValue": t.to_rfc3339() })
    }

    pub fn array(items: Vec<Value>) -> Value {
        json!({ "arrayValue": { "values": items } })
    }

    pub fn map(fields: Map<String, Value>) -> Value {
        json!({ "mapValue": { "fields": fields } })
    }

    pub fn as_string(v: &Value) -> Option<&str> {
        v.get("stringValue")?.as_str()
    }

    pub fn as_integer(v: &Value) -> Option<i64> {
        match v.get("integerValue")? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_boolean(v: &Value) -> Option<bool> {
        v.get("booleanValue")?.as_bool()
    }

    pub fn as_string_array(v: &Value) -> Option<Vec<String>> {
        let items = v.pointer("/arrayValue/values")?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(as_string)
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn as_timestamp(v: &Value) -> Option<DateTime<Utc>> {
        let raw = v.get("timestampValue")?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

// ─── Documents ───────────────────────────────────────────────────────────────

/// A document as returned by the store: full resource name + typed fields.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub fields: Map<String, Value>,
}

impl Document {
    fn from_json(v: &Value) -> Option<Self> {
        Some(Self {
            name: v.get("name")?.as_str()?.to_string(),
            fields: v
                .get("fields")
                .and_then(|f| f.as_object())
                .cloned()
                .unwrap_or_default(),
        })
    }

    /// Last path segment of the resource name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(value::as_string)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(value::as_boolean)
    }

    pub fn get_integer(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(value::as_integer)
    }

    pub fn get_timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.fields.get(field).and_then(value::as_timestamp)
    }

    pub fn get_str_array(&self, field: &str) -> Option<Vec<String>> {
        self.fields.get(field).and_then(value::as_string_array)
    }
}

/// One write in a `:commit` batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Full-document set (replaces any existing fields).
    Set {
        collection: String,
        doc_id: String,
        fields: Map<String, Value>,
    },
    Delete {
        collection: String,
        doc_id: String,
    },
}

// ─── Client ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FirestoreClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    auth: Arc<TokenProvider>,
}

impl FirestoreClient {
    pub fn new(project_id: impl Into<String>, auth: Arc<TokenProvider>, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            project_id: project_id.into(),
            auth,
        }
    }

    /// `{base}/projects/{p}/databases/(default)/documents`
    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents",
            self.base_url, self.project_id
        )
    }

    fn doc_url(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.documents_root(), collection, doc_id)
    }

    /// Full resource name of a document (as used inside commit writes).
    fn doc_name(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "projects/{}/databases/(default)/documents/{}/{}",
            self.project_id, collection, doc_id
        )
    }

    async fn bearer(&self) -> Result<String, ProviderError> {
        self.auth
            .bearer()
            .await
            .map_err(|e| ProviderError::Auth(format!("{e:#}")))
    }

    /// Fetch a document; `Ok(None)` when it does not exist.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<Document>, ProviderError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .get(self.doc_url(collection, doc_id))
            .bearer_auth(token)
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let body = check(resp).await?;
        Ok(Document::from_json(&body))
    }

    /// Set a document, replacing all fields (upsert).
    pub async fn set_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), ProviderError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .patch(self.doc_url(collection, doc_id))
            .bearer_auth(token)
            .json(&json!({ "fields": fields }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn delete_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> Result<(), ProviderError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .delete(self.doc_url(collection, doc_id))
            .bearer_auth(token)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    /// Create a document with a store-assigned ID; returns the new ID.
    pub async fn create_document(
        &self,
        collection: &str,
        fields: Map<String, Value>,
    ) -> Result<String, ProviderError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .post(format!("{}/{}", self.documents_root(), collection))
            .bearer_auth(token)
            .json(&json!({ "fields": fields }))
            .send()
            .await?;
        let body = check(resp).await?;
        let doc = Document::from_json(&body)
            .ok_or_else(|| ProviderError::Other("create returned no document".into()))?;
        Ok(doc.id().to_string())
    }

    /// Commit a batch of writes atomically. Callers must keep batches at or
    /// under [`MAX_WRITES_PER_COMMIT`].
    pub async fn commit(&self, writes: &[WriteOp]) -> Result<(), ProviderError> {
        debug_assert!(writes.len() <= MAX_WRITES_PER_COMMIT);
        let writes_json: Vec<Value> = writes
            .iter()
            .map(|w| match w {
                WriteOp::Set {
                    collection,
                    doc_id,
                    fields,
                } => json!({
                    "update": {
                        "name": self.doc_name(collection, doc_id),
                        "fields": fields,
                    }
                }),
                WriteOp::Delete { collection, doc_id } => {
                    json!({ "delete": self.doc_name(collection, doc_id) })
                }
            })
            .collect();

        let token = self.bearer().await?;
        let resp = self
            .http
            .post(format!("{}:commit", self.documents_root()))
            .bearer_auth(token)
            .json(&json!({ "writes": writes_json }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    /// All documents in `collection` where `field == value` (no ordering; the
    /// caller sorts in memory, which avoids a composite index on the store).
    pub async fn query_equals(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Document>, ProviderError> {
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": "EQUAL",
                        "value": { "stringValue": value },
                    }
                }
            }
        });
        self.run_query(query).await
    }

    /// Every document in a collection.
    pub async fn list_all(&self, collection: &str) -> Result<Vec<Document>, ProviderError> {
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
            }
        });
        self.run_query(query).await
    }

    /// Latest documents by a timestamp field, newest first.
    pub async fn query_latest(
        &self,
        collection: &str,
        order_field: &str,
        limit: u32,
    ) -> Result<Vec<Document>, ProviderError> {
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "orderBy": [{
                    "field": { "fieldPath": order_field },
                    "direction": "DESCENDING",
                }],
                "limit": limit,
            }
        });
        self.run_query(query).await
    }

    async fn run_query(&self, query: Value) -> Result<Vec<Document>, ProviderError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .post(format!("{}:runQuery", self.documents_root()))
            .bearer_auth(token)
            .json(&query)
            .send()
            .await?;
        let body = check(resp).await?;

        // :runQuery streams an array of result objects; entries without a
        // "document" key are read-time markers.
        let results = body
            .as_array()
            .ok_or_else(|| ProviderError::Other("unexpected query response shape".into()))?;
        Ok(results
            .iter()
            .filter_map(|r| r.get("document"))
            .filter_map(Document::from_json)
            .collect())
    }

    /// Server-side document count for a collection.
    pub async fn count(&self, collection: &str) -> Result<u64, ProviderError> {
        let query = json!({
            "structuredAggregationQuery": {
                "structuredQuery": {
                    "from": [{ "collectionId": collection }],
                },
                "aggregations": [{ "count": {}, "alias": "count" }],
            }
        });
        let token = self.bearer().await?;
        let resp = self
            .http
            .post(format!("{}:runAggregationQuery", self.documents_root()))
            .bearer_auth(token)
            .json(&query)
            .send()
            .await?;
        let body = check(resp).await?;

        let count = body
            .as_array()
            .and_then(|results| results.first())
            .and_then(|r| r.pointer("/result/aggregateFields/count"))
            .and_then(value::as_integer)
            .ok_or_else(|| ProviderError::Other("count response missing aggregate".into()))?;
        Ok(count.max(0) as u64)
    }
}

/// Turn a provider response into classified success or failure.
async fn check(resp: reqwest::Response) -> Result<Value, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("malformed response: {e}")));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify_response(status.as_u16(), &body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_codec_round_trips() {
        assert_eq!(value::as_string(&value::string("abc")), Some("abc"));
        assert_eq!(value::as_integer(&value::integer(42)), Some(42));
        assert_eq!(value::as_boolean(&value::boolean(true)), Some(true));

        let now = Utc::now();
        let decoded = value::as_timestamp(&value::timestamp(now)).unwrap();
        assert_eq!(decoded.timestamp(), now.timestamp());
    }

    #[test]
    fn integer_decodes_from_string_form() {
        // The wire format carries integers as strings.
        let v = json!({ "integerValue": "1234" });
        assert_eq!(value::as_integer(&v), Some(1234));
    }

    #[test]
    fn string_array_round_trips() {
        let v = value::array(vec![value::string("a"), value::string("b")]);
        assert_eq!(
            value::as_string_array(&v),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn document_id_is_last_segment() {
        let doc = Document {
            name: "projects/p/databases/(default)/documents/news/abc123".into(),
            fields: Map::new(),
        };
        assert_eq!(doc.id(), "abc123");
    }

    #[test]
    fn document_field_accessors() {
        let v = json!({
            "name": "projects/p/databases/(default)/documents/fcm_tokens/h1",
            "fields": {
                "token": { "stringValue": "tok-1" },
                "success": { "booleanValue": false },
                "successCount": { "integerValue": "12" },
            }
        });
        let doc = Document::from_json(&v).unwrap();
        assert_eq!(doc.get_str("token"), Some("tok-1"));
        assert_eq!(doc.get_bool("success"), Some(false));
        assert_eq!(doc.get_integer("successCount"), Some(12));
        assert!(doc.get_str("missing").is_none());
    }
}
