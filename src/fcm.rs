//! Client for the push-messaging provider's HTTP v1 API.
//!
//! Three operations: a single topic send, per-token sends for one batch of a
//! fan-out, and topic subscription for newly saved tokens. The provider's
//! batch primitive is client-side — "multicast" is one HTTP send per token —
//! so [`FcmClient::send_each`] runs the sends with bounded, order-preserving
//! concurrency and reports one classified outcome per token.

use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{classify_response, ProviderError};
use crate::gauth::TokenProvider;

pub const DEFAULT_SEND_URL: &str = "https://fcm.googleapis.com/v1";
pub const DEFAULT_TOPIC_MGMT_URL: &str = "https://iid.googleapis.com";

/// In-flight sends per batch. The provider SDK uses a comparable window.
const SEND_CONCURRENCY: usize = 8;

// ─── Message content ─────────────────────────────────────────────────────────

/// What gets displayed, shared between the topic and fan-out paths.
#[derive(Debug, Clone)]
pub struct PushContent {
    pub title: String,
    pub body: String,
    /// Absolute URL the notification opens; also used for the webpush icon.
    pub link: Option<String>,
}

impl PushContent {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            link: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

/// Where a single send is addressed.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Topic(&'a str),
    Token(&'a str),
}

/// Build the v1 `messages:send` payload for one target.
pub fn build_message(target: Target<'_>, content: &PushContent) -> Value {
    let link = content.link.as_deref().unwrap_or("/");
    let mut message = json!({
        "notification": {
            "title": content.title,
            "body": content.body,
        },
        "webpush": {
            "headers": { "Urgency": "high" },
            "notification": {
                "title": content.title,
                "body": content.body,
                "requireInteraction": false,
            },
            "fcmOptions": { "link": link },
        },
    });
    match target {
        Target::Topic(topic) => message["topic"] = json!(topic),
        Target::Token(token) => message["token"] = json!(token),
    }
    json!({ "message": message })
}

// ─── Client ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FcmClient {
    http: reqwest::Client,
    send_url: String,
    topic_mgmt_url: String,
    project_id: String,
    auth: Arc<TokenProvider>,
}

impl FcmClient {
    pub fn new(
        project_id: impl Into<String>,
        auth: Arc<TokenProvider>,
        send_url: Option<String>,
        topic_mgmt_url: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            send_url: send_url.unwrap_or_else(|| DEFAULT_SEND_URL.to_string()),
            topic_mgmt_url: topic_mgmt_url.unwrap_or_else(|| DEFAULT_TOPIC_MGMT_URL.to_string()),
            project_id: project_id.into(),
            auth,
        }
    }

    fn messages_send_url(&self) -> String {
        format!(
            "{}/projects/{}/messages:send",
            self.send_url, self.project_id
        )
    }

    async fn bearer(&self) -> Result<String, ProviderError> {
        self.auth
            .bearer()
            .await
            .map_err(|e| ProviderError::Auth(format!("{e:#}")))
    }

    async fn send_one(&self, payload: &Value) -> Result<String, ProviderError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .post(self.messages_send_url())
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            let body: Value = resp
                .json()
                .await
                .map_err(|e| ProviderError::Other(format!("malformed send response: {e}")))?;
            // Response is { "name": "projects/.../messages/<id>" }.
            let name = body.get("name").and_then(Value::as_str).unwrap_or_default();
            return Ok(name.to_string());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_response(status.as_u16(), &body))
    }

    /// Single send to a provider-managed topic. Returns the message ID.
    pub async fn send_to_topic(
        &self,
        topic: &str,
        content: &PushContent,
    ) -> Result<String, ProviderError> {
        self.send_one(&build_message(Target::Topic(topic), content))
            .await
    }

    /// One send per token with bounded concurrency; results line up with the
    /// input slice so callers can map failures back to tokens.
    pub async fn send_each(
        &self,
        tokens: &[String],
        content: &PushContent,
    ) -> Vec<Result<String, ProviderError>> {
        // Payloads are built up front so each in-flight future owns its own.
        let payloads: Vec<Value> = tokens
            .iter()
            .map(|token| build_message(Target::Token(token), content))
            .collect();
        stream::iter(payloads)
            .map(|payload| async move { self.send_one(&payload).await })
            .buffered(SEND_CONCURRENCY)
            .collect()
            .await
    }

    /// Add tokens to a topic via the instance-ID batch endpoint.
    ///
    /// Best-effort from the caller's point of view: a failure here does not
    /// invalidate the saved token records, which drive the fan-out path.
    pub async fn subscribe_to_topic(
        &self,
        tokens: &[String],
        topic: &str,
    ) -> Result<(), ProviderError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .post(format!("{}/iid/v1:batchAdd", self.topic_mgmt_url))
            .bearer_auth(token)
            .header("access_token_auth", "true")
            .json(&json!({
                "to": format!("/topics/{topic}"),
                "registration_tokens": tokens,
            }))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_response(status.as_u16(), &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_message_shape() {
        let content = PushContent::new("Election update", "Polls close at 5pm")
            .with_link("https://client1.com");
        let msg = build_message(Target::Topic("notifications"), &content);

        assert_eq!(msg["message"]["topic"], "notifications");
        assert!(msg["message"].get("token").is_none());
        assert_eq!(msg["message"]["notification"]["title"], "Election update");
        assert_eq!(
            msg["message"]["webpush"]["fcmOptions"]["link"],
            "https://client1.com"
        );
        assert_eq!(msg["message"]["webpush"]["headers"]["Urgency"], "high");
    }

    #[test]
    fn token_message_shape() {
        let content = PushContent::new("t", "b");
        let msg = build_message(Target::Token("tok-1"), &content);

        assert_eq!(msg["message"]["token"], "tok-1");
        assert!(msg["message"].get("topic").is_none());
        // No link configured: webpush opens the site root.
        assert_eq!(msg["message"]["webpush"]["fcmOptions"]["link"], "/");
    }
}
