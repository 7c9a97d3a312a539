//! Provider error taxonomy.
//!
//! The only classification the broadcast path cares about is quota vs.
//! everything else: quota errors are retried with backoff, the rest are
//! surfaced as-is. Per-token send failures additionally distinguish
//! invalid/unregistered tokens so their documents can be pruned.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limit / quota exhaustion — retryable with backoff.
    #[error("provider quota exhausted: {0}")]
    Quota(String),

    /// The token is invalid or no longer registered — prune its document.
    #[error("token rejected: {0}")]
    InvalidToken(String),

    /// Credential or token-exchange failure.
    #[error("provider auth failed: {0}")]
    Auth(String),

    /// Transport failure or any unclassified provider response.
    #[error("provider call failed: {0}")]
    Other(String),
}

impl ProviderError {
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota(_))
    }

    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::InvalidToken(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.status().map(|s| s.as_u16() == 429).unwrap_or(false) {
            Self::Quota(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// Substring classification used for errors that only arrive as text,
/// matching the managed SDK's quota error messages.
pub fn is_quota_message(message: &str) -> bool {
    let m = message.to_lowercase();
    m.contains("quota")
        || m.contains("resource")
        || m.contains("exhausted")
        || m.contains("rate limit")
        || m.contains("429")
}

/// Classify an HTTP status + error body from a provider endpoint.
///
/// The messaging API reports dead tokens as 404 `UNREGISTERED` or 400
/// `INVALID_ARGUMENT`; both mean the token should be removed. Responses
/// with no structured status code fall back to [`is_quota_message`] on the
/// body text, since some throttling errors only arrive as prose.
pub fn classify_response(status: u16, body: &str) -> ProviderError {
    let upper = body.to_uppercase();
    if status == 429 || upper.contains("RESOURCE_EXHAUSTED") || upper.contains("QUOTA_EXCEEDED") {
        return ProviderError::Quota(format!("HTTP {status}: {body}"));
    }
    if upper.contains("UNREGISTERED") || upper.contains("INVALID_ARGUMENT") {
        return ProviderError::InvalidToken(format!("HTTP {status}: {body}"));
    }
    if status == 401 || status == 403 {
        return ProviderError::Auth(format!("HTTP {status}: {body}"));
    }
    if is_quota_message(body) {
        return ProviderError::Quota(format!("HTTP {status}: {body}"));
    }
    ProviderError::Other(format!("HTTP {status}: {body}"))
}
