//! Batched fan-out to individual tokens.
//!
//! The provider caps group sends at 500 recipients, so a broadcast splits the
//! token list into chunks of 500 and works through them sequentially. Within
//! a chunk, tokens whose sends fail with a quota-classified error are retried
//! with exponential backoff (bounded attempts, capped delay); all other
//! failures are final. Tokens the provider reports as invalid or unregistered
//! are deleted from the store afterwards so they never get another send.
//!
//! A short fixed pause between chunks keeps the call rate under the
//! provider's write limits, as the original service did.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ProviderError;
use crate::fcm::{FcmClient, PushContent};
use crate::firestore::{FirestoreClient, WriteOp, MAX_WRITES_PER_COMMIT};
use crate::retry::{retry_if, BackoffPolicy};

/// Provider-imposed group-send limit.
pub const BATCH_SIZE: usize = 500;

/// Pause between consecutive batches.
pub const INTER_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Document ID for a token record: SHA-256 hex of the token string.
/// Keeps IDs store-safe and makes saves idempotent per token.
pub fn token_doc_id(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

// ─── Outcome types ───────────────────────────────────────────────────────────

/// Per-batch tally, logged to the store alongside the notification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub batch_number: u32,
    pub success_count: u32,
    pub failed_count: u32,
}

/// Aggregate result of one fan-out run.
#[derive(Debug, Clone, Default)]
pub struct BroadcastReport {
    /// How many tokens the broadcast targeted.
    pub subscriber_count: usize,
    pub success_count: u32,
    pub failed_count: u32,
    pub total_batches: u32,
    pub batch_results: Vec<BatchOutcome>,
    /// Tokens that failed for any reason (candidates for a later retry).
    pub failed_tokens: Vec<String>,
    /// Tokens the provider rejected as invalid/unregistered (pruned).
    pub invalid_tokens: Vec<String>,
    /// How many invalid token documents were actually deleted.
    pub pruned: usize,
}

impl BroadcastReport {
    pub fn any_delivered(&self) -> bool {
        self.success_count > 0
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct Broadcaster<'a> {
    pub fcm: &'a FcmClient,
    pub firestore: &'a FirestoreClient,
    /// Token collection to prune invalid tokens from.
    pub collection: &'a str,
    pub policy: BackoffPolicy,
    pub inter_batch_delay: Duration,
}

impl<'a> Broadcaster<'a> {
    pub fn new(fcm: &'a FcmClient, firestore: &'a FirestoreClient, collection: &'a str) -> Self {
        Self {
            fcm,
            firestore,
            collection,
            policy: BackoffPolicy::default(),
            inter_batch_delay: INTER_BATCH_DELAY,
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    /// Fan a notification out to every token, batch by batch.
    pub async fn send(&self, tokens: &[String], content: &PushContent) -> BroadcastReport {
        let mut report = BroadcastReport {
            subscriber_count: tokens.len(),
            total_batches: tokens.len().div_ceil(BATCH_SIZE) as u32,
            ..Default::default()
        };

        for (index, chunk) in tokens.chunks(BATCH_SIZE).enumerate() {
            let batch_number = index as u32 + 1;
            if index > 0 && !self.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.inter_batch_delay).await;
            }

            let outcomes = self.send_batch(chunk, content).await;

            let mut success = 0u32;
            let mut failed = 0u32;
            for (token, outcome) in chunk.iter().zip(outcomes) {
                match outcome {
                    Ok(_) => success += 1,
                    Err(e) => {
                        failed += 1;
                        if e.is_invalid_token() {
                            report.invalid_tokens.push(token.clone());
                        }
                        report.failed_tokens.push(token.clone());
                    }
                }
            }

            info!(
                batch = batch_number,
                total = report.total_batches,
                sent = success,
                failed,
                "batch complete"
            );

            report.success_count += success;
            report.failed_count += failed;
            report.batch_results.push(BatchOutcome {
                batch_number,
                success_count: success,
                failed_count: failed,
            });
        }

        report.pruned = self.prune_invalid(&report.invalid_tokens).await;
        report
    }

    /// Send one chunk; quota-classified failures are retried with backoff,
    /// only for the tokens that hit them. Returns one outcome per token in
    /// input order.
    async fn send_batch(
        &self,
        chunk: &[String],
        content: &PushContent,
    ) -> Vec<Result<String, ProviderError>> {
        debug_assert!(chunk.len() <= BATCH_SIZE);

        let mut results: Vec<Option<Result<String, ProviderError>>> =
            (0..chunk.len()).map(|_| None).collect();
        let mut pending: Vec<usize> = (0..chunk.len()).collect();
        let mut delay = self.policy.initial_delay;

        for attempt in 1..=self.policy.max_attempts {
            let tokens: Vec<String> = pending.iter().map(|&i| chunk[i].clone()).collect();
            let outcomes = self.fcm.send_each(&tokens, content).await;

            let mut throttled = Vec::new();
            for (&slot, outcome) in pending.iter().zip(outcomes) {
                match outcome {
                    Err(e) if e.is_quota() && attempt < self.policy.max_attempts => {
                        throttled.push(slot);
                    }
                    other => results[slot] = Some(other),
                }
            }

            pending = throttled;
            if pending.is_empty() {
                break;
            }

            warn!(
                attempt,
                throttled = pending.len(),
                delay_ms = delay.as_millis(),
                "quota errors in batch — backing off"
            );
            tokio::time::sleep(delay).await;
            let next_ms = (delay.as_millis() as f64 * self.policy.multiplier) as u128;
            delay = Duration::from_millis(next_ms.min(self.policy.max_delay.as_millis()) as u64);
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(ProviderError::Other("send not attempted".into()))))
            .collect()
    }

    /// Delete the documents of tokens the provider rejected. Best-effort:
    /// a failed delete is logged and the token stays for the next cleanup.
    async fn prune_invalid(&self, invalid: &[String]) -> usize {
        if invalid.is_empty() {
            return 0;
        }

        let mut pruned = 0;
        for chunk in invalid.chunks(MAX_WRITES_PER_COMMIT) {
            let writes: Vec<WriteOp> = chunk
                .iter()
                .map(|token| WriteOp::Delete {
                    collection: self.collection.to_string(),
                    doc_id: token_doc_id(token),
                })
                .collect();

            let result = retry_if(&self.policy, ProviderError::is_quota, || {
                self.firestore.commit(&writes)
            })
            .await;

            match result {
                Ok(()) => pruned += chunk.len(),
                Err(e) => warn!(count = chunk.len(), err = %e, "failed to prune invalid tokens"),
            }
        }

        info!(pruned, "invalid tokens removed from store");
        pruned
    }
}
