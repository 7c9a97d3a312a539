// Fan-out engine against mocked provider endpoints: batching, quota retry,
// and invalid-token pruning.

use httpmock::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use notifyd::broadcast::{token_doc_id, Broadcaster};
use notifyd::fcm::{FcmClient, PushContent};
use notifyd::firestore::FirestoreClient;
use notifyd::gauth::TokenProvider;
use notifyd::retry::BackoffPolicy;

const PROJECT: &str = "demo-project";

fn clients(server: &MockServer) -> (FcmClient, FirestoreClient) {
    let auth = Arc::new(TokenProvider::fixed("test-token"));
    let fcm = FcmClient::new(
        PROJECT,
        Arc::clone(&auth),
        Some(server.base_url()),
        Some(server.base_url()),
    );
    let firestore = FirestoreClient::new(PROJECT, auth, Some(server.base_url()));
    (fcm, firestore)
}

fn fast_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
    }
}

fn send_path() -> String {
    format!("/projects/{PROJECT}/messages:send")
}

fn commit_path() -> String {
    format!("/projects/{PROJECT}/databases/(default)/documents:commit")
}

#[tokio::test]
async fn delivers_to_every_token_and_tallies_batches() {
    let server = MockServer::start();
    let send_mock = server.mock(|when, then| {
        when.method(POST).path(send_path());
        then.status(200)
            .json_body(serde_json::json!({ "name": format!("projects/{PROJECT}/messages/m1") }));
    });

    let (fcm, firestore) = clients(&server);
    let broadcaster = Broadcaster::new(&fcm, &firestore, "fcm_tokens")
        .with_policy(fast_policy())
        .with_inter_batch_delay(Duration::ZERO);

    let tokens: Vec<String> = (0..3).map(|i| format!("tok-{i}")).collect();
    let content = PushContent::new("Hello", "World");
    let report = broadcaster.send(&tokens, &content).await;

    assert_eq!(report.subscriber_count, 3);
    assert_eq!(report.success_count, 3);
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.total_batches, 1);
    assert_eq!(report.batch_results.len(), 1);
    assert_eq!(report.batch_results[0].success_count, 3);
    assert!(report.failed_tokens.is_empty());
    assert_eq!(report.pruned, 0);
    assert!(report.any_delivered());
    assert_eq!(send_mock.hits(), 3);
}

#[tokio::test]
async fn one_token_over_the_limit_spills_into_a_second_batch() {
    let server = MockServer::start();
    let send_mock = server.mock(|when, then| {
        when.method(POST).path(send_path());
        then.status(200)
            .json_body(serde_json::json!({ "name": format!("projects/{PROJECT}/messages/m") }));
    });

    let (fcm, firestore) = clients(&server);
    let broadcaster = Broadcaster::new(&fcm, &firestore, "fcm_tokens")
        .with_policy(fast_policy())
        .with_inter_batch_delay(Duration::ZERO);

    let tokens: Vec<String> = (0..501).map(|i| format!("tok-{i}")).collect();
    let report = broadcaster
        .send(&tokens, &PushContent::new("Hello", "World"))
        .await;

    assert_eq!(report.subscriber_count, 501);
    assert_eq!(report.success_count, 501);
    assert_eq!(report.total_batches, 2);
    assert_eq!(report.batch_results.len(), 2);
    assert_eq!(report.batch_results[0].success_count, 500);
    assert_eq!(report.batch_results[1].success_count, 1);
    assert_eq!(send_mock.hits(), 501);
}

#[tokio::test]
async fn empty_token_list_sends_nothing() {
    let server = MockServer::start();
    let send_mock = server.mock(|when, then| {
        when.method(POST).path(send_path());
        then.status(200).json_body(serde_json::json!({ "name": "m" }));
    });

    let (fcm, firestore) = clients(&server);
    let broadcaster = Broadcaster::new(&fcm, &firestore, "fcm_tokens");

    let report = broadcaster
        .send(&[], &PushContent::new("Hello", "World"))
        .await;

    assert_eq!(report.subscriber_count, 0);
    assert_eq!(report.total_batches, 0);
    assert!(!report.any_delivered());
    assert_eq!(send_mock.hits(), 0);
}

#[tokio::test]
async fn unregistered_tokens_are_pruned_from_the_store() {
    let server = MockServer::start();

    let ok_mock = server.mock(|when, then| {
        when.method(POST)
            .path(send_path())
            .json_body_partial(r#"{"message": {"token": "tok-live"}}"#);
        then.status(200)
            .json_body(serde_json::json!({ "name": "projects/demo-project/messages/m1" }));
    });
    let dead_mock = server.mock(|when, then| {
        when.method(POST)
            .path(send_path())
            .json_body_partial(r#"{"message": {"token": "tok-dead"}}"#);
        then.status(404)
            .json_body(serde_json::json!({ "error": { "status": "NOT_FOUND", "message": "UNREGISTERED" } }));
    });
    // The prune commit must delete by the token's document ID.
    let commit_mock = server.mock(|when, then| {
        when.method(POST)
            .path(commit_path())
            .body_contains(token_doc_id("tok-dead"));
        then.status(200).json_body(serde_json::json!({}));
    });

    let (fcm, firestore) = clients(&server);
    let broadcaster = Broadcaster::new(&fcm, &firestore, "fcm_tokens")
        .with_policy(fast_policy())
        .with_inter_batch_delay(Duration::ZERO);

    let tokens = vec!["tok-live".to_string(), "tok-dead".to_string()];
    let report = broadcaster
        .send(&tokens, &PushContent::new("Hello", "World"))
        .await;

    assert_eq!(report.success_count, 1);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.failed_tokens, vec!["tok-dead".to_string()]);
    assert_eq!(report.invalid_tokens, vec!["tok-dead".to_string()]);
    assert_eq!(report.pruned, 1);
    assert_eq!(ok_mock.hits(), 1);
    assert_eq!(dead_mock.hits(), 1);
    assert_eq!(commit_mock.hits(), 1);
}

#[tokio::test]
async fn quota_errors_are_retried_with_backoff_until_attempts_run_out() {
    let server = MockServer::start();
    let throttled_mock = server.mock(|when, then| {
        when.method(POST).path(send_path());
        then.status(429)
            .json_body(serde_json::json!({ "error": { "status": "RESOURCE_EXHAUSTED" } }));
    });

    let (fcm, firestore) = clients(&server);
    let policy = fast_policy();
    let broadcaster = Broadcaster::new(&fcm, &firestore, "fcm_tokens")
        .with_policy(policy.clone())
        .with_inter_batch_delay(Duration::ZERO);

    let tokens = vec!["tok-0".to_string()];
    let report = broadcaster
        .send(&tokens, &PushContent::new("Hello", "World"))
        .await;

    assert_eq!(report.success_count, 0);
    assert_eq!(report.failed_count, 1);
    // Quota failures are not invalid tokens: nothing gets pruned.
    assert!(report.invalid_tokens.is_empty());
    assert_eq!(report.pruned, 0);
    // One send per attempt, no more.
    assert_eq!(throttled_mock.hits(), policy.max_attempts as usize);
}

#[tokio::test]
async fn only_throttled_tokens_are_resent() {
    let server = MockServer::start();
    let ok_mock = server.mock(|when, then| {
        when.method(POST)
            .path(send_path())
            .json_body_partial(r#"{"message": {"token": "tok-ok"}}"#);
        then.status(200)
            .json_body(serde_json::json!({ "name": "projects/demo-project/messages/m1" }));
    });
    let throttled_mock = server.mock(|when, then| {
        when.method(POST)
            .path(send_path())
            .json_body_partial(r#"{"message": {"token": "tok-slow"}}"#);
        then.status(429)
            .json_body(serde_json::json!({ "error": { "status": "RESOURCE_EXHAUSTED" } }));
    });

    let (fcm, firestore) = clients(&server);
    let broadcaster = Broadcaster::new(&fcm, &firestore, "fcm_tokens")
        .with_policy(fast_policy())
        .with_inter_batch_delay(Duration::ZERO);

    let tokens = vec!["tok-ok".to_string(), "tok-slow".to_string()];
    let report = broadcaster
        .send(&tokens, &PushContent::new("Hello", "World"))
        .await;

    assert_eq!(report.success_count, 1);
    assert_eq!(report.failed_count, 1);
    // The successful token went out exactly once; retries targeted only the
    // throttled one.
    assert_eq!(ok_mock.hits(), 1);
    assert_eq!(throttled_mock.hits(), 3);
}

#[tokio::test]
async fn non_quota_failures_are_final() {
    let server = MockServer::start();
    let broken_mock = server.mock(|when, then| {
        when.method(POST).path(send_path());
        then.status(500).body("internal");
    });

    let (fcm, firestore) = clients(&server);
    let broadcaster = Broadcaster::new(&fcm, &firestore, "fcm_tokens")
        .with_policy(fast_policy())
        .with_inter_batch_delay(Duration::ZERO);

    let tokens = vec!["tok-0".to_string()];
    let report = broadcaster
        .send(&tokens, &PushContent::new("Hello", "World"))
        .await;

    assert_eq!(report.failed_count, 1);
    assert!(report.invalid_tokens.is_empty());
    assert_eq!(broken_mock.hits(), 1);
}
