//! Unit tests for the tool-call rendezvous table.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use grok_sidecar::chat::{CallState, RendezvousTable};
use grok_sidecar::AppError;

#[tokio::test]
async fn register_creates_waiting_entry() {
    let table = RendezvousTable::new();

    let entry = table.register("call-1", "search").await;

    assert_eq!(entry.call_id(), "call-1");
    assert_eq!(entry.name(), "search");
    assert_eq!(entry.state().await, CallState::Waiting);
    assert!(table.contains("call-1").await);
    assert_eq!(table.len().await, 1);
}

#[tokio::test]
async fn resolve_wakes_blocked_waiter() {
    let table = Arc::new(RendezvousTable::new());
    let entry = table.register("call-1", "search").await;
    let cancel = CancellationToken::new();

    let waiter = {
        let table = Arc::clone(&table);
        let entry = Arc::clone(&entry);
        let cancel = cancel.clone();
        tokio::spawn(async move { table.wait(&entry, &cancel).await })
    };
    tokio::task::yield_now().await;

    table
        .resolve("call-1", vec![json!({"type":"text","text":"42"})], false)
        .await
        .expect("resolve");

    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter woke")
        .expect("join")
        .expect("result");
    assert_eq!(result.content, vec![json!({"type":"text","text":"42"})]);
    assert!(!result.is_error);
    assert_eq!(entry.state().await, CallState::Resolved);
}

#[tokio::test]
async fn result_delivered_before_wait_is_not_lost() {
    let table = RendezvousTable::new();
    let entry = table.register("early", "read").await;

    table
        .resolve("early", vec![json!("plain text")], true)
        .await
        .expect("resolve");
    let result = tokio::time::timeout(
        Duration::from_secs(2),
        table.wait(&entry, &CancellationToken::new()),
    )
    .await
    .expect("no hang")
    .expect("result");

    assert_eq!(result.content, vec![json!({"type":"text","text":"plain text"})]);
    assert!(result.is_error);
}

#[tokio::test]
async fn unknown_call_id_is_a_service_error() {
    let table = RendezvousTable::new();

    let err = table
        .resolve("nope", Vec::new(), false)
        .await
        .expect_err("unknown id");

    assert!(matches!(err, AppError::Service(ref msg) if msg == "Unknown tool call id: nope"));
}

#[tokio::test]
async fn resolve_after_unregister_fails() {
    let table = RendezvousTable::new();
    table.register("call-1", "search").await;
    table
        .resolve("call-1", Vec::new(), false)
        .await
        .expect("first resolve");

    table.unregister("call-1").await;

    assert!(table.is_empty().await);
    assert!(table.resolve("call-1", Vec::new(), false).await.is_err());
}

#[tokio::test]
async fn non_object_content_is_wrapped_as_text() {
    let table = RendezvousTable::new();
    let entry = table.register("c", "t").await;

    table
        .resolve("c", vec![json!(7), json!({"type":"image"})], false)
        .await
        .expect("resolve");
    let result = table
        .wait(&entry, &CancellationToken::new())
        .await
        .expect("result");

    assert_eq!(
        result.content,
        vec![json!({"type":"text","text":"7"}), json!({"type":"image"})]
    );
}

#[tokio::test]
async fn cancellation_releases_waiter() {
    let table = RendezvousTable::new();
    let entry = table.register("stuck", "slow").await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = table.wait(&entry, &cancel).await.expect_err("cancelled");

    assert!(matches!(err, AppError::Cancelled(ref msg) if msg.contains("stuck")));
}

#[tokio::test]
async fn bounded_wait_times_out() {
    let table = RendezvousTable::with_timeout(Some(Duration::from_secs(1)));
    let entry = table.register("slow", "fetch").await;

    let err = table
        .wait(&entry, &CancellationToken::new())
        .await
        .expect_err("timed out");

    assert!(
        matches!(err, AppError::Service(ref msg)
            if msg == "Timed out after 1s waiting for result of tool call slow"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn concurrent_chats_resolve_independently() {
    let table = Arc::new(RendezvousTable::new());
    let cancel = CancellationToken::new();
    let mut waiters = Vec::new();

    for i in 0..8 {
        let table = Arc::clone(&table);
        let cancel = cancel.clone();
        waiters.push(tokio::spawn(async move {
            let id = format!("call-{i}");
            let entry = table.register(&id, "tool").await;
            let result = table.wait(&entry, &cancel).await.expect("result");
            table.unregister(&id).await;
            (id, result.content)
        }));
    }

    for i in (0..8).rev() {
        let id = format!("call-{i}");
        while !table.contains(&id).await {
            tokio::task::yield_now().await;
        }
        table
            .resolve(&id, vec![json!(format!("out-{i}"))], false)
            .await
            .expect("resolve");
    }

    for waiter in waiters {
        let (id, content) = waiter.await.expect("join");
        let n = id.trim_start_matches("call-");
        assert_eq!(content, vec![json!({"type":"text","text":format!("out-{n}")})]);
    }
    assert!(table.is_empty().await);
}
