//! Tests for `ConnectionRegistry`.
//!
//! These exercise the registry directly, without any socket or broker:
//! registration, job correlation, delivery claims and shutdown behaviour.

use std::collections::HashSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use compilify_core::error::CoreError;
use compilify_core::job::{CompletionEvent, ExecutionResult};
use compilify_core::types::{ConnectionId, JobId};

use compilify_api::relay::{ConnectionRegistry, DeliveryOutcome};
use compilify_api::ws::{OutboundFrame, ServerMessage};

fn completion(job_id: JobId, output: &str) -> CompletionEvent {
    CompletionEvent::new(job_id, ExecutionResult::succeeded(output))
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_registry_is_empty() {
    let registry = ConnectionRegistry::new();

    assert_eq!(registry.connection_count().await, 0);
    assert_eq!(registry.outstanding_jobs().await, 0);
}

#[tokio::test]
async fn register_then_unregister() {
    let registry = ConnectionRegistry::new();
    let id = ConnectionId::new();

    let _conn = registry.register(id).await.unwrap();
    assert!(registry.is_live(&id).await);
    assert_eq!(registry.connection_count().await, 1);

    assert!(registry.unregister(&id).await);
    assert!(!registry.is_live(&id).await);
    assert_eq!(registry.connection_count().await, 0);
}

#[tokio::test]
async fn duplicate_register_is_rejected() {
    let registry = ConnectionRegistry::new();
    let id = ConnectionId::new();
    let _conn = registry.register(id).await.unwrap();

    assert_matches!(
        registry.register(id).await,
        Err(CoreError::DuplicateConnection(dup)) if dup == id
    );
    assert_eq!(registry.connection_count().await, 1);
}

#[tokio::test]
async fn unregister_unknown_is_noop() {
    let registry = ConnectionRegistry::new();
    let _conn = registry.register(ConnectionId::new()).await.unwrap();

    assert!(!registry.unregister(&ConnectionId::new()).await);
    assert_eq!(registry.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Job correlation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_job_resolves_to_owner() {
    let registry = ConnectionRegistry::new();
    let id = ConnectionId::new();
    let _conn = registry.register(id).await.unwrap();
    let job = JobId::new();

    registry.add_job(&id, job).await.unwrap();

    assert_eq!(registry.resolve_owner(&job).await, Some(id));
    assert_eq!(registry.outstanding_for(&id).await, vec![job]);
}

#[tokio::test]
async fn add_job_on_unknown_connection_creates_nothing() {
    let registry = ConnectionRegistry::new();
    let stranger = ConnectionId::new();
    let job = JobId::new();

    assert_matches!(
        registry.add_job(&stranger, job).await,
        Err(CoreError::UnknownConnection(id)) if id == stranger
    );
    assert_eq!(registry.resolve_owner(&job).await, None);
    assert_eq!(registry.outstanding_jobs().await, 0);
}

#[tokio::test]
async fn job_id_cannot_be_reassigned() {
    let registry = ConnectionRegistry::new();
    let a = ConnectionId::new();
    let b = ConnectionId::new();
    let _ca = registry.register(a).await.unwrap();
    let _cb = registry.register(b).await.unwrap();
    let job = JobId::new();

    registry.add_job(&a, job).await.unwrap();

    assert_matches!(registry.add_job(&b, job).await, Err(CoreError::DuplicateJob(_)));
    assert_eq!(registry.resolve_owner(&job).await, Some(a));
}

#[tokio::test]
async fn remove_job_clears_correlation() {
    let registry = ConnectionRegistry::new();
    let id = ConnectionId::new();
    let _conn = registry.register(id).await.unwrap();
    let job = JobId::new();
    registry.add_job(&id, job).await.unwrap();

    assert!(registry.remove_job(&job).await);
    assert!(!registry.remove_job(&job).await);
    assert_eq!(registry.resolve_owner(&job).await, None);
    assert!(registry.outstanding_for(&id).await.is_empty());
}

#[tokio::test]
async fn concurrent_add_job_keeps_every_correlation() {
    let registry = Arc::new(ConnectionRegistry::new());
    let mut conns = Vec::new();
    for _ in 0..8 {
        let id = ConnectionId::new();
        conns.push((id, registry.register(id).await.unwrap()));
    }

    let mut handles = Vec::new();
    for (id, _) in &conns {
        for _ in 0..25 {
            let registry = Arc::clone(&registry);
            let id = *id;
            handles.push(tokio::spawn(async move {
                let job = JobId::new();
                registry.add_job(&id, job).await.unwrap();
                (id, job)
            }));
        }
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let (owner, job) = handle.await.unwrap();
        assert!(seen.insert(job), "job id issued twice");
        assert_eq!(registry.resolve_owner(&job).await, Some(owner));
    }
    assert_eq!(registry.outstanding_jobs().await, 200);
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn confirmed_job_is_delivered_once() {
    let registry = ConnectionRegistry::new();
    let id = ConnectionId::new();
    let mut conn = registry.register(id).await.unwrap();
    let job = JobId::new();
    registry.add_job(&id, job).await.unwrap();
    registry.confirm_job(&job, None).await;

    let event = completion(job, "42");
    assert_eq!(
        registry.claim_for_delivery(event.clone()).await,
        DeliveryOutcome::Delivered(id)
    );
    assert_eq!(registry.claim_for_delivery(event).await, DeliveryOutcome::Unknown);

    assert_matches!(
        conn.outbound.recv().await,
        Some(OutboundFrame::Push(ServerMessage::Accepted { job_id, .. })) if job_id == job
    );
    assert_matches!(
        conn.outbound.recv().await,
        Some(OutboundFrame::Push(ServerMessage::Result { job_id, result, .. }))
            if job_id == job && result.output == "42"
    );
    assert!(conn.outbound.try_recv().is_err(), "result pushed twice");
    assert_eq!(registry.resolve_owner(&job).await, None);
}

#[tokio::test]
async fn completion_after_unregister_is_orphaned() {
    let registry = ConnectionRegistry::new();
    let id = ConnectionId::new();
    let _conn = registry.register(id).await.unwrap();
    let job = JobId::new();
    registry.add_job(&id, job).await.unwrap();
    registry.confirm_job(&job, None).await;

    registry.unregister(&id).await;

    assert_eq!(
        registry.claim_for_delivery(completion(job, "late")).await,
        DeliveryOutcome::Orphaned(id)
    );
    assert_eq!(registry.outstanding_jobs().await, 0);
}

#[tokio::test]
async fn unknown_completion_is_noop() {
    let registry = ConnectionRegistry::new();

    assert_eq!(
        registry.claim_for_delivery(completion(JobId::new(), "?")).await,
        DeliveryOutcome::Unknown
    );
}

#[tokio::test]
async fn send_to_unknown_connection_returns_false() {
    let registry = ConnectionRegistry::new();

    assert!(
        !registry
            .send_to(&ConnectionId::new(), ServerMessage::bad_frame("x"))
            .await
    );
}

// ---------------------------------------------------------------------------
// Heartbeat and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_all_reaches_every_connection() {
    let registry = ConnectionRegistry::new();
    let mut a = registry.register(ConnectionId::new()).await.unwrap();
    let mut b = registry.register(ConnectionId::new()).await.unwrap();

    registry.ping_all().await;

    assert_eq!(a.outbound.recv().await, Some(OutboundFrame::Ping));
    assert_eq!(b.outbound.recv().await, Some(OutboundFrame::Ping));
}

#[tokio::test]
async fn close_all_sends_close_and_empties_registry() {
    let registry = ConnectionRegistry::new();
    let mut conn = registry.register(ConnectionId::new()).await.unwrap();

    registry.close_all().await;

    assert_eq!(conn.outbound.recv().await, Some(OutboundFrame::Close));
    assert_eq!(registry.connection_count().await, 0);
}

#[tokio::test]
async fn closed_admissions_refuse_connections_and_jobs() {
    let registry = ConnectionRegistry::new();
    let id = ConnectionId::new();
    let _conn = registry.register(id).await.unwrap();

    registry.close_admissions().await;

    assert!(!registry.is_accepting().await);
    assert_matches!(
        registry.register(ConnectionId::new()).await,
        Err(CoreError::Unavailable(_))
    );
    assert_matches!(
        registry.add_job(&id, JobId::new()).await,
        Err(CoreError::Unavailable(_))
    );
}
