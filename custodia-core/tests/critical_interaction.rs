mod support;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use custodia_core::{
    DepositError,
    critical::{CriticalFuture, CriticalInteraction, CriticalOutcome, persist_with},
    store::{InMemoryResourceStore, ResourceClient, ResourceClientExt, ResourceKind, StoreOp},
};
use custodia_model::{IntegrationType, Submission, SubmissionStatus};
use tokio::sync::Barrier;

use support::{seed_repository, seed_submission};

/// Critical function appending `author`; the first attempt waits at
/// `barrier` so both interactions hold the same stale read.
fn append_author(
    client: Arc<dyn ResourceClient>,
    barrier: Arc<Barrier>,
    author: &'static str,
) -> impl Fn(Submission) -> CriticalFuture<Submission, ()> {
    let first_attempt = Arc::new(AtomicBool::new(true));
    move |mut submission: Submission| -> CriticalFuture<Submission, ()> {
        let client = Arc::clone(&client);
        let barrier = Arc::clone(&barrier);
        let first = first_attempt.swap(false, Ordering::SeqCst);
        Box::pin(async move {
            if first {
                barrier.wait().await;
            }
            submission.metadata.authors.push(author.to_string());
            Ok((client.update_resource(submission).await?, ()))
        })
    }
}

#[tokio::test]
async fn concurrent_interactions_never_both_write_from_the_same_read() {
    let store = InMemoryResourceStore::default();
    let repo = seed_repository(&store, "Repo", IntegrationType::Full);
    let submission = seed_submission(&store, &[&repo], true);
    let engine = CriticalInteraction::new(Arc::new(store.clone()));
    let barrier = Arc::new(Barrier::new(2));
    store.clear_operations();

    let (first, second) = tokio::join!(
        engine.perform_critical(
            submission.id,
            |_: &Submission| true,
            append_author(engine.client(), Arc::clone(&barrier), "Ada"),
            |_: &Submission, _: &()| Ok(()),
        ),
        engine.perform_critical(
            submission.id,
            |_: &Submission| true,
            append_author(engine.client(), Arc::clone(&barrier), "Grace"),
            |_: &Submission, _: &()| Ok(()),
        ),
    );

    assert!(first.success() && second.success());
    let conflicts = store
        .operations()
        .into_iter()
        .filter(|op| matches!(op, StoreOp::Conflict { .. }))
        .count();
    assert_eq!(conflicts, 1, "exactly one writer lost the race");

    let stored: Submission = store.read(submission.id.to_uuid()).await.unwrap();
    assert_eq!(stored.version, 3);
    let mut authors = stored.metadata.authors.clone();
    authors.sort();
    assert_eq!(authors, vec!["Ada".to_string(), "Grace".to_string()]);
}

#[tokio::test]
async fn exhausted_conflicts_report_failure_without_a_write() {
    let store = InMemoryResourceStore::default();
    let repo = seed_repository(&store, "Repo", IntegrationType::Full);
    let submission = seed_submission(&store, &[&repo], true);
    store.inject_conflicts(ResourceKind::Submission, submission.id.to_uuid(), 10);
    let engine = CriticalInteraction::new(Arc::new(store.clone())).with_max_attempts(3);

    let result = engine
        .perform_critical(
            submission.id,
            |_: &Submission| true,
            persist_with(engine.client(), |s: &mut Submission| {
                s.submission_status = SubmissionStatus::NeedsAttention;
                Ok(())
            }),
            |_: &Submission, _: &()| Ok(()),
        )
        .await;

    assert!(!result.success());
    assert!(matches!(
        result.outcome,
        CriticalOutcome::ConflictExhausted { attempts: 3, .. }
    ));
    assert!(result.throwable().is_some_and(DepositError::is_transient));
    assert_eq!(
        store.version(ResourceKind::Submission, submission.id.to_uuid()),
        Some(1)
    );
}

#[tokio::test]
async fn false_precondition_writes_nothing() {
    let store = InMemoryResourceStore::default();
    let repo = seed_repository(&store, "Repo", IntegrationType::Full);
    let submission = seed_submission(&store, &[&repo], true);
    let engine = CriticalInteraction::new(Arc::new(store.clone()));
    store.clear_operations();

    let result = engine
        .perform_critical(
            submission.id,
            |s: &Submission| s.submission_status == SubmissionStatus::Draft,
            persist_with(engine.client(), |s: &mut Submission| {
                s.submission_status = SubmissionStatus::Cancelled;
                Ok(())
            }),
            |_: &Submission, _: &()| Ok(()),
        )
        .await;

    assert!(!result.success());
    assert!(result.is_noop());
    assert!(
        store
            .operations()
            .iter()
            .all(|op| !matches!(op, StoreOp::Update { .. }))
    );
}

#[tokio::test]
async fn failed_postcondition_keeps_the_written_state() {
    let store = InMemoryResourceStore::default();
    let repo = seed_repository(&store, "Repo", IntegrationType::Full);
    let submission = seed_submission(&store, &[&repo], true);
    let engine = CriticalInteraction::new(Arc::new(store.clone()));

    let result = engine
        .perform_critical(
            submission.id,
            |_: &Submission| true,
            persist_with(engine.client(), |s: &mut Submission| {
                s.submission_status = SubmissionStatus::NeedsAttention;
                Ok(())
            }),
            |s: &Submission, _: &()| {
                Err(DepositError::Consistency(format!(
                    "submission {} flagged without a failed deposit",
                    s.id
                )))
            },
        )
        .await;

    assert!(!result.success());
    assert!(result.wrote());
    let message = result.throwable().expect("error").to_string();
    assert!(message.contains("flagged without a failed deposit"));

    let stored: Submission = store.read(submission.id.to_uuid()).await.unwrap();
    assert_eq!(stored.submission_status, SubmissionStatus::NeedsAttention);
    assert_eq!(stored.version, 2);
}
