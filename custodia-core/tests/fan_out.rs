mod support;

use std::{sync::Arc, time::Duration};

use custodia_core::{
    DepositError,
    dispatcher::DispatchError,
    snapshot::NO_FILES_ATTACHED,
    store::{InMemoryResourceStore, ResourceClientExt, ResourceFilter},
    transfer::PackagerRegistry,
};
use custodia_model::{AggregatedDepositStatus, Deposit, DepositStatus, IntegrationType};
use tokio::sync::Semaphore;

use support::{
    RecordingTransport, ScriptedResolver, build_services, config, packager, read_submission,
    seed_repository, seed_submission,
};

async fn deposits_of(store: &InMemoryResourceStore, submission: custodia_model::SubmissionId) -> Vec<Deposit> {
    store
        .find(&ResourceFilter::DepositsOfSubmission(submission))
        .await
        .unwrap()
}

#[tokio::test]
async fn submission_without_files_is_not_fanned_out() {
    let store = InMemoryResourceStore::default();
    let repo = seed_repository(&store, "Repo", IntegrationType::Full);
    let submission = seed_submission(&store, &[&repo], false);
    let transport = RecordingTransport::polling();
    let mut packagers = PackagerRegistry::new();
    packagers.register("Repo", packager(&transport));
    let services = build_services(
        &store,
        config(&[&repo]),
        packagers,
        ScriptedResolver::answering(&["processing"]),
    );

    let err = services.on_submission_ready(submission.id).await.unwrap_err();

    assert!(matches!(err, DepositError::Consistency(_)));
    assert!(err.to_string().contains(NO_FILES_ATTACHED), "{err}");
    let stored = read_submission(&store, submission.id).await;
    assert_eq!(
        stored.aggregated_deposit_status,
        AggregatedDepositStatus::InProgress
    );
    assert!(deposits_of(&store, submission.id).await.is_empty());
    services.shutdown().await;
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn link_only_repositories_get_no_deposit_task() {
    let store = InMemoryResourceStore::default();
    let full = seed_repository(&store, "Full", IntegrationType::Full);
    let link = seed_repository(&store, "Link", IntegrationType::WebLink);
    let submission = seed_submission(&store, &[&full, &link], true);
    let transport = RecordingTransport::polling();
    let mut packagers = PackagerRegistry::new();
    packagers.register("Full", packager(&transport));
    packagers.register("Link", packager(&transport));
    let mut config = config(&[&full]);
    config.poll.enabled = false;
    let services = build_services(
        &store,
        config,
        packagers,
        ScriptedResolver::answering(&["processing"]),
    );

    let report = services.on_submission_ready(submission.id).await.unwrap();
    services.dispatcher().wait_idle().await;

    assert_eq!(report.dispatched.len(), 1);
    assert_eq!(report.dispatched[0].1, full.id);
    assert_eq!(report.link_only, vec![link.id]);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].repository, full.id);
    assert_eq!(deposits_of(&store, submission.id).await.len(), 1);
    services.shutdown().await;
}

#[tokio::test]
async fn unresolved_packager_stops_the_fan_out_at_that_repository() {
    let store = InMemoryResourceStore::default();
    let first = seed_repository(&store, "First", IntegrationType::Full);
    let missing = seed_repository(&store, "Missing", IntegrationType::Full);
    let last = seed_repository(&store, "Last", IntegrationType::Full);
    let submission = seed_submission(&store, &[&first, &missing, &last], true);
    let transport = RecordingTransport::polling();
    let mut packagers = PackagerRegistry::new();
    packagers.register("First", packager(&transport));
    packagers.register("Last", packager(&transport));
    let mut config = config(&[&first, &last]);
    config.poll.enabled = false;
    let services = build_services(
        &store,
        config,
        packagers,
        ScriptedResolver::answering(&["processing"]),
    );

    let err = services.on_submission_ready(submission.id).await.unwrap_err();
    services.dispatcher().wait_idle().await;

    match &err {
        DepositError::FanOut {
            submission: failed_submission,
            deposit,
            repository,
            ..
        } => {
            assert_eq!(*failed_submission, submission.id);
            assert_eq!(*deposit, None);
            assert_eq!(*repository, missing.id);
        }
        other => panic!("expected fan-out error, got {other:?}"),
    }
    assert!(err.is_remedial());
    assert!(err.to_string().contains("Missing"));

    let deposits = deposits_of(&store, submission.id).await;
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].repository, first.id);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].repository, first.id);
    services.shutdown().await;
}

#[tokio::test]
async fn duplicate_ready_trigger_is_a_noop() {
    let store = InMemoryResourceStore::default();
    let repo = seed_repository(&store, "Repo", IntegrationType::Full);
    let submission = seed_submission(&store, &[&repo], true);
    let transport = RecordingTransport::polling();
    let mut packagers = PackagerRegistry::new();
    packagers.register("Repo", packager(&transport));
    let mut config = config(&[&repo]);
    config.poll.enabled = false;
    let services = build_services(
        &store,
        config,
        packagers,
        ScriptedResolver::answering(&["processing"]),
    );

    let first = services.on_submission_ready(submission.id).await.unwrap();
    let second = services.on_submission_ready(submission.id).await.unwrap();
    services.dispatcher().wait_idle().await;

    assert_eq!(first.dispatched.len(), 1);
    assert!(second.skipped_not_ready);
    assert!(second.dispatched.is_empty());
    assert_eq!(deposits_of(&store, submission.id).await.len(), 1);
    services.shutdown().await;
}

#[tokio::test]
async fn saturated_dispatcher_surfaces_a_typed_error() {
    let store = InMemoryResourceStore::default();
    let repos: Vec<_> = ["A", "B", "C"]
        .into_iter()
        .map(|name| seed_repository(&store, name, IntegrationType::Full))
        .collect();
    let submission = seed_submission(&store, &repos.iter().collect::<Vec<_>>(), true);
    let gate = Arc::new(Semaphore::new(0));
    let transport = RecordingTransport::polling().gated(Arc::clone(&gate));
    let mut packagers = PackagerRegistry::new();
    for repo in &repos {
        packagers.register(repo.name.clone(), packager(&transport));
    }
    let mut config = config(&repos.iter().collect::<Vec<_>>());
    config.poll.enabled = false;
    config.dispatcher.workers = 1;
    config.dispatcher.queue_capacity = 1;
    let services = build_services(
        &store,
        config,
        packagers,
        ScriptedResolver::answering(&["processing"]),
    );

    let err = services.on_submission_ready(submission.id).await.unwrap_err();

    let rejected = match &err {
        DepositError::FanOut {
            deposit, source, ..
        } => {
            assert!(matches!(
                source.as_ref(),
                DepositError::Dispatch(DispatchError::Saturated { capacity: 1, .. })
            ));
            deposit.expect("the deposit was created before dispatch")
        }
        other => panic!("expected fan-out error, got {other:?}"),
    };
    assert!(err.is_transient());

    let stored: Deposit = store.read(rejected.to_uuid()).await.unwrap();
    assert_eq!(stored.deposit_status, Some(DepositStatus::Failed));
    assert_eq!(stored.deposit_status_ref, None);

    gate.add_permits(repos.len());
    tokio::time::timeout(Duration::from_secs(5), services.dispatcher().wait_idle())
        .await
        .expect("queued tasks drain");
    services.shutdown().await;
}
