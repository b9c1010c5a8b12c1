//! Submission fan-out: one deposit and one task per target repository.

use std::{fmt, sync::Arc};

use custodia_model::{
    AggregatedDepositStatus, Deposit, DepositId, Repository, RepositoryId, Submission,
    SubmissionId,
};
use tracing::{debug, error, info};

use crate::{
    critical::{CriticalInteraction, CriticalOutcome, persist_with},
    deposit::{DepositJob, DepositTask, DepositTaskContext},
    dispatcher::TaskDispatcher,
    error::{DepositError, Result},
    policy::Policies,
    snapshot::DepositSubmission,
    store::ResourceClientExt,
    transfer::PackagerRegistry,
};

/// What a fan-out did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Submission fanned out; `None` when it could not be read.
    pub submission: Option<SubmissionId>,
    /// The submission was not ready; nothing was written.
    pub skipped_not_ready: bool,
    /// Deposits created and handed to the dispatcher, in order.
    pub dispatched: Vec<(DepositId, RepositoryId)>,
    /// Link-only repositories that need no deposit.
    pub link_only: Vec<RepositoryId>,
}

impl FanOutReport {
    fn not_ready(submission: SubmissionId) -> Self {
        Self {
            submission: Some(submission),
            skipped_not_ready: true,
            ..Self::default()
        }
    }
}

/// Marks a ready submission as in progress, snapshots it, and fans it out.
pub struct SubmissionCoordinator {
    engine: CriticalInteraction,
    policies: Policies,
    packagers: Arc<PackagerRegistry>,
    dispatcher: Arc<TaskDispatcher>,
    task_context: Arc<DepositTaskContext>,
}

impl fmt::Debug for SubmissionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionCoordinator")
            .field("engine", &self.engine)
            .field("packagers", &self.packagers)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl SubmissionCoordinator {
    /// Builds a coordinator over shared collaborators.
    pub fn new(
        engine: CriticalInteraction,
        policies: Policies,
        packagers: Arc<PackagerRegistry>,
        dispatcher: Arc<TaskDispatcher>,
        task_context: Arc<DepositTaskContext>,
    ) -> Self {
        Self {
            engine,
            policies,
            packagers,
            dispatcher,
            task_context,
        }
    }

    /// Processes one submission. Duplicate invocations are no-ops once the
    /// first one moved the submission out of the ready state.
    pub async fn process(&self, id: SubmissionId) -> Result<FanOutReport> {
        let ready = Arc::clone(&self.policies.ready);
        let result = self
            .engine
            .perform_critical(
                id,
                move |submission: &Submission| ready.is_ready(submission),
                persist_with(self.engine.client(), |submission: &mut Submission| {
                    let snapshot = DepositSubmission::from_submission(submission);
                    submission.aggregated_deposit_status = AggregatedDepositStatus::InProgress;
                    Ok(snapshot)
                }),
                |submission: &Submission, snapshot: &DepositSubmission| {
                    if submission.aggregated_deposit_status != AggregatedDepositStatus::InProgress {
                        return Err(DepositError::Consistency(format!(
                            "submission {} aggregate is {}, expected {}",
                            submission.id,
                            submission.aggregated_deposit_status,
                            AggregatedDepositStatus::InProgress
                        )));
                    }
                    snapshot.validate()
                },
            )
            .await;

        let (submission, snapshot) = match result.outcome {
            CriticalOutcome::Success => match (result.resource, result.result) {
                (Some(submission), Some(snapshot)) => (submission, snapshot.into_shared()),
                _ => {
                    return Err(DepositError::Internal(format!(
                        "submission {id} processed without a snapshot"
                    )));
                }
            },
            CriticalOutcome::PreconditionFailed => {
                debug!(submission = %id, "submission not ready for deposit; ignoring");
                return Ok(FanOutReport::not_ready(id));
            }
            CriticalOutcome::PostconditionFailed(err) => {
                error!(submission = %id, error = %err, "submission snapshot rejected; not fanning out");
                return Err(err);
            }
            CriticalOutcome::ConflictExhausted { error, .. }
            | CriticalOutcome::CriticalFailed(error) => return Err(error),
        };

        self.fan_out(&submission, snapshot).await
    }

    /// Stops at the first failing repository. Deposits already dispatched
    /// stay in place; a deposit the dispatcher rejected is marked FAILED.
    async fn fan_out(
        &self,
        submission: &Submission,
        snapshot: Arc<DepositSubmission>,
    ) -> Result<FanOutReport> {
        let mut report = FanOutReport {
            submission: Some(submission.id),
            ..FanOutReport::default()
        };

        for &repository_id in &submission.repositories {
            let mut created = None;
            let step = self
                .dispatch_one(submission, repository_id, &snapshot, &mut created)
                .await;
            match step {
                Ok(Some(deposit)) => report.dispatched.push((deposit, repository_id)),
                Ok(None) => report.link_only.push(repository_id),
                Err(source) => {
                    let err = DepositError::FanOut {
                        submission: submission.id,
                        deposit: created,
                        repository: repository_id,
                        source: Box::new(source),
                    };
                    error!(
                        submission = %submission.id,
                        repository = %repository_id,
                        dispatched = report.dispatched.len(),
                        error = %err,
                        "fan-out aborted"
                    );
                    return Err(err);
                }
            }
        }

        info!(
            submission = %submission.id,
            dispatched = report.dispatched.len(),
            link_only = report.link_only.len(),
            "submission fanned out"
        );
        Ok(report)
    }

    async fn dispatch_one(
        &self,
        submission: &Submission,
        repository_id: RepositoryId,
        snapshot: &Arc<DepositSubmission>,
        created: &mut Option<DepositId>,
    ) -> Result<Option<DepositId>> {
        let client = self.engine.client();
        let repository: Repository = client.read(repository_id.to_uuid()).await?;
        if repository.integration_type.is_link_only() {
            debug!(
                submission = %submission.id,
                repository = %repository.id,
                "link-only repository; no deposit needed"
            );
            return Ok(None);
        }

        let packager = self.packagers.lookup(&repository)?;
        let deposit = client
            .create_resource(Deposit::new(submission.id, repository.id))
            .await?;
        *created = Some(deposit.id);

        let task = DepositTask::new(deposit.clone(), repository, packager, Arc::clone(snapshot));
        let submitted = self.dispatcher.submit(Box::new(DepositJob::new(
            task,
            Arc::clone(&self.task_context),
        )));
        if let Err(rejected) = submitted {
            // Never runs; record the deposit as failed.
            let err = DepositError::from(rejected);
            self.task_context.record_failure(&deposit, &err).await;
            return Err(err);
        }
        Ok(Some(deposit.id))
    }
}
