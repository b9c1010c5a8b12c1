//! Submission-level rollups recomputed from the latest deposits.
//!
//! Both updaters re-read everything they depend on inside the critical
//! function, so interleaved deposit updates for the same submission are
//! tolerated: the last writer always computes from fresh state.

use std::{collections::HashMap, fmt};

use custodia_model::{
    AggregatedDepositStatus, CopyStatus, Deposit, DepositStatus, Repository, RepositoryCopy,
    RepositoryId, Submission, SubmissionId, SubmissionStatus,
};
use tracing::debug;

use crate::{
    critical::{CriticalFuture, CriticalInteraction, CriticalResult},
    error::{DepositError, Result},
    policy::Policies,
    store::{ResourceClientExt, ResourceFilter},
};

/// Aggregate implied by a set of deposit statuses.
///
/// `None` when there are no deposits: the current aggregate stands. A
/// terminal aggregate is only reached once every deposit is terminal, so a
/// committed ACCEPTED or REJECTED can never be contradicted by a later
/// deposit write.
pub fn compute_aggregate(
    statuses: &[Option<DepositStatus>],
    policies: &Policies,
) -> Option<AggregatedDepositStatus> {
    if statuses.is_empty() {
        return None;
    }
    if !statuses.iter().all(|s| policies.deposit_is_terminal(*s)) {
        return Some(AggregatedDepositStatus::InProgress);
    }
    if statuses.iter().all(|s| *s == Some(DepositStatus::Accepted)) {
        Some(AggregatedDepositStatus::Accepted)
    } else if statuses.iter().all(|s| policies.deposit_is_failed(*s)) {
        Some(AggregatedDepositStatus::Rejected)
    } else {
        Some(AggregatedDepositStatus::InProgress)
    }
}

/// What the aggregation critical function computed and what it saw when it
/// re-read the deposits after writing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregationResult {
    /// Aggregate written, or `None` when there were no deposits.
    pub computed: Option<AggregatedDepositStatus>,
    /// Deposit statuses read back after the write.
    pub reread: Vec<Option<DepositStatus>>,
}

/// Checks a committed aggregate against the deposits as re-read.
pub fn verify_aggregate(
    submission: &Submission,
    result: &AggregationResult,
    policies: &Policies,
) -> Result<()> {
    let expected = compute_aggregate(&result.reread, policies)
        .unwrap_or(submission.aggregated_deposit_status);
    if submission.aggregated_deposit_status != expected {
        return Err(DepositError::Consistency(format!(
            "submission {} aggregate {} disagrees with its {} deposits (recomputed {})",
            submission.id,
            submission.aggregated_deposit_status,
            result.reread.len(),
            expected
        )));
    }
    Ok(())
}

/// Recomputes a submission's aggregate deposit status.
#[derive(Clone)]
pub struct AggregationUpdater {
    engine: CriticalInteraction,
    policies: Policies,
}

impl fmt::Debug for AggregationUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationUpdater")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl AggregationUpdater {
    /// Runs its interactions through `engine`.
    pub fn new(engine: CriticalInteraction, policies: Policies) -> Self {
        Self { engine, policies }
    }

    /// Recomputes the aggregate deposit status of one submission. A
    /// submission whose aggregate is already terminal is left alone.
    pub async fn update(&self, id: SubmissionId) -> CriticalResult<Submission, AggregationResult> {
        let precondition_policies = self.policies.clone();
        let critical_policies = self.policies.clone();
        let postcondition_policies = self.policies.clone();
        let client = self.engine.client();

        self.engine
            .perform_critical(
                id,
                move |submission: &Submission| {
                    !precondition_policies
                        .aggregate
                        .is_terminal(&submission.aggregated_deposit_status)
                },
                move |mut submission: Submission| -> CriticalFuture<Submission, AggregationResult> {
                    let client = client.clone();
                    let policies = critical_policies.clone();
                    Box::pin(async move {
                        let filter = ResourceFilter::DepositsOfSubmission(submission.id);
                        let deposits: Vec<Deposit> = client.find(&filter).await?;
                        let statuses: Vec<_> = deposits.iter().map(|d| d.deposit_status).collect();
                        let computed = compute_aggregate(&statuses, &policies);

                        let submission = match computed {
                            Some(aggregate) if aggregate != submission.aggregated_deposit_status => {
                                debug!(
                                    submission = %submission.id,
                                    from = %submission.aggregated_deposit_status,
                                    to = %aggregate,
                                    deposits = deposits.len(),
                                    "aggregate deposit status changed"
                                );
                                submission.aggregated_deposit_status = aggregate;
                                client.update_resource(submission).await?
                            }
                            _ => submission,
                        };

                        let reread: Vec<Deposit> = client.find(&filter).await?;
                        let reread = reread.iter().map(|d| d.deposit_status).collect();
                        Ok((submission, AggregationResult { computed, reread }))
                    })
                },
                move |submission: &Submission, result: &AggregationResult| {
                    verify_aggregate(submission, result, &postcondition_policies)
                },
            )
            .await
    }
}

/// Lifecycle status implied by a submission's deposits and copies.
///
/// Only submissions already handed over for deposit and not yet finished
/// are recalculated; anything else keeps `current`.
pub fn calculate_submission_status(
    current: SubmissionStatus,
    repositories: &[Repository],
    deposits: &[Deposit],
    copies: &[RepositoryCopy],
    policies: &Policies,
) -> SubmissionStatus {
    if !current.is_post_submission() || current.is_terminal() {
        return current;
    }

    let needs_attention = deposits
        .iter()
        .any(|d| policies.deposit_is_failed(d.deposit_status))
        || copies
            .iter()
            .any(|c| matches!(c.copy_status, CopyStatus::Rejected | CopyStatus::Stalled));
    if needs_attention {
        return SubmissionStatus::NeedsAttention;
    }

    let complete_copies: HashMap<RepositoryId, bool> = copies.iter().fold(
        HashMap::new(),
        |mut acc, copy| {
            let complete = acc.entry(copy.repository).or_insert(false);
            *complete |= copy.copy_status == CopyStatus::Complete;
            acc
        },
    );
    let all_complete = repositories
        .iter()
        .filter(|repo| !repo.integration_type.is_link_only())
        .all(|repo| complete_copies.get(&repo.id).copied().unwrap_or(false));

    if all_complete {
        SubmissionStatus::Complete
    } else {
        SubmissionStatus::Submitted
    }
}

/// Keeps `submission_status` in step with deposits and repository copies.
#[derive(Clone)]
pub struct SubmissionStatusUpdater {
    engine: CriticalInteraction,
    policies: Policies,
}

impl fmt::Debug for SubmissionStatusUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionStatusUpdater")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl SubmissionStatusUpdater {
    /// Runs its interactions through `engine`.
    pub fn new(engine: CriticalInteraction, policies: Policies) -> Self {
        Self { engine, policies }
    }

    /// Recomputes `submission_status` for a submitted, non-terminal submission.
    pub async fn update(&self, id: SubmissionId) -> CriticalResult<Submission, SubmissionStatus> {
        let client = self.engine.client();
        let policies = self.policies.clone();

        self.engine
            .perform_critical(
                id,
                |submission: &Submission| {
                    submission.submission_status.is_post_submission()
                        && !submission.submission_status.is_terminal()
                },
                move |mut submission: Submission| -> CriticalFuture<Submission, SubmissionStatus> {
                    let client = client.clone();
                    let policies = policies.clone();
                    Box::pin(async move {
                        let mut repositories = Vec::with_capacity(submission.repositories.len());
                        for id in &submission.repositories {
                            repositories.push(client.read::<Repository>(id.to_uuid()).await?);
                        }
                        let deposits: Vec<Deposit> = client
                            .find(&ResourceFilter::DepositsOfSubmission(submission.id))
                            .await?;
                        let copies: Vec<RepositoryCopy> = client
                            .find(&ResourceFilter::CopiesOfSubmission(submission.id))
                            .await?;

                        let status = calculate_submission_status(
                            submission.submission_status,
                            &repositories,
                            &deposits,
                            &copies,
                            &policies,
                        );
                        if status == submission.submission_status {
                            return Ok((submission, status));
                        }
                        debug!(
                            submission = %submission.id,
                            from = %submission.submission_status,
                            to = %status,
                            "submission status changed"
                        );
                        submission.submission_status = status;
                        Ok((client.update_resource(submission).await?, status))
                    })
                },
                |submission: &Submission, status: &SubmissionStatus| {
                    if submission.submission_status == *status {
                        Ok(())
                    } else {
                        Err(DepositError::Consistency(format!(
                            "submission {} status is {}, expected {}",
                            submission.id, submission.submission_status, status
                        )))
                    }
                },
            )
            .await
    }
}
