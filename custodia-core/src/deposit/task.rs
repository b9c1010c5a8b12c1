use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use custodia_model::{Deposit, DepositId, DepositStatus, Repository};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    poll::{PollOutcome, StatusPoller},
    update::DepositUpdater,
};
use crate::{
    config::DepositServicesConfig,
    critical::{CriticalOutcome, CriticalResult},
    dispatcher::DispatchedTask,
    error::{DepositError, Result},
    events::{DepositEvent, DepositEventPublisher},
    resolver::StatusResolverRegistry,
    snapshot::DepositSubmission,
    transfer::{Packager, TransferContext},
};

/// Lifecycle of one deposit task.
///
/// `Created -> Transferring -> Transferred -> Updating`, then either `Done`
/// or a `Polling -> Resolved -> Updating` cycle per observed status change.
/// Any state may move to `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepositTaskState {
    /// Deposit record exists; nothing sent yet.
    Created,
    /// Package being assembled and sent.
    Transferring,
    /// Repository acknowledged the package.
    Transferred,
    /// Waiting for the remote status to change.
    Polling,
    /// A new remote status was observed.
    Resolved,
    /// Writing an observed status to the deposit.
    Updating,
    /// Deposit reached a terminal status or polling ended.
    Done,
    /// Transfer or update failed.
    Failed,
}

impl DepositTaskState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: DepositTaskState) -> bool {
        use DepositTaskState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Created, Transferring)
            | (Transferring, Transferred)
            | (Transferred, Updating)
            | (Updating, Polling | Done)
            | (Polling, Resolved | Done)
            | (Resolved, Updating) => true,
            _ => false,
        }
    }

    /// `Done` or `Failed`.
    pub fn is_finished(self) -> bool {
        matches!(self, DepositTaskState::Done | DepositTaskState::Failed)
    }
}

impl fmt::Display for DepositTaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DepositTaskState::Created => "created",
            DepositTaskState::Transferring => "transferring",
            DepositTaskState::Transferred => "transferred",
            DepositTaskState::Polling => "polling",
            DepositTaskState::Resolved => "resolved",
            DepositTaskState::Updating => "updating",
            DepositTaskState::Done => "done",
            DepositTaskState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Collaborators shared by every deposit task.
pub struct DepositTaskContext {
    /// Writes deposit statuses.
    pub updater: DepositUpdater,
    /// Resolvers looked up per repository.
    pub resolvers: Arc<StatusResolverRegistry>,
    /// Poll timing and per-repository processing configuration.
    pub config: Arc<DepositServicesConfig>,
    /// Receives an event per written status.
    pub events: Arc<dyn DepositEventPublisher>,
}

impl fmt::Debug for DepositTaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepositTaskContext")
            .field("updater", &self.updater)
            .field("resolvers", &self.resolvers)
            .field("poll", &self.config.poll)
            .finish_non_exhaustive()
    }
}

impl DepositTaskContext {
    /// Publishes the deposit's current status to the event bus.
    pub async fn announce(&self, deposit: &Deposit) {
        let event = DepositEvent {
            deposit: deposit.id,
            submission: deposit.submission,
            repository: deposit.repository,
            status: deposit.deposit_status,
            occurred_at: Utc::now(),
        };
        if let Err(err) = self.events.publish(event).await {
            warn!(deposit = %deposit.id, error = %err, "failed to publish deposit event");
        }
    }

    /// Marks a deposit whose transfer never completed as FAILED and
    /// announces it. Returns the deposit as last read or written.
    ///
    /// A deposit that already reached a terminal status keeps it.
    pub async fn record_failure(&self, deposit: &Deposit, cause: &DepositError) -> Option<Deposit> {
        let result = self
            .updater
            .apply(deposit, DepositStatus::Failed, None)
            .await;
        if result.wrote()
            && let Some(written) = &result.resource
        {
            self.announce(written).await;
        }

        match &result.outcome {
            CriticalOutcome::Success => warn!(
                deposit = %deposit.id,
                repository = %deposit.repository,
                cause = %cause,
                "deposit marked failed"
            ),
            CriticalOutcome::PreconditionFailed => debug!(
                deposit = %deposit.id,
                "deposit already terminal; failure not recorded"
            ),
            CriticalOutcome::PostconditionFailed(err)
            | CriticalOutcome::ConflictExhausted { error: err, .. }
            | CriticalOutcome::CriticalFailed(err) => error!(
                deposit = %deposit.id,
                cause = %cause,
                error = %err,
                "could not record deposit failure"
            ),
        }
        result.resource
    }
}

/// Summary of a finished task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositTaskReport {
    /// Deposit the task worked on.
    pub deposit: DepositId,
    /// State the task ended in.
    pub state: DepositTaskState,
    /// Last status written to the deposit.
    pub status: Option<DepositStatus>,
    /// Resolver calls made while polling.
    pub polls: u32,
    /// True when shutdown interrupted the task.
    pub cancelled: bool,
}

enum WriteOutcome {
    Written,
    AlreadyTerminal,
}

/// Transfers one deposit and tracks its remote status.
pub struct DepositTask {
    deposit: Deposit,
    repository: Repository,
    packager: Arc<Packager>,
    snapshot: Arc<DepositSubmission>,
    state: DepositTaskState,
}

impl fmt::Debug for DepositTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepositTask")
            .field("deposit", &self.deposit.id)
            .field("repository", &self.repository.name)
            .field("packager", &self.packager.name)
            .field("state", &self.state)
            .finish()
    }
}

impl DepositTask {
    /// A task in the `Created` state.
    pub fn new(
        deposit: Deposit,
        repository: Repository,
        packager: Arc<Packager>,
        snapshot: Arc<DepositSubmission>,
    ) -> Self {
        Self {
            deposit,
            repository,
            packager,
            snapshot,
            state: DepositTaskState::Created,
        }
    }

    /// Deposit as last written by this task.
    pub fn deposit(&self) -> &Deposit {
        &self.deposit
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DepositTaskState {
        self.state
    }

    /// Runs the task to completion. A cancelled token stops polling without
    /// writing anything further.
    ///
    /// A failed transfer is recorded on the deposit as FAILED before the
    /// error is returned. Failures after the acknowledgment was written
    /// leave the deposit's status alone.
    pub async fn run(
        mut self,
        ctx: &DepositTaskContext,
        cancel: CancellationToken,
    ) -> Result<DepositTaskReport> {
        match self.drive(ctx, &cancel).await {
            Ok(report) => Ok(report),
            Err(err) => {
                if self.state == DepositTaskState::Transferring
                    && let Some(deposit) = ctx.record_failure(&self.deposit, &err).await
                {
                    self.deposit = deposit;
                }
                self.state = DepositTaskState::Failed;
                Err(err)
            }
        }
    }

    async fn drive(
        &mut self,
        ctx: &DepositTaskContext,
        cancel: &CancellationToken,
    ) -> Result<DepositTaskReport> {
        self.transition(DepositTaskState::Transferring)?;
        let response = self.transfer().await?;
        self.transition(DepositTaskState::Transferred)?;

        let acknowledged = response.terminal_hint.unwrap_or(DepositStatus::Submitted);
        self.transition(DepositTaskState::Updating)?;
        if let WriteOutcome::AlreadyTerminal =
            self.write(ctx, acknowledged, response.status_ref).await?
        {
            return self.finish(0, false);
        }

        let policies = ctx.updater.policies();
        if policies.deposit_is_terminal(self.deposit.deposit_status) {
            return self.finish(0, false);
        }
        if !ctx.config.poll.enabled || self.deposit.deposit_status_ref.is_none() {
            debug!(
                deposit = %self.deposit.id,
                repository = %self.repository.id,
                "no status polling; deposit left intermediate"
            );
            return self.finish(0, false);
        }

        let processing = ctx.config.processing_for(&self.repository)?;
        let mut poller = StatusPoller {
            resolvers: ctx.resolvers.as_ref(),
            config: processing,
            interval: ctx.config.poll.interval(),
            deadline: Instant::now() + ctx.config.poll.max_wait(),
            cancel,
            polls: 0,
        };

        self.transition(DepositTaskState::Polling)?;
        loop {
            let last_known = self.deposit.deposit_status;
            match poller.next_change(&self.deposit, last_known).await? {
                PollOutcome::Changed(status) => {
                    self.transition(DepositTaskState::Resolved)?;
                    self.transition(DepositTaskState::Updating)?;
                    let written = self.write(ctx, status, None).await?;
                    if matches!(written, WriteOutcome::AlreadyTerminal)
                        || policies.deposit_is_terminal(self.deposit.deposit_status)
                    {
                        return self.finish(poller.polls, false);
                    }
                    self.transition(DepositTaskState::Polling)?;
                }
                PollOutcome::TimedOut => {
                    info!(
                        deposit = %self.deposit.id,
                        repository = %self.repository.id,
                        polls = poller.polls,
                        "gave up polling; deposit left intermediate"
                    );
                    return self.finish(poller.polls, false);
                }
                PollOutcome::Cancelled => {
                    debug!(deposit = %self.deposit.id, "status polling cancelled");
                    return self.finish(poller.polls, true);
                }
            }
        }
    }

    fn transition(&mut self, next: DepositTaskState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DepositError::Internal(format!(
                "deposit task {} cannot move from {} to {}",
                self.deposit.id, self.state, next
            )));
        }
        debug!(deposit = %self.deposit.id, from = %self.state, to = %next, "deposit task state");
        self.state = next;
        Ok(())
    }

    fn finish(&mut self, polls: u32, cancelled: bool) -> Result<DepositTaskReport> {
        self.transition(DepositTaskState::Done)?;
        Ok(DepositTaskReport {
            deposit: self.deposit.id,
            state: self.state,
            status: self.deposit.deposit_status,
            polls,
            cancelled,
        })
    }

    async fn transfer(&self) -> Result<crate::transfer::TransportResponse> {
        let options = &self.packager.options;
        let package = self.packager.assembler.assemble(&self.snapshot, options).await?;
        let mut session = self.packager.transport.open(options).await?;
        let context = TransferContext {
            submission: self.deposit.submission,
            deposit: self.deposit.id,
            repository: self.repository.id,
        };
        let response = session.send(&package, &context).await?;
        if !(200..300).contains(&response.status_code) {
            return Err(DepositError::Transport {
                repository: self.repository.id,
                message: format!(
                    "packager {} got status code {}",
                    self.packager.name, response.status_code
                ),
            });
        }
        debug!(
            deposit = %self.deposit.id,
            repository = %self.repository.id,
            package = %package.name,
            status_code = response.status_code,
            "package transferred"
        );
        Ok(response)
    }

    async fn write(
        &mut self,
        ctx: &DepositTaskContext,
        status: DepositStatus,
        status_ref: Option<String>,
    ) -> Result<WriteOutcome> {
        let CriticalResult {
            resource, outcome, ..
        } = ctx.updater.apply(&self.deposit, status, status_ref).await;
        if let Some(deposit) = resource {
            self.deposit = deposit;
        }

        match outcome {
            CriticalOutcome::Success => {
                self.publish(ctx).await;
                Ok(WriteOutcome::Written)
            }
            CriticalOutcome::PreconditionFailed => {
                debug!(
                    deposit = %self.deposit.id,
                    status = ?self.deposit.deposit_status,
                    "deposit already terminal; not overwriting"
                );
                Ok(WriteOutcome::AlreadyTerminal)
            }
            CriticalOutcome::PostconditionFailed(err) => {
                // The write stands; aggregation still needs to hear about it.
                self.publish(ctx).await;
                Err(err)
            }
            CriticalOutcome::ConflictExhausted { error, .. }
            | CriticalOutcome::CriticalFailed(error) => Err(error),
        }
    }

    async fn publish(&self, ctx: &DepositTaskContext) {
        ctx.announce(&self.deposit).await;
    }
}

/// A deposit task bound to its context, ready for the dispatcher.
pub struct DepositJob {
    task: DepositTask,
    ctx: Arc<DepositTaskContext>,
}

impl fmt::Debug for DepositJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepositJob")
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

impl DepositJob {
    /// Wraps `task` for submission to the dispatcher.
    pub fn new(task: DepositTask, ctx: Arc<DepositTaskContext>) -> Self {
        Self { task, ctx }
    }
}

#[async_trait]
impl DispatchedTask for DepositJob {
    fn label(&self) -> String {
        format!(
            "deposit {} to repository {}",
            self.task.deposit.id, self.task.repository.name
        )
    }

    async fn execute(self: Box<Self>, cancel: CancellationToken) {
        let DepositJob { task, ctx } = *self;
        let deposit = task.deposit.id;
        let submission = task.deposit.submission;
        let repository = task.repository.id;

        match task.run(&ctx, cancel).await {
            Ok(report) => info!(
                %submission,
                %deposit,
                %repository,
                status = ?report.status,
                polls = report.polls,
                cancelled = report.cancelled,
                "deposit task finished"
            ),
            Err(err) => error!(
                %submission,
                %deposit,
                %repository,
                error = %err,
                remedial = err.is_remedial(),
                "deposit task failed"
            ),
        }
    }

    async fn discard(self: Box<Self>) {
        let DepositJob { task, ctx } = *self;
        let cause = DepositError::Cancelled(format!(
            "dispatcher shut down before deposit {} was transferred",
            task.deposit.id
        ));
        ctx.record_failure(&task.deposit, &cause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_do_not_move() {
        assert!(!DepositTaskState::Done.can_transition_to(DepositTaskState::Failed));
        assert!(!DepositTaskState::Failed.can_transition_to(DepositTaskState::Polling));
    }

    #[test]
    fn polling_cycles_through_resolved_and_updating() {
        use DepositTaskState::*;
        let path = [Created, Transferring, Transferred, Updating, Polling, Resolved, Updating, Polling, Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Created.can_transition_to(Polling));
        assert!(Polling.can_transition_to(Failed));
    }
}
