//! Entry points called by the queue listener and the scheduler.
//!
//! Triggers are delivered at least once, so every handler is safe to repeat:
//! the critical interactions' preconditions turn duplicates into no-ops.

use std::{fmt, sync::Arc};

use custodia_model::{
    AggregatedDepositStatus, Deposit, DepositId, Submission, SubmissionId, SubmissionStatus,
};
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    aggregation::{AggregationUpdater, SubmissionStatusUpdater},
    config::DepositServicesConfig,
    coordinator::{FanOutReport, SubmissionCoordinator},
    critical::{CriticalInteraction, CriticalOutcome},
    deposit::{DepositStatusRefresher, DepositTaskContext, DepositUpdater, RefreshOutcome},
    dispatcher::TaskDispatcher,
    error::Result,
    events::{DepositEventPublisher, InProcDepositEventBus},
    policy::Policies,
    resolver::StatusResolverRegistry,
    store::{ResourceClient, ResourceClientExt, ResourceFilter},
    transfer::PackagerRegistry,
};

/// A message handed over by the queue listener or scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Trigger {
    /// Fan a submission out to its repositories.
    SubmissionReady {
        /// Submission marked ready.
        submission: SubmissionId,
    },
    /// Re-aggregate after a deposit status change.
    DepositStatusChanged {
        /// Deposit whose status changed.
        deposit: DepositId,
    },
    /// Recompute rollups of the listed submissions, or of every
    /// non-terminal one when empty.
    SweepSubmissions {
        /// Submissions to sweep.
        #[serde(default)]
        submissions: Vec<SubmissionId>,
    },
    /// Refresh the listed deposits, or every non-terminal one when empty.
    SweepDeposits {
        /// Deposits to sweep.
        #[serde(default)]
        deposits: Vec<DepositId>,
    },
}

/// Submission rollups after a recalculation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmissionRollup {
    /// Submission that was recalculated.
    pub submission: SubmissionId,
    /// Aggregate after the update; `None` if it could not be read.
    pub aggregate: Option<AggregatedDepositStatus>,
    /// Lifecycle status after the update; `None` if it could not be read.
    pub submission_status: Option<SubmissionStatus>,
}

/// What a sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records looked at.
    pub examined: usize,
    /// Records whose status changed.
    pub updated: usize,
    /// Records left as they were.
    pub unchanged: usize,
    /// Records that could not be processed, with the reason.
    pub failures: Vec<(Uuid, String)>,
}

/// Facade wiring every component; one instance per process.
pub struct DepositServices {
    config: Arc<DepositServicesConfig>,
    client: Arc<dyn ResourceClient>,
    policies: Policies,
    dispatcher: Arc<TaskDispatcher>,
    events: Arc<InProcDepositEventBus>,
    coordinator: SubmissionCoordinator,
    aggregation: AggregationUpdater,
    submission_status: SubmissionStatusUpdater,
    refresher: DepositStatusRefresher,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for DepositServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepositServices")
            .field("dispatcher", &self.dispatcher)
            .field("events", &self.events)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl DepositServices {
    /// Wires every component from configuration. Starts the dispatcher's
    /// workers, so it must be called inside a tokio runtime.
    pub fn new(
        config: DepositServicesConfig,
        client: Arc<dyn ResourceClient>,
        packagers: PackagerRegistry,
        resolvers: StatusResolverRegistry,
    ) -> Result<Self> {
        let policies = Policies::from_config(&config.policy);
        Self::with_policies(config, policies, client, packagers, resolvers)
    }

    /// Like [`DepositServices::new`] with caller-supplied policies.
    pub fn with_policies(
        config: DepositServicesConfig,
        policies: Policies,
        client: Arc<dyn ResourceClient>,
        packagers: PackagerRegistry,
        resolvers: StatusResolverRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let engine = CriticalInteraction::new(Arc::clone(&client))
            .with_max_attempts(config.critical.max_attempts);
        let dispatcher = Arc::new(TaskDispatcher::start(config.dispatcher));
        let events = Arc::new(InProcDepositEventBus::default());
        let publisher: Arc<dyn DepositEventPublisher> = events.clone();
        let resolvers = Arc::new(resolvers);
        let updater = DepositUpdater::new(engine.clone(), policies.clone());

        let task_context = Arc::new(DepositTaskContext {
            updater: updater.clone(),
            resolvers: Arc::clone(&resolvers),
            config: Arc::clone(&config),
            events: Arc::clone(&publisher),
        });

        info!(
            workers = config.dispatcher.workers,
            queue_capacity = config.dispatcher.queue_capacity,
            repositories = config.repositories.len(),
            "deposit services started"
        );

        Ok(Self {
            coordinator: SubmissionCoordinator::new(
                engine.clone(),
                policies.clone(),
                Arc::new(packagers),
                Arc::clone(&dispatcher),
                task_context,
            ),
            aggregation: AggregationUpdater::new(engine.clone(), policies.clone()),
            submission_status: SubmissionStatusUpdater::new(engine, policies.clone()),
            refresher: DepositStatusRefresher::new(
                updater,
                resolvers,
                Arc::clone(&config),
                publisher,
            ),
            config,
            client,
            policies,
            dispatcher,
            events,
            listener: std::sync::Mutex::new(None),
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> &DepositServicesConfig {
        &self.config
    }

    /// Pool running deposit tasks.
    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    /// Bus carrying deposit status change events.
    pub fn events(&self) -> &InProcDepositEventBus {
        &self.events
    }

    /// Creates a deposit per repository and dispatches their tasks.
    pub async fn on_submission_ready(&self, id: SubmissionId) -> Result<FanOutReport> {
        self.coordinator.process(id).await
    }

    /// Recomputes the rollups of the deposit's submission.
    pub async fn on_deposit_status_changed(&self, id: DepositId) -> Result<SubmissionRollup> {
        let deposit: Deposit = self.client.read(id.to_uuid()).await?;
        self.update_submission(deposit.submission).await
    }

    /// Recomputes the aggregate deposit status and then the lifecycle status
    /// of one submission.
    pub async fn update_submission(&self, id: SubmissionId) -> Result<SubmissionRollup> {
        let aggregation = self.aggregation.update(id).await;
        let aggregate = match aggregation.outcome {
            CriticalOutcome::Success | CriticalOutcome::PreconditionFailed => aggregation
                .resource
                .as_ref()
                .map(|s: &Submission| s.aggregated_deposit_status),
            CriticalOutcome::PostconditionFailed(err)
            | CriticalOutcome::ConflictExhausted { error: err, .. }
            | CriticalOutcome::CriticalFailed(err) => return Err(err),
        };

        let lifecycle = self.submission_status.update(id).await;
        let submission_status = match lifecycle.outcome {
            CriticalOutcome::Success | CriticalOutcome::PreconditionFailed => lifecycle
                .resource
                .as_ref()
                .map(|s: &Submission| s.submission_status),
            CriticalOutcome::PostconditionFailed(err)
            | CriticalOutcome::ConflictExhausted { error: err, .. }
            | CriticalOutcome::CriticalFailed(err) => return Err(err),
        };

        debug!(
            submission = %id,
            aggregate = ?aggregate,
            submission_status = ?submission_status,
            "submission rollups recomputed"
        );
        Ok(SubmissionRollup {
            submission: id,
            aggregate,
            submission_status,
        })
    }

    /// Recomputes rollups for the given submissions, or for every
    /// non-terminal submission when none are given.
    pub async fn sweep_submissions(&self, ids: Vec<SubmissionId>) -> Result<SweepReport> {
        let ids = if ids.is_empty() {
            let filter = ResourceFilter::SubmissionStatusNotIn(SubmissionStatus::TERMINAL.to_vec());
            let submissions: Vec<Submission> = self.client.find(&filter).await?;
            submissions.into_iter().map(|s| s.id).collect()
        } else {
            ids
        };

        let mut report = SweepReport::default();
        for id in ids {
            report.examined += 1;
            let before: Option<Submission> = self.client.read(id.to_uuid()).await.ok();
            match self.update_submission(id).await {
                Ok(rollup) => {
                    let changed = before.is_none_or(|b| {
                        Some(b.aggregated_deposit_status) != rollup.aggregate
                            || Some(b.submission_status) != rollup.submission_status
                    });
                    if changed {
                        report.updated += 1;
                    } else {
                        report.unchanged += 1;
                    }
                }
                Err(err) => {
                    warn!(submission = %id, error = %err, "submission sweep failed");
                    report.failures.push((id.to_uuid(), err.to_string()));
                }
            }
        }
        info!(
            examined = report.examined,
            updated = report.updated,
            failures = report.failures.len(),
            "submission sweep finished"
        );
        Ok(report)
    }

    /// Re-resolves the given deposits, or every non-terminal deposit when
    /// none are given.
    pub async fn sweep_deposits(&self, ids: Vec<DepositId>) -> Result<SweepReport> {
        let ids = if ids.is_empty() {
            let filter =
                ResourceFilter::DepositStatusNotIn(self.policies.deposit_terminal_statuses());
            let deposits: Vec<Deposit> = self.client.find(&filter).await?;
            deposits.into_iter().map(|d| d.id).collect()
        } else {
            ids
        };

        let mut report = SweepReport::default();
        for id in ids {
            report.examined += 1;
            match self.refresher.refresh(id).await {
                Ok(RefreshOutcome::Updated(_)) => report.updated += 1,
                Ok(_) => report.unchanged += 1,
                Err(err) => {
                    warn!(deposit = %id, error = %err, "deposit sweep failed");
                    report.failures.push((id.to_uuid(), err.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Log-and-drop boundary for listener messages.
    pub async fn handle_trigger(&self, trigger: Trigger) {
        let outcome = match &trigger {
            Trigger::SubmissionReady { submission } => {
                self.on_submission_ready(*submission).await.map(|_| ())
            }
            Trigger::DepositStatusChanged { deposit } => {
                self.on_deposit_status_changed(*deposit).await.map(|_| ())
            }
            Trigger::SweepSubmissions { submissions } => {
                self.sweep_submissions(submissions.clone()).await.map(|_| ())
            }
            Trigger::SweepDeposits { deposits } => {
                self.sweep_deposits(deposits.clone()).await.map(|_| ())
            }
        };
        if let Err(err) = outcome {
            error!(
                ?trigger,
                error = %err,
                transient = err.is_transient(),
                remedial = err.is_remedial(),
                "trigger failed; dropping message"
            );
        }
    }

    /// Recomputes submission rollups whenever a deposit task publishes a
    /// status change. Stops on shutdown or once the services are dropped.
    pub fn spawn_aggregation_listener(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut events = self.events.subscribe();
        let shutdown = self.dispatcher.shutdown_token();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(services) = weak.upgrade() else {
                    break;
                };
                match event {
                    Ok(event) => {
                        if let Err(err) = services.update_submission(event.submission).await {
                            warn!(
                                submission = %event.submission,
                                deposit = %event.deposit,
                                error = %err,
                                "aggregation after deposit event failed"
                            );
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "aggregation listener lagged; sweeping submissions");
                        if let Err(err) = services.sweep_submissions(Vec::new()).await {
                            warn!(error = %err, "catch-up sweep failed");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("aggregation listener stopped");
        });

        if let Ok(mut listener) = self.listener.lock()
            && let Some(previous) = listener.replace(handle)
        {
            previous.abort();
        }
    }

    /// Policies shared by every component.
    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    /// Stops the dispatcher (cancelling in-flight polls) and the listener.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        let listener = self.listener.lock().ok().and_then(|mut l| l.take());
        if let Some(handle) = listener {
            let _ = handle.await;
        }
        info!("deposit services stopped");
    }
}

impl Drop for DepositServices {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.lock()
            && let Some(handle) = listener.take()
        {
            handle.abort();
        }
    }
}
