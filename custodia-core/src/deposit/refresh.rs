use std::{fmt, sync::Arc};

use chrono::Utc;
use custodia_model::{Deposit, DepositId, DepositStatus, Repository};
use tracing::{debug, warn};

use super::update::DepositUpdater;
use crate::{
    config::DepositServicesConfig,
    critical::CriticalOutcome,
    error::Result,
    events::{DepositEvent, DepositEventPublisher},
    resolver::StatusResolverRegistry,
    store::ResourceClientExt,
};

/// Result of refreshing one deposit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The deposit was already terminal; nothing was resolved.
    AlreadyTerminal,
    /// The remote status matches what is stored.
    Unchanged(Option<DepositStatus>),
    /// The remote endpoint could not be reached; try again later.
    Unreachable,
    /// No transfer has been acknowledged yet, so there is no status
    /// reference to resolve.
    NotAcknowledged,
    /// A new status was written.
    Updated(DepositStatus),
}

/// Re-resolves the remote status of an existing deposit once and writes it
/// when it changed. Used by deposit sweeps, without any transfer.
pub struct DepositStatusRefresher {
    updater: DepositUpdater,
    resolvers: Arc<StatusResolverRegistry>,
    config: Arc<DepositServicesConfig>,
    events: Arc<dyn DepositEventPublisher>,
}

impl fmt::Debug for DepositStatusRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepositStatusRefresher")
            .field("updater", &self.updater)
            .field("resolvers", &self.resolvers)
            .finish_non_exhaustive()
    }
}

impl DepositStatusRefresher {
    /// Builds a refresher over the shared task collaborators.
    pub fn new(
        updater: DepositUpdater,
        resolvers: Arc<StatusResolverRegistry>,
        config: Arc<DepositServicesConfig>,
        events: Arc<dyn DepositEventPublisher>,
    ) -> Self {
        Self {
            updater,
            resolvers,
            config,
            events,
        }
    }

    /// Resolves the deposit's remote status once and records any change.
    pub async fn refresh(&self, id: DepositId) -> Result<RefreshOutcome> {
        let client = self.updater.client();
        let deposit: Deposit = client.read(id.to_uuid()).await?;
        if self.updater.policies().deposit_is_terminal(deposit.deposit_status) {
            debug!(deposit = %id, "deposit already terminal; skipping refresh");
            return Ok(RefreshOutcome::AlreadyTerminal);
        }

        if deposit.deposit_status_ref.is_none() {
            debug!(deposit = %id, "deposit has no status reference yet; skipping refresh");
            return Ok(RefreshOutcome::NotAcknowledged);
        }

        let repository: Repository = client.read(deposit.repository.to_uuid()).await?;
        let processing = self.config.processing_for(&repository)?;
        let status = match self.resolvers.resolve_deposit(&deposit, processing).await {
            Ok(status) => status,
            Err(err) if err.is_transient() => {
                warn!(deposit = %id, error = %err, "status endpoint unreachable during refresh");
                return Ok(RefreshOutcome::Unreachable);
            }
            Err(err) => return Err(err.into()),
        };
        if Some(status) == deposit.deposit_status {
            return Ok(RefreshOutcome::Unchanged(deposit.deposit_status));
        }

        let result = self.updater.apply(&deposit, status, None).await;
        let wrote = result.wrote();
        if wrote {
            let event = DepositEvent {
                deposit: deposit.id,
                submission: deposit.submission,
                repository: deposit.repository,
                status: Some(status),
                occurred_at: Utc::now(),
            };
            if let Err(err) = self.events.publish(event).await {
                warn!(deposit = %id, error = %err, "failed to publish deposit event");
            }
        }
        match result.outcome {
            CriticalOutcome::Success => Ok(RefreshOutcome::Updated(status)),
            CriticalOutcome::PreconditionFailed => Ok(RefreshOutcome::AlreadyTerminal),
            CriticalOutcome::PostconditionFailed(err)
            | CriticalOutcome::ConflictExhausted { error: err, .. }
            | CriticalOutcome::CriticalFailed(err) => Err(err),
        }
    }
}
