use std::time::Duration;

use custodia_model::{Deposit, DepositStatus};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    config::RepositoryProcessingConfig,
    error::Result,
    resolver::StatusResolverRegistry,
};

/// How a polling loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The remote status moved away from the last known one.
    Changed(DepositStatus),
    /// The deadline passed without a change.
    TimedOut,
    /// The surrounding task was cancelled.
    Cancelled,
}

/// Polls one deposit's status reference on a fixed cadence until a
/// deadline.
pub(crate) struct StatusPoller<'a> {
    pub(crate) resolvers: &'a StatusResolverRegistry,
    pub(crate) config: &'a RepositoryProcessingConfig,
    pub(crate) interval: Duration,
    pub(crate) deadline: Instant,
    pub(crate) cancel: &'a CancellationToken,
    pub(crate) polls: u32,
}

impl StatusPoller<'_> {
    /// Waits until the resolved status differs from `last_known`.
    ///
    /// Polls once per interval and a last time at the deadline, which is
    /// clamped to it when shorter than an interval.
    ///
    /// Unreachable endpoints are retried on the next tick; any other resolver
    /// error ends polling with an error. Nothing is written here.
    pub(crate) async fn next_change(
        &mut self,
        deposit: &Deposit,
        last_known: Option<DepositStatus>,
    ) -> Result<PollOutcome> {
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                debug!(deposit = %deposit.id, polls = self.polls, "status polling reached max wait");
                return Ok(PollOutcome::TimedOut);
            }
            let wake = (now + self.interval).min(self.deadline);

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(PollOutcome::Cancelled),
                _ = sleep_until(wake) => {}
            }

            self.polls += 1;
            let resolved = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(PollOutcome::Cancelled),
                resolved = self.resolvers.resolve_deposit(deposit, self.config) => resolved,
            };

            match resolved {
                Ok(status) if Some(status) != last_known => {
                    debug!(
                        deposit = %deposit.id,
                        status = %status,
                        polls = self.polls,
                        "remote deposit status changed"
                    );
                    return Ok(PollOutcome::Changed(status));
                }
                Ok(status) => {
                    trace!(deposit = %deposit.id, status = %status, "remote deposit status unchanged");
                }
                Err(err) if err.is_transient() => {
                    warn!(deposit = %deposit.id, error = %err, "status endpoint unreachable; retrying next tick");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
