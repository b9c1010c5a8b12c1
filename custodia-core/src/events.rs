use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodia_model::{DepositId, DepositStatus, RepositoryId, SubmissionId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

/// Emitted after a deposit's status has been written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    /// Deposit that changed.
    pub deposit: DepositId,
    /// Submission to re-aggregate.
    pub submission: SubmissionId,
    /// Repository the deposit targets.
    pub repository: RepositoryId,
    /// Status as written.
    pub status: Option<DepositStatus>,
    /// When the status was written.
    pub occurred_at: DateTime<Utc>,
}

/// Sink for deposit status change events.
#[async_trait]
pub trait DepositEventPublisher: Send + Sync {
    /// Hands the event on. Failures are logged by callers, not retried.
    async fn publish(&self, event: DepositEvent) -> Result<()>;
}

/// In-process fan-out of deposit events. Publishing never blocks; slow
/// subscribers observe `Lagged` and are expected to fall back to a sweep.
pub struct InProcDepositEventBus {
    sender: broadcast::Sender<DepositEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcDepositEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcDepositEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcDepositEventBus {
    /// Buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    /// Receives every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DepositEvent> {
        self.sender.subscribe()
    }
}

impl Default for InProcDepositEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl DepositEventPublisher for InProcDepositEventBus {
    async fn publish(&self, event: DepositEvent) -> Result<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }
}
