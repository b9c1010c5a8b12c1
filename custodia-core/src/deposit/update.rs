//! Writing a resolved status onto a deposit and its repository copy.

use std::sync::Arc;

use custodia_model::{CopyStatus, Deposit, DepositStatus, RepositoryCopy};
use tracing::debug;

use crate::{
    critical::{CriticalFuture, CriticalInteraction, CriticalResult},
    error::{DepositError, Result},
    policy::Policies,
    store::{ResourceClient, ResourceClientExt, ResourceFilter},
};

/// What a deposit update committed besides the deposit itself.
#[derive(Clone, Debug, PartialEq)]
pub struct DepositUpdate {
    /// Status written to the deposit.
    pub status: DepositStatus,
    /// Repository copy as persisted alongside it.
    pub copy: RepositoryCopy,
}

/// Copy status implied by a resolved deposit status.
///
/// Intermediate statuses leave an existing copy alone; a copy created for an
/// intermediate status starts out in progress.
pub fn derive_copy_status(resolved: DepositStatus, existing: Option<CopyStatus>) -> CopyStatus {
    match resolved {
        DepositStatus::Accepted => CopyStatus::Complete,
        DepositStatus::Rejected => CopyStatus::Rejected,
        DepositStatus::Submitted | DepositStatus::Failed => {
            existing.unwrap_or(CopyStatus::InProgress)
        }
    }
}

/// Checks that a committed deposit and its copy agree.
pub fn verify_deposit_update(deposit: &Deposit, update: &DepositUpdate) -> Result<()> {
    if deposit.deposit_status != Some(update.status) {
        return Err(DepositError::Consistency(format!(
            "deposit {} holds status {:?}, expected {}",
            deposit.id, deposit.deposit_status, update.status
        )));
    }
    if deposit.repository_copy != Some(update.copy.id) {
        return Err(DepositError::Consistency(format!(
            "deposit {} is not linked to repository copy {}",
            deposit.id, update.copy.id
        )));
    }
    let expected = match update.status {
        DepositStatus::Accepted => Some(CopyStatus::Complete),
        DepositStatus::Rejected => Some(CopyStatus::Rejected),
        DepositStatus::Submitted | DepositStatus::Failed => None,
    };
    match expected {
        Some(expected) if update.copy.copy_status != expected => {
            Err(DepositError::Consistency(format!(
                "deposit {} is {} but repository copy {} is {} (expected {})",
                deposit.id,
                update.status,
                update.copy.id,
                update.copy.copy_status,
                expected
            )))
        }
        _ => Ok(()),
    }
}

/// Runs the deposit-status critical interaction.
#[derive(Clone, Debug)]
pub struct DepositUpdater {
    engine: CriticalInteraction,
    policies: Policies,
}

impl DepositUpdater {
    /// Runs its interactions through `engine`.
    pub fn new(engine: CriticalInteraction, policies: Policies) -> Self {
        Self { engine, policies }
    }

    /// Policies deciding which statuses are final.
    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    /// Store the updater writes to.
    pub fn client(&self) -> Arc<dyn ResourceClient> {
        self.engine.client()
    }

    /// Records `status` (and `status_ref` when given) on the deposit,
    /// creating or updating its repository copy.
    ///
    /// A deposit that is already terminal is left untouched.
    pub async fn apply(
        &self,
        deposit: &Deposit,
        status: DepositStatus,
        status_ref: Option<String>,
    ) -> CriticalResult<Deposit, DepositUpdate> {
        let policies = self.policies.clone();
        let client = self.engine.client();

        self.engine
            .perform_critical(
                deposit.id,
                move |current: &Deposit| !policies.deposit_is_terminal(current.deposit_status),
                move |current: Deposit| -> CriticalFuture<Deposit, DepositUpdate> {
                    Box::pin(write_status(
                        Arc::clone(&client),
                        current,
                        status,
                        status_ref.clone(),
                    ))
                },
                verify_deposit_update,
            )
            .await
    }
}

async fn write_status(
    client: Arc<dyn ResourceClient>,
    mut deposit: Deposit,
    status: DepositStatus,
    status_ref: Option<String>,
) -> Result<(Deposit, DepositUpdate)> {
    let existing = locate_copy(client.as_ref(), &deposit).await?;
    let copy_status = derive_copy_status(status, existing.as_ref().map(|c| c.copy_status));

    let copy = match existing {
        Some(copy) if copy.copy_status == copy_status => copy,
        Some(mut copy) => {
            copy.copy_status = copy_status;
            client.update_resource(copy).await?
        }
        None => {
            client
                .create_resource(RepositoryCopy::new(
                    deposit.submission,
                    deposit.repository,
                    copy_status,
                ))
                .await?
        }
    };

    deposit.deposit_status = Some(status);
    if let Some(status_ref) = status_ref {
        deposit.deposit_status_ref = Some(status_ref);
    }
    deposit.repository_copy = Some(copy.id);
    let deposit = client.update_resource(deposit).await?;

    debug!(
        deposit = %deposit.id,
        repository = %deposit.repository,
        status = %status,
        copy = %copy.id,
        copy_status = %copy.copy_status,
        "deposit status written"
    );
    Ok((deposit, DepositUpdate { status, copy }))
}

/// The deposit's repository copy, by link first and then by
/// (submission, repository), so a retried write reuses a copy created by an
/// earlier attempt.
async fn locate_copy(
    client: &dyn ResourceClient,
    deposit: &Deposit,
) -> Result<Option<RepositoryCopy>> {
    if let Some(id) = deposit.repository_copy {
        match client.read::<RepositoryCopy>(id.to_uuid()).await {
            Ok(copy) => return Ok(Some(copy)),
            Err(DepositError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }
    }
    let copies: Vec<RepositoryCopy> = client
        .find(&ResourceFilter::CopiesOf {
            submission: deposit.submission,
            repository: deposit.repository,
        })
        .await?;
    Ok(copies.into_iter().next())
}
