use custodia_model::{DepositId, ModelError, RepositoryId, SubmissionId};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    dispatcher::DispatchError, resolver::ResolveError, store::ResourceKind,
};

/// Errors that need an operator to correct configuration or data before the
/// work can succeed. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemedialError {
    #[error(
        "no packager registered for repository {repository} (tried keys: {})",
        .keys.join(", ")
    )]
    /// No packager matches the repository's id, name or key.
    PackagerNotFound {
        /// Repository being deposited into.
        repository: RepositoryId,
        /// Lookup keys tried, in order.
        keys: Vec<String>,
    },

    #[error(
        "no deposit processing configuration for repository {repository} (tried keys: {})",
        .keys.join(", ")
    )]
    /// No status processing configuration matches the repository.
    ProcessingConfigNotFound {
        /// Repository whose deposit is being tracked.
        repository: RepositoryId,
        /// Lookup keys tried, in order.
        keys: Vec<String>,
    },

    #[error("invalid configuration: {0}")]
    /// Configuration values that cannot work together.
    InvalidConfiguration(String),
}

/// Every failure the deposit services report.
#[derive(Error, Debug)]
pub enum DepositError {
    /// A record read by id does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of the missing record.
        kind: ResourceKind,
        /// Id of the missing record.
        id: Uuid,
    },

    #[error(
        "version conflict on {kind} {id}: read version {expected}, store holds {actual}"
    )]
    /// An update was based on a stale read.
    VersionConflict {
        /// Kind of the contested record.
        kind: ResourceKind,
        /// Id of the contested record.
        id: Uuid,
        /// Version the writer read.
        expected: u64,
        /// Version the store holds.
        actual: u64,
    },

    /// The resource store failed for a reason other than a conflict.
    #[error("store error: {0}")]
    Store(String),

    /// Needs an operator before the work can succeed.
    #[error("remedial action required: {0}")]
    Remedial(#[from] RemedialError),

    /// Remote status lookup failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("transfer to repository {repository} failed: {message}")]
    /// The package could not be delivered or was refused.
    Transport {
        /// Repository the package was sent to.
        repository: RepositoryId,
        /// What the transport reported.
        message: String,
    },

    /// The task dispatcher did not accept a task.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A committed write does not satisfy its postcondition.
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error(
        "deposit processing failed for submission {submission}, deposit {}, repository {repository}: {source}",
        describe_deposit(.deposit)
    )]
    /// Fan-out stopped at one (submission, repository) pair.
    FanOut {
        /// Submission being fanned out.
        submission: SubmissionId,
        /// Deposit created for the pair, if it got that far.
        deposit: Option<DepositId>,
        /// Repository that failed.
        repository: RepositoryId,
        /// The underlying failure.
        #[source]
        source: Box<DepositError>,
    },

    /// A stored value could not be interpreted.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("IO error: {0}")]
    /// Filesystem failure.
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Work abandoned because the services are shutting down.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    /// A bug or broken invariant.
    Internal(String),
}

fn describe_deposit(deposit: &Option<DepositId>) -> String {
    deposit
        .map(|id| id.to_string())
        .unwrap_or_else(|| "<not created>".to_string())
}

impl DepositError {
    /// True for a stale-read update, which critical interactions retry.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, DepositError::VersionConflict { .. })
    }

    /// Failures worth retrying later without operator involvement.
    pub fn is_transient(&self) -> bool {
        match self {
            DepositError::VersionConflict { .. } => true,
            DepositError::Resolve(err) => err.is_transient(),
            DepositError::Dispatch(DispatchError::Saturated { .. }) => true,
            DepositError::FanOut { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Failures that need configuration or data fixed by an operator.
    pub fn is_remedial(&self) -> bool {
        match self {
            DepositError::Remedial(_) => true,
            DepositError::Resolve(err) => !err.is_transient(),
            DepositError::FanOut { source, .. } => source.is_remedial(),
            _ => false,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DepositError>;
