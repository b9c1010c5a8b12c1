use serde::{Deserialize, Serialize};

use crate::{
    ids::{DepositId, RepositoryCopyId, RepositoryId, SubmissionId},
    status::DepositStatus,
};

/// One repository-specific delivery record for a submission.
///
/// Created once per (submission, repository) pair; its status is rewritten
/// until it reaches a terminal value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: DepositId,
    #[serde(default)]
    pub version: u64,
    pub submission: SubmissionId,
    pub repository: RepositoryId,
    /// `None` until the first transfer has been acknowledged.
    #[serde(default)]
    pub deposit_status: Option<DepositStatus>,
    /// Opaque locator used to poll the external system for status.
    #[serde(default)]
    pub deposit_status_ref: Option<String>,
    #[serde(default)]
    pub repository_copy: Option<RepositoryCopyId>,
}

impl Deposit {
    pub fn new(submission: SubmissionId, repository: RepositoryId) -> Self {
        Self {
            id: DepositId::new(),
            version: 0,
            submission,
            repository,
            deposit_status: None,
            deposit_status_ref: None,
            repository_copy: None,
        }
    }
}
