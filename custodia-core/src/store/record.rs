use std::fmt;

use custodia_model::{
    Deposit, DepositStatus, Repository, RepositoryCopy, RepositoryId, Submission,
    SubmissionId, SubmissionStatus,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DepositError, Result};

/// Resource types held by the system of record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// [`Submission`] records.
    Submission,
    /// [`Deposit`] records.
    Deposit,
    /// [`RepositoryCopy`] records.
    RepositoryCopy,
    /// [`Repository`] records.
    Repository,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Submission => write!(f, "submission"),
            ResourceKind::Deposit => write!(f, "deposit"),
            ResourceKind::RepositoryCopy => write!(f, "repository copy"),
            ResourceKind::Repository => write!(f, "repository"),
        }
    }
}

/// A versioned record as exchanged with a [`super::ResourceClient`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "kebab-case")]
pub enum ResourceRecord {
    /// A submission.
    Submission(Submission),
    /// A deposit.
    Deposit(Deposit),
    /// A repository copy.
    RepositoryCopy(RepositoryCopy),
    /// A repository.
    Repository(Repository),
}

impl ResourceRecord {
    /// Kind matching the variant.
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceRecord::Submission(_) => ResourceKind::Submission,
            ResourceRecord::Deposit(_) => ResourceKind::Deposit,
            ResourceRecord::RepositoryCopy(_) => ResourceKind::RepositoryCopy,
            ResourceRecord::Repository(_) => ResourceKind::Repository,
        }
    }

    /// Id of the wrapped record.
    pub fn id(&self) -> Uuid {
        match self {
            ResourceRecord::Submission(r) => r.id.to_uuid(),
            ResourceRecord::Deposit(r) => r.id.to_uuid(),
            ResourceRecord::RepositoryCopy(r) => r.id.to_uuid(),
            ResourceRecord::Repository(r) => r.id.to_uuid(),
        }
    }

    /// Version the wrapped record was read at.
    pub fn version(&self) -> u64 {
        match self {
            ResourceRecord::Submission(r) => r.version,
            ResourceRecord::Deposit(r) => r.version,
            ResourceRecord::RepositoryCopy(r) => r.version,
            ResourceRecord::Repository(r) => r.version,
        }
    }

    /// Overwrites the wrapped record's version. Only stores call this.
    pub fn set_version(&mut self, version: u64) {
        match self {
            ResourceRecord::Submission(r) => r.version = version,
            ResourceRecord::Deposit(r) => r.version = version,
            ResourceRecord::RepositoryCopy(r) => r.version = version,
            ResourceRecord::Repository(r) => r.version = version,
        }
    }
}

/// Typed view over [`ResourceRecord`] so callers can work with model types
/// directly.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Kind this type is stored as.
    const KIND: ResourceKind;

    /// Id as stored.
    fn resource_id(&self) -> Uuid;

    /// Version the value was read at.
    fn version(&self) -> u64;

    /// Wraps the value for a store call.
    fn into_record(self) -> ResourceRecord;

    /// Unwraps a record, failing if it is of another kind.
    fn from_record(record: ResourceRecord) -> Result<Self>;
}

macro_rules! impl_resource {
    ($ty:ident, $variant:ident) => {
        impl Resource for $ty {
            const KIND: ResourceKind = ResourceKind::$variant;

            fn resource_id(&self) -> Uuid {
                self.id.to_uuid()
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn into_record(self) -> ResourceRecord {
                ResourceRecord::$variant(self)
            }

            fn from_record(record: ResourceRecord) -> Result<Self> {
                match record {
                    ResourceRecord::$variant(inner) => Ok(inner),
                    other => Err(DepositError::Store(format!(
                        "expected {} record, store returned {}",
                        ResourceKind::$variant,
                        other.kind()
                    ))),
                }
            }
        }
    };
}

impl_resource!(Submission, Submission);
impl_resource!(Deposit, Deposit);
impl_resource!(RepositoryCopy, RepositoryCopy);
impl_resource!(Repository, Repository);

/// Query filters understood by resource clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceFilter {
    /// Every record of the queried kind.
    All,
    /// Deposits created for one submission.
    DepositsOfSubmission(SubmissionId),
    /// Repository copies made for one submission.
    CopiesOfSubmission(SubmissionId),
    /// Copies of one submission in one repository.
    CopiesOf {
        /// Submission the copy was made for.
        submission: SubmissionId,
        /// Repository holding the copy.
        repository: RepositoryId,
    },
    /// Submissions whose lifecycle status is not one of the listed values.
    SubmissionStatusNotIn(Vec<SubmissionStatus>),
    /// Deposits whose status is unset or not one of the listed values.
    DepositStatusNotIn(Vec<DepositStatus>),
}

impl ResourceFilter {
    /// True when `record` is selected by this filter.
    pub fn matches(&self, record: &ResourceRecord) -> bool {
        match (self, record) {
            (ResourceFilter::All, _) => true,
            (
                ResourceFilter::DepositsOfSubmission(submission),
                ResourceRecord::Deposit(deposit),
            ) => deposit.submission == *submission,
            (
                ResourceFilter::CopiesOfSubmission(submission),
                ResourceRecord::RepositoryCopy(copy),
            ) => copy.submission == *submission,
            (
                ResourceFilter::CopiesOf {
                    submission,
                    repository,
                },
                ResourceRecord::RepositoryCopy(copy),
            ) => copy.submission == *submission && copy.repository == *repository,
            (
                ResourceFilter::SubmissionStatusNotIn(excluded),
                ResourceRecord::Submission(submission),
            ) => !excluded.contains(&submission.submission_status),
            (
                ResourceFilter::DepositStatusNotIn(excluded),
                ResourceRecord::Deposit(deposit),
            ) => deposit
                .deposit_status
                .is_none_or(|status| !excluded.contains(&status)),
            _ => false,
        }
    }
}
