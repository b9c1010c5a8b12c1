//! Core data model definitions shared across Custodia crates.
#![allow(missing_docs)]

pub mod deposit;
pub mod error;
pub mod ids;
pub mod repository;
pub mod repository_copy;
pub mod status;
pub mod submission;

pub use deposit::Deposit;
pub use error::{ModelError, Result as ModelResult};
pub use ids::{DepositId, RepositoryCopyId, RepositoryId, SubmissionId};
pub use repository::{IntegrationType, Repository};
pub use repository_copy::RepositoryCopy;
pub use status::{
    AggregatedDepositStatus, CopyStatus, DepositStatus, SubmissionStatus,
};
pub use submission::{
    FileRole, Submission, SubmissionFile, SubmissionMetadata,
};
