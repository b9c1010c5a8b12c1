use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    ids::{RepositoryCopyId, RepositoryId, SubmissionId},
    status::CopyStatus,
};

/// The custodial repository's record of the deposited artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryCopy {
    pub id: RepositoryCopyId,
    #[serde(default)]
    pub version: u64,
    pub submission: SubmissionId,
    pub repository: RepositoryId,
    pub copy_status: CopyStatus,
    #[serde(default)]
    pub access_url: Option<Url>,
    #[serde(default)]
    pub external_ids: Vec<String>,
}

impl RepositoryCopy {
    pub fn new(
        submission: SubmissionId,
        repository: RepositoryId,
        copy_status: CopyStatus,
    ) -> Self {
        Self {
            id: RepositoryCopyId::new(),
            version: 0,
            submission,
            repository,
            copy_status,
            access_url: None,
            external_ids: Vec::new(),
        }
    }
}
