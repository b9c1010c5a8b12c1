use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ids::{RepositoryId, SubmissionId},
    status::{AggregatedDepositStatus, SubmissionStatus},
};

/// Role a file plays within a submission's deliverable content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileRole {
    Manuscript,
    Supplemental,
    Figure,
    Table,
}

/// A file attached to a submission. `location` points at the binary content
/// (typically a URI into the binary store).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionFile {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub role: FileRole,
}

impl SubmissionFile {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        role: FileRole,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            mime_type: None,
            role,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn has_content(&self) -> bool {
        !self.location.trim().is_empty()
    }
}

/// Descriptive metadata carried with the submission.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub journal: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub embargo_lift_date: Option<DateTime<Utc>>,
    /// Free-form fields that particular repositories may consume.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A scholarly work and its intent to be deposited into one or more
/// repositories.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    #[serde(default)]
    pub version: u64,
    pub submitted: bool,
    pub submission_status: SubmissionStatus,
    pub aggregated_deposit_status: AggregatedDepositStatus,
    /// Target repositories, in the order they should be processed.
    #[serde(default)]
    pub repositories: Vec<RepositoryId>,
    #[serde(default)]
    pub files: Vec<SubmissionFile>,
    #[serde(default)]
    pub metadata: SubmissionMetadata,
}

impl Submission {
    /// A submitted, not-yet-deposited submission targeting `repositories`.
    pub fn submitted(repositories: Vec<RepositoryId>) -> Self {
        Self {
            id: SubmissionId::new(),
            version: 0,
            submitted: true,
            submission_status: SubmissionStatus::Submitted,
            aggregated_deposit_status: AggregatedDepositStatus::NotStarted,
            repositories,
            files: Vec::new(),
            metadata: SubmissionMetadata::default(),
        }
    }

    pub fn with_file(mut self, file: SubmissionFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = Some(title.into());
        self
    }
}
