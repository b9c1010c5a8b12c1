//! Immutable deliverable snapshot of a submission, shared by every deposit
//! task of that submission.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use custodia_model::{FileRole, Submission, SubmissionId, SubmissionMetadata};
use serde::{Deserialize, Serialize};

use crate::error::{DepositError, Result};

/// Error text for a snapshot of a submission with no files.
pub const NO_FILES_ATTACHED: &str = "no files attached";

/// A submission file as handed to packagers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositFile {
    /// File name.
    pub name: String,
    /// Where the binary content can be fetched.
    pub location: String,
    /// Declared MIME type.
    pub mime_type: Option<String>,
    /// Role within the submission.
    pub role: FileRole,
}

/// Immutable view of a submission taken before fan-out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepositSubmission {
    /// Submission the snapshot was taken of.
    pub submission: SubmissionId,
    /// Descriptive metadata.
    pub metadata: SubmissionMetadata,
    /// Files to deposit, in submission order.
    pub files: Vec<DepositFile>,
    /// When the snapshot was taken.
    pub built_at: DateTime<Utc>,
}

impl DepositSubmission {
    /// Captures the submission's current content. Does not validate; see
    /// [`DepositSubmission::validate`].
    pub fn from_submission(submission: &Submission) -> Self {
        Self {
            submission: submission.id,
            metadata: submission.metadata.clone(),
            files: submission
                .files
                .iter()
                .map(|file| DepositFile {
                    name: file.name.clone(),
                    location: file.location.trim().to_string(),
                    mime_type: file.mime_type.clone(),
                    role: file.role,
                })
                .collect(),
            built_at: Utc::now(),
        }
    }

    /// A snapshot must carry at least one file and every file must point at
    /// binary content.
    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(DepositError::Consistency(format!(
                "submission {}: {NO_FILES_ATTACHED}",
                self.submission
            )));
        }
        let missing: Vec<&str> = self
            .files
            .iter()
            .filter(|file| file.location.trim().is_empty())
            .map(|file| file.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(DepositError::Consistency(format!(
                "submission {}: files missing binary content: {}",
                self.submission,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// The first file with the manuscript role.
    pub fn manuscript(&self) -> Option<&DepositFile> {
        self.files
            .iter()
            .find(|file| file.role == FileRole::Manuscript)
    }

    /// Shares the snapshot between the tasks of one fan-out.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_model::{RepositoryId, SubmissionFile};

    #[test]
    fn empty_snapshot_names_missing_files() {
        let submission = Submission::submitted(vec![RepositoryId::new()]);
        let err = DepositSubmission::from_submission(&submission)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains(NO_FILES_ATTACHED));
    }

    #[test]
    fn blank_location_is_rejected_by_name() {
        let submission = Submission::submitted(vec![RepositoryId::new()])
            .with_file(SubmissionFile::new(
                "paper.pdf",
                "binary://1",
                FileRole::Manuscript,
            ))
            .with_file(SubmissionFile::new("data.csv", "   ", FileRole::Supplemental));
        let err = DepositSubmission::from_submission(&submission)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("data.csv"));
    }

    #[test]
    fn complete_snapshot_validates() {
        let submission = Submission::submitted(vec![RepositoryId::new()]).with_file(
            SubmissionFile::new("paper.pdf", "binary://1", FileRole::Manuscript),
        );
        let snapshot = DepositSubmission::from_submission(&submission);
        snapshot.validate().expect("valid");
        assert_eq!(snapshot.manuscript().map(|f| f.name.as_str()), Some("paper.pdf"));
    }
}
