//! Status vocabularies shared by submissions, deposits and repository copies.
//!
//! Every vocabulary serializes in kebab-case (`in-progress`, `not-started`)
//! and round-trips through [`std::str::FromStr`] / [`std::fmt::Display`] so
//! configuration files can name values the same way the store does.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

macro_rules! status_vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "kebab-case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
                match normalized.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ModelError::UnknownStatus {
                        kind: $label,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

status_vocabulary!(
    /// Lifecycle of a submission as seen by its submitter and approvers.
    SubmissionStatus, "submission status" {
        Draft => "draft",
        ManuscriptRequired => "manuscript-required",
        ApprovalRequested => "approval-requested",
        ChangesRequested => "changes-requested",
        Submitted => "submitted",
        NeedsAttention => "needs-attention",
        Complete => "complete",
        Cancelled => "cancelled",
    }
);

impl SubmissionStatus {
    /// Lifecycle statuses that never change again.
    pub const TERMINAL: [SubmissionStatus; 2] =
        [SubmissionStatus::Complete, SubmissionStatus::Cancelled];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// True once the submitter has handed the submission over for deposit.
    pub fn is_post_submission(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Submitted
                | SubmissionStatus::NeedsAttention
                | SubmissionStatus::Complete
        )
    }
}

status_vocabulary!(
    /// Submission-level rollup of every deposit's status.
    AggregatedDepositStatus, "aggregated deposit status" {
        NotStarted => "not-started",
        InProgress => "in-progress",
        Accepted => "accepted",
        Rejected => "rejected",
    }
);

status_vocabulary!(
    /// Status of a single repository-specific deposit.
    DepositStatus, "deposit status" {
        Submitted => "submitted",
        Accepted => "accepted",
        Rejected => "rejected",
        Failed => "failed",
    }
);

status_vocabulary!(
    /// Status of the custodial repository's copy of the deposited content.
    CopyStatus, "copy status" {
        Accepted => "accepted",
        InProgress => "in-progress",
        Complete => "complete",
        Rejected => "rejected",
        Stalled => "stalled",
    }
);
