use std::fmt;

use crate::error::{DepositError, Result};

/// How a critical interaction ended.
///
/// Callers react differently to each: a failed precondition is a benign
/// no-op, an exhausted conflict is transient, a failed critical function is
/// an error, and a failed postcondition means the write happened but the
/// resulting state is inconsistent.
#[derive(Debug)]
pub enum CriticalOutcome {
    /// Written and verified.
    Success,
    /// The fresh read did not qualify; nothing was written.
    PreconditionFailed,
    /// Every attempt lost a version race.
    ConflictExhausted {
        /// Attempts made.
        attempts: u32,
        /// The last conflict.
        error: DepositError,
    },
    /// The critical function returned an error.
    CriticalFailed(DepositError),
    /// Written, but the persisted state failed its check.
    PostconditionFailed(DepositError),
}

impl CriticalOutcome {
    /// Stable kebab-case name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            CriticalOutcome::Success => "success",
            CriticalOutcome::PreconditionFailed => "precondition-failed",
            CriticalOutcome::ConflictExhausted { .. } => "conflict-exhausted",
            CriticalOutcome::CriticalFailed(_) => "critical-failed",
            CriticalOutcome::PostconditionFailed(_) => "postcondition-failed",
        }
    }
}

impl fmt::Display for CriticalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriticalOutcome::Success | CriticalOutcome::PreconditionFailed => {
                f.write_str(self.label())
            }
            CriticalOutcome::ConflictExhausted { attempts, error } => {
                write!(f, "conflict persisted after {attempts} attempts: {error}")
            }
            CriticalOutcome::CriticalFailed(err) => {
                write!(f, "critical function failed: {err}")
            }
            CriticalOutcome::PostconditionFailed(err) => {
                write!(f, "postcondition failed: {err}")
            }
        }
    }
}

/// Result of [`super::CriticalInteraction::perform_critical`].
///
/// `resource` is the persisted resource after a write, or the last resource
/// read when no write happened. `result` is only present once the critical
/// function succeeded.
#[derive(Debug)]
pub struct CriticalResult<R, T> {
    /// Persisted or last-read resource.
    pub resource: Option<R>,
    /// Output of the critical function.
    pub result: Option<T>,
    /// How the interaction ended.
    pub outcome: CriticalOutcome,
}

impl<R, T> CriticalResult<R, T> {
    pub(crate) fn new(
        resource: Option<R>,
        result: Option<T>,
        outcome: CriticalOutcome,
    ) -> Self {
        Self {
            resource,
            result,
            outcome,
        }
    }

    /// True only for [`CriticalOutcome::Success`].
    pub fn success(&self) -> bool {
        matches!(self.outcome, CriticalOutcome::Success)
    }

    /// The precondition rejected the resource; nothing was written.
    pub fn is_noop(&self) -> bool {
        matches!(self.outcome, CriticalOutcome::PreconditionFailed)
    }

    /// A write was committed, whether or not the postcondition held.
    pub fn wrote(&self) -> bool {
        matches!(
            self.outcome,
            CriticalOutcome::Success | CriticalOutcome::PostconditionFailed(_)
        )
    }

    /// The error carried by a failed interaction, if any.
    pub fn throwable(&self) -> Option<&DepositError> {
        match &self.outcome {
            CriticalOutcome::ConflictExhausted { error, .. }
            | CriticalOutcome::CriticalFailed(error)
            | CriticalOutcome::PostconditionFailed(error) => Some(error),
            CriticalOutcome::Success | CriticalOutcome::PreconditionFailed => None,
        }
    }

    /// Converts into a plain `Result`, mapping every non-success outcome to an
    /// error. A no-op becomes `Ok(None)`.
    pub fn into_result(self) -> Result<Option<(R, T)>> {
        match self.outcome {
            CriticalOutcome::Success => match (self.resource, self.result) {
                (Some(resource), Some(result)) => Ok(Some((resource, result))),
                _ => Err(DepositError::Internal(
                    "critical interaction reported success without a result".into(),
                )),
            },
            CriticalOutcome::PreconditionFailed => Ok(None),
            CriticalOutcome::ConflictExhausted { error, .. }
            | CriticalOutcome::CriticalFailed(error) => Err(error),
            CriticalOutcome::PostconditionFailed(error) => Err(match error {
                DepositError::Consistency(_) => error,
                other => DepositError::Consistency(other.to_string()),
            }),
        }
    }
}
