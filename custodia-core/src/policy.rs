//! Status classification and readiness policies.
//!
//! Status vocabularies differ between repositories, so which values count as
//! terminal is injected configuration rather than a property of the enums.

use std::{collections::HashSet, fmt, hash::Hash, sync::Arc};

use custodia_model::{AggregatedDepositStatus, DepositStatus, Submission};

use crate::config::PolicyConfig;

/// Whether a status is a final outcome or an in-progress state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusClass {
    /// May still change.
    Intermediate,
    /// Final; never overwritten.
    Terminal,
}

/// Classifies values of one status vocabulary.
pub trait StatusPolicy<S>: Send + Sync {
    /// Class of `status`.
    fn classify(&self, status: &S) -> StatusClass;

    /// Shorthand for a terminal classification.
    fn is_terminal(&self, status: &S) -> bool {
        self.classify(status) == StatusClass::Terminal
    }

    /// Shorthand for an intermediate classification.
    fn is_intermediate(&self, status: &S) -> bool {
        self.classify(status) == StatusClass::Intermediate
    }

    /// An absent status is always intermediate.
    fn classify_opt(&self, status: Option<&S>) -> StatusClass {
        status.map_or(StatusClass::Intermediate, |s| self.classify(s))
    }
}

/// Policy backed by an explicit set of terminal values.
#[derive(Clone)]
pub struct TerminalSetPolicy<S> {
    terminal: HashSet<S>,
}

impl<S: Eq + Hash> TerminalSetPolicy<S> {
    /// Everything outside `terminal` is intermediate.
    pub fn new(terminal: impl IntoIterator<Item = S>) -> Self {
        Self {
            terminal: terminal.into_iter().collect(),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for TerminalSetPolicy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalSetPolicy")
            .field("terminal", &self.terminal)
            .finish()
    }
}

impl<S> StatusPolicy<S> for TerminalSetPolicy<S>
where
    S: Eq + Hash + Send + Sync,
{
    fn classify(&self, status: &S) -> StatusClass {
        if self.terminal.contains(status) {
            StatusClass::Terminal
        } else {
            StatusClass::Intermediate
        }
    }
}

/// Shared policy over deposit statuses.
pub type DepositStatusPolicy = Arc<dyn StatusPolicy<DepositStatus>>;
/// Shared policy over aggregate deposit statuses.
pub type AggregateStatusPolicy = Arc<dyn StatusPolicy<AggregatedDepositStatus>>;

/// Decides whether a submission may be fanned out to its repositories.
pub trait SubmissionReadyPolicy: Send + Sync {
    /// True when `submission` may be fanned out now.
    fn is_ready(&self, submission: &Submission) -> bool;
}

/// Ready once the submitter has submitted and no deposit work has started.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmittedNotStarted;

impl SubmissionReadyPolicy for SubmittedNotStarted {
    fn is_ready(&self, submission: &Submission) -> bool {
        submission.submitted
            && submission.aggregated_deposit_status
                == AggregatedDepositStatus::NotStarted
    }
}

/// The policies every component needs, built once from configuration.
#[derive(Clone)]
pub struct Policies {
    /// Terminal deposit statuses.
    pub deposit: DepositStatusPolicy,
    /// Terminal aggregate statuses.
    pub aggregate: AggregateStatusPolicy,
    /// Fan-out readiness.
    pub ready: Arc<dyn SubmissionReadyPolicy>,
    /// Deposit statuses counted as failures when aggregating.
    pub deposit_failed: Arc<HashSet<DepositStatus>>,
}

impl fmt::Debug for Policies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policies")
            .field("deposit", &"StatusPolicy<DepositStatus>")
            .field("aggregate", &"StatusPolicy<AggregatedDepositStatus>")
            .field("ready", &"SubmissionReadyPolicy")
            .field("deposit_failed", &self.deposit_failed)
            .finish()
    }
}

impl Policies {
    /// Builds policies from configuration with the default readiness rule.
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            deposit: Arc::new(TerminalSetPolicy::new(
                config.deposit_terminal.iter().copied(),
            )),
            aggregate: Arc::new(TerminalSetPolicy::new(
                config.submission_terminal.iter().copied(),
            )),
            ready: Arc::new(SubmittedNotStarted),
            deposit_failed: Arc::new(config.deposit_failed.iter().copied().collect()),
        }
    }

    /// Replaces the readiness rule.
    pub fn with_ready_policy(mut self, ready: Arc<dyn SubmissionReadyPolicy>) -> Self {
        self.ready = ready;
        self
    }

    /// An unset status is never terminal.
    pub fn deposit_is_terminal(&self, status: Option<DepositStatus>) -> bool {
        self.deposit.classify_opt(status.as_ref()) == StatusClass::Terminal
    }

    /// An unset status is never failed.
    pub fn deposit_is_failed(&self, status: Option<DepositStatus>) -> bool {
        status.is_some_and(|s| self.deposit_failed.contains(&s))
    }

    /// Every deposit status the deposit policy classifies as terminal.
    pub fn deposit_terminal_statuses(&self) -> Vec<DepositStatus> {
        DepositStatus::ALL
            .iter()
            .copied()
            .filter(|s| self.deposit.is_terminal(s))
            .collect()
    }
}

impl Default for Policies {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_model::RepositoryId;

    #[test]
    fn default_deposit_policy_treats_final_outcomes_as_terminal() {
        let policies = Policies::default();
        assert!(policies.deposit_is_terminal(Some(DepositStatus::Accepted)));
        assert!(policies.deposit_is_terminal(Some(DepositStatus::Rejected)));
        assert!(policies.deposit_is_terminal(Some(DepositStatus::Failed)));
        assert!(!policies.deposit_is_terminal(Some(DepositStatus::Submitted)));
        assert!(!policies.deposit_is_terminal(None));
    }

    #[test]
    fn configured_vocabulary_overrides_defaults() {
        let policies = Policies::from_config(&PolicyConfig {
            deposit_terminal: vec![DepositStatus::Accepted],
            ..Default::default()
        });
        assert!(!policies.deposit_is_terminal(Some(DepositStatus::Rejected)));
    }

    #[test]
    fn terminal_statuses_follow_the_injected_policy() {
        let policies = Policies::from_config(&PolicyConfig {
            deposit_terminal: vec![DepositStatus::Accepted],
            ..Default::default()
        });
        assert_eq!(
            policies.deposit_terminal_statuses(),
            vec![DepositStatus::Accepted]
        );
    }

    #[test]
    fn ready_policy_requires_submitted_and_not_started() {
        let mut submission = Submission::submitted(vec![RepositoryId::new()]);
        assert!(SubmittedNotStarted.is_ready(&submission));

        submission.aggregated_deposit_status = AggregatedDepositStatus::InProgress;
        assert!(!SubmittedNotStarted.is_ready(&submission));

        submission.aggregated_deposit_status = AggregatedDepositStatus::NotStarted;
        submission.submitted = false;
        assert!(!SubmittedNotStarted.is_ready(&submission));
    }
}
