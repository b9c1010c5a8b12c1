use std::{collections::HashMap, time::Duration};

use custodia_model::{AggregatedDepositStatus, DepositStatus, Repository};
use serde::{Deserialize, Serialize};

use crate::error::{RemedialError, Result};

/// Global knobs for the deposit services.
///
/// All fields carry defaults so a deployment only has to spell out the
/// per-repository processing configuration it needs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DepositServicesConfig {
    /// Optimistic-concurrency retry bound.
    pub critical: CriticalConfig,
    /// Worker pool sizing for deposit tasks.
    pub dispatcher: DispatcherConfig,
    /// Remote status polling cadence.
    pub poll: PollConfig,
    /// Terminal/failed classification of status vocabularies.
    pub policy: PolicyConfig,
    /// Deposit-processing configuration keyed by repository id, name or key.
    pub repositories: HashMap<String, RepositoryProcessingConfig>,
}

/// Critical interaction retry settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalConfig {
    /// Attempts before a version conflict is given up on.
    pub max_attempts: u32,
}

impl Default for CriticalConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::critical::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Deposit task worker pool sizing.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Deposit tasks executing concurrently.
    pub workers: usize,
    /// Tasks accepted but not yet picked up. Submissions beyond this are
    /// rejected as saturated.
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
        }
    }
}

/// Remote status polling.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// When false, tasks stop after the first status write.
    pub enabled: bool,
    /// Delay between resolver calls.
    pub interval_ms: u64,
    /// Upper bound on how long one task keeps polling a deposit.
    pub max_wait_ms: u64,
}

impl PollConfig {
    /// `interval_ms` as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// `max_wait_ms` as a duration.
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            max_wait_ms: 30 * 60 * 1_000,
        }
    }
}

/// Terminal and failed classification of status vocabularies.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Deposit statuses that are never overwritten.
    pub deposit_terminal: Vec<DepositStatus>,
    /// Deposit statuses that count towards a rejected aggregate. Each must
    /// also be in `deposit_terminal`.
    pub deposit_failed: Vec<DepositStatus>,
    /// Aggregate statuses that are never recomputed.
    pub submission_terminal: Vec<AggregatedDepositStatus>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            deposit_terminal: vec![
                DepositStatus::Accepted,
                DepositStatus::Rejected,
                DepositStatus::Failed,
            ],
            deposit_failed: vec![DepositStatus::Rejected, DepositStatus::Failed],
            submission_terminal: vec![
                AggregatedDepositStatus::Accepted,
                AggregatedDepositStatus::Rejected,
            ],
        }
    }
}

/// Find/replace applied to a status reference before each poll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRefRewrite {
    /// Substring to look for.
    pub find: String,
    /// Replacement for every occurrence.
    pub replace: String,
}

impl StatusRefRewrite {
    /// An empty `find` leaves the reference unchanged.
    pub fn apply(&self, status_ref: &str) -> String {
        if self.find.is_empty() {
            return status_ref.to_string();
        }
        status_ref.replace(&self.find, &self.replace)
    }
}

/// How deposits into one repository have their remote status interpreted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryProcessingConfig {
    /// Registry key of the status resolver to use.
    pub resolver: Option<String>,
    /// JSON pointer locating the native status inside the status document.
    pub status_pointer: Option<String>,
    /// Native status value to internal deposit status.
    pub status_mapping: HashMap<String, DepositStatus>,
    /// Status used for native values missing from `status_mapping`.
    pub default_status: Option<DepositStatus>,
    /// Legacy rewrite applied to status references before polling.
    pub status_ref_rewrite: Option<StatusRefRewrite>,
}

/// Resolver used when a repository names none.
pub const DEFAULT_RESOLVER_KEY: &str = "http-json";
/// Pointer used when a repository names none.
pub const DEFAULT_STATUS_POINTER: &str = "/status";

impl RepositoryProcessingConfig {
    /// Configured resolver, or [`DEFAULT_RESOLVER_KEY`].
    pub fn resolver_key(&self) -> &str {
        self.resolver.as_deref().unwrap_or(DEFAULT_RESOLVER_KEY)
    }

    /// Configured pointer, or [`DEFAULT_STATUS_POINTER`].
    pub fn status_pointer(&self) -> &str {
        self.status_pointer
            .as_deref()
            .unwrap_or(DEFAULT_STATUS_POINTER)
    }

    /// Applies the optional legacy rewrite to a status reference.
    pub fn rewrite_status_ref(&self, status_ref: &str) -> String {
        match &self.status_ref_rewrite {
            Some(rewrite) => rewrite.apply(status_ref),
            None => status_ref.to_string(),
        }
    }

    /// Translates a native status into the internal vocabulary.
    pub fn map_status(&self, native: &str) -> Option<DepositStatus> {
        self.status_mapping
            .get(native)
            .copied()
            .or(self.default_status)
    }
}

impl DepositServicesConfig {
    /// Processing configuration for a repository, found by id, then name,
    /// then configured key.
    pub fn processing_for(
        &self,
        repository: &Repository,
    ) -> Result<&RepositoryProcessingConfig> {
        let keys = repository.lookup_keys();
        keys.iter()
            .find_map(|key| self.repositories.get(key))
            .ok_or_else(|| {
                RemedialError::ProcessingConfigNotFound {
                    repository: repository.id,
                    keys,
                }
                .into()
            })
    }

    /// Rejects settings the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: String) -> Result<()> {
            Err(RemedialError::InvalidConfiguration(msg).into())
        }

        if self.critical.max_attempts == 0 {
            return invalid("critical.max_attempts must be at least 1".into());
        }
        if self.dispatcher.workers == 0 {
            return invalid("dispatcher.workers must be at least 1".into());
        }
        if self.dispatcher.queue_capacity == 0 {
            return invalid("dispatcher.queue_capacity must be at least 1".into());
        }
        if self.poll.enabled && self.poll.interval_ms == 0 {
            return invalid("poll.interval_ms must be positive when polling".into());
        }
        if self.poll.enabled && self.poll.max_wait_ms == 0 {
            return invalid("poll.max_wait_ms must be positive when polling".into());
        }
        if let Some(status) = self
            .policy
            .deposit_failed
            .iter()
            .find(|s| !self.policy.deposit_terminal.contains(s))
        {
            return invalid(format!(
                "policy.deposit_failed contains {status}, which is not in policy.deposit_terminal"
            ));
        }
        for (key, repo) in &self.repositories {
            let pointer = repo.status_pointer();
            if !pointer.is_empty() && !pointer.starts_with('/') {
                return invalid(format!(
                    "repositories.{key}.status_pointer must be a JSON pointer (got {pointer})"
                ));
            }
            if repo.status_mapping.is_empty() && repo.default_status.is_none() {
                return invalid(format!(
                    "repositories.{key} maps no native statuses"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_model::IntegrationType;

    #[test]
    fn defaults_validate() {
        DepositServicesConfig::default()
            .validate()
            .expect("defaults are valid");
    }

    #[test]
    fn failed_statuses_must_be_terminal() {
        let mut config = DepositServicesConfig::default();
        config.policy.deposit_terminal = vec![DepositStatus::Accepted, DepositStatus::Rejected];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("policy.deposit_failed"), "{err}");

        config.policy.deposit_failed = vec![DepositStatus::Rejected];
        config.validate().expect("failed class within terminal set");
    }

    #[test]
    fn polling_needs_a_positive_max_wait() {
        let mut config = DepositServicesConfig::default();
        config.poll.max_wait_ms = 0;
        assert!(config.validate().is_err());

        config.poll.enabled = false;
        config.validate().expect("max wait unused without polling");
    }

    #[test]
    fn processing_lookup_prefers_id_then_name_then_key() {
        let repo = Repository::new("PubMed Central", IntegrationType::Full)
            .with_key("pmc");
        let mut config = DepositServicesConfig::default();
        config.repositories.insert(
            "pmc".into(),
            RepositoryProcessingConfig {
                resolver: Some("by-key".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            config.processing_for(&repo).unwrap().resolver_key(),
            "by-key"
        );

        config.repositories.insert(
            "PubMed Central".into(),
            RepositoryProcessingConfig {
                resolver: Some("by-name".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            config.processing_for(&repo).unwrap().resolver_key(),
            "by-name"
        );
    }

    #[test]
    fn missing_processing_config_is_remedial() {
        let repo = Repository::new("Nowhere", IntegrationType::Full);
        let err = DepositServicesConfig::default()
            .processing_for(&repo)
            .unwrap_err();
        assert!(err.is_remedial());
    }

    #[test]
    fn rewrite_replaces_every_occurrence() {
        let config = RepositoryProcessingConfig {
            status_ref_rewrite: Some(StatusRefRewrite {
                find: "http://legacy".into(),
                replace: "https://current".into(),
            }),
            ..Default::default()
        };
        assert_eq!(
            config.rewrite_status_ref("http://legacy/status/1"),
            "https://current/status/1"
        );
    }

    #[test]
    fn unmapped_native_status_falls_back_to_default() {
        let mut config = RepositoryProcessingConfig {
            default_status: Some(DepositStatus::Submitted),
            ..Default::default()
        };
        config
            .status_mapping
            .insert("archived".into(), DepositStatus::Accepted);
        assert_eq!(config.map_status("archived"), Some(DepositStatus::Accepted));
        assert_eq!(config.map_status("inprogress"), Some(DepositStatus::Submitted));
    }
}
