use serde::{Deserialize, Serialize};

use crate::ids::RepositoryId;

/// How a repository is integrated with the deposit services.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrationType {
    /// Content is transferred and the repository reports status back.
    #[default]
    Full,
    /// Content is transferred; no status is reported back.
    OneWay,
    /// The repository is only linked to; nothing is ever transferred.
    WebLink,
}

impl IntegrationType {
    pub fn is_link_only(&self) -> bool {
        matches!(self, IntegrationType::WebLink)
    }
}

/// Static description of a deposit target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    #[serde(default)]
    pub version: u64,
    pub name: String,
    /// Configured key used to find processing configuration and packagers.
    #[serde(default)]
    pub repository_key: Option<String>,
    #[serde(default)]
    pub integration_type: IntegrationType,
}

impl Repository {
    pub fn new(name: impl Into<String>, integration_type: IntegrationType) -> Self {
        Self {
            id: RepositoryId::new(),
            version: 0,
            name: name.into(),
            repository_key: None,
            integration_type,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.repository_key = Some(key.into());
        self
    }

    /// Keys to try, in priority order, when looking up per-repository
    /// collaborators: the id, the name, then the configured key.
    pub fn lookup_keys(&self) -> Vec<String> {
        let mut keys = vec![self.id.to_string(), self.name.clone()];
        if let Some(key) = &self.repository_key {
            keys.push(key.clone());
        }
        keys
    }
}
