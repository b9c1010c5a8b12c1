//! Translation of external status documents into deposit statuses.

mod http;

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use custodia_model::{Deposit, DepositStatus, RepositoryId};
use thiserror::Error;
use tracing::debug;

use crate::config::RepositoryProcessingConfig;

pub use http::{HttpStatusResolver, interpret_status_document};

/// Status value as reported by the external system, before mapping.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NativeStatus(pub String);

impl NativeStatus {
    /// The raw value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a remote status could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The remote endpoint could not be reached; worth retrying later.
    #[error("status endpoint {status_ref} unreachable: {message}")]
    Unreachable {
        /// Reference that was fetched.
        status_ref: String,
        /// Transport error text.
        message: String,
    },

    /// The status document (or the deposit's reference to it) cannot be
    /// interpreted. Needs an operator.
    #[error("status document {status_ref} could not be interpreted: {message}")]
    Malformed {
        /// Reference that was fetched.
        status_ref: String,
        /// What could not be interpreted.
        message: String,
    },

    /// No resolver is registered for the repository's configuration.
    #[error("no status resolver '{resolver}' registered for repository {repository}")]
    ProcessorNotFound {
        /// Repository whose configuration names the resolver.
        repository: RepositoryId,
        /// Registry key that had no resolver.
        resolver: String,
    },
}

impl ResolveError {
    /// Only unreachable endpoints are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolveError::Unreachable { .. })
    }
}

/// Fetches and interprets one remote status document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusResolver: Send + Sync {
    /// Fetches the document at `status_ref` and extracts the native status.
    async fn resolve(
        &self,
        status_ref: &str,
        config: &RepositoryProcessingConfig,
    ) -> Result<NativeStatus, ResolveError>;
}

/// Resolvers keyed by the name repositories refer to in their processing
/// configuration.
#[derive(Clone, Default)]
pub struct StatusResolverRegistry {
    resolvers: HashMap<String, Arc<dyn StatusResolver>>,
}

impl fmt::Debug for StatusResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.resolvers.keys().collect();
        keys.sort();
        f.debug_struct("StatusResolverRegistry")
            .field("resolvers", &keys)
            .finish()
    }
}

impl StatusResolverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the HTTP/JSON resolver under its default key.
    pub fn with_http_default() -> Self {
        let mut registry = Self::new();
        registry.register(
            crate::config::DEFAULT_RESOLVER_KEY,
            Arc::new(HttpStatusResolver::default()),
        );
        registry
    }

    /// Registers `resolver` under `key`, replacing any previous one.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        resolver: Arc<dyn StatusResolver>,
    ) -> &mut Self {
        self.resolvers.insert(key.into(), resolver);
        self
    }

    /// Resolver registered under `key`.
    pub fn get(&self, key: &str) -> Option<Arc<dyn StatusResolver>> {
        self.resolvers.get(key).cloned()
    }

    /// Resolves the deposit's current remote status into the internal
    /// vocabulary, applying the configured status reference rewrite first.
    pub async fn resolve_deposit(
        &self,
        deposit: &Deposit,
        config: &RepositoryProcessingConfig,
    ) -> Result<DepositStatus, ResolveError> {
        let status_ref = deposit.deposit_status_ref.as_deref().ok_or_else(|| {
            ResolveError::Malformed {
                status_ref: "<none>".into(),
                message: format!("deposit {} has no status reference", deposit.id),
            }
        })?;

        let resolver = self.get(config.resolver_key()).ok_or_else(|| {
            ResolveError::ProcessorNotFound {
                repository: deposit.repository,
                resolver: config.resolver_key().to_string(),
            }
        })?;

        let status_ref = config.rewrite_status_ref(status_ref);
        let native = resolver.resolve(&status_ref, config).await?;
        let status =
            config
                .map_status(native.as_str())
                .ok_or_else(|| ResolveError::Malformed {
                    status_ref: status_ref.clone(),
                    message: format!("native status '{native}' has no mapping"),
                })?;

        debug!(
            deposit = %deposit.id,
            status_ref = %status_ref,
            native = %native,
            status = %status,
            "resolved remote deposit status"
        );
        Ok(status)
    }
}
