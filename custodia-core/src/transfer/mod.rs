//! Contracts with package assembly and wire transfer.
//!
//! A [`Packager`] bundles the assembler and transport configured for one
//! target repository. Concrete protocols live outside this crate; the
//! manifest assembler and filesystem transport here are minimal reference
//! implementations.

mod filesystem;
mod manifest;

use std::{collections::BTreeMap, collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use custodia_model::{DepositId, DepositStatus, Repository, RepositoryId, SubmissionId};
use tracing::debug;

use crate::{
    error::{RemedialError, Result},
    snapshot::DepositSubmission,
};

pub use filesystem::{DIRECTORY_OPTION, FilesystemTransport};
pub use manifest::JsonManifestAssembler;

/// Free-form options handed to assemblers and transports.
pub type PackagerOptions = BTreeMap<String, String>;

/// An assembled package ready to be sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    /// File name the package is sent under.
    pub name: String,
    /// MIME type of `bytes`.
    pub content_type: String,
    /// Package body.
    pub bytes: Vec<u8>,
}

/// Identifies the deposit a transfer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferContext {
    /// Submission the deposit belongs to.
    pub submission: SubmissionId,
    /// Deposit being transferred.
    pub deposit: DepositId,
    /// Target repository.
    pub repository: RepositoryId,
}

/// Acknowledgment returned by the external system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    /// Protocol status; 2xx counts as accepted for processing.
    pub status_code: u16,
    /// Where to poll for status, if the system reports one.
    pub status_ref: Option<String>,
    /// A status the system already knows to be final (or current).
    pub terminal_hint: Option<DepositStatus>,
}

/// Builds the package for one repository from a submission snapshot.
#[async_trait]
pub trait Assembler: Send + Sync {
    /// Builds the package. Errors fail the deposit before anything is sent.
    async fn assemble(
        &self,
        snapshot: &DepositSubmission,
        options: &PackagerOptions,
    ) -> Result<Package>;
}

/// Opens sessions to an external system.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a session configured by `options`.
    async fn open(&self, options: &PackagerOptions) -> Result<Box<dyn TransportSession>>;
}

/// One connection to an external system.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Sends one package. Errors and non-2xx responses fail the deposit.
    async fn send(
        &mut self,
        package: &Package,
        context: &TransferContext,
    ) -> Result<TransportResponse>;
}

/// Assembler plus transport configured for one target repository.
#[derive(Clone)]
pub struct Packager {
    /// Name used in logs.
    pub name: String,
    /// Builds the package.
    pub assembler: Arc<dyn Assembler>,
    /// Delivers the package.
    pub transport: Arc<dyn Transport>,
    /// Passed to both the assembler and the transport.
    pub options: PackagerOptions,
}

impl fmt::Debug for Packager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packager")
            .field("name", &self.name)
            .field("assembler", &"Assembler")
            .field("transport", &"Transport")
            .field("options", &self.options)
            .finish()
    }
}

impl Packager {
    /// A packager with no options.
    pub fn new(
        name: impl Into<String>,
        assembler: Arc<dyn Assembler>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            assembler,
            transport,
            options: PackagerOptions::new(),
        }
    }

    /// Adds or replaces one option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Packagers keyed by repository id, name or configured key.
#[derive(Clone, Default)]
pub struct PackagerRegistry {
    packagers: HashMap<String, Arc<Packager>>,
}

impl fmt::Debug for PackagerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.packagers.keys().collect();
        keys.sort();
        f.debug_struct("PackagerRegistry")
            .field("packagers", &keys)
            .finish()
    }
}

impl PackagerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `packager` under a repository id, name or key.
    pub fn register(&mut self, key: impl Into<String>, packager: Packager) -> &mut Self {
        self.packagers.insert(key.into(), Arc::new(packager));
        self
    }

    /// First match wins: repository id, then name, then configured key.
    pub fn lookup(&self, repository: &Repository) -> Result<Arc<Packager>> {
        let keys = repository.lookup_keys();
        for key in &keys {
            if let Some(packager) = self.packagers.get(key) {
                debug!(
                    repository = %repository.id,
                    key = %key,
                    packager = %packager.name,
                    "resolved packager"
                );
                return Ok(Arc::clone(packager));
            }
        }
        Err(RemedialError::PackagerNotFound {
            repository: repository.id,
            keys,
        }
        .into())
    }
}
