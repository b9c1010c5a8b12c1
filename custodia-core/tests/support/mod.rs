//! Shared fixtures for deposit-service integration tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use custodia_core::{
    config::{DepositServicesConfig, RepositoryProcessingConfig},
    error::Result,
    resolver::{NativeStatus, ResolveError, StatusResolver, StatusResolverRegistry},
    services::DepositServices,
    snapshot::DepositSubmission,
    store::{InMemoryResourceStore, ResourceClientExt},
    transfer::{
        Assembler, JsonManifestAssembler, Package, Packager, PackagerOptions, PackagerRegistry,
        TransferContext, Transport, TransportResponse, TransportSession,
    },
};
use custodia_model::{
    DepositStatus, FileRole, IntegrationType, Repository, RepositoryId, Submission,
    SubmissionFile, SubmissionId,
};
use tokio::sync::Semaphore;

pub const SCRIPTED_RESOLVER: &str = "scripted";
pub const STATUS_REF: &str = "https://repository.example/deposits/42/status";

/// Transport that records what it was asked to send and answers with a
/// fixed response. An optional gate holds every send until released.
#[derive(Clone)]
pub struct RecordingTransport {
    response: TransportResponse,
    sent: Arc<Mutex<Vec<TransferContext>>>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingTransport {
    /// Acknowledges with a status reference and no terminal hint.
    pub fn polling() -> Self {
        Self::with_response(TransportResponse {
            status_code: 202,
            status_ref: Some(STATUS_REF.to_string()),
            terminal_hint: None,
        })
    }

    pub fn with_response(response: TransportResponse) -> Self {
        Self {
            response,
            sent: Arc::new(Mutex::new(Vec::new())),
            gate: None,
        }
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn sent(&self) -> Vec<TransferContext> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn open(&self, _options: &PackagerOptions) -> Result<Box<dyn TransportSession>> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl TransportSession for RecordingTransport {
    async fn send(
        &mut self,
        _package: &Package,
        context: &TransferContext,
    ) -> Result<TransportResponse> {
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await;
            drop(permit);
        }
        self.sent.lock().unwrap().push(*context);
        Ok(self.response.clone())
    }
}

/// Transport whose sessions open but never deliver.
#[derive(Clone, Default)]
pub struct FailingTransport {
    attempts: Arc<AtomicUsize>,
}

impl FailingTransport {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FailingTransport {
    async fn open(&self, _options: &PackagerOptions) -> Result<Box<dyn TransportSession>> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl TransportSession for FailingTransport {
    async fn send(
        &mut self,
        _package: &Package,
        context: &TransferContext,
    ) -> Result<TransportResponse> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(custodia_core::DepositError::Transport {
            repository: context.repository,
            message: "connection reset by peer".into(),
        })
    }
}

/// Resolver answering from a script; the last answer repeats once the
/// script runs out.
#[derive(Default)]
pub struct ScriptedResolver {
    script: Mutex<VecDeque<std::result::Result<NativeStatus, ResolveError>>>,
    last: Mutex<Option<std::result::Result<NativeStatus, ResolveError>>>,
    calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn answering(answers: &[&str]) -> Arc<Self> {
        let resolver = Self::default();
        {
            let mut script = resolver.script.lock().unwrap();
            for answer in answers {
                script.push_back(Ok(NativeStatus(answer.to_string())));
            }
        }
        Arc::new(resolver)
    }

    pub fn then_error(self: &Arc<Self>, error: ResolveError) -> Arc<Self> {
        self.script.lock().unwrap().push_back(Err(error));
        Arc::clone(self)
    }

    pub fn then_answer(self: &Arc<Self>, answer: &str) -> Arc<Self> {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(NativeStatus(answer.to_string())));
        Arc::clone(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusResolver for ScriptedResolver {
    async fn resolve(
        &self,
        status_ref: &str,
        _config: &RepositoryProcessingConfig,
    ) -> std::result::Result<NativeStatus, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(next) = next {
            *last = Some(next);
        }
        last.clone().unwrap_or_else(|| {
            Err(ResolveError::Unreachable {
                status_ref: status_ref.to_string(),
                message: "script is empty".into(),
            })
        })
    }
}

/// Processing configuration understood by [`ScriptedResolver`].
pub fn processing() -> RepositoryProcessingConfig {
    RepositoryProcessingConfig {
        resolver: Some(SCRIPTED_RESOLVER.into()),
        status_mapping: HashMap::from([
            ("processing".to_string(), DepositStatus::Submitted),
            ("published".to_string(), DepositStatus::Accepted),
            ("withdrawn".to_string(), DepositStatus::Rejected),
        ]),
        ..Default::default()
    }
}

pub fn config(repositories: &[&Repository]) -> DepositServicesConfig {
    let mut config = DepositServicesConfig::default();
    config.poll.interval_ms = 1_000;
    config.poll.max_wait_ms = 5_000;
    for repository in repositories {
        config
            .repositories
            .insert(repository.name.clone(), processing());
    }
    config
}

pub fn packager(transport: &RecordingTransport) -> Packager {
    Packager::new(
        "recording",
        Arc::new(JsonManifestAssembler),
        Arc::new(transport.clone()),
    )
}

pub fn seed_repository(
    store: &InMemoryResourceStore,
    name: &str,
    integration_type: IntegrationType,
) -> Repository {
    store
        .seed_resource(Repository::new(name, integration_type))
        .expect("seed repository")
}

pub fn seed_submission(
    store: &InMemoryResourceStore,
    repositories: &[&Repository],
    with_files: bool,
) -> Submission {
    let mut submission =
        Submission::submitted(repositories.iter().map(|r| r.id).collect::<Vec<RepositoryId>>())
            .with_title("Optimistic concurrency in scholarly deposit");
    if with_files {
        submission = submission.with_file(
            SubmissionFile::new("manuscript.pdf", "s3://bucket/manuscript.pdf", FileRole::Manuscript)
                .with_mime_type("application/pdf"),
        );
    }
    store.seed_resource(submission).expect("seed submission")
}

pub fn build_services(
    store: &InMemoryResourceStore,
    config: DepositServicesConfig,
    packagers: PackagerRegistry,
    resolver: Arc<ScriptedResolver>,
) -> Arc<DepositServices> {
    let mut resolvers = StatusResolverRegistry::new();
    resolvers.register(SCRIPTED_RESOLVER, resolver);
    Arc::new(
        DepositServices::new(config, Arc::new(store.clone()), packagers, resolvers)
            .expect("services"),
    )
}

pub async fn read_submission(store: &InMemoryResourceStore, id: SubmissionId) -> Submission {
    store.read(id.to_uuid()).await.expect("submission exists")
}

/// Polls `check` until it holds, failing the test after `limit`.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(limit, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

/// Assembler that never produces a package.
pub struct BrokenAssembler;

#[async_trait]
impl Assembler for BrokenAssembler {
    async fn assemble(
        &self,
        snapshot: &DepositSubmission,
        _options: &PackagerOptions,
    ) -> Result<Package> {
        Err(custodia_core::DepositError::Internal(format!(
            "cannot assemble submission {}",
            snapshot.submission
        )))
    }
}
