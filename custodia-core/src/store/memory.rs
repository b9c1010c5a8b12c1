//! In-memory resource store with per-record optimistic versioning.
//!
//! Used by tests and local wiring. Every operation is recorded so tests can
//! assert on the exact sequence of reads and writes.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::trace;
use uuid::Uuid;

use super::{
    client::ResourceClient,
    record::{Resource, ResourceFilter, ResourceKind, ResourceRecord},
};
use crate::error::{DepositError, Result};

/// Record of a store operation for test assertions.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum StoreOp {
    Get { kind: ResourceKind, id: Uuid },
    Create { kind: ResourceKind, id: Uuid },
    /// Successful update; `version` is the version written.
    Update { kind: ResourceKind, id: Uuid, version: u64 },
    /// Rejected update.
    Conflict { kind: ResourceKind, id: Uuid, expected: u64, actual: u64 },
    Query { kind: ResourceKind },
}

/// A [`ResourceClient`](super::ResourceClient) that keeps records in memory
/// and enforces version checks on update.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResourceStore {
    records: Arc<DashMap<(ResourceKind, Uuid), ResourceRecord>>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    injected_conflicts: Arc<DashMap<(ResourceKind, Uuid), Arc<AtomicU32>>>,
}

impl InMemoryResourceStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations
            .lock()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }

    /// Forgets recorded operations.
    pub fn clear_operations(&self) {
        if let Ok(mut ops) = self.operations.lock() {
            ops.clear();
        }
    }

    /// Number of successful updates applied to the given record.
    pub fn update_count(&self, kind: ResourceKind, id: Uuid) -> usize {
        self.operations()
            .iter()
            .filter(|op| {
                matches!(op, StoreOp::Update { kind: k, id: i, .. } if *k == kind && *i == id)
            })
            .count()
    }

    /// Makes the next `count` updates of the record fail with a version
    /// conflict, as if a concurrent writer had won each race.
    pub fn inject_conflicts(&self, kind: ResourceKind, id: Uuid, count: u32) {
        self.injected_conflicts
            .insert((kind, id), Arc::new(AtomicU32::new(count)));
    }

    /// Current stored version of a record.
    pub fn version(&self, kind: ResourceKind, id: Uuid) -> Option<u64> {
        self.records.get(&(kind, id)).map(|record| record.version())
    }

    /// Seeds a record without going through `create`, keeping its version
    /// (or 1 when unset).
    pub fn seed(&self, mut record: ResourceRecord) -> ResourceRecord {
        if record.version() == 0 {
            record.set_version(1);
        }
        self.records
            .insert((record.kind(), record.id()), record.clone());
        record
    }

    /// Typed form of [`Self::seed`].
    pub fn seed_resource<R: Resource>(&self, resource: R) -> Result<R> {
        R::from_record(self.seed(resource.into_record()))
    }

    /// Number of stored records of every kind.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record(&self, op: StoreOp) {
        trace!(?op, "store operation");
        if let Ok(mut ops) = self.operations.lock() {
            ops.push(op);
        }
    }

    fn take_injected_conflict(&self, kind: ResourceKind, id: Uuid) -> bool {
        let Some(counter) = self
            .injected_conflicts
            .get(&(kind, id))
            .map(|entry| Arc::clone(entry.value()))
        else {
            return false;
        };
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl ResourceClient for InMemoryResourceStore {
    async fn get(&self, kind: ResourceKind, id: Uuid) -> Result<ResourceRecord> {
        self.record(StoreOp::Get { kind, id });
        self.records
            .get(&(kind, id))
            .map(|record| record.value().clone())
            .ok_or(DepositError::NotFound { kind, id })
    }

    async fn create(&self, mut record: ResourceRecord) -> Result<ResourceRecord> {
        let kind = record.kind();
        let id = record.id();
        match self.records.entry((kind, id)) {
            Entry::Occupied(_) => Err(DepositError::Store(format!(
                "{kind} {id} already exists"
            ))),
            Entry::Vacant(slot) => {
                record.set_version(1);
                slot.insert(record.clone());
                self.record(StoreOp::Create { kind, id });
                Ok(record)
            }
        }
    }

    async fn update(&self, mut record: ResourceRecord) -> Result<ResourceRecord> {
        let kind = record.kind();
        let id = record.id();
        let expected = record.version();

        if self.take_injected_conflict(kind, id) {
            self.record(StoreOp::Conflict {
                kind,
                id,
                expected,
                actual: expected + 1,
            });
            return Err(DepositError::VersionConflict {
                kind,
                id,
                expected,
                actual: expected + 1,
            });
        }

        let mut stored = self
            .records
            .get_mut(&(kind, id))
            .ok_or(DepositError::NotFound { kind, id })?;
        let actual = stored.version();
        if actual != expected {
            drop(stored);
            self.record(StoreOp::Conflict {
                kind,
                id,
                expected,
                actual,
            });
            return Err(DepositError::VersionConflict {
                kind,
                id,
                expected,
                actual,
            });
        }

        record.set_version(actual + 1);
        *stored = record.clone();
        drop(stored);
        self.record(StoreOp::Update {
            kind,
            id,
            version: actual + 1,
        });
        Ok(record)
    }

    async fn query(
        &self,
        kind: ResourceKind,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceRecord>> {
        self.record(StoreOp::Query { kind });
        let mut matches: Vec<ResourceRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == kind && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        // UUIDv7 ids sort by creation time.
        matches.sort_by_key(|record| record.id());
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ResourceClientExt, record::Resource};
    use custodia_model::{Deposit, RepositoryId, SubmissionId};

    #[tokio::test]
    async fn stale_update_is_rejected_with_conflict() {
        let store = InMemoryResourceStore::new();
        let deposit = store
            .create_resource(Deposit::new(SubmissionId::new(), RepositoryId::new()))
            .await
            .expect("create");

        let mut first = deposit.clone();
        first.deposit_status_ref = Some("a".into());
        let written = store.update_resource(first).await.expect("first write");
        assert_eq!(written.version, 2);

        let mut stale = deposit;
        stale.deposit_status_ref = Some("b".into());
        let err = store.update_resource(stale).await.unwrap_err();
        assert!(err.is_version_conflict(), "got {err}");

        let current: Deposit = store.read(written.resource_id()).await.expect("read");
        assert_eq!(current.deposit_status_ref.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let store = InMemoryResourceStore::new();
        let deposit = store
            .create_resource(Deposit::new(SubmissionId::new(), RepositoryId::new()))
            .await
            .expect("create");
        store.inject_conflicts(ResourceKind::Deposit, deposit.resource_id(), 1);

        assert!(store.update_resource(deposit.clone()).await.is_err());
        assert!(store.update_resource(deposit).await.is_ok());
    }

    #[tokio::test]
    async fn query_filters_by_kind_and_predicate() {
        let store = InMemoryResourceStore::new();
        let submission = SubmissionId::new();
        for _ in 0..2 {
            store
                .create_resource(Deposit::new(submission, RepositoryId::new()))
                .await
                .expect("create");
        }
        store
            .create_resource(Deposit::new(SubmissionId::new(), RepositoryId::new()))
            .await
            .expect("create other");

        let deposits: Vec<Deposit> = store
            .find(&ResourceFilter::DepositsOfSubmission(submission))
            .await
            .expect("query");
        assert_eq!(deposits.len(), 2);
    }
}
