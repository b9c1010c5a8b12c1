use async_trait::async_trait;
use uuid::Uuid;

use super::record::{Resource, ResourceFilter, ResourceKind, ResourceRecord};
use crate::error::Result;

/// CRUD and query access to the remote, versioned system of record.
///
/// `update` is conditional: it must fail with
/// [`crate::error::DepositError::VersionConflict`] when the stored version no
/// longer matches the version carried by the record.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Reads one record. Missing records are `NotFound`.
    async fn get(&self, kind: ResourceKind, id: Uuid) -> Result<ResourceRecord>;

    /// Stores a new record at version 1.
    async fn create(&self, record: ResourceRecord) -> Result<ResourceRecord>;

    /// Writes a record read at its current version and bumps the version.
    async fn update(&self, record: ResourceRecord) -> Result<ResourceRecord>;

    /// Every record of `kind` selected by `filter`.
    async fn query(
        &self,
        kind: ResourceKind,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceRecord>>;
}

/// Typed helpers layered over [`ResourceClient`].
#[async_trait]
pub trait ResourceClientExt: ResourceClient {
    /// Typed [`ResourceClient::get`].
    async fn read<R: Resource>(&self, id: Uuid) -> Result<R> {
        R::from_record(self.get(R::KIND, id).await?)
    }

    /// Typed [`ResourceClient::create`].
    async fn create_resource<R: Resource>(&self, resource: R) -> Result<R> {
        R::from_record(self.create(resource.into_record()).await?)
    }

    /// Typed [`ResourceClient::update`].
    async fn update_resource<R: Resource>(&self, resource: R) -> Result<R> {
        R::from_record(self.update(resource.into_record()).await?)
    }

    /// Typed [`ResourceClient::query`].
    async fn find<R: Resource>(&self, filter: &ResourceFilter) -> Result<Vec<R>> {
        self.query(R::KIND, filter)
            .await?
            .into_iter()
            .map(R::from_record)
            .collect()
    }
}

impl<C: ResourceClient + ?Sized> ResourceClientExt for C {}
