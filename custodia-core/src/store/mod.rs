//! Contract with the remote, versioned system of record.

/// Asynchronous store contract.
pub mod client;
/// Versioned in-memory store.
pub mod memory;
/// Records, kinds and query filters.
pub mod record;

pub use client::{ResourceClient, ResourceClientExt};
pub use memory::{InMemoryResourceStore, StoreOp};
pub use record::{Resource, ResourceFilter, ResourceKind, ResourceRecord};
