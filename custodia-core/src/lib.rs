//! # Custodia Core
//!
//! Coordination of scholarly deposits into external repositories.
//!
//! ## Overview
//!
//! Submissions are fanned out into one deposit per target repository. Each
//! deposit is transferred by a background task that then tracks the
//! repository's status for it, and every status change rolls up into the
//! submission's aggregate deposit status.
//!
//! All reads and writes of shared records go through a critical interaction:
//! read fresh, check a precondition, mutate and write conditioned on the
//! version read, then check a postcondition. Version conflicts restart the
//! sequence. No locks are held across records.
//!
//! ## Architecture
//!
//! - [`critical`]: the optimistic read/check/write engine
//! - [`store`]: the resource client contract and an in-memory store
//! - [`policy`]: terminal/intermediate classification of statuses
//! - [`resolver`]: remote status lookup and mapping
//! - [`transfer`]: packager, assembler and transport contracts
//! - [`dispatcher`]: bounded worker pool for deposit tasks
//! - [`deposit`]: the deposit task and deposit-status updates
//! - [`coordinator`]: submission fan-out
//! - [`aggregation`]: submission rollups
//! - [`services`]: trigger entry points
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use custodia_core::{
//!     config::DepositServicesConfig,
//!     resolver::StatusResolverRegistry,
//!     services::DepositServices,
//!     store::InMemoryResourceStore,
//!     transfer::PackagerRegistry,
//! };
//! use custodia_model::SubmissionId;
//!
//! async fn run(submission: SubmissionId) -> custodia_core::error::Result<()> {
//!     let services = DepositServices::new(
//!         DepositServicesConfig::default(),
//!         Arc::new(InMemoryResourceStore::default()),
//!         PackagerRegistry::new(),
//!         StatusResolverRegistry::with_http_default(),
//!     )?;
//!     let report = services.on_submission_ready(submission).await?;
//!     println!("dispatched {} deposits", report.dispatched.len());
//!     services.shutdown().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Submission rollups recomputed from deposits and repository copies
pub mod aggregation;

/// Runtime configuration
pub mod config;

/// Submission fan-out into deposits
pub mod coordinator;

/// Optimistic read, check, write, check interactions
pub mod critical;

/// Deposit tasks and deposit-status updates
pub mod deposit;

/// Bounded worker pool for background tasks
pub mod dispatcher;

/// Error types and classification
pub mod error;

/// Deposit status change notifications
pub mod events;

/// Injected status policies
pub mod policy;

/// Remote deposit status lookup
pub mod resolver;

/// Immutable submission snapshots handed to packagers
pub mod snapshot;

/// Trigger entry points
pub mod services;

/// Versioned resource storage
pub mod store;

/// Packaging and transport contracts
pub mod transfer;

pub use error::{DepositError, Result};
pub use services::{DepositServices, Trigger};
