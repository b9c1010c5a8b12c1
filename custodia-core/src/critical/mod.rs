//! Optimistic-concurrency read/check/write protocol over versioned resources.
//!
//! A critical interaction reads a resource fresh, checks a precondition,
//! runs a critical function that mutates and persists it with a write
//! conditioned on the version read, and finally checks a postcondition.
//! Version conflicts restart the whole sequence from a fresh read, up to a
//! bounded number of attempts.
//!
//! A failed postcondition does not roll anything back. The store has no
//! transaction spanning the write and the independent post-check, so the new
//! state stays persisted and the interaction reports failure.

mod outcome;

use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    store::{Resource, ResourceClient, ResourceClientExt},
};

pub use outcome::{CriticalOutcome, CriticalResult};

/// Future returned by a critical function: the persisted resource and a
/// derived result.
pub type CriticalFuture<R, T> = BoxFuture<'static, Result<(R, T)>>;

/// Attempts made before a version conflict is reported.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Runs read, precondition, write, postcondition sequences against a
/// resource store, retrying on version conflicts.
#[derive(Clone)]
pub struct CriticalInteraction {
    client: Arc<dyn ResourceClient>,
    max_attempts: u32,
}

impl fmt::Debug for CriticalInteraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalInteraction")
            .field("client", &"ResourceClient")
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl CriticalInteraction {
    /// Uses [`DEFAULT_MAX_ATTEMPTS`].
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self {
            client,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Clamped to at least one attempt.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Store the interactions run against.
    pub fn client(&self) -> Arc<dyn ResourceClient> {
        Arc::clone(&self.client)
    }

    /// Attempts per interaction.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs one critical interaction against the resource `id` of type `R`.
    ///
    /// The critical function is invoked at most once per attempt and must
    /// perform exactly one conditional write of the resource it receives.
    pub async fn perform_critical<R, T, P, C, Q>(
        &self,
        id: impl Into<Uuid>,
        precondition: P,
        critical: C,
        postcondition: Q,
    ) -> CriticalResult<R, T>
    where
        R: Resource,
        P: Fn(&R) -> bool,
        C: Fn(R) -> CriticalFuture<R, T>,
        Q: FnOnce(&R, &T) -> Result<()>,
    {
        let id = id.into();
        let kind = R::KIND;
        let mut last_conflict = None;

        for attempt in 1..=self.max_attempts {
            let resource: R = match self.client.read(id).await {
                Ok(resource) => resource,
                Err(err) => {
                    warn!(%kind, %id, attempt, error = %err, "critical read failed");
                    return CriticalResult::new(
                        None,
                        None,
                        CriticalOutcome::CriticalFailed(err),
                    );
                }
            };

            if !precondition(&resource) {
                debug!(
                    %kind,
                    %id,
                    version = resource.version(),
                    "precondition not met; skipping critical update"
                );
                return CriticalResult::new(
                    Some(resource),
                    None,
                    CriticalOutcome::PreconditionFailed,
                );
            }

            let read = resource.clone();
            match critical(resource).await {
                Ok((persisted, result)) => {
                    let outcome = match postcondition(&persisted, &result) {
                        Ok(()) => CriticalOutcome::Success,
                        Err(err) => {
                            warn!(
                                %kind,
                                %id,
                                version = persisted.version(),
                                error = %err,
                                "postcondition failed after a committed write; resource left in its new state"
                            );
                            CriticalOutcome::PostconditionFailed(err)
                        }
                    };
                    return CriticalResult::new(Some(persisted), Some(result), outcome);
                }
                Err(err) if err.is_version_conflict() => {
                    debug!(
                        %kind,
                        %id,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "version conflict; retrying from a fresh read"
                    );
                    last_conflict = Some((read, err));
                }
                Err(err) => {
                    warn!(%kind, %id, attempt, error = %err, "critical function failed");
                    return CriticalResult::new(
                        Some(read),
                        None,
                        CriticalOutcome::CriticalFailed(err),
                    );
                }
            }
        }

        match last_conflict {
            Some((read, error)) => {
                warn!(
                    %kind,
                    %id,
                    attempts = self.max_attempts,
                    "giving up after repeated version conflicts"
                );
                CriticalResult::new(
                    Some(read),
                    None,
                    CriticalOutcome::ConflictExhausted {
                        attempts: self.max_attempts,
                        error,
                    },
                )
            }
            None => CriticalResult::new(
                None,
                None,
                CriticalOutcome::CriticalFailed(crate::error::DepositError::Internal(
                    "critical interaction ran no attempts".into(),
                )),
            ),
        }
    }
}

/// Builds a critical function from a synchronous mutation: the mutation is
/// applied to the freshly read resource, which is then written back with a
/// version-conditioned update.
pub fn persist_with<R, T, F>(
    client: Arc<dyn ResourceClient>,
    mutate: F,
) -> impl Fn(R) -> CriticalFuture<R, T>
where
    R: Resource,
    T: Send + 'static,
    F: Fn(&mut R) -> Result<T>,
{
    move |mut resource: R| -> CriticalFuture<R, T> {
        let client = Arc::clone(&client);
        let mutated = mutate(&mut resource);
        Box::pin(async move {
            let result = mutated?;
            let persisted = client.update_resource(resource).await?;
            Ok((persisted, result))
        })
    }
}
