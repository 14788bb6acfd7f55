//! Unit of work: controls when reconciled changes become durable.
//!
//! ```text
//! Idle ──stage──▶ Staged ──commit──▶ Committed
//!   │               │
//!   └──discard──────┴──discard / failed commit──▶ Discarded
//! ```
//!
//! With the unit of work enabled, mutations are staged as an ordered list of
//! [`StagedOperation`]s and replayed by [`UnitOfWork::commit`]. With it
//! disabled, the repository commits every call implicitly and the unit of
//! work returns to `Idle` afterwards.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RepositoryError, RepositoryResult, UnitOfWorkError};

use super::backend::{BackendCapability, BackendSession};
use super::operation::{CommitReport, StagedOperation};
use super::validation::ValidatorSet;

/// Lifecycle state of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitOfWorkState {
    /// No pending operations.
    Idle,
    /// One or more operations queued, not yet durable.
    Staged,
    /// Flushed to the backend.
    Committed,
    /// Ended without commit; staged operations never became durable.
    Discarded,
}

impl UnitOfWorkState {
    /// Returns true if the unit of work still accepts operations.
    pub fn is_open(&self) -> bool {
        matches!(self, UnitOfWorkState::Idle | UnitOfWorkState::Staged)
    }
}

impl fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOfWorkState::Idle => write!(f, "idle"),
            UnitOfWorkState::Staged => write!(f, "staged"),
            UnitOfWorkState::Committed => write!(f, "committed"),
            UnitOfWorkState::Discarded => write!(f, "discarded"),
        }
    }
}

#[derive(Debug)]
struct Ledger {
    state: UnitOfWorkState,
    staged: Vec<StagedOperation>,
}

struct Inner {
    id: Uuid,
    name: String,
    enabled: bool,
    started_at: DateTime<Utc>,
    session: Arc<dyn BackendSession>,
    validators: Arc<ValidatorSet>,
    scope_closed: Arc<AtomicBool>,
    ledger: Mutex<Ledger>,
}

/// A named, scoped commit coordinator.
///
/// Cloning yields another handle to the same unit of work. A unit of work is
/// not meant to be driven from several tasks at once.
#[derive(Clone)]
pub struct UnitOfWork {
    inner: Arc<Inner>,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ledger = self.inner.ledger.lock();
        f.debug_struct("UnitOfWork")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("enabled", &self.inner.enabled)
            .field("state", &ledger.state)
            .field("staged", &ledger.staged.len())
            .finish()
    }
}

impl UnitOfWork {
    pub(crate) fn new(
        name: impl Into<String>,
        enabled: bool,
        session: Arc<dyn BackendSession>,
        validators: Arc<ValidatorSet>,
        scope_closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                name: name.into(),
                enabled,
                started_at: Utc::now(),
                session,
                validators,
                scope_closed,
                ledger: Mutex::new(Ledger {
                    state: UnitOfWorkState::Idle,
                    staged: Vec::new(),
                }),
            }),
        }
    }

    /// Unique id of this unit of work.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The repository name this unit of work belongs to.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether mutations are batched until an explicit commit.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// When this unit of work was opened.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> UnitOfWorkState {
        self.inner.ledger.lock().state
    }

    /// Number of staged operations.
    pub fn staged_len(&self) -> usize {
        self.inner.ledger.lock().staged.len()
    }

    /// A copy of the staged operations, in replay order.
    pub fn staged_operations(&self) -> Vec<StagedOperation> {
        self.inner.ledger.lock().staged.clone()
    }

    /// The backend session this unit of work flushes to.
    pub(crate) fn session(&self) -> &dyn BackendSession {
        self.inner.session.as_ref()
    }

    /// Fails unless operations may still be staged or committed.
    pub(crate) fn ensure_open(&self) -> RepositoryResult<()> {
        if self.inner.scope_closed.load(Ordering::Acquire) {
            return Err(UnitOfWorkError::ScopeClosed.into());
        }
        let state = self.state();
        if !state.is_open() {
            return Err(self.invalid_state(state));
        }
        Ok(())
    }

    fn invalid_state(&self, state: UnitOfWorkState) -> RepositoryError {
        UnitOfWorkError::InvalidState {
            name: self.inner.name.clone(),
            state: state.to_string(),
        }
        .into()
    }

    /// Queues a reconciled operation.
    pub(crate) fn stage(&self, operation: StagedOperation) -> RepositoryResult<()> {
        if self.inner.scope_closed.load(Ordering::Acquire) {
            return Err(UnitOfWorkError::ScopeClosed.into());
        }
        let mut ledger = self.inner.ledger.lock();
        if !ledger.state.is_open() {
            return Err(self.invalid_state(ledger.state));
        }
        debug!(
            unit_of_work = %self.inner.id,
            name = %self.inner.name,
            operation = %operation,
            "Staged operation"
        );
        ledger.staged.push(operation);
        ledger.state = UnitOfWorkState::Staged;
        Ok(())
    }

    /// Flushes every staged operation and moves to `Committed`.
    ///
    /// Staged adds and updates are validated first. On backends with native
    /// transactions the batch is applied atomically; otherwise operations are
    /// applied in order, the first failure aborts the rest, and operations
    /// already applied are reported through
    /// [`UnitOfWorkError::PartialFailure`]. Any failure after the flush starts
    /// moves the unit of work to `Discarded`.
    ///
    /// Cancellation observed before the flush leaves the staged operations in
    /// place.
    pub async fn commit(&self, cancel: &CancellationToken) -> RepositoryResult<CommitReport> {
        self.flush(cancel, UnitOfWorkState::Committed, UnitOfWorkState::Discarded)
            .await
    }

    /// Commits the operations of one call when batching is disabled.
    pub(crate) async fn commit_implicit(
        &self,
        cancel: &CancellationToken,
    ) -> RepositoryResult<CommitReport> {
        let result = self
            .flush(cancel, UnitOfWorkState::Idle, UnitOfWorkState::Idle)
            .await;
        if result.is_err() {
            self.rollback_pending();
        }
        result
    }

    async fn flush(
        &self,
        cancel: &CancellationToken,
        on_success: UnitOfWorkState,
        on_failure: UnitOfWorkState,
    ) -> RepositoryResult<CommitReport> {
        self.ensure_open()?;
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }

        let operations = std::mem::take(&mut self.inner.ledger.lock().staged);
        let atomic = self.inner.session.supports(BackendCapability::Transactions);

        if operations.is_empty() {
            self.inner.ledger.lock().state = on_success;
            return Ok(CommitReport {
                applied: Vec::new(),
                atomic,
            });
        }

        if let Err(err) = self.inner.validators.validate(&operations) {
            debug!(
                unit_of_work = %self.inner.id,
                error = %err,
                "Validation rejected staged operations"
            );
            self.fail(on_failure);
            return Err(err);
        }

        match self.inner.session.commit(&operations, cancel).await {
            Ok(report) => {
                self.inner.session.tracker().accept_changes(&operations);
                self.inner.ledger.lock().state = on_success;
                info!(
                    unit_of_work = %self.inner.id,
                    name = %self.inner.name,
                    backend = self.inner.session.backend_name(),
                    operations = report.len(),
                    atomic = report.atomic,
                    "Committed unit of work"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(
                    unit_of_work = %self.inner.id,
                    name = %self.inner.name,
                    error = %err,
                    "Commit failed"
                );
                self.fail(on_failure);
                Err(err)
            }
        }
    }

    fn fail(&self, state: UnitOfWorkState) {
        self.inner.session.tracker().reject_changes();
        let mut ledger = self.inner.ledger.lock();
        ledger.staged.clear();
        ledger.state = state;
    }

    /// Drops the operations of a failed call when batching is disabled.
    pub(crate) fn rollback_pending(&self) {
        self.fail(UnitOfWorkState::Idle);
    }

    /// Ends the unit of work without committing.
    ///
    /// Staged operations never become durable. Discarding twice is allowed;
    /// discarding a committed unit of work is an invalid state.
    pub fn discard(&self) -> RepositoryResult<()> {
        let state = self.state();
        match state {
            UnitOfWorkState::Discarded => Ok(()),
            UnitOfWorkState::Committed => Err(self.invalid_state(state)),
            UnitOfWorkState::Idle | UnitOfWorkState::Staged => {
                let dropped = self.staged_len();
                if dropped > 0 {
                    debug!(
                        unit_of_work = %self.inner.id,
                        name = %self.inner.name,
                        dropped = dropped,
                        "Discarding staged operations"
                    );
                }
                self.fail(UnitOfWorkState::Discarded);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display_and_openness() {
        assert_eq!(UnitOfWorkState::Staged.to_string(), "staged");
        assert!(UnitOfWorkState::Idle.is_open());
        assert!(UnitOfWorkState::Staged.is_open());
        assert!(!UnitOfWorkState::Committed.is_open());
        assert!(!UnitOfWorkState::Discarded.is_open());
    }
}
