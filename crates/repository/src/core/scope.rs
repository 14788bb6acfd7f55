//! Repository scopes.
//!
//! A [`RepositoryScope`] is one logical unit of work, typically one inbound
//! request. It opens a backend session per repository name on first use,
//! owns the unit of work of each name, and releases everything when closed or
//! dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RepositoryError, RepositoryResult, UnitOfWorkError};
use crate::model::AggregateRoot;
use crate::registry::RepositoryRegistry;

use super::backend::BackendSession;
use super::operation::CommitReport;
use super::repository::Repository;
use super::unit_of_work::{UnitOfWork, UnitOfWorkState};

/// State shared by a scope and the sessions it opened.
struct ScopeState {
    id: Uuid,
    registry: Arc<RepositoryRegistry>,
    sessions: Mutex<BTreeMap<String, Arc<ScopedSession>>>,
    closed: Arc<AtomicBool>,
}

impl ScopeState {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> RepositoryResult<()> {
        if self.is_closed() {
            return Err(UnitOfWorkError::ScopeClosed.into());
        }
        Ok(())
    }

    /// Returns the scoped session of `name`, opening it on first use.
    fn scoped_session(self: &Arc<Self>, name: &str) -> RepositoryResult<Arc<ScopedSession>> {
        self.ensure_open()?;
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(name) {
            return Ok(Arc::clone(existing));
        }

        let options = self.registry.options(name)?;
        let provider = self.registry.provider(name)?;
        let session = provider.open_session(options)?;
        let unit_of_work = UnitOfWork::new(
            options.name.as_str(),
            options.unit_of_work_enabled,
            Arc::clone(&session),
            Arc::clone(self.registry.validators()),
            Arc::clone(&self.closed),
        );
        debug!(
            scope = %self.id,
            name = name,
            backend = session.backend_name(),
            unit_of_work_enabled = options.unit_of_work_enabled,
            "Opened backend session"
        );

        let scoped = Arc::new(ScopedSession {
            name: options.name.to_string(),
            session,
            unit_of_work,
            closed: Arc::clone(&self.closed),
            scope: Arc::downgrade(self),
        });
        sessions.insert(name.to_string(), Arc::clone(&scoped));
        Ok(scoped)
    }
}

/// The session and unit of work of one repository name inside a scope.
pub(crate) struct ScopedSession {
    name: String,
    session: Arc<dyn BackendSession>,
    unit_of_work: UnitOfWork,
    closed: Arc<AtomicBool>,
    scope: Weak<ScopeState>,
}

impl fmt::Debug for ScopedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedSession")
            .field("name", &self.name)
            .field("session", &self.session)
            .field("unit_of_work", &self.unit_of_work)
            .finish_non_exhaustive()
    }
}

impl ScopedSession {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn session(&self) -> &dyn BackendSession {
        self.session.as_ref()
    }

    pub(crate) fn unit_of_work(&self) -> &UnitOfWork {
        &self.unit_of_work
    }

    /// Fails once the owning scope has been closed.
    pub(crate) fn ensure_open(&self) -> RepositoryResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(UnitOfWorkError::ScopeClosed.into());
        }
        Ok(())
    }

    /// Returns the session serving `aggregate_type` in the same scope.
    pub(crate) fn resolve(&self, aggregate_type: &str) -> RepositoryResult<Arc<ScopedSession>> {
        self.ensure_open()?;
        let scope = self
            .scope
            .upgrade()
            .ok_or(RepositoryError::UnitOfWork(UnitOfWorkError::ScopeClosed))?;
        let name = scope.registry.repository_name_for(aggregate_type)?.to_string();
        scope.scoped_session(&name)
    }
}

/// One logical operation scope over a [`RepositoryRegistry`].
///
/// Closing the scope (explicitly or by dropping it) discards staged work that
/// was never committed. Repositories and units of work obtained from a closed
/// scope fail with an invalid-state error.
pub struct RepositoryScope {
    state: Arc<ScopeState>,
}

impl fmt::Debug for RepositoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.state.sessions.lock().keys().cloned().collect();
        f.debug_struct("RepositoryScope")
            .field("id", &self.state.id)
            .field("sessions", &names)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RepositoryScope {
    pub(crate) fn new(registry: Arc<RepositoryRegistry>) -> Self {
        let id = Uuid::new_v4();
        debug!(scope = %id, "Opened repository scope");
        Self {
            state: Arc::new(ScopeState {
                id,
                registry,
                sessions: Mutex::new(BTreeMap::new()),
                closed: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Unique id of this scope.
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// The registry this scope resolves repositories from.
    pub fn registry(&self) -> &Arc<RepositoryRegistry> {
        &self.state.registry
    }

    /// Returns true once the scope has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Returns the repository registered for aggregate type `A`.
    ///
    /// Aggregates without an explicit mapping resolve to the default
    /// repository name.
    pub fn repository<A: AggregateRoot>(&self) -> RepositoryResult<Repository<A>> {
        let name = self
            .state
            .registry
            .repository_name_for(A::AGGREGATE_TYPE)?
            .to_string();
        self.repository_named(&name)
    }

    /// Returns a repository for `A` under an explicit repository name.
    pub fn repository_named<A: AggregateRoot>(&self, name: &str) -> RepositoryResult<Repository<A>> {
        Ok(Repository::new(self.state.scoped_session(name)?))
    }

    /// Returns the unit of work of repository `name` in this scope.
    pub fn unit_of_work(&self, name: &str) -> RepositoryResult<UnitOfWork> {
        Ok(self.state.scoped_session(name)?.unit_of_work().clone())
    }

    /// Commits every unit of work in this scope that has staged operations.
    ///
    /// Units of work are committed one after another in name order. Each one
    /// is atomic on its own backend when that backend supports transactions;
    /// the combined report is only atomic when a single unit of work flushed.
    ///
    /// A failure after another unit of work was already committed is reported
    /// as [`UnitOfWorkError::PartialFailure`], counting operations across the
    /// whole scope.
    pub async fn commit(&self, cancel: &CancellationToken) -> RepositoryResult<CommitReport> {
        self.state.ensure_open()?;
        let pending: Vec<Arc<ScopedSession>> = self
            .state
            .sessions
            .lock()
            .values()
            .filter(|scoped| scoped.unit_of_work().state() == UnitOfWorkState::Staged)
            .cloned()
            .collect();
        let total: usize = pending
            .iter()
            .map(|scoped| scoped.unit_of_work().staged_len())
            .sum();

        let mut combined = CommitReport {
            applied: Vec::new(),
            atomic: true,
        };
        let mut flushed = 0usize;
        for scoped in pending {
            let report = match scoped.unit_of_work().commit(cancel).await {
                Ok(report) => report,
                Err(err) if flushed == 0 => return Err(err),
                Err(err) => {
                    warn!(
                        scope = %self.state.id,
                        name = %scoped.name(),
                        committed = flushed,
                        error = %err,
                        "Scope commit failed after other units of work were committed"
                    );
                    return Err(partial_failure(combined.applied.len(), total, err));
                }
            };
            flushed += 1;
            combined.atomic &= report.atomic;
            combined.applied.extend(report.applied);
        }
        if flushed > 1 {
            combined.atomic = false;
        }
        Ok(combined)
    }

    /// Closes the scope, discarding staged work that was never committed.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let sessions = std::mem::take(&mut *self.state.sessions.lock());
        for (name, scoped) in sessions {
            let unit_of_work = scoped.unit_of_work();
            let staged = unit_of_work.staged_len();
            if staged > 0 {
                warn!(
                    scope = %self.state.id,
                    name = %name,
                    staged = staged,
                    "Scope closed with uncommitted operations; discarding"
                );
            }
            if unit_of_work.state().is_open() {
                let _ = unit_of_work.discard();
            }
        }
        debug!(scope = %self.state.id, "Closed repository scope");
    }
}

impl Drop for RepositoryScope {
    fn drop(&mut self) {
        self.close();
    }
}

/// Folds a failure of a later unit of work into a scope-wide partial failure.
fn partial_failure(committed: usize, total: usize, err: RepositoryError) -> RepositoryError {
    let (applied, source) = match err {
        RepositoryError::UnitOfWork(UnitOfWorkError::PartialFailure {
            applied, source, ..
        }) => (committed + applied, source),
        other => (committed, Box::new(other)),
    };
    UnitOfWorkError::PartialFailure {
        applied,
        total,
        source,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceError;

    fn not_found() -> RepositoryError {
        ResourceError::NotFound {
            aggregate_type: "Person".to_string(),
            key: "1".to_string(),
        }
        .into()
    }

    #[test]
    fn test_partial_failure_counts_committed_units() {
        match partial_failure(2, 5, not_found()) {
            RepositoryError::UnitOfWork(UnitOfWorkError::PartialFailure {
                applied,
                total,
                source,
            }) => {
                assert_eq!((applied, total), (2, 5));
                assert!(source.is_not_found());
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_partial_failure_flattens_nested_report() {
        let nested: RepositoryError = UnitOfWorkError::PartialFailure {
            applied: 1,
            total: 3,
            source: Box::new(not_found()),
        }
        .into();
        match partial_failure(2, 5, nested) {
            RepositoryError::UnitOfWork(UnitOfWorkError::PartialFailure {
                applied,
                total,
                source,
            }) => {
                assert_eq!((applied, total), (3, 5));
                assert!(source.is_not_found());
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
