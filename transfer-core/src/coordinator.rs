//! Transaction coordinator
//!
//! Runs a closure inside one atomic unit of work: commit on success,
//! rollback on failure, and never lose either error when rollback itself
//! fails. The unit handle is released on every path.

use crate::{
    error::{Error, Result},
    store::{RowStore, UnitOfWork},
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound used when a timeout does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Deadline `timeout` from now, clamped when the timeout is too large to add
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Wraps units of work over a shared row store
#[derive(Clone)]
pub struct TxCoordinator {
    store: Arc<dyn RowStore>,
}

impl std::fmt::Debug for TxCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxCoordinator").finish_non_exhaustive()
    }
}

impl TxCoordinator {
    /// Create a coordinator over `store`
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    /// Underlying store, for committed reads
    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    /// Run `f` atomically, bounded by `timeout` from now
    pub fn run_atomic_within<T, F>(&self, timeout: Duration, f: F) -> Result<T>
    where
        F: FnOnce(&mut (dyn UnitOfWork + '_)) -> Result<T>,
    {
        self.run_atomic(deadline_after(timeout), f)
    }

    /// Run `f` atomically; every store call inside is bounded by `deadline`
    pub fn run_atomic<T, F>(&self, deadline: Instant, f: F) -> Result<T>
    where
        F: FnOnce(&mut (dyn UnitOfWork + '_)) -> Result<T>,
    {
        let mut unit = self.store.begin(deadline)?;

        match f(unit.as_mut()) {
            Ok(value) => {
                unit.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = unit.rollback() {
                    tracing::error!(
                        error = %err,
                        rollback_error = %rollback,
                        "Rollback failed, unit state unknown"
                    );
                    return Err(Error::RollbackFailed {
                        source: Box::new(err),
                        rollback: Box::new(rollback),
                    });
                }

                tracing::warn!(error = %err, kind = ?err.kind(), "Unit of work rolled back");
                Err(err)
            }
        }
    }
}
