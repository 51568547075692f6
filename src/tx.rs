//! Explicit transaction scoping around units of work.
//!
//! A transaction here bounds read consistency for cursors opened inside it. It does
//! not cover the channel: records published before a rollback stay published.

use crate::error::SubmitError;
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxId(pub u64);

/// How a scope relates to a transaction that is already active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Join the active transaction, or begin one if none is active.
    #[default]
    Required,
    /// Always begin a fresh transaction; the outer one is suspended until it ends.
    RequiresNew,
}

pub trait TransactionManager: Send + Sync {
    fn begin(&self) -> Result<TxId>;
    fn commit(&self, tx: TxId) -> Result<()>;
    /// Best-effort; failures are the manager's to report.
    fn rollback(&self, tx: TxId);
}

/// Runs units of work inside transactions from an optional manager.
/// Without a manager every scope is a pass-through.
#[derive(Clone, Default)]
pub struct TxScope {
    manager: Option<Arc<dyn TransactionManager>>,
    active: Arc<Mutex<Vec<TxId>>>,
}

impl TxScope {
    pub fn new(manager: Option<Arc<dyn TransactionManager>>) -> Self {
        Self { manager, active: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Innermost active transaction, if any.
    pub fn current(&self) -> Option<TxId> {
        self.active.lock().last().copied()
    }

    /// Only a transaction begun by this call is committed or rolled back here;
    /// a joined one is left to its owner.
    pub fn run<T>(
        &self,
        propagation: Propagation,
        work: impl FnOnce() -> Result<T, SubmitError>,
    ) -> Result<T, SubmitError> {
        let Some(manager) = self.manager.as_ref() else {
            return work();
        };
        if propagation == Propagation::Required && self.current().is_some() {
            return work();
        }

        let tx = manager.begin().map_err(|source| SubmitError::Transaction { source })?;
        self.active.lock().push(tx);
        tracing::debug!(tx = tx.0, ?propagation, "transaction begun");

        let out = work();
        self.active.lock().retain(|t| *t != tx);

        match out {
            Ok(v) => {
                manager.commit(tx).map_err(|source| SubmitError::Transaction { source })?;
                tracing::debug!(tx = tx.0, "transaction committed");
                Ok(v)
            }
            Err(e) => {
                manager.rollback(tx);
                tracing::debug!(tx = tx.0, error = %e, "transaction rolled back");
                Err(e)
            }
        }
    }
}
