//! Transaction contexts and cancellation.
//!
//! A [`TransactionContext`] lives across one or more queries. It hands out
//! per-DBO sub-transactions lazily on first access, holds a shared read lock
//! on the catalogue to block close-during-use, and carries the cancellation
//! token that operators observe between records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::{Catalog, Entity};
use crate::error::{QuiverError, Result};
use crate::types::Name;

/// Transaction id type.
pub type TransactionId = u64;

/// The kind of transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    ReadOnly,
    ReadWrite,
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
}

/// Lock mode requested on a DBO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A cancellation token shared between a transaction and its executors.
///
/// Operators observe the token between records; a tripped token surfaces as
/// [`QuiverError::Cancelled`], closes open cursors and rolls the transaction
/// back.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return an error if the token has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(QuiverError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Hands out transaction contexts with monotonically increasing ids.
pub struct TransactionManager {
    next_id: AtomicU64,
    catalog: Arc<dyn Catalog>,
}

impl TransactionManager {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            catalog,
        }
    }

    /// Begin a new transaction.
    pub fn begin(&self, tx_type: TransactionType) -> Arc<TransactionContext> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Arc::new(TransactionContext {
            id,
            tx_type,
            catalog: self.catalog.clone(),
            status: Mutex::new(TransactionStatus::Active),
            sub_transactions: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            token: CancellationToken::new(),
        })
    }
}

/// The execution-side view of one transaction.
pub struct TransactionContext {
    id: TransactionId,
    tx_type: TransactionType,
    catalog: Arc<dyn Catalog>,
    status: Mutex<TransactionStatus>,
    /// Per-DBO sub-transactions, created lazily on first access.
    sub_transactions: Mutex<HashMap<Name, Arc<dyn Entity>>>,
    locks: Mutex<HashMap<Name, LockMode>>,
    token: CancellationToken,
}

impl TransactionContext {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn tx_type(&self) -> TransactionType {
        self.tx_type
    }

    pub fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    /// The cancellation token of this transaction.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Obtain the sub-transaction for a DBO, creating it on first access.
    ///
    /// Access implies a shared lock on the DBO, blocking close-during-use.
    pub fn get_tx(&self, name: &Name) -> Result<Arc<dyn Entity>> {
        self.ensure_active()?;
        let mut subs = self.sub_transactions.lock();
        if let Some(entity) = subs.get(name) {
            return Ok(entity.clone());
        }
        let entity = self.catalog.entity(name)?;
        self.request_lock(name, LockMode::Shared)?;
        subs.insert(name.clone(), entity.clone());
        Ok(entity)
    }

    /// Request a lock on a DBO.
    ///
    /// Write actions escalate to an exclusive lock; a read-only transaction
    /// cannot hold exclusive locks.
    pub fn request_lock(&self, name: &Name, mode: LockMode) -> Result<()> {
        self.ensure_active()?;
        if mode == LockMode::Exclusive && self.tx_type == TransactionType::ReadOnly {
            return Err(QuiverError::transaction(format!(
                "read-only transaction {} cannot lock {name} exclusively",
                self.id
            )));
        }
        let mut locks = self.locks.lock();
        match locks.get(name) {
            Some(LockMode::Exclusive) => {}
            _ => {
                locks.insert(name.clone(), mode);
            }
        }
        Ok(())
    }

    /// Commit the transaction, closing all sub-transactions.
    pub fn commit(&self) -> Result<()> {
        self.finish(TransactionStatus::Committed)
    }

    /// Roll the transaction back, closing all sub-transactions.
    pub fn rollback(&self) -> Result<()> {
        warn!(transaction = self.id, "rolling back transaction");
        self.finish(TransactionStatus::RolledBack)
    }

    fn finish(&self, target: TransactionStatus) -> Result<()> {
        let mut status = self.status.lock();
        if *status != TransactionStatus::Active {
            return Err(QuiverError::transaction(format!(
                "transaction {} is not active ({:?})",
                self.id, *status
            )));
        }
        *status = target;
        self.sub_transactions.lock().clear();
        self.locks.lock().clear();
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        let status = *self.status.lock();
        if status != TransactionStatus::Active {
            return Err(QuiverError::transaction(format!(
                "transaction {} is not active ({status:?})",
                self.id
            )));
        }
        Ok(())
    }
}
