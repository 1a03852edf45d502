//! # Optimistic Update Ledger
//!
//! Tracks every speculative patch by transaction identifier and is the only
//! component allowed to write speculative state into the [`EntityStore`].
//!
//! ```text
//! begin ──▶ Pending ──confirm──▶ Confirmed
//!              │
//!              └──────revert───▶ Reverted
//! ```
//!
//! A record leaves `Pending` exactly once. Identifiers are never reusable,
//! even after resolved records are pruned.
//!
//! All records sit behind one mutex rather than one lock per transaction.
//! Each critical section is a map lookup plus a store write, and the lock is
//! never held across an `.await`, so transactions on unrelated entities only
//! contend for that short window. Lock order is always ledger, then store.

use crate::entity::EntityState;
use crate::errors::LedgerError;
use crate::identifiers::{EntityKey, TransactionId};
use crate::patch::{Patch, PreImage};
use crate::store::EntityStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle status of an optimistic update record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateStatus {
    /// Applied locally, awaiting confirmation
    Pending,
    /// Confirmed; the patch stays applied
    Confirmed,
    /// Reverted; the patch was removed from the store
    Reverted,
}

impl UpdateStatus {
    /// Check if the record is still awaiting resolution
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Reverted => write!(f, "Reverted"),
        }
    }
}

/// One speculative mutation and its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticUpdate {
    /// Caller-generated identifier
    pub transaction_id: TransactionId,
    /// Entity the patch targets
    pub entity_key: EntityKey,
    /// The speculative patch
    pub patch: Patch,
    /// Prior values of the fields the patch touched when it was applied
    pub pre_image: PreImage,
    /// Current lifecycle status
    pub status: UpdateStatus,
    /// When `begin` ran
    pub created_at: DateTime<Utc>,
    /// When the record left `Pending`
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    records: HashMap<TransactionId, OptimisticUpdate>,
    /// Resolved identifiers whose records were dropped, with their outcome
    retired: HashMap<TransactionId, UpdateStatus>,
}

impl LedgerInner {
    fn pending_mut(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<&mut OptimisticUpdate, LedgerError> {
        if let Some(status) = self.retired.get(&transaction_id) {
            return Err(LedgerError::AlreadyResolved {
                transaction_id,
                status: *status,
            });
        }
        let record = self
            .records
            .get_mut(&transaction_id)
            .ok_or(LedgerError::UnknownTransaction { transaction_id })?;
        if !record.status.is_pending() {
            return Err(LedgerError::AlreadyResolved {
                transaction_id,
                status: record.status,
            });
        }
        Ok(record)
    }

    fn resolve(&mut self, transaction_id: TransactionId, status: UpdateStatus, retain: bool) {
        if retain {
            if let Some(record) = self.records.get_mut(&transaction_id) {
                record.status = status;
                record.resolved_at = Some(Utc::now());
            }
        } else {
            self.records.remove(&transaction_id);
            self.retired.insert(transaction_id, status);
        }
    }
}

/// Ledger of optimistic updates over a shared [`EntityStore`].
#[derive(Debug, Clone)]
pub struct OptimisticLedger {
    store: EntityStore,
    inner: Arc<Mutex<LedgerInner>>,
    retain_resolved: bool,
}

impl OptimisticLedger {
    /// Create a ledger that keeps resolved records for inspection
    pub fn new(store: EntityStore) -> Self {
        Self::with_retention(store, true)
    }

    /// Create a ledger, choosing whether resolved records are retained
    pub fn with_retention(store: EntityStore, retain_resolved: bool) -> Self {
        Self {
            store,
            inner: Arc::new(Mutex::new(LedgerInner::default())),
            retain_resolved,
        }
    }

    /// Store this ledger writes into
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Register a pending update and apply its patch to the store.
    ///
    /// Fails without touching the store if the identifier was used before.
    /// Returns the entity view with the patch applied.
    pub fn begin(
        &self,
        transaction_id: TransactionId,
        entity_key: EntityKey,
        patch: Patch,
    ) -> Result<EntityState, LedgerError> {
        let mut inner = self.inner.lock();
        if inner.records.contains_key(&transaction_id)
            || inner.retired.contains_key(&transaction_id)
        {
            return Err(LedgerError::DuplicateTransaction { transaction_id });
        }

        let (view, pre_image) = self
            .store
            .apply_patch(&entity_key, transaction_id, patch.clone());

        tracing::debug!(
            transaction = %transaction_id,
            entity = %entity_key,
            fields = pre_image.touched().count(),
            "optimistic update applied"
        );

        inner.records.insert(
            transaction_id,
            OptimisticUpdate {
                transaction_id,
                entity_key,
                patch,
                pre_image,
                status: UpdateStatus::Pending,
                created_at: Utc::now(),
                resolved_at: None,
            },
        );
        Ok(view)
    }

    /// Confirm a pending update. The patch stays applied.
    pub fn confirm(&self, transaction_id: TransactionId) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        let record = inner.pending_mut(transaction_id)?;
        self.store.settle_patch(&record.entity_key, transaction_id);

        tracing::debug!(
            transaction = %transaction_id,
            entity = %record.entity_key,
            "optimistic update confirmed"
        );
        inner.resolve(transaction_id, UpdateStatus::Confirmed, self.retain_resolved);
        Ok(())
    }

    /// Revert a pending update, removing exactly its fields from the view.
    ///
    /// Returns the entity view afterwards (`None` if the entity only existed
    /// because of speculative writes).
    pub fn revert(&self, transaction_id: TransactionId) -> Result<Option<EntityState>, LedgerError> {
        let mut inner = self.inner.lock();
        let record = inner.pending_mut(transaction_id)?;
        let view = self.store.revert_patch(&record.entity_key, transaction_id);

        tracing::debug!(
            transaction = %transaction_id,
            entity = %record.entity_key,
            "optimistic update reverted"
        );
        inner.resolve(transaction_id, UpdateStatus::Reverted, self.retain_resolved);
        Ok(view)
    }

    /// Status of a transaction, if the ledger has seen it
    pub fn status(&self, transaction_id: TransactionId) -> Option<UpdateStatus> {
        let inner = self.inner.lock();
        inner
            .records
            .get(&transaction_id)
            .map(|r| r.status)
            .or_else(|| inner.retired.get(&transaction_id).copied())
    }

    /// Check if a transaction is still pending
    pub fn is_pending(&self, transaction_id: TransactionId) -> bool {
        self.status(transaction_id)
            .is_some_and(|status| status.is_pending())
    }

    /// Snapshot of a retained record
    pub fn record(&self, transaction_id: TransactionId) -> Option<OptimisticUpdate> {
        self.inner.lock().records.get(&transaction_id).cloned()
    }

    /// Pending transactions on an entity, in begin order
    pub fn pending_for(&self, entity_key: &EntityKey) -> Vec<TransactionId> {
        let inner = self.inner.lock();
        self.store
            .pending_overlays(entity_key)
            .into_iter()
            .filter(|id| inner.records.get(id).is_some_and(|r| r.status.is_pending()))
            .collect()
    }

    /// Number of pending records
    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .records
            .values()
            .filter(|r| r.status.is_pending())
            .count()
    }

    /// Drop retained resolved records, keeping their identifiers reserved.
    /// Returns how many records were dropped.
    pub fn prune_resolved(&self) -> usize {
        let mut inner = self.inner.lock();
        let resolved: Vec<_> = inner
            .records
            .values()
            .filter(|r| !r.status.is_pending())
            .map(|r| (r.transaction_id, r.status))
            .collect();
        for (transaction_id, status) in &resolved {
            inner.records.remove(transaction_id);
            inner.retired.insert(*transaction_id, *status);
        }
        resolved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> EntityKey {
        EntityKey::from("0xe1")
    }

    fn setup(remaining: u64) -> OptimisticLedger {
        let store = EntityStore::new();
        store.set_authoritative(
            key(),
            EntityState::new().with_model("Moves", json!({"remaining": remaining})),
        );
        OptimisticLedger::new(store)
    }

    fn remaining(ledger: &OptimisticLedger) -> Option<u64> {
        ledger
            .store()
            .get(&key())
            .and_then(|s| s.field("Moves", "remaining").and_then(|v| v.as_u64()))
    }

    #[test]
    fn test_begin_then_revert_restores_state() {
        let ledger = setup(0);
        let tx = TransactionId::new();

        ledger
            .begin(tx, key(), Patch::new().set("Moves", "remaining", 100))
            .unwrap();
        assert_eq!(remaining(&ledger), Some(100));
        assert!(ledger.is_pending(tx));

        ledger.revert(tx).unwrap();
        assert_eq!(remaining(&ledger), Some(0));
        assert_eq!(ledger.status(tx), Some(UpdateStatus::Reverted));
    }

    #[test]
    fn test_confirm_keeps_patch() {
        let ledger = setup(0);
        let tx = TransactionId::new();
        ledger
            .begin(tx, key(), Patch::new().set("Moves", "remaining", 100))
            .unwrap();

        ledger.confirm(tx).unwrap();

        assert_eq!(remaining(&ledger), Some(100));
        assert!(!ledger.is_pending(tx));
        let record = ledger.record(tx).unwrap();
        assert_eq!(record.status, UpdateStatus::Confirmed);
        assert!(record.resolved_at.is_some());
    }

    #[test]
    fn test_duplicate_begin_does_not_touch_store() {
        let ledger = setup(0);
        let tx = TransactionId::new();
        ledger
            .begin(tx, key(), Patch::new().set("Moves", "remaining", 1))
            .unwrap();

        let err = ledger
            .begin(tx, key(), Patch::new().set("Moves", "remaining", 2))
            .unwrap_err();

        assert_eq!(err, LedgerError::DuplicateTransaction { transaction_id: tx });
        assert_eq!(remaining(&ledger), Some(1));
        assert_eq!(ledger.store().pending_overlays(&key()), vec![tx]);
    }

    #[test]
    fn test_exactly_one_resolution_succeeds() {
        let ledger = setup(0);
        let confirmed = TransactionId::new();
        let reverted = TransactionId::new();
        ledger.begin(confirmed, key(), Patch::new()).unwrap();
        ledger.begin(reverted, key(), Patch::new()).unwrap();

        ledger.confirm(confirmed).unwrap();
        assert_eq!(
            ledger.revert(confirmed).unwrap_err(),
            LedgerError::AlreadyResolved {
                transaction_id: confirmed,
                status: UpdateStatus::Confirmed,
            }
        );

        ledger.revert(reverted).unwrap();
        assert_eq!(
            ledger.confirm(reverted).unwrap_err(),
            LedgerError::AlreadyResolved {
                transaction_id: reverted,
                status: UpdateStatus::Reverted,
            }
        );
    }

    #[test]
    fn test_unknown_transaction() {
        let ledger = setup(0);
        let tx = TransactionId::new();
        assert_eq!(
            ledger.confirm(tx).unwrap_err(),
            LedgerError::UnknownTransaction { transaction_id: tx }
        );
        assert_eq!(
            ledger.revert(tx).unwrap_err(),
            LedgerError::UnknownTransaction { transaction_id: tx }
        );
    }

    #[test]
    fn test_without_retention_ids_stay_reserved() {
        let store = EntityStore::new();
        let ledger = OptimisticLedger::with_retention(store, false);
        let tx = TransactionId::new();
        ledger.begin(tx, key(), Patch::new()).unwrap();
        ledger.confirm(tx).unwrap();

        assert!(ledger.record(tx).is_none());
        assert_eq!(ledger.status(tx), Some(UpdateStatus::Confirmed));
        assert!(matches!(
            ledger.revert(tx),
            Err(LedgerError::AlreadyResolved { .. })
        ));
        assert_eq!(
            ledger.begin(tx, key(), Patch::new()).unwrap_err(),
            LedgerError::DuplicateTransaction { transaction_id: tx }
        );
    }

    #[test]
    fn test_prune_resolved() {
        let ledger = setup(0);
        let done = TransactionId::new();
        let open = TransactionId::new();
        ledger.begin(done, key(), Patch::new()).unwrap();
        ledger.begin(open, key(), Patch::new()).unwrap();
        ledger.revert(done).unwrap();

        assert_eq!(ledger.prune_resolved(), 1);
        assert!(ledger.record(done).is_none());
        assert_eq!(ledger.status(done), Some(UpdateStatus::Reverted));
        assert_eq!(ledger.pending_count(), 1);
        assert_eq!(ledger.pending_for(&key()), vec![open]);
    }

    #[test]
    fn test_overlapping_revert_keeps_other_transaction() {
        let ledger = setup(0);
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();
        ledger
            .begin(t1, key(), Patch::new().set("Moves", "remaining", 10))
            .unwrap();
        ledger
            .begin(t2, key(), Patch::new().set("Moves", "remaining", 20))
            .unwrap();

        ledger.revert(t2).unwrap();
        assert_eq!(remaining(&ledger), Some(10));

        let record = ledger.record(t2).unwrap();
        let path = crate::entity::FieldPath::new("Moves", "remaining");
        assert_eq!(record.pre_image.prior(&path), Some(Some(&json!(10))));
    }
}
