//! # Transaction Orchestrator
//!
//! Runs one optimistic action end to end:
//!
//! ```text
//! Init ─▶ OptimisticallyApplied ─▶ AwaitingRemote ─┬─▶ Confirmed
//!                                                  └─▶ Reverted
//! ```
//!
//! 1. `begin` the patch in the ledger.
//! 2. Register the confirmation wait, then invoke the remote action. The
//!    wait's deadline also bounds the remote call.
//! 3. Remote failure: cancel the wait, revert, surface the remote error.
//!    Remote success: confirm once the predicate holds, or revert and
//!    surface a timeout if it never does. A remote call still running at
//!    the deadline is dropped and reported as a timeout.
//!
//! Ledger misuse is returned as-is and never triggers a revert. Every other
//! path finalizes the record exactly once; a drop guard reverts it if the
//! `perform` future is abandoned mid-flight.

use crate::client::{ActionClient, ActionRequest};
use crate::coordinator::{ChangeCoordinator, Predicate};
use crate::entity::EntityState;
use crate::errors::{LedgerError, TransactionError, WaitError};
use crate::identifiers::{EntityKey, TransactionId};
use crate::ledger::OptimisticLedger;
use crate::patch::Patch;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Per-transaction workflow state, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    /// Nothing applied yet
    Init,
    /// Patch registered and visible locally
    OptimisticallyApplied,
    /// Remote action submitted, confirmation pending
    AwaitingRemote,
    /// Terminal: patch kept
    Confirmed,
    /// Terminal: patch undone
    Reverted,
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "init",
            Self::OptimisticallyApplied => "optimistically_applied",
            Self::AwaitingRemote => "awaiting_remote",
            Self::Confirmed => "confirmed",
            Self::Reverted => "reverted",
        };
        f.write_str(label)
    }
}

/// Everything needed to run one optimistic action.
#[derive(Clone)]
pub struct OptimisticAction {
    /// Remote call to make
    pub request: ActionRequest,
    /// Entity the patch targets and the confirmation watches
    pub entity: EntityKey,
    /// Speculative change to show immediately
    pub patch: Patch,
    /// Holds once the remote effect is observable
    pub confirmation: Predicate,
    /// Overrides the coordinator's default wait bound
    pub timeout: Option<Duration>,
}

impl OptimisticAction {
    /// Create an action
    pub fn new<P>(request: ActionRequest, entity: impl Into<EntityKey>, patch: Patch, confirmation: P) -> Self
    where
        P: Fn(&EntityState) -> bool + Send + Sync + 'static,
    {
        Self {
            request,
            entity: entity.into(),
            patch,
            confirmation: Arc::new(confirmation),
            timeout: None,
        }
    }

    /// Builder: per-action confirmation bound
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for OptimisticAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticAction")
            .field("request", &self.request)
            .field("entity", &self.entity)
            .field("patch", &self.patch)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Result of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    /// Confirmed transaction
    pub transaction_id: TransactionId,
    /// Entity state that satisfied the confirmation predicate
    pub state: EntityState,
}

// ─────────────────────────────────────────────────────────────────────────────
// Finalization guard
// ─────────────────────────────────────────────────────────────────────────────

struct FinalizeGuard<'a> {
    ledger: &'a OptimisticLedger,
    transaction_id: TransactionId,
    armed: bool,
}

impl<'a> FinalizeGuard<'a> {
    fn new(ledger: &'a OptimisticLedger, transaction_id: TransactionId) -> Self {
        Self {
            ledger,
            transaction_id,
            armed: true,
        }
    }

    fn confirm(&mut self) -> Result<(), LedgerError> {
        self.armed = false;
        self.ledger.confirm(self.transaction_id)
    }

    fn revert(&mut self) -> Result<Option<EntityState>, LedgerError> {
        self.armed = false;
        self.ledger.revert(self.transaction_id)
    }
}

impl Drop for FinalizeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.ledger.revert(self.transaction_id) {
            Ok(_) => tracing::warn!(
                transaction = %self.transaction_id,
                "transaction abandoned before finalization; optimistic update reverted"
            ),
            Err(err) => tracing::error!(
                transaction = %self.transaction_id,
                error = %err,
                "failed to revert abandoned transaction"
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Ties the ledger, the coordinator and a remote client together.
pub struct TransactionOrchestrator<C: ?Sized> {
    ledger: OptimisticLedger,
    coordinator: ChangeCoordinator,
    client: Arc<C>,
}

impl<C: ?Sized> fmt::Debug for TransactionOrchestrator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionOrchestrator")
            .field("ledger", &self.ledger)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl<C: ActionClient + ?Sized> TransactionOrchestrator<C> {
    /// Create an orchestrator
    pub fn new(ledger: OptimisticLedger, coordinator: ChangeCoordinator, client: Arc<C>) -> Self {
        Self {
            ledger,
            coordinator,
            client,
        }
    }

    /// Ledger used for optimistic records
    pub fn ledger(&self) -> &OptimisticLedger {
        &self.ledger
    }

    /// Coordinator used for confirmation waits
    pub fn coordinator(&self) -> &ChangeCoordinator {
        &self.coordinator
    }

    /// Remote client
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Run an action under a fresh transaction identifier
    pub async fn perform(&self, action: OptimisticAction) -> Result<TransactionReceipt, TransactionError> {
        self.perform_with_id(TransactionId::new(), action).await
    }

    /// Run an action under a caller-generated transaction identifier
    pub async fn perform_with_id(
        &self,
        transaction_id: TransactionId,
        action: OptimisticAction,
    ) -> Result<TransactionReceipt, TransactionError> {
        let span = tracing::info_span!(
            "optimistic_transaction",
            transaction = %transaction_id,
            action = %action.request.name,
            entity = %action.entity,
        );
        self.run(transaction_id, action).instrument(span).await
    }

    async fn run(
        &self,
        transaction_id: TransactionId,
        action: OptimisticAction,
    ) -> Result<TransactionReceipt, TransactionError> {
        let OptimisticAction {
            request,
            entity,
            patch,
            confirmation,
            timeout,
        } = action;

        tracing::debug!(phase = %TransactionPhase::Init);
        self.ledger.begin(transaction_id, entity.clone(), patch)?;
        let mut guard = FinalizeGuard::new(&self.ledger, transaction_id);
        tracing::debug!(phase = %TransactionPhase::OptimisticallyApplied);

        let wait = self.coordinator.wait_for_with(
            &entity,
            self.coordinator.target(),
            confirmation,
            timeout,
        );
        let canceller = wait.canceller();

        tracing::debug!(phase = %TransactionPhase::AwaitingRemote);
        let invoked = match wait.deadline() {
            Some(deadline) => tokio::time::timeout_at(deadline, self.client.invoke(&request)).await,
            None => Ok(self.client.invoke(&request).await),
        };
        let Ok(invoked) = invoked else {
            let after = wait.timeout().unwrap_or_default();
            canceller.cancel();
            drop(wait);
            guard.revert()?;
            tracing::warn!(phase = %TransactionPhase::Reverted, ?after, "remote action outlived the confirmation bound");
            return Err(TransactionError::WaitTimeout {
                transaction_id,
                after,
            });
        };
        if let Err(source) = invoked {
            canceller.cancel();
            drop(wait);
            guard.revert()?;
            tracing::warn!(phase = %TransactionPhase::Reverted, error = %source, "remote action failed");
            return Err(TransactionError::RemoteActionFailed {
                transaction_id,
                source,
            });
        }

        match wait.await {
            Ok(state) => {
                guard.confirm()?;
                tracing::info!(phase = %TransactionPhase::Confirmed, "optimistic transaction confirmed");
                Ok(TransactionReceipt {
                    transaction_id,
                    state,
                })
            }
            Err(WaitError::Timeout { after, .. }) => {
                guard.revert()?;
                tracing::warn!(phase = %TransactionPhase::Reverted, ?after, "confirmation timed out");
                Err(TransactionError::WaitTimeout {
                    transaction_id,
                    after,
                })
            }
            Err(source) => {
                guard.revert()?;
                tracing::warn!(phase = %TransactionPhase::Reverted, error = %source, "confirmation aborted");
                Err(TransactionError::WaitAborted {
                    transaction_id,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteError;
    use crate::ledger::UpdateStatus;
    use crate::store::EntityStore;
    use async_trait::async_trait;
    use serde_json::json;

    /// Succeeds or fails, optionally pushing an authoritative state first.
    struct FixedClient {
        store: EntityStore,
        push: Option<(EntityKey, EntityState)>,
        fail: bool,
    }

    #[async_trait]
    impl ActionClient for FixedClient {
        async fn invoke(&self, request: &ActionRequest) -> Result<(), RemoteError> {
            if self.fail {
                return Err(RemoteError::new(&request.name, "rejected"));
            }
            if let Some((key, state)) = &self.push {
                self.store.set_authoritative(key.clone(), state.clone());
            }
            Ok(())
        }
    }

    /// Never resolves.
    struct StuckClient;

    #[async_trait]
    impl ActionClient for StuckClient {
        async fn invoke(&self, _request: &ActionRequest) -> Result<(), RemoteError> {
            futures::future::pending().await
        }
    }

    fn key() -> EntityKey {
        EntityKey::from("0xe1")
    }

    fn moves(remaining: u64) -> EntityState {
        EntityState::new().with_model("Moves", json!({"remaining": remaining}))
    }

    fn orchestrator<C: ActionClient>(store: &EntityStore, client: C) -> TransactionOrchestrator<C> {
        let ledger = OptimisticLedger::new(store.clone());
        let coordinator = ChangeCoordinator::new(store.clone())
            .with_default_timeout(Some(Duration::from_millis(50)));
        TransactionOrchestrator::new(ledger, coordinator, Arc::new(client))
    }

    fn spawn_action() -> OptimisticAction {
        OptimisticAction::new(
            ActionRequest::new("spawn"),
            key(),
            Patch::new().set_existing("Moves", "remaining", 100),
            |s: &EntityState| s.field("Moves", "remaining") == Some(&json!(100)),
        )
    }

    #[tokio::test]
    async fn test_remote_failure_reverts() {
        let store = EntityStore::new();
        store.set_authoritative(key(), moves(0));
        let orchestrator = orchestrator(
            &store,
            FixedClient {
                store: store.clone(),
                push: None,
                fail: true,
            },
        );
        let tx = TransactionId::new();

        let err = orchestrator.perform_with_id(tx, spawn_action()).await.unwrap_err();

        assert!(matches!(err, TransactionError::RemoteActionFailed { .. }));
        assert_eq!(store.get(&key()), Some(moves(0)));
        assert_eq!(orchestrator.ledger().status(tx), Some(UpdateStatus::Reverted));
        assert_eq!(store.watcher_count(&key()), 0);
    }

    #[tokio::test]
    async fn test_success_confirms() {
        let store = EntityStore::new();
        store.set_authoritative(key(), moves(0));
        let orchestrator = orchestrator(
            &store,
            FixedClient {
                store: store.clone(),
                push: Some((key(), moves(100))),
                fail: false,
            },
        );

        let receipt = orchestrator.perform(spawn_action()).await.unwrap();

        assert_eq!(receipt.state, moves(100));
        assert_eq!(
            orchestrator.ledger().status(receipt.transaction_id),
            Some(UpdateStatus::Confirmed)
        );
        assert_eq!(store.get(&key()), Some(moves(100)));
    }

    #[tokio::test]
    async fn test_success_without_confirmation_times_out_and_reverts() {
        let store = EntityStore::new();
        store.set_authoritative(key(), moves(0));
        let orchestrator = orchestrator(
            &store,
            FixedClient {
                store: store.clone(),
                push: None,
                fail: false,
            },
        );
        let tx = TransactionId::new();

        let err = orchestrator.perform_with_id(tx, spawn_action()).await.unwrap_err();

        assert_eq!(
            err,
            TransactionError::WaitTimeout {
                transaction_id: tx,
                after: Duration::from_millis(50),
            }
        );
        assert_eq!(store.get(&key()), Some(moves(0)));
        assert_eq!(orchestrator.ledger().status(tx), Some(UpdateStatus::Reverted));
    }

    #[tokio::test]
    async fn test_duplicate_id_surfaces_without_revert() {
        let store = EntityStore::new();
        store.set_authoritative(key(), moves(0));
        let orchestrator = orchestrator(
            &store,
            FixedClient {
                store: store.clone(),
                push: None,
                fail: true,
            },
        );
        let tx = TransactionId::new();
        orchestrator
            .ledger()
            .begin(tx, key(), Patch::new().set("Moves", "remaining", 7))
            .unwrap();

        let err = orchestrator.perform_with_id(tx, spawn_action()).await.unwrap_err();

        assert!(err.is_invariant_violation());
        // The original pending record is untouched.
        assert!(orchestrator.ledger().is_pending(tx));
        assert_eq!(
            store.get(&key()).unwrap().field("Moves", "remaining"),
            Some(&json!(7))
        );
    }

    #[tokio::test]
    async fn test_abandoned_transaction_is_reverted() {
        let store = EntityStore::new();
        store.set_authoritative(key(), moves(0));
        let orchestrator = orchestrator(&store, StuckClient);
        let tx = TransactionId::new();

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            orchestrator.perform_with_id(tx, spawn_action()),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(orchestrator.ledger().status(tx), Some(UpdateStatus::Reverted));
        assert_eq!(store.get(&key()), Some(moves(0)));
    }

    #[tokio::test]
    async fn test_stuck_remote_times_out_at_wait_bound() {
        let store = EntityStore::new();
        store.set_authoritative(key(), moves(0));
        let orchestrator = orchestrator(&store, StuckClient);
        let tx = TransactionId::new();

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            orchestrator.perform_with_id(tx, spawn_action()),
        )
        .await
        .expect("perform outlived its wait bound");

        assert_eq!(
            result.unwrap_err(),
            TransactionError::WaitTimeout {
                transaction_id: tx,
                after: Duration::from_millis(50),
            }
        );
        assert_eq!(orchestrator.ledger().status(tx), Some(UpdateStatus::Reverted));
        assert_eq!(store.get(&key()), Some(moves(0)));
        assert_eq!(store.watcher_count(&key()), 0);
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(TransactionPhase::AwaitingRemote.to_string(), "awaiting_remote");
        assert_eq!(TransactionPhase::Reverted.to_string(), "reverted");
    }
}
