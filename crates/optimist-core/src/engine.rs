//! Engine facade
//!
//! Wires one store, ledger, coordinator and orchestrator together from an
//! [`EngineConfig`].

use crate::client::ActionClient;
use crate::config::EngineConfig;
use crate::coordinator::ChangeCoordinator;
use crate::errors::{ConfigError, TransactionError};
use crate::identifiers::EntityKey;
use crate::ledger::OptimisticLedger;
use crate::orchestrator::{OptimisticAction, TransactionOrchestrator, TransactionReceipt};
use crate::starter::SystemCalls;
use crate::store::{AuthoritativeUpdate, EntityStore};
use futures::Stream;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A fully wired optimistic update engine.
pub struct OptimisticEngine<C: ?Sized> {
    config: EngineConfig,
    store: EntityStore,
    orchestrator: TransactionOrchestrator<C>,
}

impl<C: ?Sized> fmt::Debug for OptimisticEngine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticEngine")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<C: ActionClient + ?Sized> OptimisticEngine<C> {
    /// Build an engine over a fresh store
    pub fn new(config: EngineConfig, client: Arc<C>) -> Result<Self, ConfigError> {
        Self::with_store(config, EntityStore::new(), client)
    }

    /// Build an engine over an existing store
    pub fn with_store(
        config: EngineConfig,
        store: EntityStore,
        client: Arc<C>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ledger = OptimisticLedger::with_retention(store.clone(), config.retain_resolved);
        let coordinator = ChangeCoordinator::from_config(store.clone(), &config);
        tracing::info!(
            wait_timeout_ms = config.wait_timeout_ms,
            wait_target = ?config.wait_target,
            "optimistic engine ready"
        );
        Ok(Self {
            config,
            store,
            orchestrator: TransactionOrchestrator::new(ledger, coordinator, client),
        })
    }

    /// Validated configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared entity store
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Optimistic update ledger
    pub fn ledger(&self) -> &OptimisticLedger {
        self.orchestrator.ledger()
    }

    /// Change-wait coordinator
    pub fn coordinator(&self) -> &ChangeCoordinator {
        self.orchestrator.coordinator()
    }

    /// Transaction orchestrator
    pub fn orchestrator(&self) -> &TransactionOrchestrator<C> {
        &self.orchestrator
    }

    /// Run an optimistic action
    pub async fn perform(&self, action: OptimisticAction) -> Result<TransactionReceipt, TransactionError> {
        self.orchestrator.perform(action).await
    }

    /// Starter-game system calls for one player entity
    pub fn system_calls(&self, entity: impl Into<EntityKey>) -> SystemCalls<'_, C> {
        SystemCalls::new(&self.orchestrator, entity)
    }

    /// Feed authoritative updates into the store on a background task
    pub fn spawn_feed<S>(&self, updates: S) -> JoinHandle<usize>
    where
        S: Stream<Item = AuthoritativeUpdate> + Send + 'static,
    {
        crate::feed::spawn_forwarder(self.store.clone(), updates)
    }
}
