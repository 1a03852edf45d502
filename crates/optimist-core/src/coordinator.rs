//! # Change-Wait Coordinator
//!
//! Resolves a wait when a predicate over one entity becomes true.
//!
//! The predicate is evaluated once against the state captured at
//! registration (fast path) and then against every change notification for
//! the entity, in mutation order. Each wait owns its own subscription, so
//! concurrent waits on one entity are fully independent.

use crate::config::{EngineConfig, WaitTarget};
use crate::entity::EntityState;
use crate::errors::WaitError;
use crate::identifiers::EntityKey;
use crate::store::{EntityStore, Subscription};
use futures::future::BoxFuture;
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Boolean test over entity state.
pub type Predicate = Arc<dyn Fn(&EntityState) -> bool + Send + Sync>;

/// Registers change waits against an [`EntityStore`]. Read-only with
/// respect to the store.
#[derive(Debug, Clone)]
pub struct ChangeCoordinator {
    store: EntityStore,
    default_timeout: Option<Duration>,
    target: WaitTarget,
}

impl ChangeCoordinator {
    /// Create a coordinator with default configuration
    pub fn new(store: EntityStore) -> Self {
        Self::from_config(store, &EngineConfig::default())
    }

    /// Create a coordinator from engine configuration
    pub fn from_config(store: EntityStore, config: &EngineConfig) -> Self {
        Self {
            store,
            default_timeout: config.wait_timeout(),
            target: config.wait_target,
        }
    }

    /// Builder: bound applied when a wait does not give its own
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Builder: layer predicates are evaluated against
    pub fn with_target(mut self, target: WaitTarget) -> Self {
        self.target = target;
        self
    }

    /// Default wait bound
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Layer predicates are evaluated against by default
    pub fn target(&self) -> WaitTarget {
        self.target
    }

    /// Wait until `predicate` holds for `key`, using the coordinator's
    /// target layer. `timeout` overrides the default bound.
    pub fn wait_for<P>(&self, key: &EntityKey, predicate: P, timeout: Option<Duration>) -> EntityWait
    where
        P: Fn(&EntityState) -> bool + Send + Sync + 'static,
    {
        self.wait_for_with(key, self.target, Arc::new(predicate), timeout)
    }

    /// Wait with an explicit target layer and a shared predicate.
    ///
    /// The subscription is registered before this returns, so changes made
    /// after the call are never missed even if the wait is awaited later.
    pub fn wait_for_with(
        &self,
        key: &EntityKey,
        target: WaitTarget,
        predicate: Predicate,
        timeout: Option<Duration>,
    ) -> EntityWait {
        let timeout = timeout.or(self.default_timeout);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        EntityWait {
            subscription: self.store.watch(key),
            predicate,
            target,
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }
}

/// Cancels an [`EntityWait`]. Cloneable; cancelling is idempotent and a
/// no-op once the wait has finished.
#[derive(Debug, Clone)]
pub struct WaitCanceller {
    tx: Arc<watch::Sender<bool>>,
}

impl WaitCanceller {
    /// Stop the wait. Does not roll back any store mutation.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Check if cancel was requested
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A registered change wait. Await it (or call [`EntityWait::outcome`]) to
/// get the first state satisfying the predicate.
pub struct EntityWait {
    subscription: Subscription,
    predicate: Predicate,
    target: WaitTarget,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl fmt::Debug for EntityWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityWait")
            .field("key", self.subscription.key())
            .field("target", &self.target)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl EntityWait {
    /// Entity being watched
    pub fn key(&self) -> &EntityKey {
        self.subscription.key()
    }

    /// Bound on the wait, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Instant the wait expires at, fixed at registration
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Handle that cancels this wait
    pub fn canceller(&self) -> WaitCanceller {
        WaitCanceller {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Drive the wait to completion.
    ///
    /// Buffered notifications are always evaluated before cancellation and
    /// the deadline are checked.
    pub async fn outcome(self) -> Result<EntityState, WaitError> {
        let EntityWait {
            mut subscription,
            predicate,
            target,
            timeout,
            deadline,
            cancel_tx: _cancel_tx,
            mut cancel_rx,
        } = self;
        let key = subscription.key().clone();

        if *cancel_rx.borrow_and_update() {
            return Err(WaitError::Cancelled { key });
        }

        if let Some(state) = subscription.initial().select(target) {
            if predicate(state) {
                tracing::trace!(entity = %key, "wait satisfied at registration");
                return Ok(state.clone());
            }
        }

        let expiry = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => futures::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;

                change = subscription.recv() => {
                    let Some(change) = change else {
                        return Err(WaitError::StoreClosed { key });
                    };
                    if let Some(state) = change.layers.select(target) {
                        if predicate(state) {
                            tracing::trace!(entity = %key, seq = change.seq, "wait satisfied");
                            return Ok(state.clone());
                        }
                    }
                }

                changed = cancel_rx.changed() => {
                    if changed.is_ok() && *cancel_rx.borrow_and_update() {
                        tracing::debug!(entity = %key, "wait cancelled");
                        return Err(WaitError::Cancelled { key });
                    }
                }

                () = &mut expiry => {
                    let after = timeout.unwrap_or_default();
                    tracing::debug!(entity = %key, ?after, "wait timed out");
                    return Err(WaitError::Timeout { key, after });
                }
            }
        }
    }
}

impl IntoFuture for EntityWait {
    type Output = Result<EntityState, WaitError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.outcome())
    }
}
