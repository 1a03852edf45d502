//! Scripted remote action client
//!
//! Each invocation pops the next outcome from a queue; once the queue is
//! empty every call is accepted. Every request is recorded for assertions.

use async_trait::async_trait;
use optimist_core::{ActionClient, ActionRequest, AuthoritativeUpdate, EntityStore, RemoteError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// What the scripted remote system does with one request.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Accept without producing authoritative state
    Accept,
    /// Reject with a message
    Reject(String),
    /// Push an authoritative update, then accept
    Confirm(AuthoritativeUpdate),
    /// Accept now and push the update after `lag`, like an indexer catching up
    ConfirmLater {
        /// Update to push
        update: AuthoritativeUpdate,
        /// Delay before the push
        lag: Duration,
    },
    /// Sleep, then resolve with the inner outcome
    Delayed {
        /// Delay before resolving
        delay: Duration,
        /// Outcome after the delay
        then: Box<ScriptedOutcome>,
    },
    /// Never resolve
    Hang,
}

impl ScriptedOutcome {
    /// Rejection with a message
    pub fn reject(message: impl Into<String>) -> Self {
        Self::Reject(message.into())
    }

    /// Wrap this outcome behind a delay
    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed {
            delay,
            then: Box::new(self),
        }
    }
}

/// [`ActionClient`] driven by a queue of [`ScriptedOutcome`]s.
#[derive(Debug)]
pub struct ScriptedClient {
    store: EntityStore,
    script: Mutex<VecDeque<ScriptedOutcome>>,
    invocations: Mutex<Vec<ActionRequest>>,
}

impl ScriptedClient {
    /// Create a client that pushes confirmations into `store`
    pub fn new(store: EntityStore) -> Self {
        Self {
            store,
            script: Mutex::new(VecDeque::new()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Builder: queue an outcome
    pub fn then(self, outcome: ScriptedOutcome) -> Self {
        self.push(outcome);
        self
    }

    /// Queue an outcome
    pub fn push(&self, outcome: ScriptedOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Requests received so far, in arrival order
    pub fn invocations(&self) -> Vec<ActionRequest> {
        self.invocations.lock().clone()
    }

    /// Names of the actions received so far
    pub fn invoked_actions(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|request| request.name.clone())
            .collect()
    }

    /// Outcomes not yet consumed
    pub fn remaining_script(&self) -> usize {
        self.script.lock().len()
    }

    async fn resolve(&self, request: &ActionRequest, outcome: ScriptedOutcome) -> Result<(), RemoteError> {
        let mut outcome = outcome;
        loop {
            match outcome {
                ScriptedOutcome::Accept => return Ok(()),
                ScriptedOutcome::Reject(message) => {
                    return Err(RemoteError::new(&request.name, message));
                }
                ScriptedOutcome::Confirm(update) => {
                    self.store.apply_authoritative(update);
                    return Ok(());
                }
                ScriptedOutcome::ConfirmLater { update, lag } => {
                    let store = self.store.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(lag).await;
                        store.apply_authoritative(update);
                    });
                    return Ok(());
                }
                ScriptedOutcome::Delayed { delay, then } => {
                    tokio::time::sleep(delay).await;
                    outcome = *then;
                }
                ScriptedOutcome::Hang => return futures::future::pending().await,
            }
        }
    }
}

#[async_trait]
impl ActionClient for ScriptedClient {
    async fn invoke(&self, request: &ActionRequest) -> Result<(), RemoteError> {
        self.invocations.lock().push(request.clone());
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(ScriptedOutcome::Accept);
        tracing::trace!(action = %request.name, ?outcome, "scripted invocation");
        self.resolve(request, outcome).await
    }
}
