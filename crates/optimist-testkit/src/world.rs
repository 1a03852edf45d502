//! Simulated starter world
//!
//! Executes `spawn` and `move` for one player and publishes the resulting
//! `Moves` model as authoritative state, optionally after an indexing lag.

use async_trait::async_trait;
use optimist_core::starter::{moves_state, Direction};
use optimist_core::{
    ActionClient, ActionRequest, AuthoritativeUpdate, EntityKey, EntityStore, RemoteError,
};
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct PlayerState {
    remaining: u64,
    last_direction: Option<Direction>,
    revision: u64,
}

/// [`ActionClient`] that plays the starter game rules for one player.
#[derive(Debug)]
pub struct StarterWorld {
    store: EntityStore,
    player: EntityKey,
    lag: Duration,
    state: Mutex<PlayerState>,
}

impl StarterWorld {
    /// Create a world that publishes `player`'s state into `store`
    pub fn new(store: EntityStore, player: impl Into<EntityKey>) -> Self {
        Self {
            store,
            player: player.into(),
            lag: Duration::ZERO,
            state: Mutex::new(PlayerState::default()),
        }
    }

    /// Builder: delay between accepting an action and publishing its effect
    pub fn with_lag(mut self, lag: Duration) -> Self {
        self.lag = lag;
        self
    }

    /// Publish the player's current state without running an action
    pub fn publish_current(&self) {
        let update = self.snapshot();
        self.store.apply_authoritative(update);
    }

    fn snapshot(&self) -> AuthoritativeUpdate {
        let mut state = self.state.lock();
        state.revision += 1;
        AuthoritativeUpdate::replace(
            self.player.clone(),
            moves_state(state.remaining, state.last_direction),
        )
        .with_revision(state.revision)
    }

    fn execute(&self, request: &ActionRequest) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        match request.name.as_str() {
            "spawn" => {
                state.remaining = optimist_core::starter::SPAWN_REMAINING_MOVES;
                state.last_direction = None;
                Ok(())
            }
            "move" => {
                let direction = request
                    .args
                    .first()
                    .cloned()
                    .and_then(|arg| serde_json::from_value::<Direction>(arg).ok())
                    .ok_or_else(|| RemoteError::new("move", "missing direction"))?;
                if state.remaining == 0 {
                    return Err(RemoteError::new("move", "no moves remaining"));
                }
                state.remaining -= 1;
                state.last_direction = Some(direction);
                Ok(())
            }
            other => Err(RemoteError::new(other, "unknown action")),
        }
    }
}

#[async_trait]
impl ActionClient for StarterWorld {
    async fn invoke(&self, request: &ActionRequest) -> Result<(), RemoteError> {
        self.execute(request)?;
        let update = self.snapshot();
        if self.lag.is_zero() {
            self.store.apply_authoritative(update);
        } else {
            let store = self.store.clone();
            let lag = self.lag;
            tokio::spawn(async move {
                tokio::time::sleep(lag).await;
                store.apply_authoritative(update);
            });
        }
        Ok(())
    }
}
