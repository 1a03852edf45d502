//! # Starter game system calls
//!
//! Optimistic wrappers around the starter world's `spawn` and `move`
//! actions. Both patch the player's `Moves` model locally, submit the action
//! and confirm once the authoritative state reflects it.
//!
//! `last_direction` is an optional enum and is stored the way the world
//! encodes it: `{"Some": "Left"}` or `"None"`.

use crate::client::{ActionClient, ActionRequest};
use crate::entity::EntityState;
use crate::errors::TransactionError;
use crate::identifiers::EntityKey;
use crate::orchestrator::{OptimisticAction, TransactionOrchestrator, TransactionReceipt};
use crate::patch::Patch;
use crate::store::EntityStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Model holding a player's move budget and last move
pub const MOVES_MODEL: &str = "dojo_starter-Moves";
/// Remaining-moves field of [`MOVES_MODEL`]
pub const REMAINING_FIELD: &str = "remaining";
/// Last-direction field of [`MOVES_MODEL`]
pub const LAST_DIRECTION_FIELD: &str = "last_direction";
/// Move budget granted by `spawn`
pub const SPAWN_REMAINING_MOVES: u64 = 100;

/// Movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    /// Variant name as the world encodes it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "Left",
            Self::Right => "Right",
            Self::Up => "Up",
            Self::Down => "Down",
        }
    }

    fn from_variant(name: &str) -> Option<Self> {
        match name {
            "Left" => Some(Self::Left),
            "Right" => Some(Self::Right),
            "Up" => Some(Self::Up),
            "Down" => Some(Self::Down),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode an optional direction
pub fn encode_direction(direction: Option<Direction>) -> Value {
    match direction {
        Some(direction) => json!({ "Some": direction.as_str() }),
        None => json!("None"),
    }
}

/// Remaining moves of an entity, if it has a `Moves` model
pub fn remaining_moves(state: &EntityState) -> Option<u64> {
    state
        .field(MOVES_MODEL, REMAINING_FIELD)
        .and_then(Value::as_u64)
}

/// Last direction of an entity; `None` when unset or not decodable
pub fn last_direction(state: &EntityState) -> Option<Direction> {
    state
        .field(MOVES_MODEL, LAST_DIRECTION_FIELD)
        .and_then(|value| value.get("Some"))
        .and_then(Value::as_str)
        .and_then(Direction::from_variant)
}

/// Entity state with a populated `Moves` model
pub fn moves_state(remaining: u64, direction: Option<Direction>) -> EntityState {
    EntityState::new().with_model(
        MOVES_MODEL,
        json!({
            REMAINING_FIELD: remaining,
            LAST_DIRECTION_FIELD: encode_direction(direction),
        }),
    )
}

/// Number of entities with authoritative state
pub fn total_entities(store: &EntityStore) -> usize {
    store.entity_count()
}

/// System calls bound to one player entity.
pub struct SystemCalls<'a, C: ?Sized> {
    orchestrator: &'a TransactionOrchestrator<C>,
    entity: EntityKey,
}

impl<'a, C: ActionClient + ?Sized> SystemCalls<'a, C> {
    /// Bind system calls to `entity`
    pub fn new(orchestrator: &'a TransactionOrchestrator<C>, entity: impl Into<EntityKey>) -> Self {
        Self {
            orchestrator,
            entity: entity.into(),
        }
    }

    /// Player entity
    pub fn entity(&self) -> &EntityKey {
        &self.entity
    }

    /// Optimistic action for `spawn`
    pub fn spawn_action(&self) -> OptimisticAction {
        OptimisticAction::new(
            ActionRequest::new("spawn"),
            self.entity.clone(),
            Patch::new().set_existing(MOVES_MODEL, REMAINING_FIELD, SPAWN_REMAINING_MOVES),
            |state: &EntityState| remaining_moves(state) == Some(SPAWN_REMAINING_MOVES),
        )
    }

    /// Optimistic action for `move`
    pub fn move_action(&self, direction: Direction) -> OptimisticAction {
        OptimisticAction::new(
            ActionRequest::new("move").with_arg(direction.as_str()),
            self.entity.clone(),
            Patch::new().set_existing(
                MOVES_MODEL,
                LAST_DIRECTION_FIELD,
                encode_direction(Some(direction)),
            ),
            move |state: &EntityState| last_direction(state) == Some(direction),
        )
    }

    /// Spawn the player, showing the full move budget immediately
    pub async fn spawn(&self) -> Result<TransactionReceipt, TransactionError> {
        self.orchestrator.perform(self.spawn_action()).await
    }

    /// Move the player, showing the new direction immediately
    pub async fn move_to(&self, direction: Direction) -> Result<TransactionReceipt, TransactionError> {
        self.orchestrator.perform(self.move_action(direction)).await
    }
}
