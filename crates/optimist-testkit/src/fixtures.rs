//! Common test fixtures

use optimist_core::starter::{moves_state, Direction};
use optimist_core::{
    ActionClient, EngineConfig, EntityKey, EntityState, EntityStore, OptimisticEngine,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Player entity key for index `n`
pub fn player(n: u64) -> EntityKey {
    EntityKey::new(format!("0x{n:x}"))
}

/// Entity with a single `Moves` model holding only `remaining`
pub fn moves_entity(remaining: u64) -> EntityState {
    EntityState::new().with_model("Moves", json!({ "remaining": remaining }))
}

/// Starter-world player state
pub fn starter_player(remaining: u64, direction: Option<Direction>) -> EntityState {
    moves_state(remaining, direction)
}

/// Store seeded with authoritative entities
pub fn seeded_store<I>(entities: I) -> EntityStore
where
    I: IntoIterator<Item = (EntityKey, EntityState)>,
{
    let store = EntityStore::new();
    for (key, state) in entities {
        store.set_authoritative(key, state);
    }
    store
}

/// Configuration with a short confirmation bound
pub fn quick_config(wait_timeout: Duration) -> EngineConfig {
    EngineConfig::default().with_wait_timeout(Some(wait_timeout))
}

/// Engine over `store` with a short confirmation bound
pub fn engine_over<C: ActionClient>(
    store: &EntityStore,
    client: Arc<C>,
    wait_timeout: Duration,
) -> OptimisticEngine<C> {
    OptimisticEngine::with_store(quick_config(wait_timeout), store.clone(), client)
        .expect("fixture config is valid")
}
