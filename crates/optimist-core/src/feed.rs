//! Authoritative feed ingestion
//!
//! Drains a stream of authoritative updates (an indexer subscription, a
//! polling loop, a test script) into the [`EntityStore`].

use crate::store::{AuthoritativeUpdate, EntityStore};
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;

/// Apply every update from `updates` until the stream ends.
///
/// Returns how many updates were applied; stale updates are skipped and not
/// counted.
pub async fn forward_updates<S>(store: EntityStore, updates: S) -> usize
where
    S: Stream<Item = AuthoritativeUpdate>,
{
    futures::pin_mut!(updates);
    let mut applied = 0;
    let mut skipped = 0;
    while let Some(update) = updates.next().await {
        if store.apply_authoritative(update).is_some() {
            applied += 1;
        } else {
            skipped += 1;
        }
    }
    tracing::debug!(applied, skipped, "authoritative feed ended");
    applied
}

/// Run [`forward_updates`] on a background task
pub fn spawn_forwarder<S>(store: EntityStore, updates: S) -> JoinHandle<usize>
where
    S: Stream<Item = AuthoritativeUpdate> + Send + 'static,
{
    tokio::spawn(forward_updates(store, updates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityState;
    use crate::identifiers::EntityKey;
    use serde_json::json;

    fn moves(remaining: u64) -> EntityState {
        EntityState::new().with_model("Moves", json!({"remaining": remaining}))
    }

    #[tokio::test]
    async fn test_forward_skips_stale_updates() {
        let store = EntityStore::new();
        let updates = futures::stream::iter(vec![
            AuthoritativeUpdate::replace("0xa", moves(1)).with_revision(1),
            AuthoritativeUpdate::replace("0xa", moves(3)).with_revision(3),
            AuthoritativeUpdate::replace("0xa", moves(2)).with_revision(2),
            AuthoritativeUpdate::replace("0xb", moves(9)),
        ]);

        let applied = forward_updates(store.clone(), updates).await;

        assert_eq!(applied, 3);
        assert_eq!(store.get(&EntityKey::from("0xa")), Some(moves(3)));
        assert_eq!(store.entity_count(), 2);
    }

    #[tokio::test]
    async fn test_spawned_forwarder_feeds_from_channel() {
        let store = EntityStore::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|update| (update, rx))
        });
        let handle = spawn_forwarder(store.clone(), stream);

        tx.send(AuthoritativeUpdate::replace("0xa", moves(5))).unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), 1);
        assert_eq!(store.get(&EntityKey::from("0xa")), Some(moves(5)));
    }
}
