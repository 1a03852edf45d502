//! # Entity Store
//!
//! Holds the authoritative-plus-speculative view of every known entity.
//!
//! ## Layering
//!
//! Each entity slot keeps the last authoritative state and an ordered list
//! of speculative overlays, one per transaction. The visible state (the
//! *view*) is always the authoritative base with every overlay re-applied in
//! begin order:
//!
//! ```text
//! view = overlay_n( ... overlay_1( authoritative ) )
//! ```
//!
//! This gives merge-on-arrival for free: when a new authoritative state
//! lands, pending overlays are replayed on top of it, so a speculative write
//! to a field the push does not mention is never silently dropped. Settled
//! (confirmed) overlays stay applied until the next authoritative push for
//! the entity, which is expected to already contain their effect.
//!
//! An entity is *visible* when it has an authoritative base or its overlays
//! wrote at least one field. A patch that changes nothing on an unknown
//! entity is still recorded, so it can be reverted, but reads keep
//! reporting the entity as absent.
//!
//! The last source revision outlives a remote deletion, so a stale update
//! delivered after the delete cannot bring the entity back.
//!
//! ## Notifications
//!
//! Every view-changing mutation emits an [`EntityChange`] to that key's
//! watchers while the store lock is still held, so delivery order matches
//! mutation order per key.

use crate::config::WaitTarget;
use crate::entity::EntityState;
use crate::identifiers::{EntityKey, TransactionId};
use crate::patch::{Patch, PreImage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────────────
// Authoritative updates
// ─────────────────────────────────────────────────────────────────────────────

/// How an authoritative update combines with the stored base state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    /// The update is the complete entity
    #[default]
    Replace,
    /// Models in the update replace the stored ones; other models are kept
    MergeModels,
}

/// State pushed by the authoritative data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthoritativeUpdate {
    /// Target entity
    pub key: EntityKey,
    /// New state (or partial state for [`UpdateMode::MergeModels`])
    pub state: EntityState,
    /// Combination rule
    pub mode: UpdateMode,
    /// Monotonic per-entity revision, when the source provides one
    pub revision: Option<u64>,
}

impl AuthoritativeUpdate {
    /// Full replacement of an entity
    pub fn replace(key: impl Into<EntityKey>, state: EntityState) -> Self {
        Self {
            key: key.into(),
            state,
            mode: UpdateMode::Replace,
            revision: None,
        }
    }

    /// Model-level merge into an entity
    pub fn merge(key: impl Into<EntityKey>, state: EntityState) -> Self {
        Self {
            key: key.into(),
            state,
            mode: UpdateMode::MergeModels,
            revision: None,
        }
    }

    /// Attach a source revision
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Change notifications
// ─────────────────────────────────────────────────────────────────────────────

/// What caused an entity change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeCause {
    /// A speculative patch was applied
    Speculative(TransactionId),
    /// A speculative patch was removed
    Reverted(TransactionId),
    /// The authoritative source pushed new state
    Authoritative,
    /// The authoritative source deleted the entity
    Removed,
}

/// Both layers of an entity at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityLayers {
    /// Last authoritative state, if any has arrived
    pub authoritative: Option<EntityState>,
    /// Authoritative state plus speculative overlays; `None` when the
    /// entity is unknown
    pub view: Option<EntityState>,
}

impl EntityLayers {
    /// The layer a wait target observes
    pub fn select(&self, target: WaitTarget) -> Option<&EntityState> {
        match target {
            WaitTarget::Authoritative => self.authoritative.as_ref(),
            WaitTarget::Merged => self.view.as_ref(),
        }
    }
}

/// Notification delivered to watchers of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange {
    /// Entity that changed
    pub key: EntityKey,
    /// Store-wide mutation sequence number
    pub seq: u64,
    /// Mutation that produced this change
    pub cause: ChangeCause,
    /// Entity layers after the mutation
    pub layers: EntityLayers,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Overlay {
    transaction_id: TransactionId,
    patch: Patch,
    settled: bool,
}

#[derive(Debug, Default)]
struct Slot {
    authoritative: Option<EntityState>,
    revision: Option<u64>,
    overlays: Vec<Overlay>,
    view: EntityState,
}

impl Slot {
    fn rebuild(&mut self) {
        let mut view = self.authoritative.clone().unwrap_or_default();
        for overlay in &self.overlays {
            overlay.patch.apply_in_place(&mut view);
        }
        self.view = view;
    }

    fn visible(&self) -> Option<&EntityState> {
        if self.authoritative.is_some() || !self.view.is_empty() {
            Some(&self.view)
        } else {
            None
        }
    }

    fn is_vacant(&self) -> bool {
        self.authoritative.is_none() && self.overlays.is_empty() && self.revision.is_none()
    }

    fn layers(&self) -> EntityLayers {
        EntityLayers {
            authoritative: self.authoritative.clone(),
            view: self.visible().cloned(),
        }
    }
}

#[derive(Debug)]
struct Watcher {
    id: u64,
    tx: mpsc::UnboundedSender<EntityChange>,
}

#[derive(Debug, Default)]
struct StoreInner {
    slots: HashMap<EntityKey, Slot>,
    watchers: HashMap<EntityKey, Vec<Watcher>>,
    next_watcher_id: u64,
    seq: u64,
}

impl StoreInner {
    fn layers(&self, key: &EntityKey) -> EntityLayers {
        self.slots.get(key).map(Slot::layers).unwrap_or_default()
    }

    fn notify(&mut self, key: &EntityKey, cause: ChangeCause) {
        self.seq += 1;
        let change = EntityChange {
            key: key.clone(),
            seq: self.seq,
            cause,
            layers: self.layers(key),
        };

        let now_empty = match self.watchers.get_mut(key) {
            Some(watchers) => {
                watchers.retain(|w| w.tx.send(change.clone()).is_ok());
                watchers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.watchers.remove(key);
        }
    }

    fn remove_watcher(&mut self, key: &EntityKey, id: u64) {
        if let Some(watchers) = self.watchers.get_mut(key) {
            watchers.retain(|w| w.id != id);
            if watchers.is_empty() {
                self.watchers.remove(key);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity Store
// ─────────────────────────────────────────────────────────────────────────────

/// Shared handle to the entity store.
///
/// Cloning is cheap; all clones see the same entities. Speculative writes
/// are crate-private and go through [`crate::OptimisticLedger`]; the only
/// public mutation path is the authoritative sink.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl EntityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current view of an entity (authoritative plus speculative)
    pub fn get(&self, key: &EntityKey) -> Option<EntityState> {
        self.inner
            .lock()
            .slots
            .get(key)
            .and_then(Slot::visible)
            .cloned()
    }

    /// Last authoritative state of an entity
    pub fn get_authoritative(&self, key: &EntityKey) -> Option<EntityState> {
        self.inner
            .lock()
            .slots
            .get(key)
            .and_then(|slot| slot.authoritative.clone())
    }

    /// Both layers of an entity, read atomically
    pub fn layers(&self, key: &EntityKey) -> EntityLayers {
        self.inner.lock().layers(key)
    }

    /// Check whether the entity is visible (in either layer)
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.inner
            .lock()
            .slots
            .get(key)
            .is_some_and(|slot| slot.visible().is_some())
    }

    /// Number of entities with authoritative state
    pub fn entity_count(&self) -> usize {
        self.inner
            .lock()
            .slots
            .values()
            .filter(|slot| slot.authoritative.is_some())
            .count()
    }

    /// All visible entity keys, sorted
    pub fn keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<_> = self
            .inner
            .lock()
            .slots
            .iter()
            .filter(|(_, slot)| slot.visible().is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Transactions whose overlays on `key` are still unsettled, in begin order
    pub fn pending_overlays(&self, key: &EntityKey) -> Vec<TransactionId> {
        self.inner
            .lock()
            .slots
            .get(key)
            .map(|slot| {
                slot.overlays
                    .iter()
                    .filter(|o| !o.settled)
                    .map(|o| o.transaction_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of live watchers on `key`
    pub fn watcher_count(&self, key: &EntityKey) -> usize {
        self.inner.lock().watchers.get(key).map_or(0, Vec::len)
    }

    /// Register a watcher on `key`.
    ///
    /// The returned subscription carries the entity layers as of
    /// registration; every later change is delivered through it. Both happen
    /// under one lock, so no change can fall between the two.
    pub fn watch(&self, key: &EntityKey) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.next_watcher_id += 1;
        let id = inner.next_watcher_id;
        inner
            .watchers
            .entry(key.clone())
            .or_default()
            .push(Watcher { id, tx });

        Subscription {
            id,
            key: key.clone(),
            initial: inner.layers(key),
            rx,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Replace an entity's authoritative state.
    pub fn set_authoritative(&self, key: impl Into<EntityKey>, state: EntityState) -> EntityState {
        // Updates without a revision are never stale.
        self.apply_authoritative(AuthoritativeUpdate::replace(key, state))
            .unwrap_or_default()
    }

    /// Apply an authoritative update and replay pending overlays on top.
    ///
    /// Returns the new view, or `None` when the update carried a revision
    /// not newer than the last one seen for the entity.
    pub fn apply_authoritative(&self, update: AuthoritativeUpdate) -> Option<EntityState> {
        let AuthoritativeUpdate {
            key,
            state,
            mode,
            revision,
        } = update;

        let mut inner = self.inner.lock();
        let slot = inner.slots.entry(key.clone()).or_default();

        if let (Some(incoming), Some(last)) = (revision, slot.revision) {
            if incoming <= last {
                tracing::debug!(
                    entity = %key,
                    incoming,
                    last,
                    "ignoring stale authoritative update"
                );
                return None;
            }
        }

        let base = match mode {
            UpdateMode::Replace => state,
            UpdateMode::MergeModels => {
                let mut base = slot.authoritative.take().unwrap_or_default();
                base.merge_models(&state);
                base
            }
        };
        slot.authoritative = Some(base);
        if revision.is_some() {
            slot.revision = revision;
        }

        let before = slot.overlays.len();
        slot.overlays.retain(|o| !o.settled);
        let settled_dropped = before - slot.overlays.len();
        slot.rebuild();
        let view = slot.view.clone();

        tracing::debug!(
            entity = %key,
            pending_replayed = slot.overlays.len(),
            settled_dropped,
            "authoritative update applied"
        );

        inner.notify(&key, ChangeCause::Authoritative);
        Some(view)
    }

    /// Drop an entity's authoritative state.
    ///
    /// Pending overlays keep the entity visible until they resolve. The last
    /// revision is kept, so older revisioned updates stay stale. Returns
    /// false when the entity had no authoritative state.
    pub fn remove_authoritative(&self, key: &EntityKey) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(key) else {
            return false;
        };
        if slot.authoritative.take().is_none() {
            return false;
        }
        slot.overlays.retain(|o| !o.settled);
        slot.rebuild();
        if slot.is_vacant() {
            inner.slots.remove(key);
        }
        inner.notify(key, ChangeCause::Removed);
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Speculative writes (ledger only)
    // ─────────────────────────────────────────────────────────────────────

    /// Layer a speculative patch on top of the entity.
    ///
    /// The overlay is recorded even when the patch writes nothing, e.g. a
    /// `set_existing` on an unknown entity; such an entity stays absent.
    pub(crate) fn apply_patch(
        &self,
        key: &EntityKey,
        transaction_id: TransactionId,
        patch: Patch,
    ) -> (EntityState, PreImage) {
        let mut inner = self.inner.lock();
        let slot = inner.slots.entry(key.clone()).or_default();
        let pre_image = patch.apply_in_place(&mut slot.view);
        slot.overlays.push(Overlay {
            transaction_id,
            patch,
            settled: false,
        });
        let view = slot.view.clone();
        inner.notify(key, ChangeCause::Speculative(transaction_id));
        (view, pre_image)
    }

    /// Remove a transaction's overlay and rebuild the view from the
    /// remaining layers. Returns the new view (`None` once the entity is
    /// no longer visible).
    pub(crate) fn revert_patch(
        &self,
        key: &EntityKey,
        transaction_id: TransactionId,
    ) -> Option<EntityState> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(key)?;
        let Some(position) = slot
            .overlays
            .iter()
            .position(|o| o.transaction_id == transaction_id)
        else {
            return slot.visible().cloned();
        };
        slot.overlays.remove(position);
        slot.rebuild();

        let view = slot.visible().cloned();
        if slot.is_vacant() {
            inner.slots.remove(key);
        }
        inner.notify(key, ChangeCause::Reverted(transaction_id));
        view
    }

    /// Mark a transaction's overlay as settled. The overlay stays applied
    /// until the next authoritative push for the entity.
    pub(crate) fn settle_patch(&self, key: &EntityKey, transaction_id: TransactionId) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(key) else {
            return false;
        };
        match slot
            .overlays
            .iter_mut()
            .find(|o| o.transaction_id == transaction_id)
        {
            Some(overlay) => {
                overlay.settled = true;
                true
            }
            None => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription
// ─────────────────────────────────────────────────────────────────────────────

/// Watcher registration for one entity. Dropping it unregisters the watcher.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    key: EntityKey,
    initial: EntityLayers,
    rx: mpsc::UnboundedReceiver<EntityChange>,
    store: Weak<Mutex<StoreInner>>,
}

impl Subscription {
    /// Entity being watched
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Entity layers at registration time
    pub fn initial(&self) -> &EntityLayers {
        &self.initial
    }

    /// Next change, in mutation order. `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<EntityChange> {
        self.rx.recv().await
    }

    /// Next already-delivered change, without waiting
    pub fn try_recv(&mut self) -> Option<EntityChange> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner.lock().remove_watcher(&self.key, self.id);
        }
    }
}
