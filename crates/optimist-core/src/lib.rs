//! Optimist Core - Optimistic Update and Transaction Reconciliation
//!
//! Lets a client show the result of a remote state-changing action before
//! the remote system confirms it, then either keeps that speculative result
//! or rolls it back.
//!
//! # Components
//!
//! ## Entity Store
//! - `EntityStore`: authoritative base plus ordered speculative overlays per
//!   entity, with change notifications per key
//! - Merge-on-arrival: authoritative pushes replay pending overlays
//!
//! ## Optimistic Update Ledger
//! - `OptimisticLedger`: `begin` / `confirm` / `revert` keyed by
//!   `TransactionId`; the only speculative writer
//!
//! ## Change-Wait Coordinator
//! - `ChangeCoordinator`: bounded, cancellable waits for a predicate over an
//!   entity's state
//!
//! ## Transaction Orchestrator
//! - `TransactionOrchestrator`: apply, invoke remote, confirm or revert
//!
//! # Invariants
//! - A transaction identifier is registered at most once
//! - A record leaves `Pending` exactly once
//! - Revert restores exactly the fields the patch touched
//! - Waits never resolve after their bound or after cancellation

#![forbid(unsafe_code)]

// === Data Model ===

/// Transaction and entity identifiers
pub mod identifiers;

/// Entity state: models of JSON fields
pub mod entity;

/// Field-level patches and their pre-images
pub mod patch;

/// Unified error handling
pub mod errors;

/// Engine configuration
pub mod config;

// === Components ===

/// Layered entity store with change notifications
pub mod store;

/// Optimistic update ledger
pub mod ledger;

/// Predicate waits over entity changes
pub mod coordinator;

/// Remote action client seam
pub mod client;

/// Apply / invoke / confirm-or-revert workflow
pub mod orchestrator;

/// Authoritative feed ingestion
pub mod feed;

/// Engine facade
pub mod engine;

/// Starter game system calls
pub mod starter;

// === Re-exports ===

pub use client::{ActionClient, ActionRequest};
pub use config::{EngineConfig, WaitTarget};
pub use coordinator::{ChangeCoordinator, EntityWait, Predicate, WaitCanceller};
pub use engine::OptimisticEngine;
pub use entity::{EntityState, FieldPath, ModelState};
pub use errors::{ConfigError, LedgerError, RemoteError, TransactionError, WaitError};
pub use feed::{forward_updates, spawn_forwarder};
pub use identifiers::{EntityKey, TransactionId};
pub use ledger::{OptimisticLedger, OptimisticUpdate, UpdateStatus};
pub use orchestrator::{
    OptimisticAction, TransactionOrchestrator, TransactionPhase, TransactionReceipt,
};
pub use patch::{FieldWrite, Patch, PatchOp, PreImage};
pub use store::{
    AuthoritativeUpdate, ChangeCause, EntityChange, EntityLayers, EntityStore, Subscription,
    UpdateMode,
};
