//! Optimist Testing Infrastructure
//!
//! Scripted remote clients, a simulated starter world, and fixtures shared
//! by the integration tests under `tests/`.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! ```rust,no_run
//! use optimist_testkit::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = seeded_store([(player(1), moves_entity(0))]);
//! let client = Arc::new(ScriptedClient::new(store.clone()).then(ScriptedOutcome::reject("nope")));
//! let engine = engine_over(&store, client, Duration::from_millis(100));
//! ```

pub mod fixtures;
pub mod scripted;
pub mod world;

pub use fixtures::*;
pub use scripted::{ScriptedClient, ScriptedOutcome};
pub use world::StarterWorld;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to debug output for `optimist_core`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("optimist_core=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
