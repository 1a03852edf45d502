//! Remote action client seam
//!
//! The engine does not know how actions reach the remote system; it only
//! needs something that eventually succeeds or fails.

use crate::errors::RemoteError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A state-changing call against the remote system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Action (system entry point) name, e.g. `spawn`
    pub name: String,
    /// Positional arguments, encoded by the caller
    pub args: Vec<Value>,
}

impl ActionRequest {
    /// Create a request without arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Builder: append an argument
    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Submits actions to the remote system.
#[async_trait]
pub trait ActionClient: Send + Sync {
    /// Submit the action and resolve once the remote system accepted or
    /// rejected it.
    async fn invoke(&self, request: &ActionRequest) -> Result<(), RemoteError>;
}

#[async_trait]
impl<T: ActionClient + ?Sized> ActionClient for Arc<T> {
    async fn invoke(&self, request: &ActionRequest) -> Result<(), RemoteError> {
        (**self).invoke(request).await
    }
}
