//! Collaborators supplied by the host when a context is created.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of a live execution context.
///
/// Allocated from an increasing counter and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(u64);

impl ContextId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure reported by the host's action-dispatch layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// The host side of the capability bridge.
///
/// Implementations are called from the runtime's worker thread and must not
/// block it; `dispatch` returns a future that the calling script awaits.
pub trait HostCallbacks: Send + Sync {
    /// Turn plugin actions into whatever the host submits on-chain.
    fn dispatch(
        &self,
        context: ContextId,
        actions: Vec<serde_json::Value>,
    ) -> BoxFuture<'static, Result<(), DispatchError>>;

    /// Plugin log output.
    fn log(&self, context: ContextId, args: Vec<serde_json::Value>);

    /// Quest signal side-channel.
    fn quest(&self, context: ContextId, args: Vec<serde_json::Value>);
}

/// [`HostCallbacks`] assembled from three closures.
pub struct Callbacks<D, L, Q> {
    dispatch: D,
    log: L,
    quest: Q,
}

impl<D, L, Q> Callbacks<D, L, Q>
where
    D: Fn(ContextId, Vec<serde_json::Value>) -> BoxFuture<'static, Result<(), DispatchError>>
        + Send
        + Sync,
    L: Fn(ContextId, Vec<serde_json::Value>) + Send + Sync,
    Q: Fn(ContextId, Vec<serde_json::Value>) + Send + Sync,
{
    pub fn new(dispatch: D, log: L, quest: Q) -> Self {
        Self {
            dispatch,
            log,
            quest,
        }
    }
}

impl<D, L, Q> HostCallbacks for Callbacks<D, L, Q>
where
    D: Fn(ContextId, Vec<serde_json::Value>) -> BoxFuture<'static, Result<(), DispatchError>>
        + Send
        + Sync,
    L: Fn(ContextId, Vec<serde_json::Value>) + Send + Sync,
    Q: Fn(ContextId, Vec<serde_json::Value>) + Send + Sync,
{
    fn dispatch(
        &self,
        context: ContextId,
        actions: Vec<serde_json::Value>,
    ) -> BoxFuture<'static, Result<(), DispatchError>> {
        (self.dispatch)(context, actions)
    }

    fn log(&self, context: ContextId, args: Vec<serde_json::Value>) {
        (self.log)(context, args)
    }

    fn quest(&self, context: ContextId, args: Vec<serde_json::Value>) {
        (self.quest)(context, args)
    }
}
