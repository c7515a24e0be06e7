//! Client session management.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use rhizome_plinth_core::ContextId;

/// Unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected client and the contexts it created.
///
/// A session can only see its own contexts; they are deleted with it.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub addr: SocketAddr,
    contexts: BTreeSet<ContextId>,
}

impl Session {
    pub fn new(id: SessionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            contexts: BTreeSet::new(),
        }
    }

    pub fn track(&mut self, context: ContextId) {
        self.contexts.insert(context);
    }

    /// Forget a context. Returns whether this session owned it.
    pub fn untrack(&mut self, context: ContextId) -> bool {
        self.contexts.remove(&context)
    }

    pub fn owns(&self, context: ContextId) -> bool {
        self.contexts.contains(&context)
    }

    pub fn contexts(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.contexts.iter().copied()
    }
}
