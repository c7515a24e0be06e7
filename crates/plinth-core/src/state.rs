//! The process-wide game state snapshot pushed by the host.

use std::sync::Arc;

/// An immutable view of game state at a block height.
///
/// Cloning is cheap; every render captures its own clone when it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    state: Arc<serde_json::Value>,
    block: u64,
}

impl Snapshot {
    pub fn new(state: serde_json::Value, block: u64) -> Self {
        Self {
            state: Arc::new(state),
            block,
        }
    }

    /// The opaque state tree handed to scripts.
    pub fn state(&self) -> &serde_json::Value {
        &self.state
    }

    /// Block height used as the logical clock.
    pub fn block(&self) -> u64 {
        self.block
    }
}
