//! LuaJIT runtime for Plinth plugins.
//!
//! Loads behavior scripts into isolated Lua VMs, injects the `ds` capability
//! bridge, and converts their render output into plain data.

pub mod abi;
pub mod capability;
pub mod loader;
pub mod render;
pub mod sandbox;

pub use capability::{Capabilities, CapabilityError};
pub use loader::{LoadedModule, load, strip_imports};
pub use render::{RefTable, RenderError, Rendered};

/// Re-exported so callers can name captured callbacks.
pub use mlua::Function as Callback;

use thiserror::Error;

/// Errors raised while a script runs.
///
/// These never reach the host: the runtime logs them and degrades to an empty
/// render or a no-op submit.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("render error: {0}")]
    Render(#[from] RenderError),
}
