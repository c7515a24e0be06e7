//! Plugin descriptors, render tree, and error types for Plinth.
//!
//! Everything in this crate is plain data: it is shared by the Lua runtime,
//! the worker lane, and every transport that carries render trees to a host.

pub mod error;
pub mod host;
pub mod manifest;
pub mod plugin;
pub mod render;
pub mod state;

pub use error::{LoadError, ManifestError, RuntimeError};
pub use host::{Callbacks, ContextId, DispatchError, HostCallbacks};
pub use manifest::{ManifestEntry, PluginManifest};
pub use plugin::{PluginDescriptor, PluginKind, TrustLevel};
pub use render::{
    Button, CallbackRef, Component, ContentBlock, MapOverlayEntry, PROTOCOL_VERSION,
    RenderResponse, Submission,
};
pub use state::Snapshot;
