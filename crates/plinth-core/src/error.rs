//! Error taxonomy shared by the runtime and its transports.
//!
//! Only host-contract violations surface here. Failures inside script code are
//! contained by the runtime and never become a [`RuntimeError`].

use crate::ContextId;
use std::path::PathBuf;
use thiserror::Error;

/// A plugin could not be turned into a callable module.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("syntax error in plugin '{plugin}': {message}")]
    Syntax { plugin: String, message: String },

    #[error("plugin '{plugin}' failed during evaluation: {message}")]
    Evaluation { plugin: String, message: String },

    #[error("plugin '{0}' does not define an update entry point")]
    MissingEntryPoint(String),

    #[error("failed to prepare sandbox for plugin '{plugin}': {message}")]
    Sandbox { plugin: String, message: String },
}

/// Errors returned to the host by runtime entry points.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("update called before any state was pushed")]
    NotReady,

    #[error("unknown context: {0}")]
    UnknownContext(ContextId),

    #[error("runtime worker is not running")]
    Disconnected,
}

impl RuntimeError {
    /// Stable machine-readable tag used by transports.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::Load(_) => "load",
            RuntimeError::NotReady => "not_ready",
            RuntimeError::UnknownContext(_) => "unknown_context",
            RuntimeError::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("duplicate plugin id '{0}' in manifest")]
    DuplicateId(String),
}
