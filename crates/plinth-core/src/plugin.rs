//! Plugin descriptors supplied by the host when a context is created.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of game object a plugin customizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    #[default]
    Building,
    Item,
}

/// Advisory trust tag. Both levels currently receive the same capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Trusted,
    #[default]
    Untrusted,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Building => f.write_str("building"),
            PluginKind::Item => f.write_str("item"),
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustLevel::Trusted => f.write_str("trusted"),
            TrustLevel::Untrusted => f.write_str("untrusted"),
        }
    }
}

/// A behavior script and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Host-assigned plugin identifier (used in logs only).
    pub id: String,
    /// Raw script source.
    pub source: String,
    #[serde(default)]
    pub kind: PluginKind,
    #[serde(default)]
    pub trust: TrustLevel,
}

impl PluginDescriptor {
    /// Create an untrusted building plugin.
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            kind: PluginKind::default(),
            trust: TrustLevel::default(),
        }
    }

    pub fn with_kind(mut self, kind: PluginKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_trust(mut self, trust: TrustLevel) -> Self {
        self.trust = trust;
        self
    }
}
