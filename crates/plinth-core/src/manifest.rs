//! Plugin manifests for loading behavior scripts from disk.
//!
//! ```toml
//! [[plugin]]
//! id = "smelter"
//! path = "buildings/smelter.lua"
//! kind = "building"
//! trust = "trusted"
//! ```
//!
//! Relative paths resolve against the manifest's directory.

use crate::{ManifestError, PluginDescriptor, PluginKind, TrustLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(rename = "plugin", default)]
    pub plugins: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub kind: PluginKind,
    #[serde(default)]
    pub trust: TrustLevel,
}

impl PluginManifest {
    /// Parse a manifest from TOML text. Paths are left as written.
    pub fn parse(contents: &str, origin: &Path) -> Result<Self, ManifestError> {
        let manifest: PluginManifest =
            toml::from_str(contents).map_err(|source| ManifestError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;

        let mut seen = HashSet::new();
        for entry in &manifest.plugins {
            if !seen.insert(entry.id.as_str()) {
                return Err(ManifestError::DuplicateId(entry.id.clone()));
            }
        }
        Ok(manifest)
    }

    /// Load a manifest file and resolve plugin paths against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest = Self::parse(&contents, path)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for entry in &mut manifest.plugins {
            if entry.path.is_relative() {
                entry.path = base.join(&entry.path);
            }
        }
        Ok(manifest)
    }

    pub fn find(&self, id: &str) -> Option<&ManifestEntry> {
        self.plugins.iter().find(|entry| entry.id == id)
    }

    /// Read every listed script into a descriptor.
    pub fn descriptors(&self) -> Result<Vec<PluginDescriptor>, ManifestError> {
        self.plugins.iter().map(ManifestEntry::descriptor).collect()
    }
}

impl ManifestEntry {
    /// Read the script source into a descriptor.
    pub fn descriptor(&self) -> Result<PluginDescriptor, ManifestError> {
        let source = fs::read_to_string(&self.path).map_err(|source| ManifestError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(PluginDescriptor {
            id: self.id.clone(),
            source,
            kind: self.kind,
            trust: self.trust,
        })
    }
}
