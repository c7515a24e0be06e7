//! Resolving a command-line plugin argument to a descriptor.

use anyhow::{Context, Result};
use rhizome_plinth_core::{PluginDescriptor, PluginManifest};
use std::path::Path;

/// Treat `target` as a script path if it exists, else as a manifest id.
pub fn resolve(target: &str, manifest: Option<&Path>) -> Result<PluginDescriptor> {
    let path = Path::new(target);
    if path.is_file() {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plugin script: {}", path.display()))?;
        let id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| target.to_string());
        return Ok(PluginDescriptor::new(id, source));
    }

    let Some(manifest_path) = manifest else {
        anyhow::bail!("{target} is not a file and no plugin manifest is configured");
    };
    let manifest = PluginManifest::load(manifest_path)?;
    let entry = manifest
        .find(target)
        .with_context(|| format!("Plugin '{target}' is not in {}", manifest_path.display()))?;
    Ok(entry.descriptor()?)
}

/// Read every plugin listed in a manifest.
pub fn preload(manifest: &Path) -> Result<Vec<PluginDescriptor>> {
    let manifest = PluginManifest::load(manifest)
        .with_context(|| format!("Failed to load plugin manifest: {}", manifest.display()))?;
    Ok(manifest.descriptors()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhizome_plinth_core::TrustLevel;
    use std::fs;

    #[test]
    fn test_resolve_script_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("smelter.lua");
        fs::write(&script, "function update() end").unwrap();

        let descriptor = resolve(script.to_str().unwrap(), None).unwrap();
        assert_eq!(descriptor.id, "smelter");
        assert_eq!(descriptor.source, "function update() end");
        assert_eq!(descriptor.trust, TrustLevel::Untrusted);
    }

    #[test]
    fn test_resolve_manifest_id() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.lua"), "function update() end").unwrap();
        let manifest = dir.path().join("manifest.toml");
        fs::write(
            &manifest,
            "[[plugin]]\nid = \"alpha\"\npath = \"a.lua\"\ntrust = \"trusted\"\n",
        )
        .unwrap();

        let descriptor = resolve("alpha", Some(&manifest)).unwrap();
        assert_eq!(descriptor.id, "alpha");
        assert_eq!(descriptor.trust, TrustLevel::Trusted);

        assert!(resolve("beta", Some(&manifest)).is_err());
        assert!(resolve("alpha", None).is_err());
        assert_eq!(preload(&manifest).unwrap().len(), 1);
    }
}
