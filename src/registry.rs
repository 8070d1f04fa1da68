//! Installed tool packs.
//!
//! A pack is a versioned directory under the project's packs dir with a
//! `pack.yaml` manifest declaring the tool bindings it provides and its
//! trust policy. Packs are re-scanned on every resolution so installing
//! or editing a pack takes effect without restarting.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::EngineError;

pub const PACK_MANIFEST: &str = "pack.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct PackManifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Untrusted packs are scanned but every binding they provide is
    /// policy-denied unless the tool is explicitly allowed.
    #[serde(default)]
    pub trusted: bool,
    #[serde(default)]
    pub allow_tools: Vec<String>,
    #[serde(default)]
    pub tools: BTreeMap<String, PackTool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackTool {
    pub entry: String,
    pub runner: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Pack {
    pub manifest: PackManifest,
    pub dir: PathBuf,
}

impl Pack {
    /// Pack-level permission evaluation for one tool. `Ok` means the
    /// binding may be used; `Err` carries the denial reason.
    pub fn permit(&self, tool: &str) -> Result<(), String> {
        if self.manifest.trusted {
            return Ok(());
        }
        if self.manifest.allow_tools.iter().any(|t| t == tool) {
            return Ok(());
        }
        Err(format!(
            "pack '{}' is not trusted and does not allow tool '{tool}'",
            self.manifest.name
        ))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PackRegistry {
    pub packs: Vec<Pack>,
}

impl PackRegistry {
    /// Scan the packs directory for manifests. A missing directory is an
    /// empty registry, not an error; a malformed manifest is.
    pub fn scan(packs_dir: &Path) -> Result<Self, EngineError> {
        let mut packs = Vec::new();
        if !packs_dir.is_dir() {
            return Ok(Self { packs });
        }
        for entry in WalkDir::new(packs_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_name() != PACK_MANIFEST {
                continue;
            }
            let raw = std::fs::read_to_string(entry.path())?;
            let manifest: PackManifest =
                serde_yaml::from_str(&raw).map_err(|e| EngineError::Config {
                    message: format!("invalid pack manifest {}: {e}", entry.path().display()),
                })?;
            let dir = entry
                .path()
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| packs_dir.to_path_buf());
            packs.push(Pack { manifest, dir });
        }
        // Stable order regardless of filesystem enumeration order.
        packs.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
        Ok(Self { packs })
    }

    /// First pack providing a binding for `tool`, in name order.
    pub fn find_tool(&self, tool: &str) -> Option<(&Pack, &PackTool)> {
        self.packs
            .iter()
            .find_map(|pack| pack.manifest.tools.get(tool).map(|t| (pack, t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pack(root: &Path, dir_name: &str, manifest: &str) {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(PACK_MANIFEST), manifest).unwrap();
    }

    #[test]
    fn missing_packs_dir_is_empty_registry() {
        let registry = PackRegistry::scan(Path::new("/nonexistent/packs")).unwrap();
        assert!(registry.packs.is_empty());
    }

    #[test]
    fn scans_manifests_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), "zeta", "name: zeta\ntrusted: true\n");
        write_pack(dir.path(), "alpha", "name: alpha\ntrusted: true\n");
        let registry = PackRegistry::scan(dir.path()).unwrap();
        let names: Vec<_> = registry
            .packs
            .iter()
            .map(|p| p.manifest.name.as_str())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn untrusted_pack_denies_unlisted_tool() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(
            dir.path(),
            "scrapers",
            "name: scrapers\nallow_tools: [fetch_page]\ntools:\n  \
             fetch_page: { entry: scrapers.fetch, runner: python }\n  \
             purge_cache: { entry: scrapers.purge, runner: python }\n",
        );
        let registry = PackRegistry::scan(dir.path()).unwrap();
        let (pack, _) = registry.find_tool("fetch_page").unwrap();
        assert!(pack.permit("fetch_page").is_ok());
        let reason = pack.permit("purge_cache").unwrap_err();
        assert!(reason.contains("not trusted"));
    }

    #[test]
    fn trusted_pack_permits_everything_it_provides() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(
            dir.path(),
            "core",
            "name: core\ntrusted: true\ntools:\n  \
             summarize: { entry: core.summarize, runner: node, timeout_seconds: 30 }\n",
        );
        let registry = PackRegistry::scan(dir.path()).unwrap();
        let (pack, tool) = registry.find_tool("summarize").unwrap();
        assert!(pack.permit("summarize").is_ok());
        assert_eq!(tool.runner, "node");
        assert_eq!(tool.timeout_seconds, Some(30));
    }
}
