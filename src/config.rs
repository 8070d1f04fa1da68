//! Engine configuration loaded from `.lumen/config.yaml`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Capability names are lower_snake_case identifiers.
static CAPABILITY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid regex"));

pub const CONFIG_DIR: &str = ".lumen";
pub const CONFIG_FILE: &str = "config.yaml";

/// Runtime settings for one project. Every field has a default so a
/// project with no config file still runs (with an empty capability set,
/// which blocks every tool).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capabilities granted to this app. Deny-by-default: a tool whose
    /// derived capabilities are not all listed here is blocked.
    pub capabilities: Vec<String>,
    /// Wall-clock budget for a single sandboxed tool invocation.
    pub tool_timeout_seconds: u64,
    /// Call-depth ceiling for flow and function calls.
    pub max_depth: usize,
    /// Directory holding installed tool packs, relative to the project root.
    pub packs_dir: PathBuf,
    /// Directory holding sandbox runner support files.
    pub runners_dir: PathBuf,
    /// Where explain logs are written, relative to the project root.
    pub explain_dir: PathBuf,
    /// Extra keys redacted from explain entries, on top of the built-ins.
    pub redact_keys: Vec<String>,
    /// Storage file for record persistence.
    pub storage_path: PathBuf,
    /// Initial UI theme name.
    pub theme: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            capabilities: Vec::new(),
            tool_timeout_seconds: 10,
            max_depth: 64,
            packs_dir: PathBuf::from(".lumen/packs"),
            runners_dir: PathBuf::from(".lumen/runners"),
            explain_dir: PathBuf::from(".lumen/explain"),
            redact_keys: Vec::new(),
            storage_path: PathBuf::from(".lumen/storage.json"),
            theme: "light".to_string(),
        }
    }
}

impl AppConfig {
    /// Load the project config from `<root>/.lumen/config.yaml`, falling
    /// back to defaults when the file does not exist.
    pub fn load(project_root: &Path) -> Result<Self, EngineError> {
        let path = project_root.join(CONFIG_DIR).join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: AppConfig = serde_yaml::from_str(&raw).map_err(|e| EngineError::Config {
            message: format!("invalid {}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.tool_timeout_seconds == 0 {
            return Err(EngineError::Config {
                message: "tool_timeout_seconds must be at least 1".to_string(),
            });
        }
        if self.max_depth == 0 {
            return Err(EngineError::Config {
                message: "max_depth must be at least 1".to_string(),
            });
        }
        for capability in &self.capabilities {
            if !CAPABILITY_NAME.is_match(capability) {
                return Err(EngineError::Config {
                    message: format!(
                        "capability '{capability}' is not a lower_snake_case name"
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deny_everything() {
        let config = AppConfig::default();
        assert!(config.capabilities.is_empty());
        assert_eq!(config.tool_timeout_seconds, 10);
        assert_eq!(config.max_depth, 64);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert!(config.capabilities.is_empty());
    }

    #[test]
    fn loads_granted_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let lumen = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&lumen).unwrap();
        std::fs::write(
            lumen.join(CONFIG_FILE),
            "capabilities: [network, filesystem_read]\ntool_timeout_seconds: 3\n",
        )
        .unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.capabilities, vec!["network", "filesystem_read"]);
        assert_eq!(config.tool_timeout_seconds, 3);
    }

    #[test]
    fn malformed_capability_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let lumen = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&lumen).unwrap();
        std::fs::write(lumen.join(CONFIG_FILE), "capabilities: ['Net Work!']\n").unwrap();
        let err = AppConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Net Work!"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let lumen = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&lumen).unwrap();
        std::fs::write(lumen.join(CONFIG_FILE), "tool_timeout_seconds: 0\n").unwrap();
        let err = AppConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }
}
