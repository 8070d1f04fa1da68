//! Tool binding resolution.
//!
//! A binding maps a declared tool name to how it actually runs: a runner,
//! an entry module, and a timeout. Project config (`.lumen/tools.yaml`)
//! wins; installed packs are the fallback and carry their own permission
//! policy. Resolution happens on every call rather than being cached so
//! live edits to config or packs take effect immediately.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::{AppConfig, CONFIG_DIR};
use crate::error::EngineError;
use crate::registry::PackRegistry;

pub const TOOLS_FILE: &str = "tools.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runner {
    Python,
    Node,
}

impl Runner {
    pub fn parse(tool: &str, raw: &str) -> Result<Self, EngineError> {
        match raw {
            "python" => Ok(Runner::Python),
            "node" => Ok(Runner::Node),
            other => Err(EngineError::UnknownRunner {
                tool: tool.to_string(),
                runner: other.to_string(),
            }),
        }
    }

    pub fn command(self) -> &'static str {
        match self {
            Runner::Python => "python3",
            Runner::Node => "node",
        }
    }

    /// Runner-side harness module that speaks the wire protocol.
    pub fn harness(self) -> &'static str {
        match self {
            Runner::Python => "harness.py",
            Runner::Node => "harness.js",
        }
    }
}

impl std::fmt::Display for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Runner::Python => write!(f, "python"),
            Runner::Node => write!(f, "node"),
        }
    }
}

/// Where a binding came from; pack-sourced bindings went through the
/// pack's permission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingSource {
    Project,
    Pack(String),
}

#[derive(Debug, Clone)]
pub struct ToolBinding {
    pub tool: String,
    pub runner: Runner,
    pub entry: String,
    pub timeout_seconds: u64,
    pub source: BindingSource,
}

#[derive(Debug, Clone, Deserialize)]
struct ProjectBinding {
    entry: String,
    runner: String,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

fn load_project_bindings(
    project_root: &Path,
) -> Result<BTreeMap<String, ProjectBinding>, EngineError> {
    let path = project_root.join(CONFIG_DIR).join(TOOLS_FILE);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = std::fs::read_to_string(&path)?;
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_yaml::from_str(&raw).map_err(|e| EngineError::Config {
        message: format!("invalid {}: {e}", path.display()),
    })
}

/// Resolve a tool to its binding: project config first, then installed
/// packs. Pack bindings undergo the pack's permission check; denial is a
/// policy error, not a crash.
pub fn resolve(
    tool: &str,
    config: &AppConfig,
    project_root: &Path,
) -> Result<ToolBinding, EngineError> {
    let project = load_project_bindings(project_root)?;
    if let Some(binding) = project.get(tool) {
        return Ok(ToolBinding {
            tool: tool.to_string(),
            runner: Runner::parse(tool, &binding.runner)?,
            entry: binding.entry.clone(),
            timeout_seconds: binding
                .timeout_seconds
                .unwrap_or(config.tool_timeout_seconds),
            source: BindingSource::Project,
        });
    }

    let registry = PackRegistry::scan(&project_root.join(&config.packs_dir))?;
    if let Some((pack, pack_tool)) = registry.find_tool(tool) {
        pack.permit(tool).map_err(|reason| EngineError::PolicyDenied {
            tool: tool.to_string(),
            reason,
        })?;
        return Ok(ToolBinding {
            tool: tool.to_string(),
            runner: Runner::parse(tool, &pack_tool.runner)?,
            entry: pack_tool.entry.clone(),
            timeout_seconds: pack_tool
                .timeout_seconds
                .unwrap_or(config.tool_timeout_seconds),
            source: BindingSource::Pack(pack.manifest.name.clone()),
        });
    }

    Err(EngineError::MissingBinding {
        tool: tool.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    fn project_with_tools(tools_yaml: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let lumen = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&lumen).unwrap();
        std::fs::write(lumen.join(TOOLS_FILE), tools_yaml).unwrap();
        dir
    }

    #[test]
    fn project_binding_wins() {
        let dir = project_with_tools(
            "fetch_page:\n  entry: tools.fetch\n  runner: python\n  timeout_seconds: 5\n",
        );
        let binding = resolve("fetch_page", &AppConfig::default(), dir.path()).unwrap();
        assert_eq!(binding.runner, Runner::Python);
        assert_eq!(binding.entry, "tools.fetch");
        assert_eq!(binding.timeout_seconds, 5);
        assert_eq!(binding.source, BindingSource::Project);
    }

    #[test]
    fn bindings_re_resolve_on_every_call() {
        let dir = project_with_tools("t:\n  entry: tools.old\n  runner: python\n");
        let first = resolve("t", &AppConfig::default(), dir.path()).unwrap();
        assert_eq!(first.entry, "tools.old");

        let tools_file = dir.path().join(CONFIG_DIR).join(TOOLS_FILE);
        std::fs::write(&tools_file, "t:\n  entry: tools.new\n  runner: python\n").unwrap();
        let second = resolve("t", &AppConfig::default(), dir.path()).unwrap();
        assert_eq!(second.entry, "tools.new");
    }

    #[test]
    fn default_timeout_applies_when_unset() {
        let dir = project_with_tools("t:\n  entry: tools.t\n  runner: node\n");
        let binding = resolve("t", &AppConfig::default(), dir.path()).unwrap();
        assert_eq!(binding.timeout_seconds, 10);
    }

    #[test]
    fn unknown_runner_is_a_config_error() {
        let dir = project_with_tools("t:\n  entry: tools.t\n  runner: ruby\n");
        let err = resolve("t", &AppConfig::default(), dir.path()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(err.to_string().contains("ruby"));
    }

    #[test]
    fn unbound_tool_is_missing_binding() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve("ghost", &AppConfig::default(), dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::MissingBinding { .. }));
    }

    #[test]
    fn pack_fallback_honors_policy() {
        let dir = tempfile::tempdir().unwrap();
        let pack_dir = dir.path().join(".lumen/packs/scrapers");
        std::fs::create_dir_all(&pack_dir).unwrap();
        std::fs::write(
            pack_dir.join("pack.yaml"),
            "name: scrapers\ntools:\n  fetch_page: { entry: scrapers.fetch, runner: python }\n",
        )
        .unwrap();
        let err = resolve("fetch_page", &AppConfig::default(), dir.path()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Policy);
    }

    #[test]
    fn trusted_pack_binding_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let pack_dir = dir.path().join(".lumen/packs/core");
        std::fs::create_dir_all(&pack_dir).unwrap();
        std::fs::write(
            pack_dir.join("pack.yaml"),
            "name: core\ntrusted: true\ntools:\n  \
             summarize: { entry: core.summarize, runner: node }\n",
        )
        .unwrap();
        let binding = resolve("summarize", &AppConfig::default(), dir.path()).unwrap();
        assert_eq!(binding.source, BindingSource::Pack("core".into()));
        assert_eq!(binding.runner, Runner::Node);
    }
}
