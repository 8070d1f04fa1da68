//! Deny-by-default capability gate.
//!
//! Every tool call produces a [`ToolDecision`] before the tool body runs.
//! Required capabilities derive from the tool's declared kind, unioned
//! with its explicit declarations; a capability absent from the granted
//! set blocks the call with a remediation message, never a stack trace.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::ir::{ToolDecl, ToolKind};

pub const CAP_NETWORK: &str = "network";
pub const CAP_FS_READ: &str = "filesystem_read";
pub const CAP_FS_WRITE: &str = "filesystem_write";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Allowed,
    Blocked,
    Error,
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DecisionStatus::Allowed => "allowed",
            DecisionStatus::Blocked => "blocked",
            DecisionStatus::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Outcome of the gate for one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDecision {
    pub status: DecisionStatus,
    pub capability: Option<String>,
    pub reason: String,
    pub message: String,
}

impl ToolDecision {
    pub fn allowed(tool: &str) -> Self {
        Self {
            status: DecisionStatus::Allowed,
            capability: None,
            reason: "all required capabilities granted".to_string(),
            message: format!("Tool '{tool}' is allowed to run"),
        }
    }

    pub fn blocked(tool: &str, capability: &str) -> Self {
        Self {
            status: DecisionStatus::Blocked,
            capability: Some(capability.to_string()),
            reason: format!("capability '{capability}' not granted"),
            message: format!(
                "Tool '{tool}' needs the '{capability}' capability. Add it to the \
                 capabilities list in .lumen/config.yaml to allow this tool."
            ),
        }
    }

    pub fn policy_denied(tool: &str, reason: &str) -> Self {
        Self {
            status: DecisionStatus::Error,
            capability: None,
            reason: format!("policy-denied: {reason}"),
            message: format!("Tool '{tool}' was denied by pack policy: {reason}"),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.status == DecisionStatus::Allowed
    }
}

/// Capabilities a tool needs before it may run: kind-derived plus
/// explicit declarations, deduplicated and ordered.
pub fn required_capabilities(tool: &ToolDecl) -> Vec<String> {
    let mut required = BTreeSet::new();
    match tool.kind {
        ToolKind::Network => {
            required.insert(CAP_NETWORK.to_string());
        }
        ToolKind::File => {
            let capability = match tool.operation.as_deref() {
                Some("write") => CAP_FS_WRITE,
                _ => CAP_FS_READ,
            };
            required.insert(capability.to_string());
        }
        ToolKind::Python | ToolKind::Node => {}
    }
    for capability in &tool.capabilities {
        required.insert(capability.clone());
    }
    required.into_iter().collect()
}

/// Evaluate the gate for a tool against the granted capability set.
/// Re-evaluated on every call so config edits take effect live.
pub fn evaluate(tool: &ToolDecl, granted: &[String]) -> ToolDecision {
    for capability in required_capabilities(tool) {
        if !granted.iter().any(|g| g == &capability) {
            return ToolDecision::blocked(&tool.name, &capability);
        }
    }
    ToolDecision::allowed(&tool.name)
}
