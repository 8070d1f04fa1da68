//! Engine error types with fix suggestions (v0.1)

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Top-level error taxonomy, surfaced in run results and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Capability,
    Policy,
    Tool,
    Provider,
    Memory,
    Schema,
    Config,
    Engine,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorCategory::Capability => "capability",
            ErrorCategory::Policy => "policy",
            ErrorCategory::Tool => "tool",
            ErrorCategory::Provider => "provider",
            ErrorCategory::Memory => "memory",
            ErrorCategory::Schema => "schema",
            ErrorCategory::Config => "config",
            ErrorCategory::Engine => "engine",
        };
        write!(f, "{label}")
    }
}

/// Where a failure was detected. Attached at the boundary so the
/// cause is never ambiguous downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Ai,
    Memory,
    Store,
    Tools,
    Engine,
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Boundary::Ai => "ai",
            Boundary::Memory => "memory",
            Boundary::Store => "store",
            Boundary::Tools => "tools",
            Boundary::Engine => "engine",
        };
        write!(f, "{label}")
    }
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum EngineError {
    // ─────────────────────────────────────────────────────────────
    // Interpreter errors (LUM-010 to LUM-014)
    // ─────────────────────────────────────────────────────────────
    #[error("LUM-010: Unknown identifier '{name}'")]
    UnknownIdentifier { name: String },

    #[error("LUM-011: Cannot reassign constant '{name}'")]
    ConstantReassigned { name: String },

    #[error("LUM-012: Parallel tasks cannot change state")]
    ParallelStateWrite { line: Option<u32> },

    #[error("LUM-013: Functions cannot change state")]
    FunctionStateWrite { line: Option<u32> },

    #[error("LUM-014: Statement nesting exceeds depth limit {limit}")]
    DepthExceeded { limit: u32 },

    // ─────────────────────────────────────────────────────────────
    // Capability / policy (LUM-020 to LUM-021)
    // ─────────────────────────────────────────────────────────────
    #[error("LUM-020: Tool '{tool}' requires capability '{capability}' which is not granted")]
    CapabilityDenied { tool: String, capability: String },

    #[error("LUM-021: Tool '{tool}' is blocked by pack policy: {reason}")]
    PolicyDenied { tool: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Tool binding / execution (LUM-030 to LUM-035)
    // ─────────────────────────────────────────────────────────────
    #[error("LUM-030: Tool '{tool}' is not bound to a runner entry")]
    MissingBinding { tool: String },

    #[error("LUM-031: Tool '{tool}' uses unknown runner '{runner}'")]
    UnknownRunner { tool: String, runner: String },

    #[error("LUM-032: Tool '{tool}' failed with {error_type}: {message}")]
    ToolFailed {
        tool: String,
        error_type: String,
        message: String,
    },

    #[error("LUM-033: Tool '{tool}' process error: {message}")]
    ToolProcess { tool: String, message: String },

    #[error("LUM-034: Tool '{tool}' timed out after {seconds}s")]
    ToolTimeout { tool: String, seconds: u64 },

    #[error("LUM-035: Unknown tool '{tool}'")]
    UnknownTool { tool: String },

    // ─────────────────────────────────────────────────────────────
    // Tool I/O schema (LUM-040 to LUM-042)
    // ─────────────────────────────────────────────────────────────
    #[error("LUM-040: Tool {phase} for '{tool}' is missing required field '{field}'")]
    SchemaMissingField {
        tool: String,
        phase: String,
        field: String,
    },

    #[error("LUM-041: Tool {phase} field '{field}' for '{tool}' must be {expected}, got {actual}")]
    SchemaFieldType {
        tool: String,
        phase: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("LUM-042: Tool {phase} for '{tool}' must be an object, got {actual}")]
    SchemaNotObject {
        tool: String,
        phase: String,
        actual: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Provider / memory boundaries (LUM-050 to LUM-052)
    // ─────────────────────────────────────────────────────────────
    #[error("LUM-050: AI provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("LUM-051: Unknown AI profile '{name}'")]
    UnknownAiProfile { name: String },

    #[error("LUM-052: Memory error: {message}")]
    Memory { message: String },

    // ─────────────────────────────────────────────────────────────
    // Replay / explain (LUM-060 to LUM-062)
    // ─────────────────────────────────────────────────────────────
    #[error("LUM-060: Replay hash validation failed: stored hash does not match canonical entries")]
    ReplayHashMismatch,

    #[error("LUM-061: Replay log not found: {path}")]
    ReplayLogMissing { path: String },

    #[error("LUM-062: Replay log is not valid JSON: {details}")]
    ReplayLogInvalid { details: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration / misc (LUM-070 to LUM-073)
    // ─────────────────────────────────────────────────────────────
    #[error("LUM-070: Config error: {message}")]
    Config { message: String },

    #[error("LUM-071: Theme must be one of: {allowed}")]
    InvalidTheme { allowed: String },

    #[error("LUM-072: Flow '{name}' not found in program")]
    UnknownFlow { name: String },

    #[error("LUM-073: Function '{name}' not found in program")]
    UnknownFunction { name: String },

    #[error("LUM-080: Storage error: {message}")]
    Store { message: String },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::CapabilityDenied { .. } => ErrorCategory::Capability,
            EngineError::PolicyDenied { .. } => ErrorCategory::Policy,
            EngineError::ToolFailed { .. }
            | EngineError::ToolProcess { .. }
            | EngineError::ToolTimeout { .. } => ErrorCategory::Tool,
            EngineError::SchemaMissingField { .. }
            | EngineError::SchemaFieldType { .. }
            | EngineError::SchemaNotObject { .. } => ErrorCategory::Schema,
            EngineError::Provider { .. } | EngineError::UnknownAiProfile { .. } => {
                ErrorCategory::Provider
            }
            EngineError::Memory { .. } => ErrorCategory::Memory,
            EngineError::MissingBinding { .. }
            | EngineError::UnknownRunner { .. }
            | EngineError::UnknownTool { .. }
            | EngineError::Config { .. }
            | EngineError::InvalidTheme { .. }
            | EngineError::YamlParse(_) => ErrorCategory::Config,
            _ => ErrorCategory::Engine,
        }
    }

    /// Whether a retry can reasonably succeed without a config change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ToolTimeout { .. } | EngineError::ToolProcess { .. }
        )
    }

    pub fn boundary(&self) -> Boundary {
        if matches!(self, EngineError::Store { .. }) {
            return Boundary::Store;
        }
        match self.category() {
            ErrorCategory::Provider => Boundary::Ai,
            ErrorCategory::Memory => Boundary::Memory,
            ErrorCategory::Tool | ErrorCategory::Capability | ErrorCategory::Policy => {
                Boundary::Tools
            }
            _ => Boundary::Engine,
        }
    }
}

impl FixSuggestion for EngineError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            EngineError::UnknownIdentifier { .. } => {
                Some("Declare the name with `let` before referencing it")
            }
            EngineError::ConstantReassigned { .. } => {
                Some("Use a new name, or declare the original without `constant`")
            }
            EngineError::ParallelStateWrite { .. } => {
                Some("Write to a local inside the parallel task and merge after the block")
            }
            EngineError::FunctionStateWrite { .. } => {
                Some("Return the value from the function and `set` state at the call site")
            }
            EngineError::DepthExceeded { .. } => {
                Some("Flatten deeply nested statements or raise max_depth in config")
            }
            EngineError::CapabilityDenied { .. } => {
                Some("Add the named capability to the capabilities list in .lumen/config.yaml")
            }
            EngineError::PolicyDenied { .. } => {
                Some("Allow the pack in .lumen/packs policy or pin the tool to a trusted pack")
            }
            EngineError::MissingBinding { .. } => {
                Some("Add the tool to the tools: table in .lumen/config.yaml or install its pack")
            }
            EngineError::UnknownRunner { .. } => {
                Some("Use a supported runner (python, node) in the tool binding")
            }
            EngineError::ToolFailed { .. } => Some("Fix the tool implementation and try again"),
            EngineError::ToolProcess { .. } => {
                Some("Check the runner is installed and the entry module loads")
            }
            EngineError::ToolTimeout { .. } => {
                Some("Raise timeout_seconds for the tool or make the tool faster")
            }
            EngineError::UnknownTool { .. } => {
                Some("Declare the tool in the program before calling it")
            }
            EngineError::SchemaMissingField { .. } => {
                Some("Add the field to the payload or mark it optional in the tool declaration")
            }
            EngineError::SchemaFieldType { .. } => {
                Some("Match the declared field type (text, number, boolean, json)")
            }
            EngineError::SchemaNotObject { .. } => {
                Some("Tool payloads must be JSON objects matching the declared fields")
            }
            EngineError::Provider { .. } => {
                Some("Check the provider name in the AI profile and its availability")
            }
            EngineError::UnknownAiProfile { .. } => {
                Some("Declare the AI profile in the program before calling it")
            }
            EngineError::Memory { .. } => {
                Some("Check the memory store under .lumen/ is readable and writable")
            }
            EngineError::ReplayHashMismatch => {
                Some("Re-run the flow to regenerate the log, or pass --no-verify to inspect it")
            }
            EngineError::ReplayLogMissing { .. } => {
                Some("Run `lumen run --explain` first, or pass --log with a valid path")
            }
            EngineError::ReplayLogInvalid { .. } => {
                Some("Regenerate the explain log with `lumen run --explain`")
            }
            EngineError::Config { .. } => Some("Check .lumen/config.yaml syntax and values"),
            EngineError::InvalidTheme { .. } => Some("Use one of the allowed theme names"),
            EngineError::UnknownFlow { .. } => Some("Check the flow name against the program"),
            EngineError::UnknownFunction { .. } => {
                Some("Declare the function in the program before calling it")
            }
            EngineError::Store { .. } => {
                Some("Check the storage file under .lumen/ is readable and writable")
            }
            EngineError::Execution(_) => Some("Check the statement at the reported line"),
            EngineError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            EngineError::Io(_) => Some("Check file path and permissions"),
        }
    }
}
