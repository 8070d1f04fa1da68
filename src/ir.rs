//! Lowered flow IR (v0.1)
//!
//! The engine consumes programs that are already parsed and lowered by the
//! language front-end; this module defines the exchange format. Statements
//! and expressions are closed sum types so new kinds are compile-time
//! checked additions, dispatched with exhaustive matches.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A complete lowered program: flows plus the declaration tables the
/// executor needs (tools, functions, AI profiles).
#[derive(Debug, Clone, Deserialize)]
pub struct Program {
    pub name: String,
    #[serde(default)]
    pub flows: Vec<Flow>,
    #[serde(default)]
    pub tools: Vec<ToolDecl>,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
    #[serde(default)]
    pub ai_profiles: Vec<AiProfile>,
}

impl Program {
    pub fn flow(&self, name: &str) -> Option<&Flow> {
        self.flows.iter().find(|f| f.name == name)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDecl> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn ai_profile(&self, name: &str) -> Option<&AiProfile> {
        self.ai_profiles.iter().find(|p| p.name == name)
    }
}

/// Immutable named statement sequence with a typed I/O contract.
#[derive(Debug, Clone, Deserialize)]
pub struct Flow {
    pub name: String,
    #[serde(default)]
    pub body: Vec<Statement>,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

/// Source position carried by every statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Pos {
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

/// The closed statement inventory.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    Let {
        name: String,
        #[serde(default)]
        constant: bool,
        expression: Expression,
        #[serde(flatten)]
        pos: Pos,
    },
    Set {
        target: AssignTarget,
        expression: Expression,
        #[serde(flatten)]
        pos: Pos,
    },
    If {
        condition: Expression,
        #[serde(default)]
        then_body: Vec<Statement>,
        #[serde(default)]
        else_body: Vec<Statement>,
        #[serde(flatten)]
        pos: Pos,
    },
    Repeat {
        count: Expression,
        #[serde(default)]
        body: Vec<Statement>,
        #[serde(flatten)]
        pos: Pos,
    },
    RepeatWhile {
        condition: Expression,
        #[serde(default)]
        body: Vec<Statement>,
        #[serde(flatten)]
        pos: Pos,
    },
    ForEach {
        var: String,
        iterable: Expression,
        #[serde(default)]
        body: Vec<Statement>,
        #[serde(flatten)]
        pos: Pos,
    },
    Match {
        expression: Expression,
        #[serde(default)]
        cases: Vec<MatchCase>,
        #[serde(default)]
        otherwise: Option<Vec<Statement>>,
        #[serde(flatten)]
        pos: Pos,
    },
    TryCatch {
        #[serde(default)]
        try_body: Vec<Statement>,
        catch_var: String,
        #[serde(default)]
        catch_body: Vec<Statement>,
        #[serde(flatten)]
        pos: Pos,
    },
    Await {
        name: String,
        #[serde(flatten)]
        pos: Pos,
    },
    Return {
        expression: Expression,
        #[serde(flatten)]
        pos: Pos,
    },
    Parallel {
        tasks: Vec<ParallelTask>,
        #[serde(flatten)]
        pos: Pos,
    },
    AskAi {
        profile: String,
        input: Expression,
        #[serde(default)]
        target: Option<String>,
        #[serde(flatten)]
        pos: Pos,
    },
    Save {
        record: String,
        expression: Expression,
        #[serde(flatten)]
        pos: Pos,
    },
    Create {
        record: String,
        expression: Expression,
        #[serde(flatten)]
        pos: Pos,
    },
    Update {
        record: String,
        expression: Expression,
        #[serde(flatten)]
        pos: Pos,
    },
    Delete {
        record: String,
        expression: Expression,
        #[serde(flatten)]
        pos: Pos,
    },
    ThemeChange {
        value: String,
        #[serde(flatten)]
        pos: Pos,
    },
    Log {
        level: String,
        message: Expression,
        #[serde(flatten)]
        pos: Pos,
    },
}

impl Statement {
    pub fn pos(&self) -> Pos {
        match self {
            Statement::Let { pos, .. }
            | Statement::Set { pos, .. }
            | Statement::If { pos, .. }
            | Statement::Repeat { pos, .. }
            | Statement::RepeatWhile { pos, .. }
            | Statement::ForEach { pos, .. }
            | Statement::Match { pos, .. }
            | Statement::TryCatch { pos, .. }
            | Statement::Await { pos, .. }
            | Statement::Return { pos, .. }
            | Statement::Parallel { pos, .. }
            | Statement::AskAi { pos, .. }
            | Statement::Save { pos, .. }
            | Statement::Create { pos, .. }
            | Statement::Update { pos, .. }
            | Statement::Delete { pos, .. }
            | Statement::ThemeChange { pos, .. }
            | Statement::Log { pos, .. } => *pos,
        }
    }

    /// Governed side effects forbidden inside parallel task bodies.
    pub fn is_governed_effect(&self) -> bool {
        matches!(
            self,
            Statement::Save { .. }
                | Statement::Create { .. }
                | Statement::Update { .. }
                | Statement::Delete { .. }
                | Statement::ThemeChange { .. }
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Statement::Let { .. } => "let",
            Statement::Set { .. } => "set",
            Statement::If { .. } => "if",
            Statement::Repeat { .. } => "repeat",
            Statement::RepeatWhile { .. } => "repeat_while",
            Statement::ForEach { .. } => "for_each",
            Statement::Match { .. } => "match",
            Statement::TryCatch { .. } => "try",
            Statement::Await { .. } => "await",
            Statement::Return { .. } => "return",
            Statement::Parallel { .. } => "parallel",
            Statement::AskAi { .. } => "ask_ai",
            Statement::Save { .. } => "save",
            Statement::Create { .. } => "create",
            Statement::Update { .. } => "update",
            Statement::Delete { .. } => "delete",
            Statement::ThemeChange { .. } => "theme",
            Statement::Log { .. } => "log",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchCase {
    pub pattern: Expression,
    #[serde(default)]
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParallelTask {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Vec<Statement>,
}

/// Assignment target: a local name or a dotted state path.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssignTarget {
    Local { name: String },
    StatePath { path: Vec<String> },
}

impl AssignTarget {
    pub fn describe(&self) -> String {
        match self {
            AssignTarget::Local { name } => name.clone(),
            AssignTarget::StatePath { path } => format!("state.{}", path.join(".")),
        }
    }
}

/// The closed expression inventory.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    Literal {
        value: Value,
    },
    Ref {
        name: String,
    },
    StatePath {
        path: Vec<String>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    List {
        items: Vec<Expression>,
    },
    Map {
        entries: BTreeMap<String, Expression>,
    },
    ToolCall {
        tool: String,
        #[serde(default)]
        args: BTreeMap<String, Expression>,
    },
    FunctionCall {
        function: String,
        #[serde(default)]
        args: BTreeMap<String, Expression>,
    },
    FlowCall {
        flow: String,
        #[serde(default)]
        args: BTreeMap<String, Expression>,
    },
    AsyncCall {
        expression: Box<Expression>,
    },
}

impl Expression {
    /// True when this is a single call expression (the only shape allowed
    /// under `let x is async ...`).
    pub fn is_single_call(&self) -> bool {
        matches!(
            self,
            Expression::ToolCall { .. }
                | Expression::FunctionCall { .. }
                | Expression::FlowCall { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Tool declaration: kind decides the execution path and the derived
/// capabilities; fields are the I/O schema.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub kind: ToolKind,
    /// For file-kind tools: "read" or "write".
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub purity: Option<String>,
    #[serde(default)]
    pub input_fields: Vec<ToolField>,
    #[serde(default)]
    pub output_fields: Vec<ToolField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Python,
    Node,
    Network,
    File,
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ToolKind::Python => "python",
            ToolKind::Node => "node",
            ToolKind::Network => "network",
            ToolKind::File => "file",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolField {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub body: Vec<Statement>,
}

/// AI profile: provider routing plus the tool surface exposed to the model.
#[derive(Debug, Clone, Deserialize)]
pub struct AiProfile {
    pub name: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// "text" or "structured"
    #[serde(default = "default_input_mode")]
    pub input_mode: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_memory")]
    pub memory: bool,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_input_mode() -> String {
    "text".to_string()
}

fn default_memory() -> bool {
    true
}

/// Parse a lowered program from its YAML exchange form.
pub fn parse_program(yaml: &str) -> Result<Program, crate::error::EngineError> {
    Ok(serde_yaml::from_str(yaml)?)
}
